//! Segment sources backed by libpcap.
//!
//! Capture files and live interfaces are both read through the `pcap`
//! crate. Reading blocks, so a reader runs on tokio's blocking pool, cuts
//! every frame down to its TCP segment and feeds a [`ChannelSource`]. The
//! pipeline only ever awaits that channel.

mod packet;

use std::{
    path::PathBuf,
    time::{Duration, SystemTime},
};

use pcap::{Activated, Active, Capture, PacketHeader};
use thiserror::Error;
use tokio::{sync::mpsc, task};
use tracing::{debug, info, trace};

pub use self::packet::{LinkType, parse_packet};
use crate::{
    config::CaptureSource,
    segment::{ChannelSource, Segment, SegmentSource},
};

/// Bytes captured per frame on a live interface.
const SNAPLEN: i32 = 262_144;
/// How long a live read waits before checking whether anyone still listens.
const READ_TIMEOUT_MS: i32 = 250;
/// Segments parsed ahead of the pipeline.
const SEGMENT_BACKLOG: usize = 1024;

/// Failures of a capture source. Any of these ends the run.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("cannot open capture file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: pcap::Error,
    },
    #[error("cannot capture on {interface}: {source}")]
    Device {
        interface: String,
        #[source]
        source: pcap::Error,
    },
    #[error("invalid capture filter `{filter}`: {source}")]
    Filter {
        filter: String,
        #[source]
        source: pcap::Error,
    },
    #[error("capture read failed: {0}")]
    Read(#[from] pcap::Error),
    #[error("unsupported link type {0}")]
    UnsupportedLinkType(i32),
    #[error("capture reader stopped: {0}")]
    Reader(#[from] task::JoinError),
}

/// Open the configured capture, keeping only TCP segments to or from
/// `service_port`.
///
/// # Errors
///
/// Returns the error libpcap reports while opening the file or device or
/// installing the port filter, and [`CaptureError::UnsupportedLinkType`]
/// for link layers the parser does not know.
pub async fn open_source(
    source: &CaptureSource,
    service_port: Option<u16>,
) -> Result<Box<dyn SegmentSource>, CaptureError> {
    let channel = match source {
        CaptureSource::File(path) => {
            let path = path.clone();
            debug!(path = %path.display(), "reading capture file");
            let capture = task::spawn_blocking(move || {
                Capture::from_file(&path).map_err(|source| CaptureError::Open { path, source })
            })
            .await??;
            start(capture, service_port)?
        }
        CaptureSource::Interface(interface) => {
            let name = interface.clone();
            let capture = task::spawn_blocking(move || open_device(&name)).await??;
            info!(%interface, "capturing live traffic");
            start(capture, service_port)?
        }
    };
    Ok(Box::new(channel))
}

fn open_device(interface: &str) -> Result<Capture<Active>, CaptureError> {
    let device_error = |source: pcap::Error| CaptureError::Device {
        interface: interface.to_owned(),
        source,
    };
    Capture::from_device(interface)
        .map_err(device_error)?
        .promisc(true)
        .snaplen(SNAPLEN)
        .timeout(READ_TIMEOUT_MS)
        .open()
        .map_err(device_error)
}

/// Install the port filter and start reading `capture` on the blocking pool.
fn start<T>(mut capture: Capture<T>, service_port: Option<u16>) -> Result<ChannelSource, CaptureError>
where
    T: Activated + ?Sized + 'static,
    Capture<T>: Send,
{
    let datalink = capture.get_datalink();
    let link = LinkType::from_datalink(datalink.0)
        .ok_or(CaptureError::UnsupportedLinkType(datalink.0))?;
    if let Some(port) = service_port {
        // BPF matches VLAN-tagged frames only after the `vlan` keyword.
        let filter = format!("tcp port {port} or (vlan and tcp port {port})");
        capture
            .filter(&filter, true)
            .map_err(|source| CaptureError::Filter { filter, source })?;
    }
    let (tx, rx) = mpsc::channel(SEGMENT_BACKLOG);
    let reader = task::spawn_blocking(move || pump(capture, link, &tx));
    Ok(ChannelSource::with_producer(rx, reader))
}

/// Forward every TCP segment of `capture` until it ends or the consumer
/// goes away.
fn pump<T>(mut capture: Capture<T>, link: LinkType, tx: &mpsc::Sender<Segment>) -> Result<(), CaptureError>
where
    T: Activated + ?Sized,
{
    let mut frames = 0u64;
    loop {
        let packet = match capture.next_packet() {
            Ok(packet) => packet,
            Err(pcap::Error::NoMorePackets) => break,
            Err(pcap::Error::TimeoutExpired) => {
                if tx.is_closed() {
                    break;
                }
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        frames += 1;
        let Some(segment) = parse_packet(link, packet.data, timestamp(packet.header)) else {
            trace!(frame = frames, "frame carries no TCP segment");
            continue;
        };
        if tx.blocking_send(segment).is_err() {
            debug!("segment consumer stopped; closing capture");
            break;
        }
    }
    debug!(frames, "capture finished");
    Ok(())
}

fn timestamp(header: &PacketHeader) -> SystemTime {
    let secs = u64::try_from(header.ts.tv_sec).unwrap_or_default();
    let micros = u64::try_from(header.ts.tv_usec).unwrap_or_default();
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs) + Duration::from_micros(micros)
}
