//! Capture files replayed through the full pipeline.

mod common;

use std::{fs, path::PathBuf};

use common::{SERVICE_PORT, config, data, grpc_body, preface, request_headers};
use grpcdump::{
    CaptureError,
    CollectingSink,
    MessageKind,
    SegmentSource,
    capture::open_source,
    config::CaptureSource,
    pipeline,
};
use tokio_util::sync::CancellationToken;

/// Ethernet/IPv4/TCP frame from 10.0.0.1:`src` to 10.0.0.2:`dst`.
fn ethernet_frame(src: u16, dst: u16, seq: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
    let total = u16::try_from(40 + payload.len()).expect("small payload");
    let mut frame = vec![0; 12];
    frame.extend_from_slice(&[0x08, 0x00, 0x45, 0]);
    frame.extend_from_slice(&total.to_be_bytes());
    frame.extend_from_slice(&[0, 0, 0x40, 0, 64, 6, 0, 0, 10, 0, 0, 1, 10, 0, 0, 2]);
    frame.extend_from_slice(&src.to_be_bytes());
    frame.extend_from_slice(&dst.to_be_bytes());
    frame.extend_from_slice(&seq.to_be_bytes());
    frame.extend_from_slice(&[0, 0, 0, 0, 0x50, flags, 0xff, 0xff, 0, 0, 0, 0]);
    frame.extend_from_slice(payload);
    frame
}

fn pcap(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0xa1b2_c3d4_u32.to_le_bytes());
    out.extend_from_slice(&[2, 0, 4, 0]);
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(&65_535_u32.to_le_bytes());
    out.extend_from_slice(&1_u32.to_le_bytes());
    for (i, frame) in frames.iter().enumerate() {
        let len = u32::try_from(frame.len()).expect("small frame");
        out.extend_from_slice(&u32::try_from(i).expect("few frames").to_le_bytes());
        out.extend_from_slice(&0_u32.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(frame);
    }
    out
}

fn capture_file(name: &str, frames: &[Vec<u8>]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("grpcdump-{name}-{}.pcap", std::process::id()));
    fs::write(&path, pcap(frames)).expect("write capture");
    path
}

fn client_traffic() -> Vec<u8> {
    let mut bytes = preface();
    bytes.extend(request_headers(1, "/a.B/C"));
    bytes.extend(data(1, &grpc_body(b"captured"), true));
    bytes
}

#[tokio::test]
async fn pcap_capture_reconstructs_requests() {
    let stream = client_traffic();
    let (head, tail) = stream.split_at(30);
    let frames = vec![
        ethernet_frame(50_000, SERVICE_PORT, 99, 0x02, &[]),
        // Out of order: the tail arrives first.
        ethernet_frame(50_000, SERVICE_PORT, 100 + 30, 0x18, tail),
        ethernet_frame(50_000, SERVICE_PORT, 100, 0x18, head),
        // Unrelated traffic on another port.
        ethernet_frame(50_001, 8080, 1, 0x18, b"noise"),
    ];
    let path = capture_file("reorder", &frames);
    let mut source = open_source(&CaptureSource::File(path.clone()), Some(SERVICE_PORT))
        .await
        .expect("readable capture");
    let mut sink = CollectingSink::new();
    let summary = pipeline::run(config(), &mut *source, &mut sink, CancellationToken::new())
        .await
        .expect("complete capture");
    fs::remove_file(&path).expect("cleanup");

    assert_eq!(summary.segments, 3);
    let kinds: Vec<_> = sink.messages().iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![MessageKind::Header, MessageKind::Request]);
    assert_eq!(sink.messages()[1].payload.as_ref(), b"captured");
    assert_eq!(sink.messages()[1].timestamp_micros(), 2_000_000);
}

#[tokio::test]
async fn capture_file_is_opened_from_disk() {
    let path = capture_file("single", &[ethernet_frame(50_000, SERVICE_PORT, 1, 0x18, b"x")]);
    let mut source = open_source(&CaptureSource::File(path.clone()), Some(SERVICE_PORT))
        .await
        .expect("readable capture");
    let segment = source.next_segment().await.expect("read").expect("one segment");
    assert_eq!(segment.payload.as_ref(), b"x");
    fs::remove_file(&path).expect("cleanup");
}

#[tokio::test]
async fn missing_file_and_unknown_interface_are_reported() {
    let missing = CaptureSource::File(PathBuf::from("/nonexistent/grpcdump.pcap"));
    assert!(matches!(
        open_source(&missing, None).await,
        Err(CaptureError::Open { .. })
    ));
    let live = CaptureSource::Interface("grpcdump-no-such-if0".into());
    assert!(matches!(
        open_source(&live, Some(SERVICE_PORT)).await,
        Err(CaptureError::Device { .. })
    ));
}
