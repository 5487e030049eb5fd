//! Captured TCP segments and the sources that produce them.
//!
//! The reconstruction pipeline is agnostic to where segments come from: a
//! capture file, a live feeder pushing into a channel, or an in-memory list
//! built by tests. All of them implement [`SegmentSource`].

use std::{collections::VecDeque, net::SocketAddr, time::SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::capture::CaptureError;

/// TCP control flags relevant to connection tracking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TcpFlags {
    /// Synchronise sequence numbers (connection opening).
    pub syn: bool,
    /// Acknowledgement field is significant.
    pub ack: bool,
    /// Sender finished sending.
    pub fin: bool,
    /// Connection reset.
    pub rst: bool,
}

impl TcpFlags {
    /// Parse the flag bits of a TCP header's flags byte.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self {
            fin: bits & 0x01 != 0,
            syn: bits & 0x02 != 0,
            rst: bits & 0x04 != 0,
            ack: bits & 0x10 != 0,
        }
    }
}

/// One observed TCP segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    /// Sending endpoint.
    pub src: SocketAddr,
    /// Receiving endpoint.
    pub dst: SocketAddr,
    /// TCP sequence number of the first payload byte (or of the SYN).
    ///
    /// `None` means the source already delivers bytes in order.
    pub seq: Option<u32>,
    /// Control flags.
    pub flags: TcpFlags,
    /// Application payload.
    pub payload: Bytes,
    /// Capture timestamp.
    pub timestamp: SystemTime,
}

impl Segment {
    /// Create an in-order segment carrying `payload`.
    #[must_use]
    pub fn new(
        src: SocketAddr,
        dst: SocketAddr,
        payload: impl Into<Bytes>,
        timestamp: SystemTime,
    ) -> Self {
        Self {
            src,
            dst,
            seq: None,
            flags: TcpFlags::default(),
            payload: payload.into(),
            timestamp,
        }
    }

    /// Attach a TCP sequence number.
    #[must_use]
    pub fn with_seq(mut self, seq: u32) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Replace the TCP flags.
    #[must_use]
    pub fn with_flags(mut self, flags: TcpFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Producer of captured segments.
///
/// `next_segment` is the only point where the pipeline may block. It returns
/// `Ok(None)` once the input is exhausted.
#[async_trait]
pub trait SegmentSource: Send {
    /// Fetch the next segment.
    ///
    /// # Errors
    ///
    /// Returns a [`CaptureError`] when the underlying capture cannot be read.
    async fn next_segment(&mut self) -> Result<Option<Segment>, CaptureError>;
}

/// Replays a fixed list of segments.
#[derive(Debug, Default)]
pub struct VecSource {
    segments: VecDeque<Segment>,
}

impl VecSource {
    /// Create a source yielding `segments` in order.
    #[must_use]
    pub fn new(segments: impl IntoIterator<Item = Segment>) -> Self {
        Self {
            segments: segments.into_iter().collect(),
        }
    }

    /// Number of segments not yet handed out.
    #[must_use]
    pub fn remaining(&self) -> usize { self.segments.len() }
}

#[async_trait]
impl SegmentSource for VecSource {
    async fn next_segment(&mut self) -> Result<Option<Segment>, CaptureError> {
        Ok(self.segments.pop_front())
    }
}

/// Receives segments pushed by another task; ends when all senders drop.
///
/// When built around a producer task, the task's error is reported once the
/// segments it sent have been consumed.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<Segment>,
    producer: Option<JoinHandle<Result<(), CaptureError>>>,
}

impl ChannelSource {
    /// Create a bounded channel and return the sender with its source.
    #[must_use]
    pub fn channel(capacity: usize) -> (mpsc::Sender<Segment>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                rx,
                producer: None,
            },
        )
    }

    /// Wrap the receiving end of a channel filled by `producer`.
    #[must_use]
    pub fn with_producer(
        rx: mpsc::Receiver<Segment>,
        producer: JoinHandle<Result<(), CaptureError>>,
    ) -> Self {
        Self {
            rx,
            producer: Some(producer),
        }
    }
}

#[async_trait]
impl SegmentSource for ChannelSource {
    async fn next_segment(&mut self) -> Result<Option<Segment>, CaptureError> {
        if let Some(segment) = self.rx.recv().await {
            return Ok(Some(segment));
        }
        match self.producer.take() {
            Some(producer) => producer.await?.map(|()| None),
            None => Ok(None),
        }
    }
}
