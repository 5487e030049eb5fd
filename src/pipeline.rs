//! Asynchronous reconstruction pipeline.
//!
//! [`run`] reads segments from a [`SegmentSource`] and routes each one to a
//! worker task owning that connection's [`Connection`]. Workers run on a
//! [`TaskTracker`] and are fed through bounded channels, so a slow
//! connection applies back-pressure to the reader instead of growing without
//! bound. Every worker forwards its messages to a single dispatcher that
//! hands them to the sink in arrival order.
//!
//! A panicking worker is caught and logged; its connection is abandoned and
//! the others keep running. Cancellation and end of input both drain the
//! queued segments, close every connection and stop the dispatcher once the
//! last message has been delivered.

use std::{
    any::Any,
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    capture::CaptureError,
    config::PipelineConfig,
    connection::Connection,
    endpoint::{ConnectionKey, Direction},
    message::Message,
    metrics,
    router::{Route, route},
    segment::{Segment, SegmentSource},
    sink::MessageSink,
};

/// Counters describing a finished run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Segments read from the source.
    pub segments: u64,
    /// Connections tracked.
    pub connections: u64,
    /// Messages handed to the sink.
    pub messages: u64,
    /// Messages the sink failed to handle.
    pub sink_errors: u64,
    /// Connections abandoned after a framing error.
    pub decode_errors: u64,
    /// Connection workers that panicked.
    pub panics: u64,
}

/// Keeps the active-connections gauge accurate even if a worker panics.
struct ActiveConnection;

impl ActiveConnection {
    fn new() -> Self {
        metrics::inc_connections();
        Self
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) { metrics::dec_connections(); }
}

struct Worker {
    tx: mpsc::Sender<(Direction, Segment)>,
    fin: [bool; 2],
}

#[derive(Default)]
struct Shared {
    decode_errors: AtomicU64,
    panics: AtomicU64,
}

/// Reconstruct messages from `source` until it is exhausted or `shutdown`
/// is cancelled, delivering them to `sink`.
///
/// # Errors
///
/// Returns the [`CaptureError`] that stopped the source. Connections are
/// still drained and closed before returning.
pub async fn run<S, K>(
    config: PipelineConfig,
    source: &mut S,
    sink: &mut K,
    shutdown: CancellationToken,
) -> Result<RunSummary, CaptureError>
where
    S: SegmentSource + ?Sized,
    K: MessageSink + ?Sized,
{
    let (msg_tx, msg_rx) = mpsc::channel(config.channel_capacity.max(1));
    let shared = Arc::new(Shared::default());
    let routing = route_segments(config, source, msg_tx, Arc::clone(&shared), shutdown);
    let (routed, (messages, sink_errors)) = tokio::join!(routing, dispatch(msg_rx, sink));
    let (mut summary, result) = routed;
    summary.messages = messages;
    summary.sink_errors = sink_errors;
    summary.decode_errors = shared.decode_errors.load(Ordering::Relaxed);
    summary.panics = shared.panics.load(Ordering::Relaxed);
    info!(
        segments = summary.segments,
        connections = summary.connections,
        messages = summary.messages,
        decode_errors = summary.decode_errors,
        "capture finished"
    );
    result.map(|()| summary)
}

async fn route_segments<S>(
    config: PipelineConfig,
    source: &mut S,
    msg_tx: mpsc::Sender<Message>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) -> (RunSummary, Result<(), CaptureError>)
where
    S: SegmentSource + ?Sized,
{
    let tracker = TaskTracker::new();
    let mut workers: HashMap<ConnectionKey, Worker> = HashMap::new();
    let mut summary = RunSummary::default();

    let result = loop {
        let next = tokio::select! {
            biased;

            () = shutdown.cancelled() => {
                info!("shutdown requested");
                break Ok(());
            }
            next = source.next_segment() => next,
        };
        let segment = match next {
            Ok(Some(segment)) => segment,
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        };
        summary.segments += 1;

        let (key, direction) = match route(&workers, &segment, config.service_port) {
            Route::Existing(key, direction) => (key, direction),
            Route::New(key, direction) => {
                debug!(connection = %key, "new connection");
                summary.connections += 1;
                let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
                spawn_worker(&tracker, key, config, rx, msg_tx.clone(), Arc::clone(&shared));
                workers.insert(
                    key,
                    Worker {
                        tx,
                        fin: [false; 2],
                    },
                );
                (key, direction)
            }
            Route::Ignore => continue,
        };
        let Some(worker) = workers.get_mut(&key) else {
            continue;
        };
        let finished = segment.flags.rst || {
            if segment.flags.fin {
                worker.fin[direction.index()] = true;
            }
            worker.fin.iter().all(|fin| *fin)
        };
        let delivered = worker.tx.send((direction, segment)).await.is_ok();
        if !delivered {
            warn!(connection = %key, "connection worker gone; forgetting connection");
        }
        if finished || !delivered {
            // Dropping the sender lets the worker drain and close; a reused
            // 4-tuple then starts a fresh connection.
            workers.remove(&key);
        }
    };

    // Closing every channel lets each worker drain its queue and close.
    drop(workers);
    drop(msg_tx);
    tracker.close();
    tracker.wait().await;
    (summary, result)
}

fn spawn_worker(
    tracker: &TaskTracker,
    key: ConnectionKey,
    config: PipelineConfig,
    rx: mpsc::Receiver<(Direction, Segment)>,
    msg_tx: mpsc::Sender<Message>,
    shared: Arc<Shared>,
) {
    tracker.spawn(async move {
        let worker = AssertUnwindSafe(connection_worker(key, config, rx, msg_tx, &shared));
        if let Err(panic) = worker.catch_unwind().await {
            shared.panics.fetch_add(1, Ordering::Relaxed);
            error!(connection = %key, panic = %panic_message(&*panic), "connection worker panicked");
        }
    });
}

async fn connection_worker(
    key: ConnectionKey,
    config: PipelineConfig,
    mut rx: mpsc::Receiver<(Direction, Segment)>,
    msg_tx: mpsc::Sender<Message>,
    shared: &Shared,
) {
    let _active = ActiveConnection::new();
    let mut connection = Connection::new(key, &config);
    let mut out = Vec::new();
    while let Some((direction, segment)) = rx.recv().await {
        if connection.observe(direction, &segment, &mut out).is_err() {
            shared.decode_errors.fetch_add(1, Ordering::Relaxed);
        }
        for message in out.drain(..) {
            if msg_tx.send(message).await.is_err() {
                debug!(connection = %key, "dispatcher stopped");
                return;
            }
        }
    }
    connection.close();
}

async fn dispatch<K>(mut rx: mpsc::Receiver<Message>, sink: &mut K) -> (u64, u64)
where
    K: MessageSink + ?Sized,
{
    let mut delivered = 0;
    let mut failed = 0;
    while let Some(message) = rx.recv().await {
        match sink.handle(&message) {
            Ok(()) => delivered += 1,
            Err(err) => {
                failed += 1;
                warn!(
                    connection = %message.connection,
                    stream_id = message.stream_id,
                    error = %err,
                    "sink failed to handle message"
                );
            }
        }
    }
    if let Err(err) = sink.flush() {
        warn!(error = %err, "sink failed to flush");
    }
    (delivered, failed)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}
