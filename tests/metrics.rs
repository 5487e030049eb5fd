#![cfg(feature = "metrics")]
//! Tests for `grpcdump` metrics.
//!
//! These tests verify that counters and gauges update as expected using
//! `metrics_util::debugging::DebuggingRecorder`.

mod common;

use common::{data, grpc_body, key, preface, replay, request_headers, to_server};
use grpcdump::{Direction, MessageKind, metrics as m};
use metrics::{SharedString, Unit};
use metrics_util::{
    CompositeKey,
    debugging::{DebugValue, DebuggingRecorder, Snapshotter},
};
use rstest::rstest;

/// Creates a debugging recorder and snapshotter for metrics testing.
fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

type Snapshot = Vec<(CompositeKey, Option<Unit>, Option<SharedString>, DebugValue)>;

fn counter(snapshot: &Snapshot, name: &str, label: Option<(&str, &str)>) -> u64 {
    snapshot
        .iter()
        .filter(|(k, _, _, _)| {
            k.key().name() == name
                && label.is_none_or(|(key, value)| {
                    k.key()
                        .labels()
                        .any(|l| l.key() == key && l.value() == value)
                })
        })
        .map(|(_, _, _, v)| match v {
            DebugValue::Counter(c) => *c,
            _ => 0,
        })
        .sum()
}

#[rstest]
#[case(Direction::ClientToServer, "client_to_server")]
#[case(Direction::ServerToClient, "server_to_client")]
fn frame_metric_is_labelled_by_direction(#[case] direction: Direction, #[case] label: &str) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || m::inc_frames(direction));
    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter(&snapshot, m::FRAMES_DECODED, Some(("direction", label))), 1);
}

#[test]
fn reconstruction_updates_counters() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let mut bytes = preface();
    bytes.extend(request_headers(1, "/a.B/C"));
    bytes.extend(data(1, &grpc_body(b"X"), true));
    let mut garbage = preface();
    garbage.extend([0, 0, 0, 0x7f, 0, 0, 0, 0, 0]);

    metrics::with_local_recorder(&recorder, || {
        let _ = replay(&[to_server(key(1), &bytes), to_server(key(2), &garbage)]);
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter(&snapshot, m::MESSAGES_EMITTED, Some(("kind", MessageKind::Request.as_str()))),
        1
    );
    assert_eq!(
        counter(&snapshot, m::MESSAGES_EMITTED, Some(("kind", MessageKind::Header.as_str()))),
        1
    );
    assert_eq!(counter(&snapshot, m::DECODE_ERRORS, None), 1);
    // SETTINGS twice, HEADERS and DATA.
    assert_eq!(counter(&snapshot, m::FRAMES_DECODED, None), 4);
}

#[test]
fn active_connection_gauge_returns_to_zero() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        let _ = replay(&[to_server(key(1), &preface())]);
    });
    let gauge = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find(|(k, _, _, _)| k.key().name() == m::CONNECTIONS_ACTIVE)
        .map(|(_, _, _, v)| v);
    assert!(matches!(gauge, Some(DebugValue::Gauge(g)) if g.into_inner().abs() < f64::EPSILON));
}
