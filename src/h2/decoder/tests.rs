//! Unit tests for the connection-level frame decoder.

use bytes::{Bytes, BytesMut};
use fluke_hpack::Encoder;
use rstest::{fixture, rstest};

use super::{DecoderLimits, FrameDecoder, FrameEvent};
use crate::{
    endpoint::Direction,
    h2::{
        error::{ErrorCode, FrameError, HpackError},
        frame::{CONNECTION_PREFACE, Flags, Frame, FrameType},
        settings::{HEADER_TABLE_SIZE, MAX_FRAME_SIZE},
    },
};

const C2S: Direction = Direction::ClientToServer;
const S2C: Direction = Direction::ServerToClient;

fn wire(kind: FrameType, flags: Flags, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let frame =
        Frame::new(kind, flags, stream_id, Bytes::copy_from_slice(payload)).expect("small frame");
    let mut out = BytesMut::new();
    frame.encode(&mut out);
    out.to_vec()
}

fn request_block(encoder: &mut Encoder<'_>, path: &str) -> Vec<u8> {
    encoder.encode([
        (&b":method"[..], &b"POST"[..]),
        (&b":path"[..], path.as_bytes()),
        (&b"content-type"[..], &b"application/grpc"[..]),
    ])
}

fn drain(decoder: &mut FrameDecoder, direction: Direction) -> Vec<FrameEvent> {
    let mut events = Vec::new();
    while let Some(event) = decoder.next_event(direction).expect("well-formed frames") {
        events.push(event);
    }
    events
}

#[fixture]
fn decoder() -> FrameDecoder { FrameDecoder::new(DecoderLimits::default()) }

#[rstest]
fn preface_is_skipped_before_first_frame(mut decoder: FrameDecoder) {
    let mut bytes = CONNECTION_PREFACE.to_vec();
    bytes.extend(wire(FrameType::Settings, Flags::default(), 0, &[]));
    decoder.feed(C2S, &bytes);
    assert_eq!(
        drain(&mut decoder, C2S),
        vec![FrameEvent::Settings {
            ack: false,
            settings: Vec::new()
        }]
    );
    assert_eq!(decoder.buffered(C2S), 0);
}

#[rstest]
fn partial_preface_waits_for_more_bytes(mut decoder: FrameDecoder) {
    decoder.feed(C2S, &CONNECTION_PREFACE[..10]);
    assert_eq!(decoder.next_event(C2S), Ok(None));
    decoder.feed(C2S, &CONNECTION_PREFACE[10..]);
    decoder.feed(C2S, &wire(FrameType::Ping, Flags::default(), 0, &[0; 8]));
    assert_eq!(drain(&mut decoder, C2S), vec![FrameEvent::Ping { ack: false }]);
}

#[rstest]
fn capture_without_preface_decodes_mid_stream(mut decoder: FrameDecoder) {
    decoder.feed(C2S, &wire(FrameType::Data, Flags::END_STREAM, 1, b"xyz"));
    assert_eq!(
        drain(&mut decoder, C2S),
        vec![FrameEvent::Data {
            stream_id: 1,
            payload: Bytes::from_static(b"xyz"),
            end_stream: true,
        }]
    );
}

#[rstest]
fn frames_split_across_feeds_are_reassembled(mut decoder: FrameDecoder) {
    let bytes = wire(FrameType::Data, Flags::default(), 3, b"hello world");
    for chunk in bytes.chunks(4) {
        decoder.feed(S2C, chunk);
    }
    let events = drain(&mut decoder, S2C);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], FrameEvent::Data { payload, .. } if payload.as_ref() == b"hello world"));
}

#[rstest]
fn continuation_completes_header_block(mut decoder: FrameDecoder) {
    let mut encoder = Encoder::new();
    let block = request_block(&mut encoder, "/pb.Core/Watch");
    let (head, tail) = block.split_at(block.len() / 2);

    let mut bytes = wire(FrameType::Headers, Flags::default(), 1, head);
    bytes.extend(wire(FrameType::Continuation, Flags::END_HEADERS, 1, tail));
    decoder.feed(C2S, &bytes);

    let events = drain(&mut decoder, C2S);
    assert_eq!(events.len(), 1);
    let FrameEvent::Headers {
        stream_id,
        headers,
        end_stream,
    } = &events[0]
    else {
        panic!("expected headers, got {:?}", events[0]);
    };
    assert_eq!(*stream_id, 1);
    assert!(!end_stream);
    assert_eq!(
        headers.as_ref().expect("decodable").path(),
        Some("/pb.Core/Watch")
    );
}

#[rstest]
fn priority_and_padding_are_removed_from_headers(mut decoder: FrameDecoder) {
    let mut encoder = Encoder::new();
    let block = request_block(&mut encoder, "/a.B/C");
    let mut payload = vec![2u8];
    payload.extend_from_slice(&[0, 0, 0, 0, 16]);
    payload.extend_from_slice(&block);
    payload.extend_from_slice(&[0, 0]);
    let flags = Flags::END_HEADERS | Flags::PADDED | Flags::PRIORITY;
    decoder.feed(C2S, &wire(FrameType::Headers, flags, 5, &payload));

    let events = drain(&mut decoder, C2S);
    assert!(matches!(
        &events[..],
        [FrameEvent::Headers { stream_id: 5, headers: Ok(map), .. }] if map.path() == Some("/a.B/C")
    ));
}

#[rstest]
fn interleaved_frame_breaks_header_block(mut decoder: FrameDecoder) {
    let mut bytes = wire(FrameType::Headers, Flags::default(), 1, &[0x82]);
    bytes.extend(wire(FrameType::Data, Flags::default(), 3, b"x"));
    decoder.feed(C2S, &bytes);
    assert_eq!(
        decoder.next_event(C2S),
        Err(FrameError::InterruptedHeaderBlock {
            open_stream: 1,
            kind: 0x0,
            stream_id: 3,
        })
    );
}

#[rstest]
fn stray_continuation_is_malformed(mut decoder: FrameDecoder) {
    decoder.feed(S2C, &wire(FrameType::Continuation, Flags::END_HEADERS, 1, &[0x88]));
    assert_eq!(
        decoder.next_event(S2C),
        Err(FrameError::UnexpectedContinuation { stream_id: 1 })
    );
}

#[rstest]
fn unknown_frame_type_is_malformed_when_strict(mut decoder: FrameDecoder) {
    let mut bytes = wire(FrameType::Data, Flags::default(), 1, b"ab");
    bytes[3] = 0x42;
    decoder.feed(C2S, &bytes);
    assert_eq!(
        decoder.next_event(C2S),
        Err(FrameError::UnknownFrameType { kind: 0x42 })
    );
}

#[test]
fn unknown_frame_type_is_skipped_when_lenient() {
    let mut decoder = FrameDecoder::new(DecoderLimits {
        strict_frame_types: false,
        ..DecoderLimits::default()
    });
    let mut bytes = wire(FrameType::Data, Flags::default(), 1, b"ab");
    bytes[3] = 0x42;
    bytes.extend(wire(FrameType::Ping, Flags::ACK, 0, &[0; 8]));
    decoder.feed(C2S, &bytes);
    assert_eq!(
        drain(&mut decoder, C2S),
        vec![
            FrameEvent::Ignored {
                kind: 0x42,
                stream_id: 1
            },
            FrameEvent::Ping { ack: true },
        ]
    );
}

#[rstest]
fn oversized_frame_is_rejected_before_payload_arrives(mut decoder: FrameDecoder) {
    decoder.feed(S2C, &wire(FrameType::Settings, Flags::default(), 0, &[]));
    assert_eq!(drain(&mut decoder, S2C).len(), 1);
    let header = [0x00, 0x40, 0x01, 0x0, 0x0, 0, 0, 0, 1];
    decoder.feed(S2C, &header);
    assert_eq!(
        decoder.next_event(S2C),
        Err(FrameError::FrameTooLarge {
            length: 16_385,
            max: 16_384,
        })
    );
}

#[rstest]
fn settings_raise_max_frame_size_for_the_peer(mut decoder: FrameDecoder) {
    let mut setting = MAX_FRAME_SIZE.to_be_bytes().to_vec();
    setting.extend_from_slice(&32_768u32.to_be_bytes());
    decoder.feed(C2S, &CONNECTION_PREFACE[..]);
    decoder.feed(C2S, &wire(FrameType::Settings, Flags::default(), 0, &setting));
    assert_eq!(drain(&mut decoder, C2S).len(), 1);
    assert_eq!(decoder.announced_settings(C2S).max_frame_size, 32_768);

    let big = vec![7u8; 20_000];
    decoder.feed(S2C, &wire(FrameType::Data, Flags::default(), 1, &big));
    let events = drain(&mut decoder, S2C);
    assert!(matches!(&events[..], [FrameEvent::Data { payload, .. }] if payload.len() == 20_000));

    // The client still has to respect the server's default.
    decoder.feed(C2S, &wire(FrameType::Data, Flags::default(), 1, &big));
    assert!(matches!(
        decoder.next_event(C2S),
        Err(FrameError::FrameTooLarge { .. })
    ));
}

#[rstest]
#[case::client(C2S)]
#[case::server(S2C)]
fn mid_stream_capture_accepts_frames_above_the_default_size(#[case] direction: Direction) {
    let mut decoder = FrameDecoder::new(DecoderLimits::default());
    let big = vec![1u8; 40_000];
    decoder.feed(direction, &wire(FrameType::Data, Flags::default(), 1, &big));
    let events = drain(&mut decoder, direction);
    assert!(matches!(&events[..], [FrameEvent::Data { payload, .. }] if payload.len() == 40_000));
}

#[rstest]
fn announced_header_table_size_bounds_size_updates(mut decoder: FrameDecoder) {
    let mut setting = HEADER_TABLE_SIZE.to_be_bytes().to_vec();
    setting.extend_from_slice(&0u32.to_be_bytes());
    decoder.feed(S2C, &wire(FrameType::Settings, Flags::default(), 0, &setting));
    assert_eq!(drain(&mut decoder, S2C).len(), 1);

    // Size update to 4096 followed by `:method: GET`.
    decoder.feed(C2S, &CONNECTION_PREFACE[..]);
    decoder.feed(C2S, &wire(FrameType::Headers, Flags::END_HEADERS, 1, &[0x3f, 0xe1, 0x1f, 0x82]));
    let events = drain(&mut decoder, C2S);
    assert!(matches!(
        &events[..],
        [FrameEvent::Headers { headers: Err(HpackError::Decode(_)), .. }]
    ));
    assert!(decoder.is_context_poisoned(C2S));
}

#[rstest]
fn truncated_header_block_poisons_instead_of_panicking(mut decoder: FrameDecoder) {
    decoder.feed(C2S, &CONNECTION_PREFACE[..]);
    decoder.feed(C2S, &wire(FrameType::Headers, Flags::END_HEADERS, 1, &[0x3f]));
    let events = drain(&mut decoder, C2S);
    assert!(matches!(
        &events[..],
        [FrameEvent::Headers { headers: Err(HpackError::Decode(_)), .. }]
    ));
    assert!(decoder.is_context_poisoned(C2S));
    assert!(!decoder.is_context_poisoned(S2C));
}

#[rstest]
fn hpack_failure_poisons_only_its_direction(mut decoder: FrameDecoder) {
    decoder.feed(C2S, &CONNECTION_PREFACE[..]);
    decoder.feed(C2S, &wire(FrameType::Headers, Flags::END_HEADERS, 1, &[0xff, 0x7f]));
    let events = drain(&mut decoder, C2S);
    assert!(matches!(
        &events[..],
        [FrameEvent::Headers { headers: Err(HpackError::Decode(_)), .. }]
    ));
    assert!(decoder.is_context_poisoned(C2S));
    assert!(!decoder.is_context_poisoned(S2C));

    let mut encoder = Encoder::new();
    let block = encoder.encode([(&b":status"[..], &b"200"[..])]);
    decoder.feed(S2C, &wire(FrameType::Headers, Flags::END_HEADERS, 1, &block));
    let events = drain(&mut decoder, S2C);
    assert!(matches!(
        &events[..],
        [FrameEvent::Headers { headers: Ok(map), .. }] if map.status() == Some("200")
    ));
}

#[rstest]
fn control_frames_are_reported(mut decoder: FrameDecoder) {
    let mut bytes = wire(FrameType::RstStream, Flags::default(), 3, &8u32.to_be_bytes());
    let mut goaway = 5u32.to_be_bytes().to_vec();
    goaway.extend_from_slice(&0u32.to_be_bytes());
    bytes.extend(wire(FrameType::GoAway, Flags::default(), 0, &goaway));
    bytes.extend(wire(
        FrameType::WindowUpdate,
        Flags::default(),
        0,
        &1024u32.to_be_bytes(),
    ));
    decoder.feed(S2C, &bytes);
    assert_eq!(
        drain(&mut decoder, S2C),
        vec![
            FrameEvent::Reset {
                stream_id: 3,
                code: ErrorCode::Cancel
            },
            FrameEvent::GoAway {
                last_stream_id: 5,
                code: ErrorCode::NoError
            },
            FrameEvent::WindowUpdate {
                stream_id: 0,
                increment: 1024
            },
        ]
    );
}

#[rstest]
fn push_promise_carries_promised_stream(mut decoder: FrameDecoder) {
    let mut encoder = Encoder::new();
    let mut payload = 2u32.to_be_bytes().to_vec();
    payload.extend(request_block(&mut encoder, "/a.B/C"));
    decoder.feed(S2C, &wire(FrameType::PushPromise, Flags::END_HEADERS, 1, &payload));
    let events = drain(&mut decoder, S2C);
    assert!(matches!(
        &events[..],
        [FrameEvent::PushPromise { stream_id: 1, promised_stream_id: 2, headers: Ok(_) }]
    ));
}
