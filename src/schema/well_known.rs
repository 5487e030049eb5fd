//! Stand-ins for the `google/protobuf` files most services import.
//!
//! They are used only when an import of the same name cannot be found on
//! disk or over reflection, so captures of services using timestamps or
//! wrappers still decode.

const EMPTY: &str = r#"syntax = "proto3"; package google.protobuf; message Empty {}"#;

const TIMESTAMP: &str = r#"syntax = "proto3"; package google.protobuf;
message Timestamp { int64 seconds = 1; int32 nanos = 2; }"#;

const DURATION: &str = r#"syntax = "proto3"; package google.protobuf;
message Duration { int64 seconds = 1; int32 nanos = 2; }"#;

const ANY: &str = r#"syntax = "proto3"; package google.protobuf;
message Any { string type_url = 1; bytes value = 2; }"#;

const FIELD_MASK: &str = r#"syntax = "proto3"; package google.protobuf;
message FieldMask { repeated string paths = 1; }"#;

const WRAPPERS: &str = r#"syntax = "proto3"; package google.protobuf;
message DoubleValue { double value = 1; }
message FloatValue { float value = 1; }
message Int64Value { int64 value = 1; }
message UInt64Value { uint64 value = 1; }
message Int32Value { int32 value = 1; }
message UInt32Value { uint32 value = 1; }
message BoolValue { bool value = 1; }
message StringValue { string value = 1; }
message BytesValue { bytes value = 1; }"#;

/// Source of the well-known file imported as `import`, if bundled.
pub(super) fn source(import: &str) -> Option<&'static str> {
    Some(match import {
        "google/protobuf/empty.proto" => EMPTY,
        "google/protobuf/timestamp.proto" => TIMESTAMP,
        "google/protobuf/duration.proto" => DURATION,
        "google/protobuf/any.proto" => ANY,
        "google/protobuf/field_mask.proto" => FIELD_MASK,
        "google/protobuf/wrappers.proto" => WRAPPERS,
        _ => return None,
    })
}
