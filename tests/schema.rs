//! Schema loading from disk and decoded rendering of captured calls.

mod common;

use std::{fs, path::PathBuf, sync::Arc};

use common::{data, grpc_body, key, preface, replay, request_headers, to_server};
use grpcdump::{
    MessageSink,
    PayloadDecoder,
    ResolveError,
    SchemaRegistry,
    SchemaResolver,
    TextSink,
    config::GuessPaths,
};
use rstest::{fixture, rstest};

struct ProtoDir(PathBuf);

impl Drop for ProtoDir {
    fn drop(&mut self) { let _ = fs::remove_dir_all(&self.0); }
}

#[fixture]
fn protos() -> ProtoDir {
    let dir = std::env::temp_dir().join(format!("grpcdump-schema-{}-{:?}", std::process::id(), std::thread::current().id()));
    fs::create_dir_all(&dir).expect("temp dir");
    fs::write(
        dir.join("core.proto"),
        r#"
        syntax = "proto3";
        package pb;
        import "types.proto";
        import "google/protobuf/empty.proto";

        service CoreRPC {
            rpc Deploy(DeployRequest) returns (stream pb.types.Status);
        }

        message DeployRequest {
            string appname = 1;
            pb.types.Status.Code wanted = 2;
        }
        "#,
    )
    .expect("write core.proto");
    fs::write(
        dir.join("types.proto"),
        r#"
        syntax = "proto3";
        package pb.types;

        message Status {
            enum Code { UNKNOWN = 0; RUNNING = 1; }
            Code code = 1;
            repeated string notes = 2;
        }
        "#,
    )
    .expect("write types.proto");
    ProtoDir(dir)
}

#[rstest]
fn imports_are_followed_and_missing_ones_skipped(protos: ProtoDir) {
    let core = protos.0.join("core.proto");
    let registry = SchemaRegistry::from_files(std::slice::from_ref(&core)).expect("schemas load");
    assert_eq!(registry.known_paths(), vec!["/pb.CoreRPC/Deploy".to_owned()]);
    assert_eq!(registry.proto_file("/pb.CoreRPC/Deploy"), Some(core.as_path()));

    let response = registry
        .resolve_response_schema("/pb.CoreRPC/Deploy")
        .expect("known method");
    assert_eq!(response.name, "pb.types.Status");
    let value = registry
        .decode(&response, &[0x08, 0x01, 0x12, 0x02, b'o', b'k'])
        .expect("valid status");
    assert_eq!(value, serde_json::json!({"code": "RUNNING", "notes": ["ok"]}));
}

#[test]
fn unreadable_file_is_an_io_error() {
    let missing = PathBuf::from("/nonexistent/grpcdump/core.proto");
    assert!(matches!(
        SchemaRegistry::from_files(&[missing]),
        Err(ResolveError::Io { .. })
    ));
}

#[rstest]
fn captured_request_renders_with_grpcurl_replay(protos: ProtoDir) {
    let core = protos.0.join("core.proto");
    let registry = SchemaRegistry::from_files(std::slice::from_ref(&core)).expect("schemas load");
    let decoder = PayloadDecoder::new(Arc::new(registry), &GuessPaths::All);

    let mut bytes = preface();
    bytes.extend(request_headers(1, "/pb.CoreRPC/Deploy"));
    bytes.extend(data(1, &grpc_body(&[0x0a, 0x02, b'z', b'c', 0x10, 0x01]), true));
    let (messages, _) = replay(&[to_server(key(0), &bytes)]);

    let mut sink = TextSink::new(Vec::new(), Some(decoder)).with_grpcurl(true);
    for message in &messages {
        sink.handle(message).expect("rendered");
    }
    let text = String::from_utf8(sink.into_inner()).expect("utf-8");
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("\theader:{"));
    assert!(lines[1].ends_with("\tdata:{\"appname\":\"zc\",\"wanted\":\"RUNNING\"}"));
    assert_eq!(
        lines[2],
        format!(
            "grpcurl -plaintext -proto {} -d '{{\"appname\":\"zc\",\"wanted\":\"RUNNING\"}}' 10.0.0.2:2379 pb.CoreRPC/Deploy",
            core.display()
        )
    );
}
