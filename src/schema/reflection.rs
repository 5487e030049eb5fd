//! Schema discovery over gRPC server reflection.
//!
//! One reflection stream is opened to the server. Services are listed, the
//! file declaring each one is fetched along with its dependencies, and every
//! descriptor is rendered back to `.proto` source so the registry loads it
//! the same way as a file from disk.

use std::{
    collections::{BTreeMap, HashSet},
    fmt::Write as _,
    time::Duration,
};

use prost::Message as _;
use prost_types::{
    DescriptorProto,
    EnumDescriptorProto,
    FieldDescriptorProto,
    FileDescriptorProto,
    field_descriptor_proto::{Label, Type},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Streaming, transport::Channel};
use tonic_reflection::pb::v1::{
    ServerReflectionRequest,
    ServerReflectionResponse,
    server_reflection_client::ServerReflectionClient,
    server_reflection_request::MessageRequest,
    server_reflection_response::MessageResponse,
};
use tracing::{debug, info};

use super::{ResolveError, registry::ProtoSource};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One open `ServerReflectionInfo` call.
struct Session {
    requests: mpsc::Sender<ServerReflectionRequest>,
    responses: Streaming<ServerReflectionResponse>,
}

impl Session {
    async fn open(endpoint: &str) -> Result<Self, ResolveError> {
        let connect_error = |source| ResolveError::ReflectionConnect {
            endpoint: endpoint.to_owned(),
            source,
        };
        let channel = Channel::from_shared(endpoint.to_owned())
            .map_err(|err| ResolveError::Reflection(format!("invalid endpoint {endpoint}: {err}")))?
            .connect_timeout(CONNECT_TIMEOUT)
            .connect()
            .await
            .map_err(connect_error)?;
        let (requests, rx) = mpsc::channel(8);
        let responses = ServerReflectionClient::new(channel)
            .server_reflection_info(ReceiverStream::new(rx))
            .await
            .map_err(|status| ResolveError::Reflection(status.to_string()))?
            .into_inner();
        Ok(Self { requests, responses })
    }

    async fn ask(&mut self, query: MessageRequest) -> Result<MessageResponse, ResolveError> {
        let closed = || ResolveError::Reflection("server closed the reflection stream".to_owned());
        self.requests
            .send(ServerReflectionRequest {
                host: String::new(),
                message_request: Some(query),
            })
            .await
            .map_err(|_| closed())?;
        self.responses
            .message()
            .await
            .map_err(|status| ResolveError::Reflection(status.to_string()))?
            .and_then(|response| response.message_response)
            .ok_or_else(closed)
    }
}

/// Fetch the descriptors of every service the server at `endpoint`
/// (an `http://host:port` URI) exposes, as `.proto` sources.
pub(crate) async fn discover(endpoint: &str) -> Result<Vec<ProtoSource>, ResolveError> {
    let mut session = Session::open(endpoint).await?;
    let services: Vec<String> = match session.ask(MessageRequest::ListServices(String::new())).await? {
        MessageResponse::ListServicesResponse(list) => list
            .service
            .into_iter()
            .map(|service| service.name)
            .filter(|name| !name.starts_with("grpc.reflection."))
            .collect(),
        other => return Err(unexpected(&other)),
    };
    debug!(%endpoint, ?services, "reflected services");

    let mut files: BTreeMap<String, FileDescriptorProto> = BTreeMap::new();
    let mut requested = HashSet::new();
    let mut pending: Vec<MessageRequest> = services
        .into_iter()
        .map(MessageRequest::FileContainingSymbol)
        .collect();
    while let Some(query) = pending.pop() {
        let descriptors = match session.ask(query).await? {
            MessageResponse::FileDescriptorResponse(found) => found.file_descriptor_proto,
            MessageResponse::ErrorResponse(err) => {
                debug!(code = err.error_code, message = %err.error_message, "reflection lookup failed");
                continue;
            }
            other => return Err(unexpected(&other)),
        };
        for encoded in descriptors {
            let file = FileDescriptorProto::decode(encoded.as_slice())
                .map_err(|err| ResolveError::Reflection(format!("undecodable file descriptor: {err}")))?;
            requested.insert(file.name().to_owned());
            for dependency in &file.dependency {
                if !files.contains_key(dependency) && requested.insert(dependency.clone()) {
                    pending.push(MessageRequest::FileByFilename(dependency.clone()));
                }
            }
            files.entry(file.name().to_owned()).or_insert(file);
        }
    }
    info!(%endpoint, files = files.len(), "schemas reflected");
    Ok(files
        .into_iter()
        .map(|(name, file)| ProtoSource {
            name,
            text: render(&file),
            origin: None,
        })
        .collect())
}

fn unexpected(response: &MessageResponse) -> ResolveError {
    ResolveError::Reflection(format!("unexpected reflection response {response:?}"))
}

/// Render a file descriptor as proto3 source.
///
/// Only what decoding needs survives: packages, imports, messages, enums,
/// fields and services. Options, reserved ranges and extensions are dropped,
/// and map fields stay as their synthesized `*Entry` messages.
pub(crate) fn render(file: &FileDescriptorProto) -> String {
    let mut out = String::from("syntax = \"proto3\";\n");
    if !file.package().is_empty() {
        let _ = writeln!(out, "package {};", file.package());
    }
    for dependency in &file.dependency {
        let _ = writeln!(out, "import \"{dependency}\";");
    }
    for message in &file.message_type {
        render_message(&mut out, message, 0);
    }
    for enumeration in &file.enum_type {
        render_enum(&mut out, enumeration, 0);
    }
    for service in &file.service {
        let _ = writeln!(out, "service {} {{", service.name());
        for method in &service.method {
            let _ = writeln!(
                out,
                "  rpc {}({}{}) returns ({}{});",
                method.name(),
                streaming(method.client_streaming()),
                type_name(method.input_type()),
                streaming(method.server_streaming()),
                type_name(method.output_type()),
            );
        }
        out.push_str("}\n");
    }
    out
}

fn render_message(out: &mut String, message: &DescriptorProto, depth: usize) {
    let indent = "  ".repeat(depth);
    let _ = writeln!(out, "{indent}message {} {{", message.name());
    for nested in &message.nested_type {
        render_message(out, nested, depth + 1);
    }
    for enumeration in &message.enum_type {
        render_enum(out, enumeration, depth + 1);
    }
    for field in &message.field {
        let Some(ty) = field_type(field) else {
            debug!(message = message.name(), field = field.name(), "group field skipped");
            continue;
        };
        let label = if field.label() == Label::Repeated { "repeated " } else { "" };
        let _ = writeln!(out, "{indent}  {label}{ty} {} = {};", field.name(), field.number());
    }
    let _ = writeln!(out, "{indent}}}");
}

fn render_enum(out: &mut String, enumeration: &EnumDescriptorProto, depth: usize) {
    let indent = "  ".repeat(depth);
    let _ = writeln!(out, "{indent}enum {} {{", enumeration.name());
    for value in &enumeration.value {
        let _ = writeln!(out, "{indent}  {} = {};", value.name(), value.number());
    }
    let _ = writeln!(out, "{indent}}}");
}

fn field_type(field: &FieldDescriptorProto) -> Option<&str> {
    Some(match field.r#type() {
        Type::Double => "double",
        Type::Float => "float",
        Type::Int64 => "int64",
        Type::Uint64 => "uint64",
        Type::Int32 => "int32",
        Type::Fixed64 => "fixed64",
        Type::Fixed32 => "fixed32",
        Type::Bool => "bool",
        Type::String => "string",
        Type::Bytes => "bytes",
        Type::Uint32 => "uint32",
        Type::Sfixed32 => "sfixed32",
        Type::Sfixed64 => "sfixed64",
        Type::Sint32 => "sint32",
        Type::Sint64 => "sint64",
        Type::Message | Type::Enum => type_name(field.type_name()),
        Type::Group => return None,
    })
}

/// Descriptors name types absolutely (`.pb.Request`).
fn type_name(name: &str) -> &str { name.strip_prefix('.').unwrap_or(name) }

fn streaming(on: bool) -> &'static str { if on { "stream " } else { "" } }

#[cfg(test)]
mod tests {
    use prost_types::{
        DescriptorProto,
        EnumDescriptorProto,
        EnumValueDescriptorProto,
        FieldDescriptorProto,
        FileDescriptorProto,
        MethodDescriptorProto,
        ServiceDescriptorProto,
        field_descriptor_proto::{Label, Type},
    };

    use super::render;
    use crate::schema::{MessageSchema, SchemaRegistry, SchemaResolver};

    fn field(name: &str, number: i32, ty: Type, type_name: Option<&str>, label: Label) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.into()),
            number: Some(number),
            r#type: Some(ty.into()),
            type_name: type_name.map(Into::into),
            label: Some(label.into()),
            ..FieldDescriptorProto::default()
        }
    }

    fn watch_file() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("pb/watch.proto".into()),
            package: Some("pb".into()),
            message_type: vec![
                DescriptorProto {
                    name: Some("WatchRequest".into()),
                    field: vec![
                        field("appname", 1, Type::String, None, Label::Optional),
                        field("labels", 2, Type::Message, Some(".pb.WatchRequest.LabelsEntry"), Label::Repeated),
                    ],
                    nested_type: vec![DescriptorProto {
                        name: Some("LabelsEntry".into()),
                        field: vec![
                            field("key", 1, Type::String, None, Label::Optional),
                            field("value", 2, Type::Int64, None, Label::Optional),
                        ],
                        ..DescriptorProto::default()
                    }],
                    ..DescriptorProto::default()
                },
                DescriptorProto {
                    name: Some("Event".into()),
                    field: vec![field("state", 1, Type::Enum, Some(".pb.State"), Label::Optional)],
                    ..DescriptorProto::default()
                },
            ],
            enum_type: vec![EnumDescriptorProto {
                name: Some("State".into()),
                value: vec![
                    EnumValueDescriptorProto {
                        name: Some("IDLE".into()),
                        number: Some(0),
                        ..EnumValueDescriptorProto::default()
                    },
                    EnumValueDescriptorProto {
                        name: Some("BUSY".into()),
                        number: Some(1),
                        ..EnumValueDescriptorProto::default()
                    },
                ],
                ..EnumDescriptorProto::default()
            }],
            service: vec![ServiceDescriptorProto {
                name: Some("Core".into()),
                method: vec![MethodDescriptorProto {
                    name: Some("Watch".into()),
                    input_type: Some(".pb.WatchRequest".into()),
                    output_type: Some(".pb.Event".into()),
                    server_streaming: Some(true),
                    ..MethodDescriptorProto::default()
                }],
                ..ServiceDescriptorProto::default()
            }],
            ..FileDescriptorProto::default()
        }
    }

    #[test]
    fn descriptors_render_as_loadable_source() {
        let text = render(&watch_file());
        assert!(text.contains("package pb;"));
        assert!(text.contains("  rpc Watch(pb.WatchRequest) returns (stream pb.Event);"));
        assert!(text.contains("  repeated pb.WatchRequest.LabelsEntry labels = 2;"));

        let registry = SchemaRegistry::from_sources(&[text]).expect("rendered source loads");
        assert_eq!(registry.known_paths(), vec!["/pb.Core/Watch".to_owned()]);
        let request = registry
            .resolve_request_schema("/pb.Core/Watch")
            .expect("known method");
        let entry = [0x0a, 0x01, b'a', 0x10, 0x03];
        let mut payload = vec![0x0a, 0x02, b'z', b'c', 0x12, 0x05];
        payload.extend_from_slice(&entry);
        assert_eq!(
            registry.decode(&request, &payload).expect("valid request"),
            serde_json::json!({"appname": "zc", "labels": {"a": 3}})
        );
        assert_eq!(
            registry
                .decode(&MessageSchema::new("pb.Event"), &[0x08, 0x01])
                .expect("valid event"),
            serde_json::json!({"state": "BUSY"})
        );
    }
}
