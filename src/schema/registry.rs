//! Schema registry backed by `protofish`.

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    fs,
    path::{Path, PathBuf},
};

use protofish::{
    context::{Context, MessageField, Multiplicity, ValueType},
    decode::{EnumValue, MessageValue, PackedArray, UnknownValue, Value as Decoded},
};
use serde_json::{Map, Number, Value};
use tracing::{debug, info};

use super::{
    MessageSchema,
    ResolveError,
    SchemaResolver,
    declarations::{self, Declarations},
    reflection,
    well_known,
};
use crate::message::hex;

/// One `.proto` file to load.
#[derive(Clone, Debug)]
pub(crate) struct ProtoSource {
    /// Name other files import it by.
    pub name: String,
    pub text: String,
    /// File on disk it was read from.
    pub origin: Option<PathBuf>,
}

#[derive(Clone, Debug)]
struct Method {
    input: String,
    output: String,
    source: Option<PathBuf>,
}

/// Schemas for every method declared by a set of `.proto` files.
pub struct SchemaRegistry {
    context: Context,
    methods: BTreeMap<String, Method>,
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("methods", &self.methods.keys())
            .finish_non_exhaustive()
    }
}

impl SchemaRegistry {
    /// Load the given files and, transitively, the imports found next to
    /// them. Imports missing on disk fall back to the bundled well-known
    /// `google/protobuf` files, or are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Io`] if a listed file cannot be read and
    /// [`ResolveError::Parse`] if the files do not form a valid schema.
    pub fn from_files(paths: &[PathBuf]) -> Result<Self, ResolveError> {
        let registry = Self::from_protos(read_files(paths)?)?;
        info!(methods = registry.methods.len(), "schemas loaded");
        Ok(registry)
    }

    /// Load `paths` as [`SchemaRegistry::from_files`] does, plus every
    /// service the reflection server at `endpoint` (an `http://host:port`
    /// URI) describes. Reflected files whose name matches a file read from
    /// disk are skipped.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`SchemaRegistry::from_files`],
    /// [`ResolveError::ReflectionConnect`] if the server cannot be reached
    /// and [`ResolveError::Reflection`] if the reflection exchange fails.
    pub async fn with_reflection(endpoint: &str, paths: &[PathBuf]) -> Result<Self, ResolveError> {
        let mut sources = read_files(paths)?;
        let local: HashSet<String> = sources
            .iter()
            .flat_map(|source| {
                let file_name = source
                    .origin
                    .as_deref()
                    .and_then(Path::file_name)
                    .map(|name| name.to_string_lossy().into_owned());
                std::iter::once(source.name.clone()).chain(file_name)
            })
            .collect();
        sources.extend(
            reflection::discover(endpoint)
                .await?
                .into_iter()
                .filter(|reflected| !local.contains(&reflected.name)),
        );
        let registry = Self::from_protos(sources)?;
        info!(methods = registry.methods.len(), %endpoint, "schemas loaded");
        Ok(registry)
    }

    /// Build a registry from in-memory sources.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Parse`] if the sources are invalid.
    pub fn from_sources<S: AsRef<str>>(sources: &[S]) -> Result<Self, ResolveError> {
        Self::from_protos(
            sources
                .iter()
                .enumerate()
                .map(|(i, text)| ProtoSource {
                    name: format!("<source {i}>"),
                    text: text.as_ref().to_owned(),
                    origin: None,
                })
                .collect(),
        )
    }

    pub(crate) fn from_protos(sources: Vec<ProtoSource>) -> Result<Self, ResolveError> {
        let declared: Vec<Declarations> = sources
            .iter()
            .map(|source| declarations::scan(&source.text))
            .collect();
        let mut names: HashSet<&str> = sources.iter().map(|source| source.name.as_str()).collect();
        let mut bundled = Vec::new();
        for import in declared.iter().flat_map(|found| &found.imports) {
            if !names.insert(import.as_str()) {
                continue;
            }
            match well_known::source(import) {
                Some(text) => bundled.push(text),
                None => debug!(%import, "import not loaded"),
            }
        }
        let texts: Vec<&str> = sources
            .iter()
            .map(|source| source.text.as_str())
            .chain(bundled)
            .collect();
        let context =
            Context::parse(texts.as_slice()).map_err(|err| ResolveError::Parse(format!("{err:?}")))?;

        let mut methods = BTreeMap::new();
        for (source, found) in sources.iter().zip(&declared) {
            for (name, rpcs) in &found.services {
                let service_name = found.qualify(name);
                let Some(service) = context.get_service(&service_name) else {
                    debug!(service = %service_name, "service not resolved");
                    continue;
                };
                for rpc_name in rpcs {
                    let Some(rpc) = service.rpc_by_name(rpc_name) else {
                        continue;
                    };
                    methods.insert(
                        format!("/{service_name}/{rpc_name}"),
                        Method {
                            input: context.resolve_message(rpc.input.message).full_name.clone(),
                            output: context.resolve_message(rpc.output.message).full_name.clone(),
                            source: source.origin.clone(),
                        },
                    );
                }
            }
        }
        Ok(Self { context, methods })
    }

    /// The `.proto` file a method was loaded from.
    #[must_use]
    pub fn proto_file(&self, path: &str) -> Option<&Path> {
        self.methods.get(path)?.source.as_deref()
    }

    fn method(&self, path: &str) -> Result<&Method, ResolveError> {
        self.methods
            .get(path)
            .ok_or_else(|| ResolveError::UnknownPath(path.to_owned()))
    }

    fn render(&self, message: &MessageValue) -> Result<Value, String> {
        if let Some(garbage) = &message.garbage {
            return Err(format!("{} trailing bytes do not form a field", garbage.len()));
        }
        let info = self.context.resolve_message(message.msg_ref);
        let mut object = Map::new();
        for field in &message.fields {
            let Some(def) = info.get_field(field.number) else {
                object.insert(field.number.to_string(), self.value(&field.value)?);
                continue;
            };
            if let Decoded::Unknown(_) = &field.value {
                return Err(format!("field {} does not match its declared type", def.name));
            }
            let value = self.value(&field.value)?;
            if !matches!(def.multiplicity, Multiplicity::Repeated | Multiplicity::RepeatedPacked) {
                object.insert(def.name.clone(), value);
            } else if let Some((key, entry)) = self.map_entry(def, &value) {
                let slot = object
                    .entry(def.name.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(map) = slot {
                    map.insert(key, entry);
                }
            } else {
                let slot = object
                    .entry(def.name.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(items) = slot {
                    match value {
                        Value::Array(packed) if matches!(field.value, Decoded::Packed(_)) => {
                            items.extend(packed);
                        }
                        single => items.push(single),
                    }
                }
            }
        }
        Ok(Value::Object(object))
    }

    /// Split a rendered map entry of a `map<K, V>` field into key and value.
    fn map_entry(&self, def: &MessageField, value: &Value) -> Option<(String, Value)> {
        let ValueType::Message(entry) = &def.field_type else {
            return None;
        };
        if !self.context.resolve_message(*entry).name.ends_with("Entry") {
            return None;
        }
        let Value::Object(fields) = value else {
            return None;
        };
        let key = match fields.get("key")? {
            Value::String(key) => key.clone(),
            other => other.to_string(),
        };
        Some((key, fields.get("value").cloned().unwrap_or(Value::Null)))
    }

    fn value(&self, value: &Decoded) -> Result<Value, String> {
        Ok(match value {
            Decoded::Double(v) => float(*v),
            Decoded::Float(v) => float(f64::from(*v)),
            Decoded::Int32(v) | Decoded::SInt32(v) | Decoded::SFixed32(v) => Value::from(*v),
            Decoded::Int64(v) | Decoded::SInt64(v) | Decoded::SFixed64(v) => Value::from(*v),
            Decoded::UInt32(v) | Decoded::Fixed32(v) => Value::from(*v),
            Decoded::UInt64(v) | Decoded::Fixed64(v) => Value::from(*v),
            Decoded::Bool(v) => Value::from(*v),
            Decoded::String(v) => Value::from(v.as_str()),
            Decoded::Bytes(v) => Value::from(hex(v)),
            Decoded::Enum(v) => self.enum_label(v),
            Decoded::Message(v) => self.render(v)?,
            Decoded::Packed(v) => Value::Array(packed(v)),
            Decoded::Unknown(v) => unknown(v),
            Decoded::Incomplete(..) => return Err("field is truncated".to_owned()),
            other => return Err(format!("unsupported value {other:?}")),
        })
    }

    fn enum_label(&self, value: &EnumValue) -> Value {
        self.context
            .resolve_enum(value.enum_ref)
            .get_field_by_value(value.value)
            .map_or_else(|| Value::from(value.value), |field| Value::from(field.name.as_str()))
    }
}

/// Read `paths` and, transitively, the imports found next to them.
fn read_files(paths: &[PathBuf]) -> Result<Vec<ProtoSource>, ResolveError> {
    let mut pending: Vec<(PathBuf, Option<String>)> =
        paths.iter().rev().map(|path| (path.clone(), None)).collect();
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    while let Some((path, import)) = pending.pop() {
        if !seen.insert(path.clone()) {
            continue;
        }
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if import.is_some() => {
                debug!(path = %path.display(), error = %err, "import not found on disk");
                continue;
            }
            Err(source) => return Err(ResolveError::Io { path, source }),
        };
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        pending.extend(
            declarations::scan(&text)
                .imports
                .into_iter()
                .map(|import| (dir.join(&import), Some(import))),
        );
        sources.push(ProtoSource {
            name: import.unwrap_or_else(|| path.display().to_string()),
            text,
            origin: Some(path),
        });
    }
    Ok(sources)
}

fn packed(values: &PackedArray) -> Vec<Value> {
    fn all<T: Copy>(values: &[T], render: impl Fn(T) -> Value) -> Vec<Value> {
        values.iter().copied().map(render).collect()
    }
    match values {
        PackedArray::Double(v) => all(v, float),
        PackedArray::Float(v) => all(v, |f| float(f64::from(f))),
        PackedArray::Int32(v) | PackedArray::SInt32(v) | PackedArray::SFixed32(v) => all(v, Value::from),
        PackedArray::Int64(v) | PackedArray::SInt64(v) | PackedArray::SFixed64(v) => all(v, Value::from),
        PackedArray::UInt32(v) | PackedArray::Fixed32(v) => all(v, Value::from),
        PackedArray::UInt64(v) | PackedArray::Fixed64(v) => all(v, Value::from),
        PackedArray::Bool(v) => all(v, Value::from),
    }
}

/// Render a field the schema does not declare.
fn unknown(value: &UnknownValue) -> Value {
    match value {
        UnknownValue::Varint(v) => u64::try_from(*v).map_or_else(|_| Value::from(v.to_string()), Value::from),
        UnknownValue::Fixed64(v) => Value::from(*v),
        UnknownValue::Fixed32(v) => Value::from(*v),
        UnknownValue::VariableLength(bytes) => Value::from(hex(bytes)),
        other => Value::from(format!("{other:?}")),
    }
}

fn float(value: f64) -> Value { Number::from_f64(value).map_or(Value::Null, Value::Number) }

impl SchemaResolver for SchemaRegistry {
    fn resolve_request_schema(&self, path: &str) -> Result<MessageSchema, ResolveError> {
        self.method(path)
            .map(|method| MessageSchema::new(method.input.clone()))
    }

    fn resolve_response_schema(&self, path: &str) -> Result<MessageSchema, ResolveError> {
        self.method(path)
            .map(|method| MessageSchema::new(method.output.clone()))
    }

    fn decode(&self, schema: &MessageSchema, bytes: &[u8]) -> Result<Value, ResolveError> {
        let info = self
            .context
            .get_message(&schema.name)
            .ok_or_else(|| ResolveError::UnknownType(schema.name.clone()))?;
        self.render(&info.decode(bytes, &self.context))
            .map_err(|reason| ResolveError::Malformed {
                schema: schema.name.clone(),
                reason,
            })
    }

    fn known_paths(&self) -> Vec<String> { self.methods.keys().cloned().collect() }

    fn source_file(&self, path: &str) -> Option<PathBuf> { self.proto_file(path).map(Path::to_path_buf) }
}
