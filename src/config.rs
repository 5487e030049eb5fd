//! Runtime configuration.
//!
//! [`PipelineConfig`] carries the limits the reconstruction core enforces.
//! [`Settings`] is the validated configuration of a whole run: where segments
//! come from, which schemas are available and how messages are rendered. It
//! is built from [`RawSettings`], the unvalidated values a front end (such as
//! the command line) collected.

use std::{path::PathBuf, str::FromStr};

use thiserror::Error;

use crate::{
    grpc::DEFAULT_MAX_MESSAGE_SIZE,
    h2::DecoderLimits,
};

/// Limits and switches for the reconstruction pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Out-of-order bytes parked per connection direction.
    pub reorder_window: usize,
    /// Largest accumulated HPACK header block.
    pub max_header_block: usize,
    /// Largest declared gRPC message.
    pub max_message_size: usize,
    /// Segments queued per connection worker.
    pub channel_capacity: usize,
    /// Treat unknown HTTP/2 frame types as malformed.
    pub strict_frame_types: bool,
    /// Port the gRPC service listens on, used to orient connections.
    pub service_port: Option<u16>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reorder_window: 1024 * 1024,
            max_header_block: DecoderLimits::default().max_header_block,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            channel_capacity: 64,
            strict_frame_types: true,
            service_port: None,
        }
    }
}

impl PipelineConfig {
    /// Orient connections by the given service port.
    #[must_use]
    pub fn with_service_port(mut self, port: u16) -> Self {
        self.service_port = Some(port);
        self
    }

    /// Frame decoder limits derived from this configuration.
    #[must_use]
    pub fn decoder_limits(&self) -> DecoderLimits {
        DecoderLimits {
            max_header_block: self.max_header_block,
            strict_frame_types: self.strict_frame_types,
        }
    }
}

/// Errors detected while validating settings. All are fatal before any
/// segment is read.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--interface and --read-file cannot be used together")]
    ConflictingSources,
    #[error("either --interface or --read-file must be set")]
    MissingSource,
    #[error("at least one of --proto-file and --proto-reflect is required")]
    MissingSchemaSource,
    #[error("unknown output format {0:?}; expected \"text\" or \"json\"")]
    UnknownOutputFormat(String),
    #[error("service port must be non-zero")]
    ZeroPort,
}

/// How messages are rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::UnknownOutputFormat(other.to_owned())),
        }
    }
}

/// Where segments are read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureSource {
    /// Live capture on a network interface.
    Interface(String),
    /// Replay of a classic pcap file.
    File(PathBuf),
}

/// Paths the method filter admits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum GuessPaths {
    /// No filtering.
    #[default]
    All,
    /// Every path the schema registry knows.
    Auto,
    /// An explicit list.
    List(Vec<String>),
}

impl GuessPaths {
    /// Parse the comma-separated form (`AUTO` selects known paths).
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::All,
            Some("AUTO") => Self::Auto,
            Some(list) => Self::List(
                list.split(',')
                    .map(str::trim)
                    .filter(|path| !path.is_empty())
                    .map(str::to_owned)
                    .collect(),
            ),
        }
    }
}

/// Unvalidated settings as collected by a front end.
#[derive(Clone, Debug, Default)]
pub struct RawSettings {
    pub service_port: u16,
    pub interface: Option<String>,
    pub read_file: Option<PathBuf>,
    pub proto_files: Vec<PathBuf>,
    pub proto_reflect: bool,
    /// `host:port` of the reflection service; the service port on
    /// localhost when unset.
    pub reflect_addr: Option<String>,
    pub guess_path: Option<String>,
    pub output_format: Option<String>,
    pub grpcurl: bool,
}

/// Validated configuration of one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub source: CaptureSource,
    pub proto_files: Vec<PathBuf>,
    /// `http://host:port` endpoint queried through server reflection.
    pub reflection: Option<String>,
    pub guess_paths: GuessPaths,
    pub output: OutputFormat,
    pub grpcurl: bool,
    pub pipeline: PipelineConfig,
}

impl TryFrom<RawSettings> for Settings {
    type Error = ConfigError;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        if raw.service_port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        let source = match (raw.interface, raw.read_file) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingSources),
            (Some(interface), None) => CaptureSource::Interface(interface),
            (None, Some(path)) => CaptureSource::File(path),
            (None, None) => return Err(ConfigError::MissingSource),
        };
        if raw.proto_files.is_empty() && !raw.proto_reflect {
            return Err(ConfigError::MissingSchemaSource);
        }
        let output = raw
            .output_format
            .as_deref()
            .map_or(Ok(OutputFormat::default()), str::parse)?;
        Ok(Self {
            source,
            proto_files: raw.proto_files,
            reflection: raw.proto_reflect.then(|| {
                let addr = raw
                    .reflect_addr
                    .unwrap_or_else(|| format!("127.0.0.1:{}", raw.service_port));
                format!("http://{addr}")
            }),
            guess_paths: GuessPaths::parse(raw.guess_path.as_deref()),
            output,
            grpcurl: raw.grpcurl,
            pipeline: PipelineConfig::default().with_service_port(raw.service_port),
        })
    }
}
