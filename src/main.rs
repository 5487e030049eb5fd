//! `grpcdump` binary.
//!
//! Reads a packet capture or a live interface, reconstructs the gRPC calls
//! it carries and prints them as text or JSON lines.

mod cli;

use std::{
    io::{self, BufWriter},
    process::ExitCode,
    sync::Arc,
};

use clap::Parser;
use grpcdump::{
    capture,
    config::{GuessPaths, OutputFormat, RawSettings, Settings},
    error::Error,
    pipeline,
    schema::SchemaRegistry,
    sink::{FilteredSink, JsonSink, MessageSink, PayloadDecoder, TextSink},
};
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(log_level(cli.verbose))
        .with_writer(io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "grpcdump failed");
            ExitCode::from(err.exit_code())
        }
    }
}

fn log_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn raw_settings(cli: cli::Cli) -> RawSettings {
    RawSettings {
        service_port: cli.service_port,
        interface: cli.interface,
        read_file: cli.read_file,
        proto_files: cli.proto_files,
        proto_reflect: cli.proto_reflect,
        reflect_addr: cli.reflect_addr,
        guess_path: cli.guess_path,
        output_format: Some(cli.output_format),
        grpcurl: cli.grpcurl,
    }
}

fn build_sink(settings: &Settings, registry: SchemaRegistry) -> Box<dyn MessageSink> {
    let decoder = PayloadDecoder::new(Arc::new(registry), &settings.guess_paths);
    let out = BufWriter::new(io::stdout());
    let sink: Box<dyn MessageSink> = match settings.output {
        OutputFormat::Text => Box::new(TextSink::new(out, Some(decoder)).with_grpcurl(settings.grpcurl)),
        OutputFormat::Json => Box::new(JsonSink::new(out, Some(decoder))),
    };
    match &settings.guess_paths {
        GuessPaths::List(paths) => Box::new(FilteredSink::new(sink, paths.iter().cloned())),
        GuessPaths::All | GuessPaths::Auto => sink,
    }
}

async fn run(cli: cli::Cli) -> Result<(), Error> {
    let settings = Settings::try_from(raw_settings(cli))?;

    let registry = match &settings.reflection {
        Some(endpoint) => SchemaRegistry::with_reflection(endpoint, &settings.proto_files).await?,
        None => SchemaRegistry::from_files(&settings.proto_files)?,
    };
    let mut sink = build_sink(&settings, registry);
    let mut source = capture::open_source(&settings.source, settings.pipeline.service_port).await?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let summary = pipeline::run(settings.pipeline, &mut *source, &mut *sink, shutdown).await?;
    info!(
        messages = summary.messages,
        sink_errors = summary.sink_errors,
        panics = summary.panics,
        "done"
    );
    Ok(())
}
