//! Command line interface for the `grpcdump` binary.
//!
//! Also compiled by the build script to render the manual page, so it must
//! not depend on the library crate.

use std::path::PathBuf;

use clap::{ArgAction, ArgGroup, Parser};

/// Command line arguments for the `grpcdump` binary.
#[derive(Debug, Parser)]
#[command(
    name = "grpcdump",
    version,
    about = "Reconstruct gRPC calls from captured HTTP/2 traffic",
    group(ArgGroup::new("schema").required(true).multiple(true).args(["proto_files", "proto_reflect"]))
)]
pub struct Cli {
    /// TCP port the gRPC service listens on.
    #[arg(short = 'p', long)]
    pub service_port: u16,

    /// Capture live from this network interface.
    #[arg(short, long, conflicts_with = "read_file")]
    pub interface: Option<String>,

    /// Read packets from a pcap file.
    #[arg(short, long)]
    pub read_file: Option<PathBuf>,

    /// `.proto` file describing the service; may be repeated.
    #[arg(short = 'f', long = "proto-file")]
    pub proto_files: Vec<PathBuf>,

    /// Discover schemas through server reflection.
    #[arg(long)]
    pub proto_reflect: bool,

    /// `host:port` of the reflection service [default: 127.0.0.1:<service-port>].
    #[arg(long, requires = "proto_reflect")]
    pub reflect_addr: Option<String>,

    /// Method paths to try for streams whose path was not captured,
    /// comma-separated, or `AUTO` for every known path.
    #[arg(short = 'm', long)]
    pub guess_path: Option<String>,

    /// Output format: `text` or `json`.
    #[arg(short, long, default_value = "text")]
    pub output_format: String,

    /// Print a grpcurl command replaying each request.
    #[arg(long)]
    pub grpcurl: bool,

    /// Increase log verbosity; repeat for more.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
