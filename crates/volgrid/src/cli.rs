//! Command line interface definition.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// volgrid: distributed storage management daemon.
#[derive(Parser)]
#[command(name = "volgridd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the daemon.
    Serve(ServeArgs),
    /// Print version information.
    Version,
}

/// Arguments for the serve command.
#[derive(Args)]
pub struct ServeArgs {
    /// Path to configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Bind address for the REST server (overrides config).
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,

    /// Working directory holding the node identity (overrides config).
    #[arg(short, long)]
    pub workdir: Option<PathBuf>,

    /// etcd endpoints, comma separated (overrides config).
    #[arg(long, value_delimiter = ',')]
    pub store_endpoints: Vec<String>,
}
