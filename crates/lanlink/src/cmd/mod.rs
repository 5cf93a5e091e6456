use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod browse;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Advertise this node and print received messages.
    Listen(ListenArgs),
    /// Browse for advertised peers.
    Browse(BrowseArgs),
    /// Send a message or file to a discovered peer.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format).await,
        Command::Browse(args) => browse::run(args, format).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Display name to advertise.
    #[arg(long)]
    pub name: String,
    /// Address to bind; port 0 selects an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:0")]
    pub bind: SocketAddr,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct BrowseArgs {
    /// This node's own display name (excluded from results).
    #[arg(long)]
    pub name: String,
    /// Exit after printing N result sets.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// This node's own display name.
    #[arg(long)]
    pub name: String,
    /// Display name of the peer to send to.
    #[arg(long)]
    pub peer: String,
    /// Text payload sent as one message.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// File payload sent as a chunked binary stream.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Announce the disconnect and close after sending.
    #[arg(long)]
    pub disconnect: bool,
    /// Maximum time to wait for the peer to appear (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build information.
    #[arg(long)]
    pub extended: bool,
}
