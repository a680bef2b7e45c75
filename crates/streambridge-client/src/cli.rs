//! Command-line interface definition.

use std::path::PathBuf;

use clap::Parser;

/// streambridge-tail - print exported stream events as JSON lines
#[derive(Debug, Parser)]
#[command(name = "streambridge-tail")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Export socket of the running daemon
    #[arg(long, short, env = "STREAMBRIDGE_SOCKET")]
    pub socket_path: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Largest frame accepted, in bytes
    #[arg(long, default_value_t = streambridge_protocol::DEFAULT_READ_BUFFER)]
    pub buffer_size: usize,

    /// Seconds to wait for the daemon socket
    #[arg(long, default_value_t = 5)]
    pub connect_timeout: u64,
}
