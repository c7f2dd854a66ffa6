//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Peer-to-peer Bluetooth messaging", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Bluetooth adapter to use (e.g. hci0)
    #[arg(short, long, global = true)]
    pub adapter: Option<String>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// List paired peers, then scan for nearby ones
    Scan {
        /// Stop scanning after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Connect to a peer and start chatting
    Connect {
        /// Address of the peer, e.g. 00:11:22:33:44:55
        address: String,
        /// Use an unauthenticated link
        #[arg(long)]
        insecure: bool,
    },
    /// Wait for one peer to connect and start chatting
    Listen {
        /// Accept unauthenticated links
        #[arg(long)]
        insecure: bool,
    },
    /// Run two simulated radios exchanging messages
    Demo,
}
