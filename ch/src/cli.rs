//! CLI command definitions and subcommands

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// crosshub - permissioned key-value hub
#[derive(Parser, Debug)]
#[command(name = "xh", author, version, about = "Serve or query a permissioned key-value hub", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Hub socket path (overrides config)
    #[arg(short, long, global = true)]
    pub socket: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every client subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct ClientArgs {
    /// Origin to send requests as (overrides config)
    #[arg(short, long)]
    pub origin: Option<String>,

    /// Request timeout in milliseconds (overrides config)
    #[arg(short = 't', long = "timeout-ms")]
    pub timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the configured store over the hub socket
    Hub {
        /// Store file (overrides config)
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Read one or more keys
    Get {
        #[command(flatten)]
        client: ClientArgs,

        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Write a key; the value is parsed as JSON, falling back to a string
    Set {
        #[command(flatten)]
        client: ClientArgs,

        #[arg(required = true)]
        key: String,

        #[arg(required = true)]
        value: String,

        /// Expire the item after this many milliseconds
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Delete one or more keys
    Del {
        #[command(flatten)]
        client: ClientArgs,

        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// List every key
    Keys {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Remove every key
    Clear {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Print store change notices until interrupted
    Watch {
        #[command(flatten)]
        client: ClientArgs,

        /// Event key to subscribe under
        #[arg(long, default_value = "xh-watch")]
        event_key: String,
    },
}
