//! CLI argument parsing for kvstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "kv")]
#[command(author, version, about = "Inspect a crosshub key-value store file", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Store file (overrides config)
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List every key
    Keys,

    /// Print the raw stored value for a key
    Get {
        #[arg(required = true)]
        key: String,
    },

    /// Write a raw value for a key
    Set {
        #[arg(required = true)]
        key: String,

        /// Raw value, stored verbatim
        #[arg(required = true)]
        value: String,
    },

    /// Remove one or more keys
    Del {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Remove every key
    Clear,
}
