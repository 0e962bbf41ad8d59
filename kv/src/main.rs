use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use kvstore::cli::{Cli, Command};
use kvstore::config::Config;
use kvstore::{FileStore, KeyValueStore};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let store_path = cli.store.unwrap_or(config.store_path);

    info!("kv opening {}", store_path.display());
    let mut store = FileStore::open(&store_path).context("Failed to open store")?;

    match cli.command {
        Command::Keys => {
            let keys = store.keys()?;
            if keys.is_empty() {
                println!("No keys found");
            } else {
                for key in keys {
                    println!("{}", key);
                }
            }
        }
        Command::Get { key } => match store.get(&key)? {
            Some(raw) => println!("{}", raw),
            None => {
                eprintln!("{} Key not found: {}", "✗".red(), key.yellow());
                std::process::exit(1);
            }
        },
        Command::Set { key, value } => {
            store.set(&key, &value)?;
            println!("{} Set {}", "✓".green(), key.cyan());
        }
        Command::Del { keys } => {
            for key in &keys {
                store.remove(key)?;
            }
            println!("{} Deleted {} key(s)", "✓".green(), keys.len());
        }
        Command::Clear => {
            store.clear()?;
            println!("{} Cleared {}", "✓".green(), store_path.display());
        }
    }

    Ok(())
}
