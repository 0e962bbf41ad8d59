//! crosshub - permissioned key-value hub
//!
//! CLI entry point for serving a hub and querying it as a client.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use serde_json::Value;
use tracing::{debug, info, warn};

use crosshub::cli::{Cli, ClientArgs, Command};
use crosshub::config::Config;
use crosshub::hub::{self, Hub, HubStatus};
use crosshub::transport::{SocketPort, cleanup_socket, create_listener_at};
use crosshub::{Client, ClientOptions, Origin};
use kvstore::{FileStore, SharedStore};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("crosshub")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("crosshub.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let socket_path = cli.socket.clone().unwrap_or_else(|| config.hub.socket_path());

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Hub { store } => cmd_hub(&config, &socket_path, store).await,
        Command::Get { client, keys } => {
            let client = connect(&config, &socket_path, &client).await?;
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            let value = client.get(&keys).await?;
            print_json(&value)
        }
        Command::Set {
            client,
            key,
            value,
            ttl,
        } => {
            let client = connect(&config, &socket_path, &client).await?;
            let value = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
            client.set(&key, value, ttl.map(Duration::from_millis)).await?;
            println!("{} Set {}", "✓".green(), key.cyan());
            Ok(())
        }
        Command::Del { client, keys } => {
            let client = connect(&config, &socket_path, &client).await?;
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            client.del(&refs).await?;
            println!("{} Deleted {} key(s)", "✓".green(), keys.len());
            Ok(())
        }
        Command::Keys { client } => {
            let client = connect(&config, &socket_path, &client).await?;
            let keys = client.get_keys().await?;
            if keys.is_empty() {
                println!("No keys found");
            } else {
                for key in keys {
                    println!("{}", key);
                }
            }
            Ok(())
        }
        Command::Clear { client } => {
            let client = connect(&config, &socket_path, &client).await?;
            client.clear().await?;
            println!("{} Cleared", "✓".green());
            Ok(())
        }
        Command::Watch { client, event_key } => cmd_watch(&config, &socket_path, &client, &event_key).await,
    }
}

/// Serve the store at the configured socket until interrupted
async fn cmd_hub(config: &Config, socket_path: &Path, store: Option<PathBuf>) -> Result<()> {
    let store_path = store.unwrap_or_else(|| config.hub.store_path.clone());
    debug!(?socket_path, ?store_path, "cmd_hub: called");

    let hub_origin = Origin::from_url(&config.hub.origin).context("Invalid hub origin")?;
    if config.hub.permissions.is_empty() {
        warn!("Permission table is empty, every request will be denied");
    }

    let store = SharedStore::new(FileStore::open(&store_path).context("Failed to open store")?);
    let listener = create_listener_at(socket_path).context("Failed to bind hub socket")?;

    println!(
        "{} Hub {} serving {} on {}",
        "✓".green(),
        hub_origin.as_str().cyan(),
        store_path.display(),
        socket_path.display()
    );
    info!(%hub_origin, ?store_path, ?socket_path, "Hub listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!(error = %e, "cmd_hub: accept failed");
                        continue;
                    }
                };

                let port = SocketPort::from_stream(stream, hub_origin.clone());
                let mut hub = Hub::new(store.clone(), config.hub.permissions.clone());
                if !config.hub.listen {
                    hub = hub.without_listeners();
                }
                match hub::init(hub, port).await {
                    HubStatus::Running(_) => debug!("cmd_hub: connection accepted"),
                    HubStatus::Unavailable(e) => warn!(error = %e, "cmd_hub: store unavailable for connection"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Hub received interrupt, shutting down");
                break;
            }
        }
    }

    cleanup_socket(socket_path);
    Ok(())
}

/// Print change notices until interrupted
async fn cmd_watch(config: &Config, socket_path: &Path, args: &ClientArgs, event_key: &str) -> Result<()> {
    let client = connect(config, socket_path, args).await?;
    let mut subscription = client.listen(event_key).await?;
    println!("{} Watching {} (Ctrl-C to stop)", "✓".green(), event_key.cyan());

    loop {
        tokio::select! {
            notice = subscription.recv() => {
                let Some(notice) = notice else {
                    println!("Hub closed the subscription");
                    break;
                };
                let key = notice.key.as_deref().unwrap_or("*");
                println!(
                    "{} {} -> {}",
                    key.yellow(),
                    serde_json::to_string(&notice.old_value)?,
                    serde_json::to_string(&notice.new_value)?
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Err(e) = client.unlisten(event_key).await {
        debug!(error = %e, "cmd_watch: unlisten failed");
    }
    client.close().await;
    Ok(())
}

/// Connect a client to the hub socket and wait for the hub to answer
async fn connect(config: &Config, socket_path: &Path, args: &ClientArgs) -> Result<Client> {
    let origin_url = args.origin.as_deref().unwrap_or(&config.client.origin);
    let timeout = Duration::from_millis(args.timeout_ms.unwrap_or(config.client.timeout_ms));
    debug!(%origin_url, ?socket_path, ?timeout, "connect: called");

    let origin = Origin::from_url(origin_url).context("Invalid client origin")?;
    let port = SocketPort::connect(socket_path, origin)
        .await
        .context(format!("Failed to connect to hub at {}", socket_path.display()))?;

    let options = ClientOptions::default()
        .with_timeout(timeout)
        .with_channel_id(socket_path.display().to_string());
    let client = Client::new(&config.hub.origin, options, port)?;

    tokio::time::timeout(timeout, client.on_connect())
        .await
        .map_err(|_| eyre!("Hub at {} did not answer", socket_path.display()))??;
    Ok(client)
}

fn print_json(value: &Value) -> Result<()> {
    if value.is_null() {
        println!("{}", "null".dimmed());
    } else {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}
