//! Crimson OSD - in-memory object storage daemon
//!
//! Binds a TCP listener and serves the segmented frame protocol over a
//! sharded in-memory store.

mod service;

use anyhow::Result;
use clap::Parser;
use crimson_common::StoreConfig;
use crimson_net::{Listener, SocketListener};
use crimson_runtime::Runtime;
use crimson_store::Store;
use serde::Deserialize;
use service::OsdService;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "crimson-osd")]
#[command(about = "Crimson object storage daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/crimson/osd.toml")]
    config: String,

    /// Listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Number of store cores (defaults to available parallelism)
    #[arg(long)]
    cores: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct Config {
    #[serde(default)]
    osd: OsdConfig,
    #[serde(default)]
    store: StoreConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
struct OsdConfig {
    #[serde(default = "default_listen")]
    listen: String,
}

impl Default for OsdConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoggingConfig {
    #[serde(default = "default_log_level")]
    level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:6800".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // load the config file if it exists; CLI arguments take precedence
    let config: Config = if std::path::Path::new(&args.config).exists() {
        let config_str = std::fs::read_to_string(&args.config)?;
        toml::from_str(&config_str).unwrap_or_else(|err| {
            eprintln!("Warning: failed to parse config file: {err}");
            Config::default()
        })
    } else {
        Config::default()
    };

    let listen = args.listen.unwrap_or(config.osd.listen);
    let log_level = if args.log_level != "info" {
        args.log_level
    } else {
        config.logging.level
    };
    let mut store_config = config.store;
    if let Some(cores) = args.cores {
        store_config.core_count = cores;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Crimson OSD");
    info!(
        cores = store_config.core_count,
        page_size = store_config.page_size,
        pages_per_stride = store_config.pages_per_stride,
        "store configuration"
    );

    let runtime = Runtime::new(store_config.core_count)?;
    let store = Store::new(runtime.handle(), store_config)?;
    info!(fsid = %store.get_fsid(), "store ready");

    let service = Arc::new(OsdService::new(store).await?);

    let mut listener = SocketListener::bind(&listen).await?;
    info!(%listen, "accepting connections");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok(conn) => {
                        let service = service.clone();
                        let peer = conn.peer().to_string();
                        tokio::spawn(async move {
                            if let Err(err) = service.serve_connection(conn).await {
                                warn!(%peer, %err, "connection error");
                            }
                        });
                    }
                    Err(err) => {
                        error!(%err, "accept error");
                        break;
                    }
                }
            }
        }
    }

    listener.close().await?;
    info!("OSD shut down gracefully");
    Ok(())
}
