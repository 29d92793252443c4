//! crimson-put - stream a local file into a Crimson object
//!
//! Reads the file in fixed-size blocks and drives the write client, which
//! keeps up to `max_requests` unapplied writes in flight.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use crimson_client::WriteClient;
use crimson_common::WriteClientConfig;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "crimson-put")]
#[command(about = "Stream a local file into a Crimson object")]
#[command(version)]
struct Args {
    /// OSD address
    #[arg(long, default_value = "127.0.0.1:6800")]
    address: String,

    /// Source filename
    #[arg(long)]
    filename: String,

    /// Target object name
    #[arg(long)]
    object: String,

    /// Write block size in bytes
    #[arg(long, default_value_t = 4096)]
    block_size: usize,

    /// Maximum number of outstanding write requests
    #[arg(long, default_value_t = 32)]
    max_requests: usize,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WriteClientConfig {
        max_in_flight: args.max_requests,
        block_size: args.block_size,
    };

    info!(address = %args.address, "connecting");
    let conn = crimson_net::connect(&args.address)
        .await
        .with_context(|| format!("failed to connect to {}", args.address))?;
    let client = Arc::new(WriteClient::new(conn, args.object.clone(), &config)?);

    let mut file = tokio::fs::File::open(&args.filename)
        .await
        .with_context(|| format!("failed to open {}", args.filename))?;
    let size = file.metadata().await?.len();
    info!(filename = %args.filename, size, "sending");

    let mut offset = 0u64;
    let mut sends: JoinSet<crimson_common::Result<()>> = JoinSet::new();
    loop {
        let block = read_block(&mut file, args.block_size).await?;
        if block.is_empty() {
            break;
        }
        let advance = block.len() as u64;

        while sends.len() >= args.max_requests {
            if let Some(result) = sends.join_next().await {
                result??;
            }
        }
        let client = client.clone();
        let position = offset;
        sends.spawn(async move { client.send(position, block).await });
        offset += advance;
    }
    while let Some(result) = sends.join_next().await {
        result??;
    }

    client.close().await?;
    info!(object = %args.object, bytes = offset, "completed");
    Ok(())
}

/// Read up to `block_size` bytes, short only at end of file.
async fn read_block(file: &mut tokio::fs::File, block_size: usize) -> Result<Bytes> {
    let mut buf = vec![0u8; block_size];
    let mut filled = 0;
    while filled < block_size {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(Bytes::from(buf))
}
