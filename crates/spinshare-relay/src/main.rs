//! spinshare-relay: WebSocket signaling relay for screen-share rooms.
//!
//! Accepts WebSocket connections, groups them into rooms by id (one sender,
//! any number of receivers) and routes signals between members. The relay
//! never looks inside session descriptions or candidates; it only stamps
//! who sent them and generates membership events.

mod connection;
mod room;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use spinshare_common::new_correlation_id;
use spinshare_config::SpinshareConfig;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tracing::Instrument;

use crate::connection::handle_connection;
use crate::room::RoomStore;

/// How often the reaper looks for abandoned rooms.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "spinshare-relay", about = "WebSocket signaling relay for spinshare rooms")]
struct Args {
    /// Port to listen on. Defaults to `relay.listen_port` from the config.
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file to load instead of the platform default.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. `debug`. `RUST_LOG` takes precedence.
    #[arg(long)]
    log_level: Option<String>,

    /// Maximum age in seconds of a room with no sender.
    #[arg(long)]
    room_ttl: Option<u64>,

    /// Print the effective config as JSON and exit.
    #[arg(long)]
    print_config: bool,
}

fn load_config(args: &Args) -> SpinshareConfig {
    let loaded = match &args.config {
        Some(path) => spinshare_config::load_config_from(path),
        None => spinshare_config::load_config(),
    };
    // Logging is not up yet; report on stderr.
    loaded.unwrap_or_else(|e| {
        eprintln!("spinshare-relay: {e}; using defaults");
        SpinshareConfig::default()
    })
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = load_config(&args);
    if args.print_config {
        println!("{}", spinshare_config::config_to_json(&config));
        return;
    }

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.as_directive().to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("spinshare_relay={level}").into()),
        )
        .init();

    let store = RoomStore::new();
    let port = args.port.unwrap_or(config.relay.listen_port);
    let addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind TCP listener");
            std::process::exit(1);
        }
    };

    tracing::info!("spinshare-relay listening on {}", addr);

    // Spawn stale room reaper.
    let reaper_store = store.clone();
    let ttl = Duration::from_secs(args.room_ttl.unwrap_or(config.relay.room_ttl_secs));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(REAP_INTERVAL).await;
            let reaped = reaper_store.reap_stale(ttl).await;
            let count = reaper_store.count().await;
            tracing::debug!(rooms = count, reaped, "Reaper tick");
        }
    });

    // Accept loop.
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let store = store.clone();
                let span = tracing::info_span!("conn", cid = %new_correlation_id());
                tokio::spawn(
                    async move {
                        match accept_async(stream).await {
                            Ok(ws) => handle_connection(ws, addr, store).await,
                            Err(e) => {
                                tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                            }
                        }
                    }
                    .instrument(span),
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}
