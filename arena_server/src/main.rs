//! Standalone lobby server binary.
//!
//! Usage:
//!   cargo run -p arena_server -- [--addr 127.0.0.1:40000] [--tick-hz 60]
//!       [--timeout-ms 5000] [--config server.json]
//!
//! The server listens for admission requests, opens one session per room,
//! and runs each room's fixed timestep simulation on its own thread.

use std::env;

use anyhow::Context;
use arena_server::lobby::Lobby;
use arena_shared::config::ServerConfig;
use tracing::info;

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = ServerConfig::default();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                let text = std::fs::read_to_string(&args[i + 1])
                    .with_context(|| format!("read config {}", args[i + 1]))?;
                cfg = ServerConfig::from_json_str(&text)
                    .with_context(|| format!("parse config {}", args[i + 1]))?;
                i += 2;
            }
            "--addr" if i + 1 < args.len() => {
                cfg.lobby_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(60);
                i += 2;
            }
            "--timeout-ms" if i + 1 < args.len() => {
                cfg.client_timeout_ms = args[i + 1].parse().unwrap_or(5_000);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.lobby_addr, tick_hz = cfg.tick_hz, "starting lobby");

    let lobby = Lobby::bind(cfg).await.context("create lobby")?;
    lobby.run().await
}
