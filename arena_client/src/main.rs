//! Headless client binary.
//!
//! Usage:
//!   cargo run -p arena_client -- [--addr 127.0.0.1:40000] [create|create-private|join|infinite]
//!
//! Joins a room, streams idle inputs to stay connected, and prints a
//! short world summary once a second until the game ends.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use arena_client::client::{ClientMode, GameClient};
use arena_shared::{delta::Archetype, input::Buttons};
use tracing::info;

fn parse_args() -> anyhow::Result<(SocketAddr, ClientMode)> {
    let args: Vec<String> = env::args().collect();
    let mut addr = "127.0.0.1:40000".to_string();
    let mut mode = ClientMode::QuickJoin;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                addr = args[i + 1].clone();
                i += 2;
            }
            "create" => {
                mode = ClientMode::Create { private: false };
                i += 1;
            }
            "create-private" => {
                mode = ClientMode::Create { private: true };
                i += 1;
            }
            "join" => {
                mode = ClientMode::QuickJoin;
                i += 1;
            }
            "infinite" => {
                mode = ClientMode::Infinite;
                i += 1;
            }
            _ => i += 1,
        }
    }
    let addr = addr.parse().with_context(|| format!("bad address {addr}"))?;
    Ok((addr, mode))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (lobby, mode) = parse_args()?;
    let mut client = GameClient::new().await?;
    info!(%lobby, ?mode, "joining");
    client.join(lobby, mode, Duration::from_secs(120)).await?;

    let mut since_report = Duration::ZERO;
    let period = Duration::from_millis(50);
    loop {
        client.send_input(Buttons::empty()).await?;
        client.pump(period).await?;
        if client.replica.game_over {
            println!("game over at tick {:?}", client.replica.last_applied());
            return Ok(());
        }
        since_report += period;
        if since_report >= Duration::from_secs(1) {
            since_report = Duration::ZERO;
            println!(
                "tick {:?}: {} players, {} shots",
                client.replica.last_applied(),
                client.replica.count(Archetype::Player),
                client.replica.count(Archetype::Projectile),
            );
        }
    }
}
