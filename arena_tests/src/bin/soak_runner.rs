//! Soak runner: boots a lobby in-process, fills one room with four
//! scripted bots, and drives them for a while.
//!
//! Usage:
//!   cargo run -p arena_tests --bin soak_runner -- [--seconds 30]
//!
//! Prints a per-bot summary at the end; exits nonzero if any bot lost
//! its session early.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use arena_client::client::{ClientMode, GameClient};
use arena_server::lobby::Lobby;
use arena_shared::{config::ServerConfig, delta::Archetype, input::Buttons};
use tracing::info;

/// Deterministic button script: strafe in a square, firing in bursts.
fn scripted_buttons(step: u32, bot: u32) -> Buttons {
    let phase = (step / 20 + bot) % 4;
    let mut buttons = match phase {
        0 => Buttons::RIGHT,
        1 => Buttons::DOWN,
        2 => Buttons::LEFT,
        _ => Buttons::UP,
    };
    if step % 30 < 5 {
        buttons |= Buttons::FIRE;
    }
    buttons
}

async fn run_bot(
    lobby: SocketAddr,
    bot: u32,
    mode: ClientMode,
    duration: Duration,
) -> anyhow::Result<(u32, usize)> {
    let mut client = GameClient::new().await?;
    client
        .join(lobby, mode, Duration::from_secs(30))
        .await
        .with_context(|| format!("bot {bot} join"))?;

    let mut applied = 0;
    let mut step = 0u32;
    let until = tokio::time::Instant::now() + duration;
    while tokio::time::Instant::now() < until {
        client.send_input(scripted_buttons(step, bot)).await?;
        applied += client.pump(Duration::from_millis(50)).await?;
        if client.replica.game_over {
            break;
        }
        step += 1;
    }

    info!(
        bot,
        applied,
        players = client.replica.count(Archetype::Player),
        shots = client.replica.count(Archetype::Projectile),
        game_over = client.replica.game_over,
        "bot finished"
    );
    Ok((bot, applied))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let mut seconds = 30u64;
    let mut i = 1;
    while i < args.len() {
        if args[i] == "--seconds" && i + 1 < args.len() {
            seconds = args[i + 1].parse().unwrap_or(30);
            i += 2;
        } else {
            i += 1;
        }
    }
    let duration = Duration::from_secs(seconds);

    let cfg = ServerConfig {
        lobby_addr: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    };
    let lobby = Lobby::bind(cfg).await?;
    let addr = lobby.local_addr()?;
    tokio::spawn(lobby.run());
    info!(%addr, seconds, "soak starting");

    // The creator opens the room; the quick joiners fill it.
    let creator = tokio::spawn(run_bot(
        addr,
        0,
        ClientMode::Create { private: false },
        duration,
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut bots = vec![creator];
    for bot in 1..4 {
        bots.push(tokio::spawn(run_bot(
            addr,
            bot,
            ClientMode::QuickJoin,
            duration,
        )));
    }

    let mut failures = 0;
    for handle in bots {
        match handle.await? {
            Ok((bot, applied)) => println!("bot {bot}: {applied} packets applied"),
            Err(err) => {
                eprintln!("bot failed: {err:#}");
                failures += 1;
            }
        }
    }
    anyhow::ensure!(failures == 0, "{failures} bot(s) failed");
    println!("soak ok");
    Ok(())
}
