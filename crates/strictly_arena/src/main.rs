//! Strictly Arena - CLI
//!
//! Inspects configuration and drives local simulations of the arena core.

#![warn(missing_docs)]

mod cli;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use cli::{Cli, Command};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strictly_arena::{
    Arena, ArenaConfig, BroadcastSink, CONFIG_ENV_VAR, EnergySnapshot, EnrollRequest,
    GameSession, JoinOutcome, SessionStatus, spawn_sweeper,
};
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Command::Config { config } => print_config(config),
        Command::Simulate {
            players,
            config,
            events,
        } => simulate(players, config, events).await,
    }
}

/// Loads the config from the flag, then the environment, then defaults.
#[instrument]
fn load_config(path: Option<PathBuf>) -> Result<ArenaConfig> {
    let path = path.or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));
    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading arena config");
            ArenaConfig::from_file(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))
        }
        None => {
            debug!("No config file given, using defaults");
            Ok(ArenaConfig::default())
        }
    }
}

fn print_config(path: Option<PathBuf>) -> Result<()> {
    let config = load_config(path)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

/// Pairs `players` synthetic players and plays each session to the end.
#[instrument]
async fn simulate(players: usize, path: Option<PathBuf>, print_events: bool) -> Result<()> {
    let config = load_config(path)?;
    let sink = BroadcastSink::new(players.saturating_mul(16).max(64));
    let mut events = sink.subscribe();
    let arena = Arena::with_sink(config, Arc::new(sink));
    let sweeper = spawn_sweeper(arena.clone(), Duration::from_secs(1));

    let now = Utc::now();
    let energy = EnergySnapshot::new(
        *arena.config().energy().max_energy(),
        *arena.config().energy().max_energy(),
        now,
    );

    let mut sessions = Vec::new();
    for i in 0..players {
        let id = format!("sim-{i:03}");
        let request = EnrollRequest::new(
            id.clone(),
            format!("player_{i:03}"),
            (10 + (i % 3)) as i64,
            Some(1000 + (i as i64 * 25)),
            format!("local-{i}"),
        );
        match arena.join(request, &energy, Utc::now()) {
            Ok(joined) => {
                if let JoinOutcome::Matched(session) = joined.outcome() {
                    sessions.push(session.clone());
                }
            }
            Err(e) => warn!(player_id = %id, error = %e, "Join refused"),
        }
    }

    let mut finished = 0usize;
    for session in &sessions {
        play_out(&arena, session)?;
        arena.retire(session.id())?;
        finished += 1;
    }
    sweeper.abort();

    info!(
        players,
        finished,
        still_waiting = arena.queue().len(),
        "Simulation complete"
    );

    while let Ok(event) = events.try_recv() {
        if print_events {
            println!("{}", serde_json::to_string(&event)?);
        }
    }
    println!(
        "{} sessions played, {} players left waiting",
        finished,
        arena.queue().len()
    );
    Ok(())
}

/// Plays first-free-square moves until the session ends.
fn play_out(arena: &Arena, session: &GameSession) -> Result<()> {
    let id = session.id();
    loop {
        let current = arena
            .sessions()
            .get(id)
            .with_context(|| format!("Session {id} disappeared"))?;
        if current.status() != SessionStatus::Active {
            info!(
                session_id = %id,
                outcome = ?current.outcome(),
                winner = ?current.winner(),
                "Game over"
            );
            return Ok(());
        }
        let pos = current
            .board()
            .empty_positions()
            .first()
            .copied()
            .with_context(|| format!("Session {id} is active with a full board"))?;
        let mover = current.player_for(current.to_move()).id.clone();
        arena.play(id, &mover, pos.row(), pos.col(), Utc::now())?;
    }
}
