//! Command-line interface for strictly_arena.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Strictly Arena - matchmaking and verified tic-tac-toe sessions
#[derive(Parser, Debug)]
#[command(name = "strictly_arena")]
#[command(about = "Matchmaking queue and session core for two-player games", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the effective configuration as TOML
    Config {
        /// Path to a TOML config file (falls back to STRICTLY_ARENA_CONFIG)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Enroll synthetic players, pair them and play every game out
    Simulate {
        /// Number of players to enroll
        #[arg(short, long, default_value = "8")]
        players: usize,

        /// Path to a TOML config file (falls back to STRICTLY_ARENA_CONFIG)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print every event as JSON
        #[arg(long)]
        events: bool,
    },
}
