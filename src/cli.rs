//! Command-line interface for oche.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use oche_rules::Variant;

/// Oche - darts scoreboard with live session sync
#[derive(Parser, Debug)]
#[command(name = "oche")]
#[command(about = "Score darts matches against a shared session store", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Join a session on the remote store
    Play {
        /// Session to open
        #[arg(short, long)]
        session: String,

        /// Store URL, overrides config and environment
        #[arg(long)]
        server_url: Option<String>,

        /// Submit throws as this player; without it, throws go to whoever is up
        #[arg(long = "as")]
        player: Option<String>,

        /// Remember the session here so `resume` can reopen it
        #[arg(long)]
        marker: Option<PathBuf>,
    },

    /// Play a local game with no server, passing the board around
    Standalone {
        /// Game to play (301, 501, cricket, around_the_clock)
        #[arg(short, long, default_value = "501")]
        variant: Variant,

        /// Comma-separated player names, in throwing order
        #[arg(short, long, value_delimiter = ',', required = true)]
        players: Vec<String>,
    },

    /// Reopen the session recorded in the marker file
    Resume {
        /// Marker file to read, overrides config
        #[arg(long)]
        marker: Option<PathBuf>,
    },
}
