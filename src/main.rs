//! Oche - console scoreboard
//!
//! Plays a darts match against a session store, or locally with no server.

#![warn(missing_docs)]

mod cli;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use oche::{
    Authenticator, EngineConfig, GameSession, RestRemoteStore, SessionError, SsePushChannel,
    StandaloneStore, StaticCredentials, render_scoreboard,
};
use oche_rules::{Seat, ThrowGroup, VariantScore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, instrument};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Play {
            session,
            server_url,
            player,
            marker,
        } => run_play(config, session, server_url, player, marker).await,
        Command::Standalone { variant, players } => run_standalone(config, variant, players).await,
        Command::Resume { marker } => run_resume(config, marker).await,
    }
}

/// Open a remote session and play it from the console
#[instrument(skip(config, marker))]
async fn run_play(
    mut config: EngineConfig,
    session: String,
    server_url: Option<String>,
    player: Option<String>,
    marker: Option<std::path::PathBuf>,
) -> Result<()> {
    if let Some(url) = server_url {
        config = config.with_server_url(url);
    }
    if player.is_some() {
        config = config.with_player(player);
    }
    if marker.is_some() {
        config = config.with_marker_path(marker);
    }

    let auth = credentials(&config);
    let (remote, push) = connect(&config, auth.clone())?;
    let game = GameSession::open(&config, &session, remote, push, auth.clone()).await?;
    let hot_seat = auth.current_player().is_none();
    run_console(game, hot_seat).await
}

/// Reopen the session named by the marker file
#[instrument(skip(config, marker))]
async fn run_resume(mut config: EngineConfig, marker: Option<std::path::PathBuf>) -> Result<()> {
    if marker.is_some() {
        config = config.with_marker_path(marker);
    }
    let auth = credentials(&config);
    let (remote, push) = connect(&config, auth.clone())?;
    match GameSession::resume(&config, remote, push, auth.clone()).await? {
        Some(game) => run_console(game, auth.current_player().is_none()).await,
        None => {
            println!("Nothing to resume.");
            Ok(())
        }
    }
}

/// Play locally, everyone at the same keyboard
#[instrument(skip(config))]
async fn run_standalone(
    config: EngineConfig,
    variant: oche_rules::Variant,
    players: Vec<String>,
) -> Result<()> {
    let seats: Vec<Seat> = players
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(|name| Seat::new(name.to_lowercase(), name))
        .collect();
    if seats.is_empty() {
        anyhow::bail!("Standalone play needs at least one player");
    }

    let store = StandaloneStore::new();
    let session_id = store.create_session(variant, &seats);
    info!(%session_id, %variant, players = seats.len(), "Standalone session created");

    let config = config.with_marker_path(None);
    let store = Arc::new(store);
    let game = GameSession::open(
        &config,
        &session_id,
        store.clone(),
        store,
        Arc::new(StaticCredentials::anonymous()),
    )
    .await?;
    run_console(game, true).await
}

fn credentials(config: &EngineConfig) -> Arc<dyn Authenticator> {
    Arc::new(StaticCredentials::new(
        config.player().clone(),
        config.token().clone(),
    ))
}

fn connect(
    config: &EngineConfig,
    auth: Arc<dyn Authenticator>,
) -> Result<(Arc<RestRemoteStore>, Arc<SsePushChannel>)> {
    let timeout = config.sync().request_timeout();
    let remote = RestRemoteStore::new(config.server_url(), auth.clone(), timeout)?;
    let push = SsePushChannel::new(config.server_url(), auth, timeout)?;
    debug!(server_url = %config.server_url(), "Remote store configured");
    Ok((Arc::new(remote), Arc::new(push)))
}

/// Reads commands until quit or the game ends.
///
/// With `hot_seat`, throws are attributed to whoever is up rather than to
/// the signed-in player.
async fn run_console(game: GameSession, hot_seat: bool) -> Result<()> {
    println!("{}", render_scoreboard(&game.state()));
    println!("Type 'help' for commands.");

    let mut snapshots = game.subscribe();
    let mut connection = game.subscribe_connection();
    let watcher = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let board = render_scoreboard(&snapshots.borrow_and_update());
                    println!("\n{}", board);
                }
                changed = connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = *connection.borrow_and_update();
                    println!("[live updates: {}]", status);
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let state = game.state();
        let clock_score = state.session().active_player().and_then(|p| match p.score() {
            VariantScore::AroundTheClock(score) => Some(score),
            _ => None,
        });

        let command = match oche::parse_command(&line, clock_score) {
            Ok(command) => command,
            Err(err) => {
                println!("{}", err);
                continue;
            }
        };

        let outcome = match command {
            oche::Command::Quit => break,
            oche::Command::Help => {
                println!("{}", oche::HELP);
                continue;
            }
            oche::Command::Throws(group) => submit(&game, group, hot_seat).await,
            oche::Command::End(winner) => game.end_game(&winner).await.map(|_| ()),
            oche::Command::Cancel => game.cancel_game().await.map(|_| ()),
            oche::Command::Refresh => game.refresh().await.map(|_| ()),
            oche::Command::Reconnect => {
                game.reconnect();
                Ok(())
            }
        };

        if let Err(err) = outcome {
            println!("! {}", err);
            if err.is_unauthorized() {
                println!("Sign in again and restart.");
                break;
            }
        }
        if game.state().session().status().is_terminal() {
            println!("Game over.");
            break;
        }
    }

    game.leave_view();
    watcher.abort();
    Ok(())
}

async fn submit(game: &GameSession, group: ThrowGroup, hot_seat: bool) -> Result<(), SessionError> {
    let report = if hot_seat {
        let up = game
            .state()
            .session()
            .active_player()
            .map(|p| p.id().clone())
            .ok_or(SessionError::NoActingPlayer)?;
        game.submit_throws_as(&up, group).await?
    } else {
        game.submit_throws(group).await?
    };
    match report.reason() {
        Some(reason) => println!("{}", reason),
        None => println!("{}", report.event()),
    }
    Ok(())
}
