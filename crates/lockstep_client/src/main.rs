//! Lockstep client binary.
//!
//! # Usage
//!
//! ```bash
//! # Play a local game against an in-process relay
//! cargo run -p lockstep_client -- demo --turns 300
//!
//! # Same, with settings from a file, recording a replay
//! cargo run -p lockstep_client -- --config crates/lockstep_client/config/demo.ron demo --record demo.json
//!
//! # Verify a recorded replay
//! cargo run -p lockstep_client -- replay --file demo.json --verify
//!
//! # Print the effective config
//! cargo run -p lockstep_client -- config
//! ```
//!
//! Logs go to stderr. `RUST_LOG` overrides the default filter.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lockstep_client::prelude::*;
use lockstep_core::error::GameError;
use lockstep_core::replay::{Replay, ReplayPlayer};
use lockstep_core::scheduler::{CrashNotice, RunnerObserver, SlowTick};
use lockstep_core::schema::{AttackIntent, Intent, PlayerId, PlayerType, SpawnIntent};
use lockstep_core::simulation::Simulate;

#[derive(Parser)]
#[command(name = "lockstep")]
#[command(about = "Lockstep client: local play and replay verification")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Client config file (RON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a local game against an in-process relay
    Demo {
        /// Number of turns to play
        #[arg(short, long, default_value = "200")]
        turns: u64,

        /// Override the number of bots
        #[arg(short, long)]
        bots: Option<u32>,

        /// Spawn NPC nations
        #[arg(long)]
        npcs: bool,

        /// Save the played turns as a replay
        #[arg(short, long)]
        record: Option<PathBuf>,
    },

    /// Replay a recorded game
    Replay {
        /// Replay file path
        #[arg(short, long)]
        file: PathBuf,

        /// Verify replay produces identical hash
        #[arg(long)]
        verify: bool,
    },

    /// Print the effective config as RON
    Config,
}

/// Surfaces runner notices on stderr.
struct ConsoleObserver;

impl RunnerObserver for ConsoleObserver {
    fn slow_tick(&self, warning: &SlowTick) {
        eprintln!(
            "Performance warning: turn {} took {}ms",
            warning.turn_number,
            warning.elapsed.as_millis()
        );
    }

    fn crashed(&self, notice: &CrashNotice) {
        eprintln!("{}", notice.message());
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let (remote_logs, records) = remote_log_layer(tracing::Level::WARN);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .with(remote_logs)
        .init();

    let config = match &cli.config {
        Some(path) => match ClientConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => ClientConfig::default(),
    };

    match cli.command {
        Some(Commands::Demo {
            turns,
            bots,
            npcs,
            record,
        }) => {
            let mut config = config;
            if let Some(bots) = bots {
                config.runner.num_bots = bots;
            }
            config.runner.spawn_npcs |= npcs;
            if let Err(e) = cmd_demo(config, turns, record, records).await {
                eprintln!("Demo failed: {e}");
                std::process::exit(1);
            }
        }
        Some(Commands::Replay { file, verify }) => cmd_replay(file, verify),
        Some(Commands::Config) => match config.to_ron_string() {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Failed to render config: {e}");
                std::process::exit(1);
            }
        },
        None => {
            eprintln!("No command given; try `lockstep demo` or `lockstep --help`");
        }
    }
}

/// Scripted local player: spawn at the map centre, then push outwards every
/// ten turns.
fn demo_script(config: &ClientConfig, turns: u64) -> Vec<Vec<Intent>> {
    let client_id = config.lobby.client_id.clone();
    let player_id = PlayerId::new(client_id.as_str());
    let x = i32::try_from(config.runner.map.width / 2).unwrap_or(0);
    let y = i32::try_from(config.runner.map.height / 2).unwrap_or(0);

    (0..turns)
        .map(|n| match n {
            0 => vec![Intent::Spawn(SpawnIntent {
                client_id: client_id.clone(),
                player_id: player_id.clone(),
                name: config.lobby.player_name.clone(),
                player_type: PlayerType::Human,
                x,
                y,
            })],
            n if n % 10 == 5 => vec![Intent::Attack(AttackIntent {
                client_id: client_id.clone(),
                attacker_id: player_id.clone(),
                target_id: None,
                troops: 250,
                source_x: None,
                source_y: None,
                target_x: None,
                target_y: None,
            })],
            _ => Vec::new(),
        })
        .collect()
}

async fn cmd_demo(
    config: ClientConfig,
    turns: u64,
    record: Option<PathBuf>,
    records: UnboundedReceiver<LogRecord>,
) -> Result<(), RunnerError> {
    tracing::info!(
        game = %config.lobby.game_id,
        turns,
        bots = config.runner.num_bots,
        "starting demo"
    );

    let (transport, server) = loopback();
    let relay = LocalRelay::new(
        server,
        config.lobby.game_id.clone(),
        config.runner.tick_period(),
    )
    .with_turn_limit(turns)
    .with_script(demo_script(&config, turns));
    let relay_task = tokio::spawn(relay.run());

    let runner = create_client_game(config, transport, Arc::new(ConsoleObserver))
        .await?
        .with_remote_logs(records);
    let mut handle = runner.start()?;
    handle
        .wait_for(|status| status.curr_turn >= turns || status.stopped)
        .await;
    let report = handle.stop().await?;
    let _ = relay_task.await;

    let status = &report.status;
    eprintln!("Demo finished:");
    eprintln!("  Turns applied: {}", status.curr_turn);
    eprintln!("  Busy skips: {}", status.busy_skips);
    eprintln!("  Crashes: {}", status.crashes);
    eprintln!("  State hash: {:016x}", status.state_hash);

    if let Some(path) = record {
        match report.replay.save(&path) {
            Ok(()) => eprintln!("Replay saved to {}", path.display()),
            Err(e) => eprintln!("Failed to save replay: {e}"),
        }
    }
    Ok(())
}

fn cmd_replay(file: PathBuf, verify: bool) {
    if verify {
        tracing::info!("Verifying replay: {}", file.display());
    } else {
        tracing::info!("Playing replay: {}", file.display());
    }

    let replay = match Replay::load(&file) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to load replay: {e}");
            std::process::exit(1);
        }
    };

    eprintln!("Loaded replay:");
    eprintln!("  Game: {}", replay.setup.game_id);
    eprintln!(
        "  Map: {}x{} (seed {})",
        replay.setup.map.width, replay.setup.map.height, replay.setup.map.seed
    );
    eprintln!("  Bots: {}", replay.setup.num_bots);
    eprintln!("  Turns: {}", replay.turn_count());

    let mut player = match ReplayPlayer::new(replay) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to create replay player: {e}");
            std::process::exit(1);
        }
    };

    if verify {
        eprintln!("Verifying replay...");
        match player.verify() {
            Ok(()) => {
                eprintln!("PASS: Replay verification successful");
                eprintln!("  Expected hash: {:016x}", player.replay().final_hash);
                eprintln!("  Actual hash:   {:016x}", player.game().state_hash());
            }
            Err(GameError::DesyncDetected {
                local_hash,
                remote_hash,
                ..
            }) => {
                eprintln!("FAIL: Replay produced different hash!");
                eprintln!("  Expected: {remote_hash:016x}");
                eprintln!("  Actual:   {local_hash:016x}");
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("FAIL: Error during verification: {e}");
                std::process::exit(1);
            }
        }
    } else {
        let mut last_decile = 0;
        loop {
            match player.advance() {
                Ok(more) => {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let decile = (player.progress_percent() / 10.0) as u32;
                    if decile > last_decile {
                        eprintln!("  {}%", decile * 10);
                        last_decile = decile;
                    }
                    if !more {
                        break;
                    }
                }
                Err(e) => {
                    eprintln!("Replay stopped at turn {}: {e}", player.current_turn());
                    std::process::exit(1);
                }
            }
        }
        eprintln!("Replay complete:");
        eprintln!("  Ticks: {}", player.game().ticks());
        eprintln!("  Players: {}", player.game().players().len());
        eprintln!("  Final hash: {:016x}", player.game().state_hash());
    }
}
