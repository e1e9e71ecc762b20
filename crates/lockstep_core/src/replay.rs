//! Recording and playback of turn sequences.
//!
//! A replay stores the session setup and every turn in order. Because the
//! simulation is deterministic, re-applying the turns to a freshly built game
//! reproduces the recorded state exactly; [`ReplayPlayer::verify`] checks
//! this against the recorded final hash.
//!
//! Replays are stored as JSON, the same encoding turns use on the wire.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result, SequenceError};
use crate::execution::Executor;
use crate::scheduler::{NullObserver, SchedulerConfig, TickOutcome, TickScheduler};
use crate::schema::{ClientId, Turn};
use crate::setup::GameSetup;
use crate::simulation::{Game, Simulate};
use crate::turn_buffer::TurnBuffer;

/// Replay file format version.
pub const REPLAY_VERSION: u32 = 1;

/// A recorded game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replay {
    /// Replay format version.
    pub version: u32,
    /// Session parameters.
    pub setup: GameSetup,
    /// Every applied turn, numbered from 0.
    pub turns: Vec<Turn>,
    /// State hash after the last turn.
    pub final_hash: u64,
}

impl Replay {
    /// Start an empty recording.
    #[must_use]
    pub fn new(setup: GameSetup) -> Self {
        Self {
            version: REPLAY_VERSION,
            setup,
            turns: Vec::new(),
            final_hash: 0,
        }
    }

    /// Append the next turn. Turns must be recorded in sequence.
    pub fn record_turn(&mut self, turn: Turn) -> std::result::Result<(), SequenceError> {
        let expected = self.turns.len() as u64;
        if turn.turn_number != expected {
            return Err(SequenceError {
                expected,
                received: turn.turn_number,
            });
        }
        self.turns.push(turn);
        Ok(())
    }

    /// Record the final state hash.
    pub fn finalize(&mut self, final_hash: u64) {
        self.final_hash = final_hash;
    }

    /// Number of recorded turns.
    #[must_use]
    pub fn turn_count(&self) -> u64 {
        self.turns.len() as u64
    }

    /// Save the replay to a file.
    ///
    /// # Errors
    /// Returns an error if serialization or file writing fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| GameError::InvalidState(format!("Failed to serialize replay: {e}")))?;
        std::fs::write(path.as_ref(), json)
            .map_err(|e| GameError::InvalidState(format!("Failed to write replay file: {e}")))?;
        Ok(())
    }

    /// Load a replay from a file.
    ///
    /// # Errors
    /// Returns an error if reading, parsing, the version check or map
    /// validation fails.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())
            .map_err(|e| GameError::InvalidState(format!("Failed to read replay file: {e}")))?;
        let replay: Self = serde_json::from_str(&json)
            .map_err(|e| GameError::InvalidState(format!("Failed to parse replay: {e}")))?;

        if replay.version != REPLAY_VERSION {
            return Err(GameError::InvalidState(format!(
                "Replay version mismatch: expected {}, got {}",
                REPLAY_VERSION, replay.version
            )));
        }
        replay.setup.map.validate()?;
        Ok(replay)
    }
}

/// Steps a replay through the same scheduler path a live session uses.
#[derive(Debug)]
pub struct ReplayPlayer {
    replay: Replay,
    buffer: TurnBuffer,
    game: Game,
    executor: Executor,
    scheduler: TickScheduler,
}

impl ReplayPlayer {
    /// Build the initial state and load the turns.
    ///
    /// # Errors
    /// Returns an error if the setup is invalid or the recorded turns are
    /// not contiguous.
    pub fn new(replay: Replay) -> Result<Self> {
        let (game, executor) = replay.setup.build()?;
        let mut buffer = TurnBuffer::new();
        buffer.append_catch_up(replay.turns.clone())?;
        let scheduler = TickScheduler::new(
            ClientId::new("replay"),
            replay.setup.game_id.clone(),
            SchedulerConfig::default(),
        );
        Ok(Self {
            replay,
            buffer,
            game,
            executor,
            scheduler,
        })
    }

    /// Apply the next turn. Returns true if more turns remain.
    ///
    /// # Errors
    /// Returns an error if the simulation step fails.
    pub fn advance(&mut self) -> Result<bool> {
        match self.scheduler.tick(
            &self.buffer,
            &self.executor,
            &mut self.game,
            &NullObserver,
        ) {
            TickOutcome::Failed { error, .. } => return Err(error.into()),
            TickOutcome::Applied { .. } | TickOutcome::Starved | TickOutcome::Busy => {}
        }
        Ok(!self.is_finished())
    }

    /// Rebuild from the start and apply turns up to `target_turn` (exclusive).
    ///
    /// # Errors
    /// Returns an error if a simulation step fails.
    pub fn seek(&mut self, target_turn: u64) -> Result<()> {
        let (game, executor) = self.replay.setup.build()?;
        self.game = game;
        self.executor = executor;
        self.scheduler = TickScheduler::new(
            ClientId::new("replay"),
            self.replay.setup.game_id.clone(),
            SchedulerConfig::default(),
        );

        let target = target_turn.min(self.replay.turn_count());
        while self.scheduler.curr_turn() < target {
            self.advance()?;
        }
        Ok(())
    }

    /// Next turn to be applied.
    #[must_use]
    pub const fn current_turn(&self) -> u64 {
        self.scheduler.curr_turn()
    }

    /// Current simulation state.
    #[must_use]
    pub const fn game(&self) -> &Game {
        &self.game
    }

    /// The replay being played.
    #[must_use]
    pub const fn replay(&self) -> &Replay {
        &self.replay
    }

    /// True once every recorded turn is applied.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.current_turn() >= self.replay.turn_count()
    }

    /// Replay every turn and compare against the recorded final hash.
    ///
    /// # Errors
    /// Returns `GameError::DesyncDetected` on a hash mismatch, or the
    /// simulation error if a step fails.
    pub fn verify(&mut self) -> Result<()> {
        self.seek(self.replay.turn_count())?;
        let local_hash = self.game.state_hash();
        if local_hash != self.replay.final_hash {
            return Err(GameError::DesyncDetected {
                tick: self.game.ticks(),
                local_hash,
                remote_hash: self.replay.final_hash,
            });
        }
        Ok(())
    }

    /// Progress as a percentage (0-100).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress_percent(&self) -> f64 {
        let total = self.replay.turn_count();
        if total == 0 {
            100.0
        } else {
            (self.current_turn() as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{GameId, Intent, PlayerId, PlayerType, SpawnIntent};

    fn recorded(turn_count: u64) -> Replay {
        let game_id = GameId::new("replay-game");
        let setup = GameSetup {
            num_bots: 2,
            ..GameSetup::new(game_id.clone())
        };
        let mut replay = Replay::new(setup.clone());
        let (mut game, executor) = setup.build().unwrap();

        for n in 0..turn_count {
            let intents = if n == 0 {
                vec![Intent::Spawn(SpawnIntent {
                    client_id: ClientId::new("c1"),
                    player_id: PlayerId::new("p1"),
                    name: "Alice".into(),
                    player_type: PlayerType::Human,
                    x: 20,
                    y: 20,
                })]
            } else {
                Vec::new()
            };
            let turn = Turn::new(n, game_id.clone(), intents);
            game.add_executions(executor.create_executions(&turn));
            game.execute_next_tick().unwrap();
            replay.record_turn(turn).unwrap();
        }
        replay.finalize(game.state_hash());
        replay
    }

    #[test]
    fn test_record_turn_enforces_sequence() {
        let mut replay = Replay::new(GameSetup::new(GameId::new("g")));
        replay.record_turn(Turn::empty(0, GameId::new("g"))).unwrap();
        let err = replay
            .record_turn(Turn::empty(2, GameId::new("g")))
            .unwrap_err();
        assert_eq!(err.expected, 1);
        assert_eq!(replay.turn_count(), 1);
    }

    #[test]
    fn test_verify_matches() {
        let mut player = ReplayPlayer::new(recorded(10)).unwrap();
        player.verify().unwrap();
        assert!(player.is_finished());
        assert!((player.progress_percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_verify_detects_tamper() {
        let mut replay = recorded(5);
        replay.final_hash ^= 1;
        let mut player = ReplayPlayer::new(replay).unwrap();
        assert!(matches!(
            player.verify(),
            Err(GameError::DesyncDetected { .. })
        ));
    }

    #[test]
    fn test_advance_and_seek() {
        let mut player = ReplayPlayer::new(recorded(6)).unwrap();
        assert!(player.advance().unwrap());
        assert!(player.advance().unwrap());
        assert_eq!(player.current_turn(), 2);
        let hash_at_two = player.game().state_hash();

        player.seek(5).unwrap();
        assert_eq!(player.current_turn(), 5);
        player.seek(2).unwrap();
        assert_eq!(player.game().state_hash(), hash_at_two);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.json");

        let replay = recorded(4);
        replay.save(&path).unwrap();
        let loaded = Replay::load(&path).unwrap();
        assert_eq!(loaded, replay);
    }

    #[test]
    fn test_player_rejects_empty_map() {
        let mut setup = GameSetup::new(GameId::new("g"));
        setup.map.width = 0;
        assert!(matches!(
            ReplayPlayer::new(Replay::new(setup)),
            Err(GameError::InvalidState(_))
        ));
    }

    #[test]
    fn test_load_rejects_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.json");

        let mut replay = recorded(1);
        replay.setup.map.height = 0;
        replay.save(&path).unwrap();
        assert!(matches!(
            Replay::load(&path),
            Err(GameError::InvalidState(_))
        ));
    }

    #[test]
    fn test_load_rejects_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.json");

        let mut replay = recorded(1);
        replay.version = REPLAY_VERSION + 1;
        replay.save(&path).unwrap();
        assert!(Replay::load(&path).is_err());
    }
}
