//! Test fixtures and helpers.
//!
//! Intent and turn builders plus a recording observer, for consistent
//! testing across crates.

use std::sync::Mutex;

use lockstep_core::error::SequenceError;
use lockstep_core::scheduler::{CrashNotice, RunnerObserver, SlowTick};
use lockstep_core::schema::{
    AllianceRequestIntent, AttackIntent, ClientId, GameId, Intent, PlayerId, PlayerType,
    SpawnIntent, Turn, UpdateNameIntent,
};
use lockstep_core::setup::GameSetup;
use lockstep_core::simulation::SimulationConfig;
use lockstep_core::terrain::MapParams;

/// Spawn intent for a human player.
#[must_use]
pub fn spawn(client: &str, player: &str, x: i32, y: i32) -> Intent {
    Intent::Spawn(SpawnIntent {
        client_id: ClientId::new(client),
        player_id: PlayerId::new(player),
        name: player.to_uppercase(),
        player_type: PlayerType::Human,
        x,
        y,
    })
}

/// Land attack intent without coordinates.
#[must_use]
pub fn attack(client: &str, attacker: &str, target: Option<&str>, troops: u32) -> Intent {
    Intent::Attack(AttackIntent {
        client_id: ClientId::new(client),
        attacker_id: PlayerId::new(attacker),
        target_id: target.map(PlayerId::new),
        troops,
        source_x: None,
        source_y: None,
        target_x: None,
        target_y: None,
    })
}

/// Name change intent.
#[must_use]
pub fn update_name(client: &str, name: &str) -> Intent {
    Intent::UpdateName(UpdateNameIntent {
        client_id: ClientId::new(client),
        name: name.to_string(),
    })
}

/// Alliance request intent.
#[must_use]
pub fn alliance_request(client: &str, requestor: &str, recipient: &str) -> Intent {
    Intent::AllianceRequest(AllianceRequestIntent {
        client_id: ClientId::new(client),
        requestor: PlayerId::new(requestor),
        recipient: PlayerId::new(recipient),
    })
}

/// Turn with the given intents.
#[must_use]
pub fn turn(turn_number: u64, game_id: &GameId, intents: Vec<Intent>) -> Turn {
    Turn::new(turn_number, game_id.clone(), intents)
}

/// Empty turns numbered `0..count`.
#[must_use]
pub fn empty_turns(count: u64, game_id: &GameId) -> Vec<Turn> {
    (0..count)
        .map(|n| Turn::empty(n, game_id.clone()))
        .collect()
}

/// A lake-free 7x40 strip with no system players.
///
/// Maps narrower than 8 tiles get only the ocean border, so every interior
/// tile (x in 1..=5) is land and spawns in [`skirmish_turns`] always succeed.
#[must_use]
pub fn small_setup(game_id: &str) -> GameSetup {
    GameSetup {
        map: MapParams {
            width: 7,
            height: 40,
            seed: 11,
        },
        simulation: SimulationConfig {
            spawn_radius: 1,
            ..SimulationConfig::default()
        },
        ..GameSetup::new(GameId::new(game_id))
    }
}

/// Six turns of play between `p1` (client `c1`) and `p2` (client `c2`).
#[must_use]
pub fn skirmish_turns(game_id: &GameId) -> Vec<Turn> {
    vec![
        turn(0, game_id, vec![spawn("c1", "p1", 3, 3), spawn("c2", "p2", 3, 30)]),
        turn(
            1,
            game_id,
            vec![
                attack("c1", "p1", None, 40),
                attack("c2", "p2", None, 40),
            ],
        ),
        turn(2, game_id, vec![alliance_request("c1", "p1", "p2")]),
        turn(3, game_id, vec![update_name("c2", "Second")]),
        turn(4, game_id, vec![attack("c2", "p2", Some("p1"), 500)]),
        turn(5, game_id, Vec::new()),
    ]
}

/// Observer that records every notice for later assertions.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    slow: Mutex<Vec<SlowTick>>,
    crashes: Mutex<Vec<CrashNotice>>,
    sequence_errors: Mutex<Vec<SequenceError>>,
}

impl RecordingObserver {
    /// Slow-tick warnings received so far.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    #[must_use]
    pub fn slow_ticks(&self) -> Vec<SlowTick> {
        self.slow.lock().unwrap().clone()
    }

    /// Crash notices received so far.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    #[must_use]
    pub fn crashes(&self) -> Vec<CrashNotice> {
        self.crashes.lock().unwrap().clone()
    }

    /// Sequence errors received so far.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned.
    #[must_use]
    pub fn sequence_errors(&self) -> Vec<SequenceError> {
        self.sequence_errors.lock().unwrap().clone()
    }
}

impl RunnerObserver for RecordingObserver {
    fn slow_tick(&self, warning: &SlowTick) {
        self.slow.lock().unwrap().push(warning.clone());
    }

    fn crashed(&self, notice: &CrashNotice) {
        self.crashes.lock().unwrap().push(notice.clone());
    }

    fn sequence_error(&self, error: &SequenceError) {
        self.sequence_errors.lock().unwrap().push(*error);
    }
}
