//! Client configuration.
//!
//! A config file holds two sections: `runner` (timing, system players, map
//! and rules, recovery policies) and `lobby` (who is joining which game).
//! Every field has a default so files only need to name what they change.

use std::path::Path;
use std::time::Duration;

use lockstep_core::scheduler::{CrashPolicy, GapPolicy, SchedulerConfig};
use lockstep_core::schema::{ClientId, GameId};
use lockstep_core::setup::GameSetup;
use lockstep_core::simulation::SimulationConfig;
use lockstep_core::terrain::MapParams;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default timer period.
pub const DEFAULT_TICK_PERIOD_MS: u64 = 10;

/// Runner tuning and game parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Timer period between tick attempts.
    pub tick_period_ms: u64,
    /// Steps slower than this are reported.
    pub slow_tick_threshold_ms: u64,
    /// Bots synthesized at start.
    pub num_bots: u32,
    /// Whether NPC nations are synthesized at start.
    pub spawn_npcs: bool,
    /// Map generator input.
    pub map: MapParams,
    /// Simulation rules.
    pub simulation: SimulationConfig,
    /// Reaction to out-of-sequence live turns.
    pub gap_policy: GapPolicy,
    /// Reaction to a failed step.
    pub crash_policy: CrashPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: DEFAULT_TICK_PERIOD_MS,
            slow_tick_threshold_ms: 100,
            num_bots: 0,
            spawn_npcs: false,
            map: MapParams::default(),
            simulation: SimulationConfig::default(),
            gap_policy: GapPolicy::default(),
            crash_policy: CrashPolicy::default(),
        }
    }
}

impl RunnerConfig {
    /// Timer period as a duration. Never zero.
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms.max(1))
    }

    /// Scheduler settings derived from this config.
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            slow_tick_threshold: Duration::from_millis(self.slow_tick_threshold_ms),
        }
    }

    /// Initial-state description for `game_id`.
    #[must_use]
    pub fn game_setup(&self, game_id: GameId) -> GameSetup {
        GameSetup {
            game_id,
            map: self.map,
            simulation: self.simulation,
            num_bots: self.num_bots,
            spawn_npcs: self.spawn_npcs,
        }
    }
}

/// Identity of this client in a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    /// This client's id.
    pub client_id: ClientId,
    /// Game to join.
    pub game_id: GameId,
    /// Display name for the local player.
    pub player_name: String,
    /// Address reported in `Join`, if known.
    pub client_ip: Option<String>,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            client_id: ClientId::new("local"),
            game_id: GameId::new("local-game"),
            player_name: "Player".to_string(),
            client_ip: None,
        }
    }
}

/// Full client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Runner section.
    pub runner: RunnerConfig,
    /// Lobby section.
    pub lobby: LobbyConfig,
}

impl ClientConfig {
    /// Load a config from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_ron_str(&contents)
    }

    /// Parse a config from a RON string.
    pub fn from_ron_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would fail at game start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runner
            .map
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Render as pretty RON, for `lockstep config`.
    pub fn to_ron_string(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }

    /// Initial-state description for the configured game.
    #[must_use]
    pub fn game_setup(&self) -> GameSetup {
        self.runner.game_setup(self.lobby.game_id.clone())
    }
}
