//! Initial game state shared by live sessions and replays.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::execution::{Execution, Executor};
use crate::schema::GameId;
use crate::simulation::{Game, Simulate, SimulationConfig};
use crate::terrain::{MapParams, TerrainMap};

/// Everything needed to rebuild a game's state before turn 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSetup {
    /// Game being played; also seeds bot placement.
    pub game_id: GameId,
    /// Map generator input.
    pub map: MapParams,
    /// Simulation rules.
    pub simulation: SimulationConfig,
    /// Bots synthesized at start.
    pub num_bots: u32,
    /// Whether NPC nations are synthesized at start.
    pub spawn_npcs: bool,
}

impl GameSetup {
    /// Setup with default map and rules and no system players.
    #[must_use]
    pub fn new(game_id: GameId) -> Self {
        Self {
            game_id,
            map: MapParams::default(),
            simulation: SimulationConfig::default(),
            num_bots: 0,
            spawn_npcs: false,
        }
    }

    /// Start-of-game executions: bots, then NPC nations, then the win check.
    #[must_use]
    pub fn start_executions(&self, executor: &Executor) -> Vec<Execution> {
        let mut executions = executor.spawn_bots(self.num_bots);
        if self.spawn_npcs {
            executions.extend(executor.fake_human_executions());
        }
        executions.push(executor.win_check());
        executions
    }

    /// Generate the map, create the game and queue the start-of-game
    /// executions.
    ///
    /// # Errors
    /// Returns an error if the map parameters are invalid.
    pub fn build(&self) -> Result<(Game, Executor)> {
        let map = Arc::new(TerrainMap::try_generate(self.map)?);
        let executor = Executor::new(self.game_id.clone(), Arc::clone(&map));
        let mut game = Game::new(map.as_ref().clone(), self.simulation);
        game.add_executions(self.start_executions(&executor));
        Ok((game, executor))
    }
}
