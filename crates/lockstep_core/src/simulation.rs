//! Deterministic territory simulation.
//!
//! Players claim tiles on a [`TerrainMap`], spend troops to take land from
//! each other, form alliances, and grow troops every tick. Executions are
//! queued with [`Simulate::add_executions`] and applied by
//! [`Simulate::execute_next_tick`], one step per turn.
//!
//! # Determinism
//!
//! - No floating-point math (troop growth uses [`Fixed`])
//! - No system randomness
//! - Executions apply in the order they were queued
//! - All keyed state lives in ordered collections
//!
//! # Example
//!
//! ```
//! use lockstep_core::execution::Execution;
//! use lockstep_core::schema::{PlayerId, PlayerType};
//! use lockstep_core::simulation::{Game, Simulate, SimulationConfig};
//! use lockstep_core::terrain::{Cell, TerrainMap};
//!
//! let mut game = Game::new(TerrainMap::new(16, 16), SimulationConfig::default());
//! game.add_executions(vec![Execution::Spawn {
//!     player_id: PlayerId::new("p1"),
//!     client_id: None,
//!     name: "Alice".into(),
//!     player_type: PlayerType::Human,
//!     cell: Cell::new(8, 8),
//! }]);
//! let events = game.execute_next_tick().unwrap();
//! assert_eq!(events.spawned, vec![PlayerId::new("p1")]);
//! assert_eq!(game.ticks(), 1);
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result, SimulationError};
use crate::execution::Execution;
use crate::math::{fixed_serde, ratio, split_whole, Fixed};
use crate::pathfinding::find_path;
use crate::schema::{ClientId, PlayerId, PlayerType};
use crate::terrain::{Cell, Terrain, TerrainMap};

/// Ticks per second; one tick per 10 ms scheduler period.
pub const TICK_RATE: u32 = 100;

/// Duration of one tick in milliseconds.
pub const TICK_DURATION_MS: u32 = 1000 / TICK_RATE;

/// Troop cost of taking one unowned tile.
const UNOWNED_TILE_COST: u32 = 1;

/// Owned tiles that add one troop per tick.
const TILES_PER_GROWTH_UNIT: u32 = 8;

/// Longest accepted display name, in characters.
const MAX_NAME_CHARS: usize = 27;

/// A deterministic simulation stepped once per turn.
///
/// Implementations must be pure functions of their prior state and the
/// executions they were given: no clocks, no system randomness, no IO.
pub trait Simulate: Send + 'static {
    /// Queue executions for the next step, preserving their order.
    fn add_executions(&mut self, executions: Vec<Execution>);

    /// Advance exactly one step.
    fn execute_next_tick(&mut self) -> std::result::Result<TickEvents, SimulationError>;

    /// Number of completed steps.
    fn ticks(&self) -> u64;

    /// Hash of the full simulation state for desync detection.
    fn state_hash(&self) -> u64;
}

/// Tunable rules of the reference simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Ticks during which spawns are accepted.
    pub spawn_phase_turns: u64,
    /// Troops a new player starts with.
    pub starting_troops: u32,
    /// Half-width of the square claimed on spawn.
    pub spawn_radius: i32,
    /// Troop cap contributed by each owned tile.
    pub troop_cap_per_tile: u32,
    /// Share of all land, in percent, that wins the game.
    pub win_share_percent: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            spawn_phase_turns: 100,
            starting_troops: 1_000,
            spawn_radius: 2,
            troop_cap_per_tile: 100,
            win_share_percent: 80,
        }
    }
}

/// A participant in the game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Public identifier.
    pub id: PlayerId,
    /// Controlling client, `None` for system-spawned players.
    pub client_id: Option<ClientId>,
    /// Display name.
    pub name: String,
    /// Who controls the player.
    pub player_type: PlayerType,
    /// Available troops.
    pub troops: u32,
    /// Owned tiles.
    pub tiles: u32,
    /// False once all tiles are lost.
    pub alive: bool,
    #[serde(with = "fixed_serde")]
    growth_remainder: Fixed,
}

/// Tiles changing hands in one attack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conquest {
    /// Player who gained the tiles.
    pub attacker: PlayerId,
    /// Previous owner, `None` for unowned land.
    pub defender: Option<PlayerId>,
    /// Tiles captured.
    pub tiles: u32,
}

/// Observable outcome of one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickEvents {
    /// Kinds of executions that took effect, in application order.
    pub applied: Vec<&'static str>,
    /// Kinds of executions that referenced invalid state and were skipped.
    pub ignored: Vec<&'static str>,
    /// Newly spawned players.
    pub spawned: Vec<PlayerId>,
    /// Territory changes.
    pub conquests: Vec<Conquest>,
    /// Players that lost their last tile.
    pub eliminated: Vec<PlayerId>,
    /// Players whose name changed.
    pub renamed: Vec<PlayerId>,
    /// Alliances formed this step.
    pub alliances_formed: Vec<(PlayerId, PlayerId)>,
    /// Set on the step a winner is decided.
    pub winner: Option<PlayerId>,
}

/// Reference simulation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    tick: u64,
    config: SimulationConfig,
    map: TerrainMap,
    land_tiles: u32,
    /// Owner small id per tile, row-major.
    owners: Vec<Option<u32>>,
    /// Indexed by small id, in spawn order.
    players: Vec<Player>,
    by_id: BTreeMap<PlayerId, u32>,
    /// Normalized `(low, high)` small-id pairs.
    alliances: BTreeSet<(u32, u32)>,
    /// `(requestor, recipient)` small-id pairs.
    requests: BTreeSet<(u32, u32)>,
    pending: Vec<Execution>,
    standing: Vec<Execution>,
    winner: Option<u32>,
}

impl Game {
    /// Create an empty game on `map`.
    #[must_use]
    pub fn new(map: TerrainMap, config: SimulationConfig) -> Self {
        let land_tiles = u32::try_from(map.land_count()).unwrap_or(u32::MAX);
        Self {
            tick: 0,
            config,
            owners: vec![None; map.len()],
            map,
            land_tiles,
            players: Vec::new(),
            by_id: BTreeMap::new(),
            alliances: BTreeSet::new(),
            requests: BTreeSet::new(),
            pending: Vec::new(),
            standing: Vec::new(),
            winner: None,
        }
    }

    /// The rules this game runs under.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// The map being played.
    #[must_use]
    pub const fn map(&self) -> &TerrainMap {
        &self.map
    }

    /// True while spawns are accepted.
    #[must_use]
    pub const fn in_spawn_phase(&self) -> bool {
        self.tick < self.config.spawn_phase_turns
    }

    /// Look up a player.
    #[must_use]
    pub fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.by_id.get(id).map(|small| &self.players[*small as usize])
    }

    /// All players in spawn order.
    #[must_use]
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Owner of a tile, if any.
    #[must_use]
    pub fn owner(&self, cell: Cell) -> Option<&PlayerId> {
        let index = self.map.index(cell)?;
        self.owners[index].map(|small| &self.players[small as usize].id)
    }

    /// True if the two players are allied.
    #[must_use]
    pub fn is_allied(&self, a: &PlayerId, b: &PlayerId) -> bool {
        match (self.by_id.get(a), self.by_id.get(b)) {
            (Some(a), Some(b)) => self.allied(*a, *b),
            _ => false,
        }
    }

    /// True if `requestor` has an unanswered alliance request to `recipient`.
    #[must_use]
    pub fn has_alliance_request(&self, requestor: &PlayerId, recipient: &PlayerId) -> bool {
        match (self.by_id.get(requestor), self.by_id.get(recipient)) {
            (Some(a), Some(b)) => self.requests.contains(&(*a, *b)),
            _ => false,
        }
    }

    /// The winner, once decided.
    #[must_use]
    pub fn winner(&self) -> Option<&PlayerId> {
        self.winner.map(|small| &self.players[small as usize].id)
    }

    /// Number of standing executions.
    #[must_use]
    pub fn standing_len(&self) -> usize {
        self.standing.len()
    }

    fn allied(&self, a: u32, b: u32) -> bool {
        self.alliances.contains(&(a.min(b), a.max(b)))
    }

    fn live_player(&self, id: &PlayerId) -> Option<u32> {
        self.by_id
            .get(id)
            .copied()
            .filter(|small| self.players[*small as usize].alive)
    }

    fn apply(&mut self, execution: &Execution, events: &mut TickEvents) {
        let applied = match execution {
            Execution::Spawn {
                player_id,
                client_id,
                name,
                player_type,
                cell,
            } => self.spawn(player_id, client_id.as_ref(), name, *player_type, *cell, events),
            Execution::Attack {
                attacker,
                target,
                troops,
                ..
            } => self.land_attack(attacker, target.as_ref(), *troops, events),
            Execution::BoatAttack {
                attacker,
                target,
                troops,
                destination,
            } => self.boat_attack(attacker, target.as_ref(), *troops, *destination, events),
            Execution::UpdateName { client_id, name } => self.rename(client_id, name, events),
            Execution::AllianceRequest {
                requestor,
                recipient,
            } => self.request_alliance(requestor, recipient, events),
            Execution::WinCheck => self.check_winner(events),
        };

        if applied {
            events.applied.push(execution.kind());
        } else {
            tracing::trace!(tick = self.tick, kind = execution.kind(), "execution ignored");
            events.ignored.push(execution.kind());
        }
    }

    fn spawn(
        &mut self,
        player_id: &PlayerId,
        client_id: Option<&ClientId>,
        name: &str,
        player_type: PlayerType,
        cell: Cell,
        events: &mut TickEvents,
    ) -> bool {
        if !self.in_spawn_phase() || self.by_id.contains_key(player_id) {
            return false;
        }
        let Some(center) = self.map.index(cell) else {
            return false;
        };
        if self.map.terrain_at(center) != Terrain::Land || self.owners[center].is_some() {
            return false;
        }

        let Ok(small) = u32::try_from(self.players.len()) else {
            return false;
        };
        self.players.push(Player {
            id: player_id.clone(),
            client_id: client_id.cloned(),
            name: truncate_name(name),
            player_type,
            troops: self.config.starting_troops,
            tiles: 0,
            alive: true,
            growth_remainder: Fixed::ZERO,
        });
        self.by_id.insert(player_id.clone(), small);

        let r = self.config.spawn_radius.max(0);
        for dy in -r..=r {
            for dx in -r..=r {
                let Some(index) = self.map.index(Cell::new(cell.x + dx, cell.y + dy)) else {
                    continue;
                };
                if self.map.terrain_at(index) == Terrain::Land && self.owners[index].is_none() {
                    self.owners[index] = Some(small);
                    self.players[small as usize].tiles += 1;
                }
            }
        }

        events.spawned.push(player_id.clone());
        true
    }

    /// Resolve attacker/defender small ids and the committed troop count.
    fn resolve_attack(
        &self,
        attacker: &PlayerId,
        target: Option<&PlayerId>,
        troops: u32,
    ) -> Option<(u32, Option<u32>, u32)> {
        let a = self.live_player(attacker)?;
        let d = match target {
            Some(t) => Some(self.live_player(t)?),
            None => None,
        };
        if d == Some(a) || d.is_some_and(|d| self.allied(a, d)) {
            return None;
        }
        let troops = troops.min(self.players[a as usize].troops);
        (troops > 0).then_some((a, d, troops))
    }

    fn land_attack(
        &mut self,
        attacker: &PlayerId,
        target: Option<&PlayerId>,
        troops: u32,
        events: &mut TickEvents,
    ) -> bool {
        let Some((a, d, troops)) = self.resolve_attack(attacker, target, troops) else {
            return false;
        };

        let frontier: BTreeSet<usize> = (0..self.owners.len())
            .filter(|i| {
                self.owners[*i] == d
                    && self.map.terrain_at(*i) == Terrain::Land
                    && self.map.neighbours(*i).any(|n| self.owners[n] == Some(a))
            })
            .collect();
        if frontier.is_empty() {
            return false;
        }

        self.conquer(a, d, troops, frontier, events);
        true
    }

    fn boat_attack(
        &mut self,
        attacker: &PlayerId,
        target: Option<&PlayerId>,
        troops: u32,
        destination: Cell,
        events: &mut TickEvents,
    ) -> bool {
        let Some((a, d, troops)) = self.resolve_attack(attacker, target, troops) else {
            return false;
        };
        let Some(landing) = self.map.index(destination) else {
            return false;
        };
        if !self.map.is_shore(landing) || self.owners[landing] != d {
            return false;
        }
        let Some(shore) = (0..self.owners.len())
            .find(|i| self.owners[*i] == Some(a) && self.map.is_shore(*i))
        else {
            return false;
        };

        let first_water = |index: usize| {
            self.map
                .neighbours(index)
                .find(|n| self.map.terrain_at(*n) == Terrain::Water)
        };
        let (Some(from), Some(to)) = (first_water(shore), first_water(landing)) else {
            return false;
        };
        if find_path(&self.map, self.map.cell(from), self.map.cell(to), Terrain::Water).is_err() {
            return false;
        }

        self.conquer(a, d, troops, BTreeSet::from([landing]), events);
        true
    }

    fn tile_cost(&self, defender: Option<u32>) -> u32 {
        match defender {
            None => UNOWNED_TILE_COST,
            Some(d) => {
                let p = &self.players[d as usize];
                UNOWNED_TILE_COST + p.troops / p.tiles.max(1)
            }
        }
    }

    /// Spend `troops` taking tiles from the frontier, lowest index first.
    /// Unspent troops return to the attacker.
    fn conquer(
        &mut self,
        a: u32,
        d: Option<u32>,
        troops: u32,
        mut frontier: BTreeSet<usize>,
        events: &mut TickEvents,
    ) {
        self.players[a as usize].troops -= troops;
        let mut budget = troops;
        let mut captured = 0;

        while let Some(tile) = frontier.pop_first() {
            let cost = self.tile_cost(d);
            if budget < cost {
                break;
            }
            budget -= cost;

            if let Some(d) = d {
                let defender = &mut self.players[d as usize];
                defender.troops = defender.troops.saturating_sub(cost - UNOWNED_TILE_COST);
                defender.tiles -= 1;
            }
            self.owners[tile] = Some(a);
            self.players[a as usize].tiles += 1;
            captured += 1;

            for n in self.map.neighbours(tile) {
                if self.owners[n] == d && self.map.terrain_at(n) == Terrain::Land {
                    frontier.insert(n);
                }
            }
        }

        self.players[a as usize].troops += budget;

        if captured > 0 {
            events.conquests.push(Conquest {
                attacker: self.players[a as usize].id.clone(),
                defender: d.map(|d| self.players[d as usize].id.clone()),
                tiles: captured,
            });
        }
        if let Some(d) = d {
            let defender = &mut self.players[d as usize];
            if defender.tiles == 0 && defender.alive {
                defender.alive = false;
                events.eliminated.push(defender.id.clone());
            }
        }
    }

    fn rename(&mut self, client_id: &ClientId, name: &str, events: &mut TickEvents) -> bool {
        let name = truncate_name(name);
        if name.is_empty() {
            return false;
        }
        let Some(player) = self
            .players
            .iter_mut()
            .find(|p| p.client_id.as_ref() == Some(client_id))
        else {
            return false;
        };
        player.name = name;
        events.renamed.push(player.id.clone());
        true
    }

    fn request_alliance(
        &mut self,
        requestor: &PlayerId,
        recipient: &PlayerId,
        events: &mut TickEvents,
    ) -> bool {
        let (Some(a), Some(b)) = (self.live_player(requestor), self.live_player(recipient)) else {
            return false;
        };
        if a == b || self.allied(a, b) {
            return false;
        }

        if self.requests.remove(&(b, a)) {
            self.alliances.insert((a.min(b), a.max(b)));
            events
                .alliances_formed
                .push((requestor.clone(), recipient.clone()));
        } else {
            self.requests.insert((a, b));
        }
        true
    }

    fn check_winner(&mut self, events: &mut TickEvents) -> bool {
        if self.winner.is_some() || self.in_spawn_phase() {
            return true;
        }

        let alive: Vec<u32> = (0..self.players.len())
            .filter(|i| self.players[*i].alive)
            .filter_map(|i| u32::try_from(i).ok())
            .collect();
        let threshold = u64::from(self.land_tiles) * u64::from(self.config.win_share_percent);

        let winner = alive
            .iter()
            .copied()
            .find(|p| u64::from(self.players[*p as usize].tiles) * 100 >= threshold)
            .or_else(|| (self.players.len() > 1 && alive.len() == 1).then(|| alive[0]));

        if let Some(w) = winner {
            self.winner = Some(w);
            let id = self.players[w as usize].id.clone();
            tracing::info!(tick = self.tick, winner = %id, "winner decided");
            events.winner = Some(id);
        }
        true
    }

    fn grow_troops(&mut self) {
        for player in self.players.iter_mut().filter(|p| p.alive) {
            let gain =
                Fixed::ONE + ratio(player.tiles, TILES_PER_GROWTH_UNIT) + player.growth_remainder;
            let (whole, rest) = split_whole(gain);
            let cap = self
                .config
                .starting_troops
                .saturating_add(player.tiles.saturating_mul(self.config.troop_cap_per_tile));
            player.troops = player.troops.saturating_add(whole).min(cap.max(player.troops));
            player.growth_remainder = rest;
        }
    }

    fn check_invariants(&self) -> std::result::Result<(), SimulationError> {
        let mut counted = vec![0_u32; self.players.len()];
        for owner in self.owners.iter().flatten() {
            counted[*owner as usize] += 1;
        }
        for (player, count) in self.players.iter().zip(counted) {
            if player.tiles != count {
                return Err(SimulationError::InvariantViolated {
                    tick: self.tick,
                    message: format!(
                        "player {} records {} tiles but owns {}",
                        player.id, player.tiles, count
                    ),
                });
            }
        }
        Ok(())
    }

    /// Serialize simulation state to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| GameError::InvalidState(format!("Failed to serialize game: {e}")))
    }

    /// Deserialize simulation state from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| GameError::InvalidState(format!("Failed to deserialize game: {e}")))
    }
}

fn truncate_name(name: &str) -> String {
    name.trim().chars().take(MAX_NAME_CHARS).collect()
}

impl Simulate for Game {
    fn add_executions(&mut self, executions: Vec<Execution>) {
        self.pending.extend(executions);
    }

    fn execute_next_tick(&mut self) -> std::result::Result<TickEvents, SimulationError> {
        let mut events = TickEvents::default();

        for execution in std::mem::take(&mut self.pending) {
            if execution.is_standing() {
                self.standing.push(execution);
            } else {
                self.apply(&execution, &mut events);
            }
        }

        // Standing executions run after the one-shots of the same step.
        let standing = std::mem::take(&mut self.standing);
        for execution in &standing {
            self.apply(execution, &mut events);
        }
        self.standing = standing;

        self.grow_troops();

        if cfg!(any(debug_assertions, feature = "debug-validation")) {
            self.check_invariants()?;
        }

        self.tick += 1;

        #[cfg(debug_assertions)]
        tracing::debug!(tick = self.tick, hash = self.state_hash(), "step complete");

        Ok(events)
    }

    fn ticks(&self) -> u64 {
        self.tick
    }

    /// Hash of tick, ownership, players, diplomacy and queued executions.
    fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.tick.hash(&mut hasher);
        self.owners.hash(&mut hasher);

        self.players.len().hash(&mut hasher);
        for p in &self.players {
            p.id.hash(&mut hasher);
            p.client_id.hash(&mut hasher);
            p.name.hash(&mut hasher);
            p.player_type.hash(&mut hasher);
            p.troops.hash(&mut hasher);
            p.tiles.hash(&mut hasher);
            p.alive.hash(&mut hasher);
            p.growth_remainder.to_bits().hash(&mut hasher);
        }

        self.alliances.hash(&mut hasher);
        self.requests.hash(&mut hasher);
        self.pending.hash(&mut hasher);
        self.standing.hash(&mut hasher);
        self.winner.hash(&mut hasher);

        hasher.finish()
    }
}
