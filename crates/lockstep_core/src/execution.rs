//! Conversion of turns into simulation executions.
//!
//! The [`Executor`] is a pure function of the game id, the map and its input:
//! every client turns the same [`Turn`] into the same execution list, in the
//! same order. System-synthesized executions (bots, NPC nations, the win
//! check) draw from a generator seeded by the game id, never from system
//! randomness.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::rng::SeededRng;
use crate::schema::{ClientId, GameId, Intent, PlayerId, PlayerType, Turn};
use crate::terrain::{Cell, TerrainMap};

/// A unit of simulation work derived from an intent or synthesized at start.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Execution {
    /// Place a new player and claim land around `cell`.
    Spawn {
        /// New player's id.
        player_id: PlayerId,
        /// Controlling client; `None` for system players.
        client_id: Option<ClientId>,
        /// Display name.
        name: String,
        /// Controller kind.
        player_type: PlayerType,
        /// Centre of the claimed square.
        cell: Cell,
    },
    /// Land attack on a player, or on unowned land when `target` is `None`.
    Attack {
        /// Attacking player.
        attacker: PlayerId,
        /// Defending player.
        target: Option<PlayerId>,
        /// Troops committed.
        troops: u32,
        /// Tile the attack starts from.
        source: Option<Cell>,
        /// Tile the attack aims at.
        destination: Option<Cell>,
    },
    /// Naval landing at `destination`.
    BoatAttack {
        /// Attacking player.
        attacker: PlayerId,
        /// Owner of the landing tile.
        target: Option<PlayerId>,
        /// Troops embarked.
        troops: u32,
        /// Landing tile.
        destination: Cell,
    },
    /// Rename the player controlled by `client_id`.
    UpdateName {
        /// Client whose player is renamed.
        client_id: ClientId,
        /// New name, truncated on apply.
        name: String,
    },
    /// Propose an alliance.
    AllianceRequest {
        /// Proposing player.
        requestor: PlayerId,
        /// Player being asked.
        recipient: PlayerId,
    },
    /// Standing check for a winner, evaluated every tick once added.
    WinCheck,
}

impl Execution {
    /// Short name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::Attack { .. } => "attack",
            Self::BoatAttack { .. } => "boat",
            Self::UpdateName { .. } => "updateName",
            Self::AllianceRequest { .. } => "allianceRequest",
            Self::WinCheck => "winCheck",
        }
    }

    /// Standing executions stay active across ticks instead of running once.
    #[must_use]
    pub const fn is_standing(&self) -> bool {
        matches!(self, Self::WinCheck)
    }
}

impl From<&Intent> for Execution {
    fn from(intent: &Intent) -> Self {
        match intent {
            Intent::Attack(a) => Self::Attack {
                attacker: a.attacker_id.clone(),
                target: a.target_id.clone(),
                troops: a.troops,
                source: Cell::from_optional(a.source_x, a.source_y),
                destination: Cell::from_optional(a.target_x, a.target_y),
            },
            Intent::Spawn(s) => Self::Spawn {
                player_id: s.player_id.clone(),
                client_id: Some(s.client_id.clone()),
                name: s.name.clone(),
                player_type: s.player_type,
                cell: Cell::new(s.x, s.y),
            },
            Intent::BoatAttack(b) => Self::BoatAttack {
                attacker: b.attacker_id.clone(),
                target: b.target_id.clone(),
                troops: b.troops,
                destination: Cell::new(b.x, b.y),
            },
            Intent::UpdateName(u) => Self::UpdateName {
                client_id: u.client_id.clone(),
                name: u.name.clone(),
            },
            Intent::AllianceRequest(r) => Self::AllianceRequest {
                requestor: r.requestor.clone(),
                recipient: r.recipient.clone(),
            },
        }
    }
}

/// Names handed to synthesized bots, cycled with a numeric suffix.
const BOT_NAMES: [&str; 12] = [
    "Aldmoor", "Brisk", "Corvin", "Dunhall", "Estmark", "Falk", "Greyholt", "Hask", "Ivern",
    "Jorvik", "Kestrel", "Lowen",
];

/// NPC nations: name plus placement as a percentage of map width/height.
const NPC_NATIONS: [(&str, u32, u32); 6] = [
    ("Northreach", 50, 20),
    ("Southmark", 50, 80),
    ("Westvale", 20, 50),
    ("Eastholm", 80, 50),
    ("Midland Union", 35, 35),
    ("Coastal League", 65, 65),
];

/// Separate random streams so bots and NPCs do not share draws.
const BOT_STREAM: u64 = 0x626f_7473;

/// Stable 64-bit FNV-1a; `DefaultHasher` is not guaranteed stable across releases.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

/// Converts turns into executions for one game.
#[derive(Debug, Clone)]
pub struct Executor {
    game_id: GameId,
    map: Arc<TerrainMap>,
}

impl Executor {
    /// Create an executor for a game on the given map.
    #[must_use]
    pub fn new(game_id: GameId, map: Arc<TerrainMap>) -> Self {
        Self { game_id, map }
    }

    /// The game this executor serves.
    #[must_use]
    pub fn game_id(&self) -> &GameId {
        &self.game_id
    }

    /// One execution per intent, in intent order.
    #[must_use]
    pub fn create_executions(&self, turn: &Turn) -> Vec<Execution> {
        turn.intents.iter().map(Execution::from).collect()
    }

    fn rng(&self, stream: u64) -> SeededRng {
        SeededRng::new(fnv1a(self.game_id.as_str().as_bytes()) ^ stream)
    }

    /// Spawn executions for `count` bots on distinct land tiles.
    ///
    /// Placement is drawn from the game-id seeded generator. Fewer than
    /// `count` executions are returned if the map runs out of land.
    #[must_use]
    pub fn spawn_bots(&self, count: u32) -> Vec<Execution> {
        let mut land: Vec<usize> = self.map.land_indices().collect();
        let mut rng = self.rng(BOT_STREAM);
        let mut executions = Vec::with_capacity(count as usize);

        for n in 0..count as usize {
            if land.is_empty() {
                break;
            }
            let index = land.swap_remove(rng.next_index(land.len()));
            let name = format!("{} {}", BOT_NAMES[n % BOT_NAMES.len()], n / BOT_NAMES.len() + 1);
            executions.push(Execution::Spawn {
                player_id: PlayerId::new(format!("bot-{n}-{:08x}", rng.next_u32())),
                client_id: None,
                name,
                player_type: PlayerType::Bot,
                cell: self.map.cell(index),
            });
        }
        executions
    }

    /// Spawn executions for the fixed roster of NPC nations.
    ///
    /// Each nation lands on the first land tile at or after its anchor point
    /// in row-major order; nations whose anchor has no land after it are
    /// skipped.
    #[must_use]
    pub fn fake_human_executions(&self) -> Vec<Execution> {
        let (w, h) = (self.map.width(), self.map.height());
        let mut taken = Vec::new();
        let mut executions = Vec::new();

        for (n, (name, px, py)) in NPC_NATIONS.iter().enumerate() {
            let anchor = ((h * py / 100).min(h - 1) as usize) * (w as usize)
                + (w * px / 100).min(w - 1) as usize;
            let Some(index) = (anchor..self.map.len())
                .find(|i| self.map.is_land(self.map.cell(*i)) && !taken.contains(i))
            else {
                continue;
            };
            taken.push(index);
            executions.push(Execution::Spawn {
                player_id: PlayerId::new(format!("npc-{n}")),
                client_id: None,
                name: (*name).to_string(),
                player_type: PlayerType::FakeHuman,
                cell: self.map.cell(index),
            });
        }
        executions
    }

    /// The standing win-condition check.
    #[must_use]
    pub fn win_check(&self) -> Execution {
        Execution::WinCheck
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AllianceRequestIntent, SpawnIntent, UpdateNameIntent};
    use crate::terrain::MapParams;

    fn executor(game: &str) -> Executor {
        Executor::new(
            GameId::new(game),
            Arc::new(TerrainMap::generate(MapParams::default())),
        )
    }

    #[test]
    fn test_create_executions_preserves_order() {
        let turn = Turn::new(
            3,
            GameId::new("g"),
            vec![
                Intent::UpdateName(UpdateNameIntent {
                    client_id: ClientId::new("c1"),
                    name: "a".into(),
                }),
                Intent::Spawn(SpawnIntent {
                    client_id: ClientId::new("c2"),
                    player_id: PlayerId::new("p2"),
                    name: "b".into(),
                    player_type: PlayerType::Human,
                    x: 5,
                    y: 6,
                }),
                Intent::AllianceRequest(AllianceRequestIntent {
                    client_id: ClientId::new("c3"),
                    requestor: PlayerId::new("p3"),
                    recipient: PlayerId::new("p2"),
                }),
            ],
        );
        let kinds: Vec<_> = executor("g")
            .create_executions(&turn)
            .iter()
            .map(Execution::kind)
            .collect();
        assert_eq!(kinds, vec!["updateName", "spawn", "allianceRequest"]);
    }

    #[test]
    fn test_empty_turn_yields_no_executions() {
        assert!(executor("g")
            .create_executions(&Turn::empty(0, GameId::new("g")))
            .is_empty());
    }

    #[test]
    fn test_spawn_bots_deterministic_per_game() {
        let a = executor("game-a").spawn_bots(8);
        let b = executor("game-a").spawn_bots(8);
        let c = executor("game-b").spawn_bots(8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn test_spawn_bots_on_distinct_land() {
        let ex = executor("g");
        let cells: Vec<Cell> = ex
            .spawn_bots(20)
            .into_iter()
            .map(|e| match e {
                Execution::Spawn { cell, .. } => cell,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        let mut dedup = cells.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), cells.len());
        assert!(cells.iter().all(|c| ex.map.is_land(*c)));
    }

    #[test]
    fn test_spawn_bots_pinned_placement() {
        let ex = Executor::new(GameId::new("golden"), Arc::new(TerrainMap::new(4, 4)));
        let bots = ex.spawn_bots(2);
        let Execution::Spawn {
            player_id, cell, ..
        } = &bots[0]
        else {
            panic!("expected spawn");
        };
        assert_eq!(player_id, &PlayerId::new("bot-0-8fb43086"));
        assert_eq!(*cell, Cell::new(1, 3));
        let Execution::Spawn { cell, .. } = &bots[1] else {
            panic!("expected spawn");
        };
        assert_eq!(*cell, Cell::new(2, 0));
    }

    #[test]
    fn test_spawn_bots_limited_by_land() {
        let ex = Executor::new(GameId::new("g"), Arc::new(TerrainMap::new(2, 2)));
        assert_eq!(ex.spawn_bots(10).len(), 4);
    }

    #[test]
    fn test_fake_humans_are_fake_human_type() {
        let npcs = executor("g").fake_human_executions();
        assert!(!npcs.is_empty());
        assert!(npcs.iter().all(|e| matches!(
            e,
            Execution::Spawn {
                player_type: PlayerType::FakeHuman,
                ..
            }
        )));
    }

    #[test]
    fn test_win_check_is_standing() {
        assert!(executor("g").win_check().is_standing());
        assert!(!Execution::UpdateName {
            client_id: ClientId::new("c"),
            name: "x".into()
        }
        .is_standing());
    }
}
