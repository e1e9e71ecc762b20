//! Wire vocabulary shared by independently built clients and servers.
//!
//! Every message is a JSON object discriminated by its `type` field. The
//! field names, nullability and numeric/string typing here are the wire
//! contract, so they are spelled out per field rather than derived from a
//! blanket rename rule.
//!
//! Validation is structural only: a payload either deserializes into one of
//! these types or is rejected with a [`ValidationError`]. Nothing here checks
//! turn contiguity; that belongs to [`crate::turn_buffer`].
//!
//! Nullable fields (`targetID`, `sourceX`, `clientIP`, ...) must be present on
//! the wire; `null` is accepted but an absent key is not. Unknown extra keys
//! are ignored.
//!
//! Troop counts and coordinates accept any JSON number. Fractions are floored
//! and out-of-range values saturate, so every client reads the same whole
//! value from the same payload.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap a raw identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }
    };
}

string_id!(
    /// Identifies one connected client (one browser tab, one process).
    ClientId
);
string_id!(
    /// Identifies one game session.
    GameId
);
string_id!(
    /// Identifies a player inside the simulation.
    PlayerId
);

/// Require the key to be present while allowing `null`.
///
/// Serde treats a missing `Option` field as `None`; routing the field through
/// `deserialize_with` turns a missing key into a "missing field" error.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}

/// Troop counts are plain JSON numbers; the simulation works in whole
/// troops, so fractions are floored and out-of-range values saturate.
fn troop_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    f64::deserialize(deserializer).map(whole_troops)
}

/// Tile coordinates are plain JSON numbers, floored onto the tile grid.
fn coordinate<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    f64::deserialize(deserializer).map(whole_coordinate)
}

/// [`coordinate`] for a nullable field; the key must still be present.
fn nullable_coordinate<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<f64>::deserialize(deserializer).map(|value| value.map(whole_coordinate))
}

// Float-to-int `as` saturates at the bounds, which is the intended clamp.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_troops(value: f64) -> u32 {
    value.floor() as u32
}

#[allow(clippy::cast_possible_truncation)]
fn whole_coordinate(value: f64) -> i32 {
    value.floor() as i32
}

/// Who controls a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PlayerType {
    /// A connected human.
    #[serde(rename = "HUMAN")]
    Human,
    /// A system-spawned bot.
    #[serde(rename = "BOT")]
    Bot,
    /// A system-spawned nation that plays like a human.
    #[serde(rename = "FAKEHUMAN")]
    FakeHuman,
}

// ============================================================================
// Intents
// ============================================================================

/// Land attack, optionally aimed at a specific player and tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackIntent {
    /// Submitting client.
    #[serde(rename = "clientID")]
    pub client_id: ClientId,
    /// Attacking player.
    #[serde(rename = "attackerID")]
    pub attacker_id: PlayerId,
    /// `None` attacks unowned land.
    #[serde(rename = "targetID", deserialize_with = "nullable")]
    pub target_id: Option<PlayerId>,
    /// Troops committed.
    #[serde(deserialize_with = "troop_count")]
    pub troops: u32,
    /// Tile the attack starts from; both coordinates or neither.
    #[serde(rename = "sourceX", deserialize_with = "nullable_coordinate")]
    pub source_x: Option<i32>,
    /// See [`source_x`](Self::source_x).
    #[serde(rename = "sourceY", deserialize_with = "nullable_coordinate")]
    pub source_y: Option<i32>,
    /// Tile the attack aims at; both coordinates or neither.
    #[serde(rename = "targetX", deserialize_with = "nullable_coordinate")]
    pub target_x: Option<i32>,
    /// See [`target_x`](Self::target_x).
    #[serde(rename = "targetY", deserialize_with = "nullable_coordinate")]
    pub target_y: Option<i32>,
}

/// Initial placement of a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnIntent {
    /// Submitting client.
    #[serde(rename = "clientID")]
    pub client_id: ClientId,
    /// Id of the new player.
    #[serde(rename = "playerID")]
    pub player_id: PlayerId,
    /// Display name.
    pub name: String,
    /// Controller kind.
    #[serde(rename = "playerType")]
    pub player_type: PlayerType,
    /// Spawn tile column.
    #[serde(deserialize_with = "coordinate")]
    pub x: i32,
    /// Spawn tile row.
    #[serde(deserialize_with = "coordinate")]
    pub y: i32,
}

/// Naval landing at a coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoatAttackIntent {
    /// Submitting client.
    #[serde(rename = "clientID")]
    pub client_id: ClientId,
    /// Attacking player.
    #[serde(rename = "attackerID")]
    pub attacker_id: PlayerId,
    /// Owner of the landing tile, `None` for unowned land.
    #[serde(rename = "targetID", deserialize_with = "nullable")]
    pub target_id: Option<PlayerId>,
    /// Troops embarked.
    #[serde(deserialize_with = "troop_count")]
    pub troops: u32,
    /// Landing tile column.
    #[serde(deserialize_with = "coordinate")]
    pub x: i32,
    /// Landing tile row.
    #[serde(deserialize_with = "coordinate")]
    pub y: i32,
}

/// Display name change for the sending client's player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNameIntent {
    /// Submitting client; its player is renamed.
    #[serde(rename = "clientID")]
    pub client_id: ClientId,
    /// New display name.
    pub name: String,
}

/// Alliance proposal from one player to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllianceRequestIntent {
    /// Submitting client.
    #[serde(rename = "clientID")]
    pub client_id: ClientId,
    /// Proposing player.
    pub requestor: PlayerId,
    /// Player being asked.
    pub recipient: PlayerId,
}

/// A validated player action that has not yet been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Intent {
    /// `attack`
    #[serde(rename = "attack")]
    Attack(AttackIntent),
    /// `spawn`
    #[serde(rename = "spawn")]
    Spawn(SpawnIntent),
    /// `boat`
    #[serde(rename = "boat")]
    BoatAttack(BoatAttackIntent),
    /// `updateName`
    #[serde(rename = "updateName")]
    UpdateName(UpdateNameIntent),
    /// `allianceRequest`
    #[serde(rename = "allianceRequest")]
    AllianceRequest(AllianceRequestIntent),
}

impl Intent {
    /// The client that submitted this intent.
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        match self {
            Self::Attack(i) => &i.client_id,
            Self::Spawn(i) => &i.client_id,
            Self::BoatAttack(i) => &i.client_id,
            Self::UpdateName(i) => &i.client_id,
            Self::AllianceRequest(i) => &i.client_id,
        }
    }

    /// The wire tag of this intent.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Attack(_) => "attack",
            Self::Spawn(_) => "spawn",
            Self::BoatAttack(_) => "boat",
            Self::UpdateName(_) => "updateName",
            Self::AllianceRequest(_) => "allianceRequest",
        }
    }
}

/// A numbered batch of intents that every client applies in the same step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Position in the game's turn sequence, from 0.
    #[serde(rename = "turnNumber")]
    pub turn_number: u64,
    /// Game this turn belongs to.
    #[serde(rename = "gameID")]
    pub game_id: GameId,
    /// Order is significant; it is preserved end to end.
    pub intents: Vec<Intent>,
}

impl Turn {
    /// Create a turn.
    #[must_use]
    pub fn new(turn_number: u64, game_id: GameId, intents: Vec<Intent>) -> Self {
        Self {
            turn_number,
            game_id,
            intents,
        }
    }

    /// A turn carrying no intents; the simulation still advances one step.
    #[must_use]
    pub fn empty(turn_number: u64, game_id: GameId) -> Self {
        Self::new(turn_number, game_id, Vec::new())
    }
}

// ============================================================================
// Session configuration carried by the start message
// ============================================================================

/// Kind of session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameType {
    /// One human against system players.
    Singleplayer,
    /// Listed in the public lobby.
    Public,
    /// Joined by invite only.
    Private,
}

/// Difficulty of system-controlled players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    /// Easy.
    Easy,
    /// Medium.
    Medium,
    /// Hard.
    Hard,
    /// Impossible.
    Impossible,
}

/// Game parameters announced with the start message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    /// Kind of session.
    #[serde(rename = "gameType")]
    pub game_type: GameType,
    /// Map name.
    #[serde(rename = "gameMap")]
    pub game_map: String,
    /// Bot difficulty, if the session has bots.
    #[serde(deserialize_with = "nullable")]
    pub difficulty: Option<Difficulty>,
}

// ============================================================================
// Messages
// ============================================================================

/// Severity of a forwarded diagnostic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    /// Informational.
    Info,
    /// Something went wrong but play continues.
    Warn,
    /// A failure, such as a crashed step.
    Error,
}

/// Messages sent by a client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Submit a local intent for inclusion in a future turn.
    Intent {
        /// Sender.
        #[serde(rename = "clientID")]
        client_id: ClientId,
        /// Target game.
        #[serde(rename = "gameID")]
        game_id: GameId,
        /// The action.
        intent: Intent,
    },
    /// Join or resume a session. `last_turn` is the number of turns already
    /// held; a non-zero value asks for only the missed range.
    Join {
        /// Sender.
        #[serde(rename = "clientID")]
        client_id: ClientId,
        /// Sender address, when known.
        #[serde(rename = "clientIP", deserialize_with = "nullable")]
        client_ip: Option<String>,
        /// Game to join.
        #[serde(rename = "gameID")]
        game_id: GameId,
        /// Turns already held.
        #[serde(rename = "lastTurn")]
        last_turn: u64,
    },
    /// One-way departure notice.
    Leave {
        /// Sender.
        #[serde(rename = "clientID")]
        client_id: ClientId,
        /// Game being left.
        #[serde(rename = "gameID")]
        game_id: GameId,
    },
    /// Client-side diagnostic forwarded to the server.
    Log {
        /// Sender.
        #[serde(rename = "clientID")]
        client_id: ClientId,
        /// Game the record concerns.
        #[serde(rename = "gameID")]
        game_id: GameId,
        /// Record severity.
        severity: LogSeverity,
        /// Rendered record.
        log: String,
    },
}

/// Messages sent by the server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Broadcast of the next turn.
    Turn {
        /// The turn.
        turn: Turn,
    },
    /// Game start, or resumption after a Join. Carries every turn the client
    /// missed, in order.
    Start {
        /// Missed turns, numbered contiguously.
        turns: Vec<Turn>,
        /// Game parameters; may be absent on the wire.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<GameConfig>,
    },
}

impl ClientMessage {
    /// Encode for the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    /// Encode for the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Validate a raw client-to-server payload.
pub fn parse_client_message(payload: &str) -> Result<ClientMessage, ValidationError> {
    serde_json::from_str(payload).map_err(|e| ValidationError::malformed("client", e))
}

/// Validate a raw server-to-client payload.
pub fn parse_server_message(payload: &str) -> Result<ServerMessage, ValidationError> {
    serde_json::from_str(payload).map_err(|e| ValidationError::malformed("server", e))
}

/// Validate a single raw intent.
pub fn parse_intent(payload: &str) -> Result<Intent, ValidationError> {
    serde_json::from_str(payload).map_err(|e| ValidationError::malformed("intent", e))
}
