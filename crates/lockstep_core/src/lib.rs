//! # Lockstep Core
//!
//! Deterministic turn synchronization and simulation scheduling.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO apart from replay files
//! - No system randomness
//! - No floating-point math (uses fixed-point)
//!
//! Every client receives the same ordered turns, converts them into the same
//! executions, and advances an identical simulation one step per turn.
//!
//! ## Crate Structure
//!
//! - [`schema`] - Wire messages and validation
//! - [`turn_buffer`] - Contiguous log of received turns
//! - [`execution`] - Turn-to-execution conversion
//! - [`scheduler`] - Tick state machine and step runner
//! - [`simulation`] - Reference territory simulation
//! - [`replay`] - Recording and verification of turn sequences

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod error;
pub mod execution;
pub mod math;
pub mod pathfinding;
pub mod replay;
pub mod rng;
pub mod scheduler;
pub mod schema;
pub mod setup;
pub mod simulation;
pub mod terrain;
pub mod turn_buffer;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{GameError, Result, SequenceError, SimulationError, ValidationError};
    pub use crate::execution::{Execution, Executor};
    pub use crate::math::Fixed;
    pub use crate::replay::{Replay, ReplayPlayer};
    pub use crate::scheduler::{
        CrashNotice, CrashPolicy, GapPolicy, NullObserver, RunnerObserver, SchedulerConfig, SlowTick,
        TickOutcome, TickScheduler,
    };
    pub use crate::schema::{
        parse_client_message, parse_server_message, ClientId, ClientMessage, GameId, Intent,
        PlayerId, PlayerType, ServerMessage, Turn,
    };
    pub use crate::setup::GameSetup;
    pub use crate::simulation::{Game, Simulate, SimulationConfig, TickEvents};
    pub use crate::terrain::{Cell, MapParams, Terrain, TerrainMap};
    pub use crate::turn_buffer::{Delivery, TurnBuffer};
}
