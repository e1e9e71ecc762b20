//! Error types for turn synchronization and simulation.

use thiserror::Error;

/// Result type alias using [`GameError`].
pub type Result<T> = std::result::Result<T, GameError>;

/// A wire payload that does not match the message schema.
///
/// Raised at the parse boundary only. A payload that fails validation never
/// reaches the turn buffer or the simulation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The payload is not well-formed JSON, a field is missing or mistyped,
    /// or the `type` tag is unknown.
    #[error("Malformed {kind} message: {source}")]
    Malformed {
        /// Which schema the payload was checked against.
        kind: &'static str,
        /// Underlying parse error with line/column context.
        #[source]
        source: serde_json::Error,
    },
}

impl ValidationError {
    pub(crate) fn malformed(kind: &'static str, source: serde_json::Error) -> Self {
        Self::Malformed { kind, source }
    }
}

/// A turn whose number does not match the next free slot of the turn buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Turn out of sequence: expected turn {expected}, received turn {received}")]
pub struct SequenceError {
    /// The turn number the buffer would accept next (its current length).
    pub expected: u64,
    /// The turn number that actually arrived.
    pub received: u64,
}

impl SequenceError {
    /// True if the received turn is ahead of the buffer, leaving a gap.
    #[must_use]
    pub const fn is_gap(&self) -> bool {
        self.received > self.expected
    }
}

/// The simulation step failed while applying a turn.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationError {
    /// A state invariant was found broken during the step.
    #[error("Simulation invariant violated at tick {tick}: {message}")]
    InvariantViolated {
        /// Simulation tick being executed.
        tick: u64,
        /// Description of the broken invariant.
        message: String,
    },

    /// The step panicked; the panic was caught at the tick boundary.
    #[error("Simulation step panicked: {0}")]
    Panicked(String),
}

/// Top-level error type for the deterministic core.
#[derive(Debug, Error)]
pub enum GameError {
    /// Wire validation failure.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Turn sequencing failure.
    #[error(transparent)]
    Sequence(#[from] SequenceError),

    /// Simulation step failure.
    #[error(transparent)]
    Simulation(#[from] SimulationError),

    /// Invalid game state.
    #[error("Invalid game state: {0}")]
    InvalidState(String),

    /// Desync detected while verifying a replay or comparing clients.
    #[error("Desync detected at tick {tick}: local hash {local_hash}, remote hash {remote_hash}")]
    DesyncDetected {
        /// Tick where desync occurred.
        tick: u64,
        /// Local simulation hash.
        local_hash: u64,
        /// Remote simulation hash.
        remote_hash: u64,
    },
}
