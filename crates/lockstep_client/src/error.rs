//! Error types for the client side of a session.

use thiserror::Error;

/// Failure to move a message across the transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// `connect` was called twice without a `close`.
    #[error("transport already connected")]
    AlreadyConnected,
    /// No open connection.
    #[error("transport not connected")]
    NotConnected,
    /// The peer side of the connection is gone.
    #[error("transport closed")]
    Closed,
    /// Outgoing message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure inside the background worker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Initialization rejected the map.
    #[error("worker initialization failed: {0}")]
    Init(String),
    /// A request arrived before `initialize` completed.
    #[error("worker not initialized")]
    NotInitialized,
    /// The worker task has exited.
    #[error("worker unavailable")]
    Unavailable,
    /// Path request could not be answered.
    #[error("path request failed: {0}")]
    Path(String),
}

/// Error type for config loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File not found.
    #[error("Config file not found: {0}")]
    FileNotFound(String),
    /// Failed to read file.
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse RON.
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] ron::error::SpannedError),
    /// Parsed, but the values cannot start a game.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Failure to start or run a game runner.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Worker failed; fatal at startup.
    #[error(transparent)]
    Worker(#[from] WorkerError),
    /// Transport failed while connecting.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Config could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The step task died without returning the simulation.
    #[error("simulation step lost: {0}")]
    StepLost(String),
    /// The runner has already exited.
    #[error("runner stopped")]
    Stopped,
    /// The runner task itself failed to join.
    #[error("runner task failed: {0}")]
    Join(String),
}
