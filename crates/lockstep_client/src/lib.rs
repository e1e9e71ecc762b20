//! # Lockstep Client
//!
//! Network-facing half of a lockstep client: the session protocol over a
//! pluggable transport, the background worker, and the runner that feeds
//! received turns to the simulation on a fixed timer.
//!
//! ## Crate Structure
//!
//! - [`transport`] - Transport trait and in-process loopback
//! - [`session`] - Join/leave/submit and payload validation
//! - [`worker`] - Background path queries, initialized before start
//! - [`runner`] - Tick loop actor
//! - [`remote_log`] - Forwarding diagnostics to the server
//! - [`relay`] - In-process turn server for local play
//! - [`config`] - RON-loadable runner and lobby settings

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod config;
pub mod error;
pub mod relay;
pub mod remote_log;
pub mod runner;
pub mod session;
pub mod transport;
pub mod worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ClientConfig, LobbyConfig, RunnerConfig};
    pub use crate::error::{ConfigError, RunnerError, TransportError, WorkerError};
    pub use crate::relay::LocalRelay;
    pub use crate::remote_log::{remote_log_layer, LogRecord, RemoteLogLayer};
    pub use crate::runner::{create_client_game, GameRunner, RunnerHandle, RunnerReport, RunnerStatus};
    pub use crate::session::{Session, SessionEvent};
    pub use crate::transport::{loopback, LoopbackServer, LoopbackTransport, Transport, TransportEvent};
    pub use crate::worker::{ReadyWorker, WorkerClient, WorkerInfo};
}
