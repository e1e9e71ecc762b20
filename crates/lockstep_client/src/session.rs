//! Session protocol: join, leave, submit, and validation of incoming
//! payloads.
//!
//! Every connect (first or after a drop) sends `Join` with `last_turn` set
//! to the number of turns already held, so the server only resends what
//! was missed. Invalid server payloads are logged and dropped here and
//! never reach the turn buffer.

use lockstep_core::schema::{parse_server_message, ClientMessage, Intent, LogSeverity, ServerMessage};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::LobbyConfig;
use crate::error::TransportError;
use crate::transport::{Transport, TransportEvent};

/// What the runner should do with a transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection opened and `Join` was sent.
    Joined {
        /// Turns already held when joining.
        last_turn: u64,
    },
    /// A validated server message.
    Message(ServerMessage),
    /// Connection dropped.
    Disconnected,
    /// Nothing to do (invalid payload or failed join).
    Ignored,
}

/// One client's membership in one game.
#[derive(Debug)]
pub struct Session<T: Transport> {
    transport: T,
    lobby: LobbyConfig,
    connected: bool,
}

impl<T: Transport> Session<T> {
    /// Wrap a transport; nothing is sent until [`connect`](Self::connect).
    pub fn new(transport: T, lobby: LobbyConfig) -> Self {
        Self {
            transport,
            lobby,
            connected: false,
        }
    }

    /// Lobby identity used in outgoing messages.
    #[must_use]
    pub fn lobby(&self) -> &LobbyConfig {
        &self.lobby
    }

    /// True between a `Connected` and a `Disconnected` event.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Open the transport. `Join` follows once it reports `Connected`.
    pub fn connect(&mut self, events: UnboundedSender<TransportEvent>) -> Result<(), TransportError> {
        self.transport.connect(events)
    }

    /// Ask to join, or resume after `last_turn` held turns.
    pub fn join_game(&self, last_turn: u64) -> Result<(), TransportError> {
        info!(
            client = %self.lobby.client_id,
            game = %self.lobby.game_id,
            last_turn,
            "joining game"
        );
        self.send(&ClientMessage::Join {
            client_id: self.lobby.client_id.clone(),
            client_ip: self.lobby.client_ip.clone(),
            game_id: self.lobby.game_id.clone(),
            last_turn,
        })
    }

    /// One-way departure notice.
    pub fn leave_game(&self) -> Result<(), TransportError> {
        self.send(&ClientMessage::Leave {
            client_id: self.lobby.client_id.clone(),
            game_id: self.lobby.game_id.clone(),
        })
    }

    /// Submit a local intent for a future turn.
    pub fn send_intent(&self, intent: Intent) -> Result<(), TransportError> {
        self.send(&ClientMessage::Intent {
            client_id: self.lobby.client_id.clone(),
            game_id: self.lobby.game_id.clone(),
            intent,
        })
    }

    /// Forward a diagnostic record.
    pub fn send_log(&self, severity: LogSeverity, log: String) -> Result<(), TransportError> {
        self.send(&ClientMessage::Log {
            client_id: self.lobby.client_id.clone(),
            game_id: self.lobby.game_id.clone(),
            severity,
            log,
        })
    }

    /// Close the transport.
    pub fn close(&mut self) {
        self.connected = false;
        self.transport.close();
    }

    /// Handle a transport event. `held_turns` is the current buffer length.
    pub fn handle_event(&mut self, event: TransportEvent, held_turns: u64) -> SessionEvent {
        match event {
            TransportEvent::Connected => {
                self.connected = true;
                match self.join_game(held_turns) {
                    Ok(()) => SessionEvent::Joined {
                        last_turn: held_turns,
                    },
                    Err(e) => {
                        warn!(error = %e, "failed to send join");
                        SessionEvent::Ignored
                    }
                }
            }
            TransportEvent::Message(payload) => match parse_server_message(&payload) {
                Ok(message) => SessionEvent::Message(message),
                Err(e) => {
                    warn!(error = %e, "dropping invalid server message");
                    debug!(payload = %payload, "invalid payload");
                    SessionEvent::Ignored
                }
            },
            TransportEvent::Disconnected { reason } => {
                self.connected = false;
                warn!(%reason, "disconnected from server");
                SessionEvent::Disconnected
            }
        }
    }

    fn send(&self, message: &ClientMessage) -> Result<(), TransportError> {
        let payload = message.to_json()?;
        self.transport.send(payload)
    }
}
