//! Transport seam between the session and the network.
//!
//! A transport moves JSON text. It reports connection changes and incoming
//! payloads through the event channel handed to [`Transport::connect`];
//! decoding and validation happen in the session.

use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard};

use lockstep_core::schema::{parse_client_message, ClientMessage, ServerMessage};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::warn;

use crate::error::TransportError;

/// Connection-level events delivered to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection (or reconnection) is open.
    Connected,
    /// Raw payload from the server.
    Message(String),
    /// The connection dropped.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
}

/// Common interface for client-side transports.
pub trait Transport: Send + Debug + 'static {
    /// Open the connection and start emitting events through `events`.
    fn connect(&mut self, events: UnboundedSender<TransportEvent>) -> Result<(), TransportError>;

    /// Send one encoded message.
    fn send(&self, payload: String) -> Result<(), TransportError>;

    /// Close the connection. No events are emitted afterwards.
    fn close(&mut self);
}

#[derive(Debug, Default)]
struct Link {
    events: Option<UnboundedSender<TransportEvent>>,
    open: bool,
}

fn lock(link: &Mutex<Link>) -> MutexGuard<'_, Link> {
    match link.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-process transport. The paired [`LoopbackServer`] plays the server.
#[derive(Debug)]
pub struct LoopbackTransport {
    link: Arc<Mutex<Link>>,
    outbound: UnboundedSender<String>,
}

/// Server end of a loopback pair.
#[derive(Debug)]
pub struct LoopbackServer {
    link: Arc<Mutex<Link>>,
    inbound: UnboundedReceiver<String>,
}

/// Create a connected-on-demand transport and its server end.
#[must_use]
pub fn loopback() -> (LoopbackTransport, LoopbackServer) {
    let link = Arc::new(Mutex::new(Link::default()));
    let (outbound, inbound) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            link: Arc::clone(&link),
            outbound,
        },
        LoopbackServer { link, inbound },
    )
}

impl Transport for LoopbackTransport {
    fn connect(&mut self, events: UnboundedSender<TransportEvent>) -> Result<(), TransportError> {
        let mut link = lock(&self.link);
        if link.events.is_some() {
            return Err(TransportError::AlreadyConnected);
        }
        events
            .send(TransportEvent::Connected)
            .map_err(|_| TransportError::Closed)?;
        link.events = Some(events);
        link.open = true;
        Ok(())
    }

    fn send(&self, payload: String) -> Result<(), TransportError> {
        if !lock(&self.link).open {
            return Err(TransportError::NotConnected);
        }
        self.outbound
            .send(payload)
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        let mut link = lock(&self.link);
        link.open = false;
        link.events = None;
    }
}

impl LoopbackServer {
    /// Deliver a typed server message.
    pub fn push(&self, message: &ServerMessage) -> Result<(), TransportError> {
        self.push_raw(message.to_json()?)
    }

    /// Deliver an arbitrary payload, valid or not.
    pub fn push_raw(&self, payload: impl Into<String>) -> Result<(), TransportError> {
        let link = lock(&self.link);
        if !link.open {
            return Err(TransportError::NotConnected);
        }
        let events = link.events.as_ref().ok_or(TransportError::NotConnected)?;
        events
            .send(TransportEvent::Message(payload.into()))
            .map_err(|_| TransportError::Closed)
    }

    /// Simulate a dropped connection. Client sends fail until
    /// [`reconnect`](Self::reconnect).
    pub fn drop_connection(&self, reason: &str) -> Result<(), TransportError> {
        let mut link = lock(&self.link);
        link.open = false;
        let events = link.events.as_ref().ok_or(TransportError::NotConnected)?;
        events
            .send(TransportEvent::Disconnected {
                reason: reason.to_string(),
            })
            .map_err(|_| TransportError::Closed)
    }

    /// Reopen a dropped connection.
    pub fn reconnect(&self) -> Result<(), TransportError> {
        let mut link = lock(&self.link);
        let events = link.events.clone().ok_or(TransportError::NotConnected)?;
        events
            .send(TransportEvent::Connected)
            .map_err(|_| TransportError::Closed)?;
        link.open = true;
        Ok(())
    }

    /// True while the client side is connected.
    #[must_use]
    pub fn is_open(&self) -> bool {
        lock(&self.link).open
    }

    /// Next valid client message. `None` once the client transport is gone.
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        loop {
            let payload = self.inbound.recv().await?;
            match parse_client_message(&payload) {
                Ok(message) => return Some(message),
                Err(e) => warn!(error = %e, "loopback server dropped invalid payload"),
            }
        }
    }

    /// Next already-queued client message, if any.
    pub fn try_recv(&mut self) -> Option<ClientMessage> {
        while let Ok(payload) = self.inbound.try_recv() {
            if let Ok(message) = parse_client_message(&payload) {
                return Some(message);
            }
        }
        None
    }
}
