//! Append-only ordered log of received turns.
//!
//! The buffer enforces contiguity: the turn at position `i` always has
//! `turn_number == i`. It is the only place where server messages become
//! turns, so duplicates, gaps and out-of-order turns are caught here before
//! the scheduler ever sees them.
//!
//! Catch-up and live delivery use different rules:
//!
//! | source            | `turn_number < len` | `== len` | `> len`          |
//! |-------------------|---------------------|----------|------------------|
//! | start (catch-up)  | skipped (duplicate) | appended | [`SequenceError`]|
//! | turn (live)       | [`SequenceError`]   | appended | [`SequenceError`]|

use tracing::debug;

use crate::error::SequenceError;
use crate::schema::{ServerMessage, Turn};

/// Result of a catch-up batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CatchUp {
    /// Turns appended.
    pub appended: usize,
    /// Turns already held, skipped.
    pub skipped: usize,
}

/// What [`TurnBuffer::receive`] did with a server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// A start message was applied; the buffer is now joined.
    CaughtUp(CatchUp),
    /// A live turn was appended.
    Appended {
        /// Number of the appended turn.
        turn_number: u64,
    },
    /// A live turn arrived before the catch-up. Nothing was appended; the
    /// client must send `Join` with `last_turn = 0`.
    RejoinRequired,
    /// A turn did not fit the next slot. Nothing past the error was appended.
    Rejected(SequenceError),
}

/// Ordered, gap-free turn log.
#[derive(Debug, Clone, Default)]
pub struct TurnBuffer {
    turns: Vec<Turn>,
    has_joined: bool,
}

impl TurnBuffer {
    /// Create an empty, not-yet-joined buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of turns held; also the next expected turn number.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.turns.len() as u64
    }

    /// True if no turns have been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// True once a start message has been applied.
    #[must_use]
    pub const fn has_joined(&self) -> bool {
        self.has_joined
    }

    /// The turn numbered `turn_number`, if held.
    #[must_use]
    pub fn get(&self, turn_number: u64) -> Option<&Turn> {
        usize::try_from(turn_number)
            .ok()
            .and_then(|i| self.turns.get(i))
    }

    /// All turns in order.
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Apply a catch-up batch and mark the buffer joined.
    ///
    /// Turns already held are skipped, so replaying the same batch is a
    /// no-op. A turn beyond the next slot stops the batch; turns appended
    /// before it are kept.
    pub fn append_catch_up(&mut self, turns: Vec<Turn>) -> Result<CatchUp, SequenceError> {
        self.has_joined = true;
        let mut outcome = CatchUp::default();

        for turn in turns {
            let expected = self.len();
            if turn.turn_number < expected {
                outcome.skipped += 1;
                continue;
            }
            if turn.turn_number > expected {
                return Err(SequenceError {
                    expected,
                    received: turn.turn_number,
                });
            }
            self.turns.push(turn);
            outcome.appended += 1;
        }

        debug!(
            appended = outcome.appended,
            skipped = outcome.skipped,
            len = self.len(),
            "catch-up applied"
        );
        Ok(outcome)
    }

    /// Append a live turn. Only the turn numbered `len()` is accepted.
    ///
    /// Does not check [`has_joined`](Self::has_joined); [`receive`](Self::receive)
    /// applies that gate.
    pub fn append_live(&mut self, turn: Turn) -> Result<(), SequenceError> {
        let expected = self.len();
        if turn.turn_number != expected {
            return Err(SequenceError {
                expected,
                received: turn.turn_number,
            });
        }
        self.turns.push(turn);
        Ok(())
    }

    /// Route a validated server message into the buffer.
    pub fn receive(&mut self, message: ServerMessage) -> Delivery {
        match message {
            ServerMessage::Start { turns, .. } => match self.append_catch_up(turns) {
                Ok(catch_up) => Delivery::CaughtUp(catch_up),
                Err(e) => Delivery::Rejected(e),
            },
            ServerMessage::Turn { .. } if !self.has_joined => Delivery::RejoinRequired,
            ServerMessage::Turn { turn } => {
                let turn_number = turn.turn_number;
                match self.append_live(turn) {
                    Ok(()) => Delivery::Appended { turn_number },
                    Err(e) => Delivery::Rejected(e),
                }
            }
        }
    }
}
