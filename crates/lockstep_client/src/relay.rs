//! In-process turn relay for local play and tests.
//!
//! Plays the server's role over a [`LoopbackServer`]: answers every `Join`
//! with a `Start` carrying the turns after `last_turn`, collects submitted
//! intents, and closes a turn on each period.

use std::time::Duration;

use lockstep_core::schema::{ClientMessage, GameId, Intent, LogSeverity, ServerMessage, Turn};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::transport::LoopbackServer;

/// Single-client turn server.
#[derive(Debug)]
pub struct LocalRelay {
    server: LoopbackServer,
    game_id: GameId,
    turn_period: Duration,
    turn_limit: Option<u64>,
    script: Vec<Vec<Intent>>,
    pending: Vec<Intent>,
    turns: Vec<Turn>,
}

impl LocalRelay {
    /// Relay for `game_id` closing a turn every `turn_period`.
    #[must_use]
    pub fn new(server: LoopbackServer, game_id: GameId, turn_period: Duration) -> Self {
        Self {
            server,
            game_id,
            turn_period,
            turn_limit: None,
            script: Vec::new(),
            pending: Vec::new(),
            turns: Vec::new(),
        }
    }

    /// Stop producing turns after `limit`. Joins are still answered.
    #[must_use]
    pub const fn with_turn_limit(mut self, limit: u64) -> Self {
        self.turn_limit = Some(limit);
        self
    }

    /// Intents injected into turns in order, ahead of submitted ones:
    /// `script[n]` goes into turn `n`.
    #[must_use]
    pub fn with_script(mut self, script: Vec<Vec<Intent>>) -> Self {
        self.script = script;
        self
    }

    /// Serve until the client leaves or its transport is dropped. Returns
    /// every turn produced.
    pub async fn run(mut self) -> Vec<Turn> {
        let mut ticker = time::interval(self.turn_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut started = false;

        loop {
            tokio::select! {
                message = self.server.recv() => match message {
                    Some(ClientMessage::Join { last_turn, .. }) => {
                        started = true;
                        self.start(last_turn);
                    }
                    Some(ClientMessage::Intent { intent, .. }) => self.pending.push(intent),
                    Some(ClientMessage::Log { severity, log, .. }) => match severity {
                        LogSeverity::Error => warn!(%log, "client error"),
                        LogSeverity::Warn => warn!(%log, "client warning"),
                        LogSeverity::Info => info!(%log, "client log"),
                    },
                    Some(ClientMessage::Leave { client_id, .. }) => {
                        info!(client = %client_id, "client left");
                        break;
                    }
                    None => break,
                },
                _ = ticker.tick(), if started => self.close_turn(),
            }
        }
        self.turns
    }

    fn start(&mut self, last_turn: u64) {
        let from = usize::try_from(last_turn).unwrap_or(usize::MAX);
        let turns = self.turns.get(from..).unwrap_or_default().to_vec();
        debug!(last_turn, sent = turns.len(), "answering join");
        if let Err(e) = self.server.push(&ServerMessage::Start {
            turns,
            config: None,
        }) {
            warn!(error = %e, "failed to send start");
        }
    }

    fn close_turn(&mut self) {
        let turn_number = self.turns.len() as u64;
        if self.turn_limit.is_some_and(|limit| turn_number >= limit) {
            return;
        }

        let mut intents = usize::try_from(turn_number)
            .ok()
            .and_then(|n| self.script.get_mut(n))
            .map(std::mem::take)
            .unwrap_or_default();
        intents.append(&mut self.pending);

        let turn = Turn::new(turn_number, self.game_id.clone(), intents);
        self.turns.push(turn.clone());
        if let Err(e) = self.server.push(&ServerMessage::Turn { turn }) {
            // Held for the catch-up on the next join.
            debug!(error = %e, turn = turn_number, "turn not delivered");
        }
    }
}
