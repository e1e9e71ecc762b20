//! The game runner: one tokio task that owns the turn buffer, scheduler and
//! simulation.
//!
//! Timer ticks, transport events, local commands and forwarded log records
//! all arrive at a single `select!` loop, so buffer appends never race the
//! read of the next turn. The step itself runs on `spawn_blocking` with the
//! simulation moved in and moved back out; while it is away the loop has
//! nothing to step with, and timer ticks that land in that window are
//! counted as busy skips.

use std::sync::Arc;

use lockstep_core::execution::Executor;
use lockstep_core::replay::Replay;
use lockstep_core::scheduler::{
    run_step, CrashPolicy, RunnerObserver, StepReport, TickDecision, TickOutcome, TickScheduler,
};
use lockstep_core::schema::{Intent, ServerMessage};
use lockstep_core::setup::GameSetup;
use lockstep_core::simulation::{Game, Simulate};
use lockstep_core::terrain::TerrainMap;
use lockstep_core::turn_buffer::{Delivery, TurnBuffer};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::{ClientConfig, RunnerConfig};
use crate::error::RunnerError;
use crate::remote_log::LogRecord;
use crate::session::{Session, SessionEvent};
use crate::transport::{Transport, TransportEvent};
use crate::worker::{ReadyWorker, WorkerClient};

/// Snapshot of runner progress, published after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerStatus {
    /// Next turn to apply.
    pub curr_turn: u64,
    /// Turns held in the buffer.
    pub buffered_turns: u64,
    /// True while a step is in flight.
    pub processing: bool,
    /// Simulation ticks executed.
    pub sim_ticks: u64,
    /// Simulation state hash as of the last finished step.
    pub state_hash: u64,
    /// Timer ticks skipped because a step was in flight.
    pub busy_skips: u64,
    /// Failed steps.
    pub crashes: u64,
    /// Joins sent after the first.
    pub rejoins: u64,
    /// Set once the runner has exited.
    pub stopped: bool,
}

/// Final state handed back by [`RunnerHandle::stop`].
#[derive(Debug, Clone)]
pub struct RunnerReport {
    /// Status at exit.
    pub status: RunnerStatus,
    /// Every applied turn, ready to save and verify.
    pub replay: Replay,
}

#[derive(Debug)]
enum RunnerCommand {
    SubmitIntent(Intent),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halt,
}

/// Control handle for a started runner.
#[derive(Debug)]
pub struct RunnerHandle {
    commands: mpsc::UnboundedSender<RunnerCommand>,
    status: watch::Receiver<RunnerStatus>,
    worker: ReadyWorker,
    task: JoinHandle<Result<RunnerReport, RunnerError>>,
}

impl RunnerHandle {
    /// Latest published status.
    #[must_use]
    pub fn status(&self) -> RunnerStatus {
        self.status.borrow().clone()
    }

    /// Wait until `predicate` holds for the published status.
    ///
    /// Returns `None` if the runner exits before the predicate holds.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&RunnerStatus) -> bool,
    ) -> Option<RunnerStatus> {
        self.status
            .wait_for(|status| predicate(status))
            .await
            .ok()
            .map(|status| status.clone())
    }

    /// Queue a local intent for submission to the server.
    pub fn submit_intent(&self, intent: Intent) -> Result<(), RunnerError> {
        self.commands
            .send(RunnerCommand::SubmitIntent(intent))
            .map_err(|_| RunnerError::Stopped)
    }

    /// The worker the runner was started with.
    #[must_use]
    pub const fn worker(&self) -> &ReadyWorker {
        &self.worker
    }

    /// True once the runner task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the runner and collect its report. An in-flight step is allowed
    /// to finish first.
    pub async fn stop(self) -> Result<RunnerReport, RunnerError> {
        // Already exited (halted) if the send fails.
        let _ = self.commands.send(RunnerCommand::Stop);
        self.join().await
    }

    /// Wait for the runner to exit on its own.
    pub async fn join(self) -> Result<RunnerReport, RunnerError> {
        self.task
            .await
            .map_err(|e| RunnerError::Join(e.to_string()))?
    }
}

/// Build a runner for the reference simulation.
///
/// Generates the map, initializes the worker and creates a fresh game.
/// An invalid config or a worker failure aborts here, before any tick can
/// run.
pub async fn create_client_game<T: Transport>(
    config: ClientConfig,
    transport: T,
    observer: Arc<dyn RunnerObserver>,
) -> Result<GameRunner<Game, T>, RunnerError> {
    config.validate()?;
    let map = Arc::new(TerrainMap::generate(config.runner.map));
    let worker = WorkerClient::spawn(Arc::clone(&map)).initialize().await?;
    let game = Game::new(map.as_ref().clone(), config.runner.simulation);
    Ok(GameRunner::new(config, transport, game, worker, observer))
}

/// Drives a simulation from the turns a session receives.
pub struct GameRunner<S: Simulate, T: Transport> {
    config: RunnerConfig,
    setup: GameSetup,
    session: Session<T>,
    buffer: TurnBuffer,
    executor: Executor,
    scheduler: TickScheduler,
    game: Option<S>,
    worker: ReadyWorker,
    observer: Arc<dyn RunnerObserver>,
    remote_logs: Option<mpsc::UnboundedReceiver<LogRecord>>,
    /// A gap-triggered `Join` is awaiting its `Start`.
    resync_pending: bool,
    status: RunnerStatus,
    status_tx: watch::Sender<RunnerStatus>,
}

impl<S: Simulate, T: Transport> GameRunner<S, T> {
    /// Assemble a runner around an initialized worker and a fresh
    /// simulation.
    pub fn new(
        config: ClientConfig,
        transport: T,
        game: S,
        worker: ReadyWorker,
        observer: Arc<dyn RunnerObserver>,
    ) -> Self {
        let setup = config.game_setup();
        let executor = Executor::new(config.lobby.game_id.clone(), worker.map());
        let scheduler = TickScheduler::new(
            config.lobby.client_id.clone(),
            config.lobby.game_id.clone(),
            config.runner.scheduler_config(),
        );
        let (status_tx, _) = watch::channel(RunnerStatus::default());
        Self {
            config: config.runner,
            setup,
            session: Session::new(transport, config.lobby),
            buffer: TurnBuffer::new(),
            executor,
            scheduler,
            game: Some(game),
            worker,
            observer,
            remote_logs: None,
            resync_pending: false,
            status: RunnerStatus::default(),
            status_tx,
        }
    }

    /// Forward records from a [`RemoteLogLayer`](crate::remote_log::RemoteLogLayer).
    #[must_use]
    pub fn with_remote_logs(mut self, records: mpsc::UnboundedReceiver<LogRecord>) -> Self {
        self.remote_logs = Some(records);
        self
    }

    /// Queue the start-of-game executions, connect, and spawn the loop.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(mut self) -> Result<RunnerHandle, RunnerError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.session.connect(events_tx)?;

        if let Some(game) = self.game.as_mut() {
            game.add_executions(self.setup.start_executions(&self.executor));
        }
        info!(
            client = %self.session.lobby().client_id,
            game = %self.session.lobby().game_id,
            bots = self.setup.num_bots,
            npcs = self.setup.spawn_npcs,
            "runner started"
        );

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let status = self.status_tx.subscribe();
        let worker = self.worker.clone();
        let task = tokio::spawn(self.run(commands_rx, events_rx));
        Ok(RunnerHandle {
            commands: commands_tx,
            status,
            worker,
            task,
        })
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<RunnerCommand>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Result<RunnerReport, RunnerError> {
        let mut ticker = time::interval(self.config.tick_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut remote_logs = self.remote_logs.take();
        let mut step: Option<JoinHandle<(S, StepReport)>> = None;
        self.publish();

        let exit = loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(RunnerCommand::SubmitIntent(intent)) => self.submit(intent),
                    Some(RunnerCommand::Stop) | None => break Ok(()),
                },
                Some(event) = events.recv() => self.on_transport_event(event),
                Some(record) = next_record(&mut remote_logs) => self.forward_log(record),
                joined = wait_step(&mut step) => {
                    step = None;
                    match joined {
                        Ok((game, report)) => {
                            if self.on_step_finished(game, report) == Flow::Halt {
                                break Ok(());
                            }
                        }
                        Err(e) => break Err(RunnerError::StepLost(e.to_string())),
                    }
                }
                _ = ticker.tick() => {
                    if let Some(handle) = self.on_timer() {
                        step = Some(handle);
                    }
                }
            }
        };

        let exit = match (exit, step) {
            (Ok(()), Some(handle)) => match handle.await {
                Ok((game, report)) => {
                    self.on_step_finished(game, report);
                    Ok(())
                }
                Err(e) => Err(RunnerError::StepLost(e.to_string())),
            },
            (exit, _) => exit,
        };
        self.shutdown();
        exit.map(|()| self.report())
    }

    fn on_timer(&mut self) -> Option<JoinHandle<(S, StepReport)>> {
        let Some(mut game) = self.game.take() else {
            self.status.busy_skips += 1;
            trace!(turn = self.scheduler.curr_turn(), "tick skipped, step in flight");
            return None;
        };

        match self.scheduler.begin(&self.buffer, &self.executor) {
            TickDecision::Ready(job) => {
                trace!(turn = job.turn_number, "step started");
                self.publish();
                Some(tokio::task::spawn_blocking(move || {
                    let report = run_step(&mut game, job);
                    (game, report)
                }))
            }
            TickDecision::Busy => {
                self.game = Some(game);
                self.status.busy_skips += 1;
                None
            }
            TickDecision::Starved => {
                self.game = Some(game);
                None
            }
        }
    }

    fn on_step_finished(&mut self, game: S, report: StepReport) -> Flow {
        self.game = Some(game);
        let flow = match self.scheduler.finish(report, self.observer.as_ref()) {
            TickOutcome::Applied {
                turn_number,
                elapsed,
                events,
            } => {
                debug!(
                    turn = turn_number,
                    elapsed_ms = elapsed.as_millis(),
                    applied = events.applied.len(),
                    "turn applied"
                );
                if let Some(winner) = events.winner {
                    info!(%winner, turn = turn_number, "game won");
                }
                Flow::Continue
            }
            TickOutcome::Failed { turn_number, .. } => {
                self.status.crashes += 1;
                if self.config.crash_policy == CrashPolicy::Halt {
                    warn!(turn = turn_number, "halting after failed step");
                    Flow::Halt
                } else {
                    Flow::Continue
                }
            }
            TickOutcome::Starved | TickOutcome::Busy => Flow::Continue,
        };
        self.publish();
        flow
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        if let SessionEvent::Message(message) = self.session.handle_event(event, self.buffer.len()) {
            self.on_server_message(message);
        }
        self.publish();
    }

    fn on_server_message(&mut self, message: ServerMessage) {
        if matches!(message, ServerMessage::Start { .. }) {
            self.resync_pending = false;
        }
        match self.buffer.receive(message) {
            Delivery::CaughtUp(catch_up) => {
                info!(
                    appended = catch_up.appended,
                    skipped = catch_up.skipped,
                    held = self.buffer.len(),
                    "game started"
                );
            }
            Delivery::Appended { turn_number } => trace!(turn = turn_number, "turn buffered"),
            Delivery::RejoinRequired => {
                warn!("turn received before start, rejoining");
                self.rejoin(0);
            }
            Delivery::Rejected(error) => {
                warn!(
                    expected = error.expected,
                    received = error.received,
                    "out-of-sequence turn dropped"
                );
                self.observer.sequence_error(&error);
                if !self.config.gap_policy.should_rejoin(&error) {
                    return;
                }
                if self.resync_pending {
                    debug!(received = error.received, "resync already requested");
                } else {
                    self.resync_pending = true;
                    self.rejoin(self.buffer.len());
                }
            }
        }
    }

    fn rejoin(&mut self, last_turn: u64) {
        self.status.rejoins += 1;
        if let Err(e) = self.session.join_game(last_turn) {
            warn!(error = %e, last_turn, "failed to send join");
        }
    }

    fn submit(&self, intent: Intent) {
        let kind = intent.kind();
        if let Err(e) = self.session.send_intent(intent) {
            warn!(error = %e, kind, "failed to submit intent");
        }
    }

    fn forward_log(&self, record: LogRecord) {
        if let Err(e) = self.session.send_log(record.severity, record.log) {
            trace!(error = %e, "dropped remote log record");
        }
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.session.leave_game() {
            debug!(error = %e, "leave not sent");
        }
        self.session.close();
        self.status.stopped = true;
        self.publish();
        info!(
            turn = self.scheduler.curr_turn(),
            held = self.buffer.len(),
            "runner stopped"
        );
    }

    fn report(&self) -> RunnerReport {
        let mut replay = Replay::new(self.setup.clone());
        let applied = usize::try_from(self.scheduler.curr_turn()).unwrap_or(usize::MAX);
        for turn in self.buffer.turns().iter().take(applied) {
            if let Err(e) = replay.record_turn(turn.clone()) {
                warn!(error = %e, "replay truncated");
                break;
            }
        }
        replay.finalize(self.status.state_hash);
        RunnerReport {
            status: self.status.clone(),
            replay,
        }
    }

    fn publish(&mut self) {
        self.status.curr_turn = self.scheduler.curr_turn();
        self.status.buffered_turns = self.buffer.len();
        self.status.processing = self.game.is_none();
        if let Some(game) = &self.game {
            self.status.sim_ticks = game.ticks();
            self.status.state_hash = game.state_hash();
        }
        self.status_tx.send_replace(self.status.clone());
    }
}

async fn wait_step<S>(
    step: &mut Option<JoinHandle<(S, StepReport)>>,
) -> Result<(S, StepReport), JoinError> {
    match step {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn next_record(records: &mut Option<mpsc::UnboundedReceiver<LogRecord>>) -> Option<LogRecord> {
    match records {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
