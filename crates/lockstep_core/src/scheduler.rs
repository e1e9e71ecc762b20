//! Fixed-period tick scheduling over the turn buffer.
//!
//! A tick either finds nothing to do (no new turn, or a step still in
//! flight) or consumes exactly one turn:
//!
//! 1. [`TickScheduler::begin`] reads `turns[curr_turn]`, turns it into
//!    executions and enters [`Phase::Processing`].
//! 2. [`run_step`] injects the executions and advances the simulation once,
//!    catching errors and panics and timing the step.
//! 3. [`TickScheduler::finish`] advances `curr_turn`, reports slow or failed
//!    steps, and returns to [`Phase::Idle`].
//!
//! The split lets an async caller run step 2 on another thread while timer
//! fires keep arriving; they see [`Phase::Processing`] and are skipped.
//! IO-free callers use [`TickScheduler::tick`], which does all three.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, trace, warn};

use crate::error::{SequenceError, SimulationError};
use crate::execution::{Execution, Executor};
use crate::schema::{ClientId, GameId};
use crate::simulation::{Simulate, TickEvents};
use crate::turn_buffer::TurnBuffer;

/// Default slow-step threshold.
pub const DEFAULT_SLOW_TICK_THRESHOLD: Duration = Duration::from_millis(100);

/// What to do when a live turn does not fit the next buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GapPolicy {
    /// On a gap, send a fresh `Join` with `last_turn = len` so the server
    /// retransmits the missing range. Stale duplicates are dropped.
    #[default]
    Resync,
    /// Report and drop every out-of-sequence turn.
    Drop,
}

impl GapPolicy {
    /// True if this error should trigger a rejoin.
    #[must_use]
    pub const fn should_rejoin(self, error: &SequenceError) -> bool {
        matches!(self, Self::Resync) && error.is_gap()
    }
}

/// What to do after a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CrashPolicy {
    /// Report the crash and keep ticking.
    #[default]
    Continue,
    /// Report the crash and stop the runner.
    Halt,
}

/// Scheduler tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Steps slower than this are reported.
    pub slow_tick_threshold: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slow_tick_threshold: DEFAULT_SLOW_TICK_THRESHOLD,
        }
    }
}

/// Reentrancy guard state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Ready to start a step.
    #[default]
    Idle,
    /// A step for this turn is in flight.
    Processing {
        /// Turn being applied.
        turn_number: u64,
    },
}

/// A turn ready to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnJob {
    /// Turn being applied.
    pub turn_number: u64,
    /// Executions derived from the turn, in intent order.
    pub executions: Vec<Execution>,
}

/// Result of [`TickScheduler::begin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickDecision {
    /// No turn at `curr_turn` yet.
    Starved,
    /// A step is already in flight.
    Busy,
    /// Apply this job, then call [`TickScheduler::finish`].
    Ready(TurnJob),
}

/// Outcome of one executed step.
#[derive(Debug)]
pub struct StepReport {
    /// Turn that was applied.
    pub turn_number: u64,
    /// Simulation tick before the step.
    pub sim_tick: u64,
    /// Wall time spent in the step.
    pub elapsed: Duration,
    /// Step result; panics are converted to [`SimulationError::Panicked`].
    pub result: Result<TickEvents, SimulationError>,
}

/// Result of a full tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// Nothing to apply.
    Starved,
    /// Skipped because a step was in flight.
    Busy,
    /// The turn was applied.
    Applied {
        /// Turn that was applied.
        turn_number: u64,
        /// Wall time spent in the step.
        elapsed: Duration,
        /// Simulation events.
        events: TickEvents,
    },
    /// The step failed; the turn still counts as consumed.
    Failed {
        /// Turn whose step failed.
        turn_number: u64,
        /// Failure.
        error: SimulationError,
    },
}

impl TickOutcome {
    /// True if a turn was consumed, successfully or not.
    #[must_use]
    pub const fn consumed_turn(&self) -> bool {
        matches!(self, Self::Applied { .. } | Self::Failed { .. })
    }
}

/// Performance warning for a step slower than the threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlowTick {
    /// Turn that was applied.
    pub turn_number: u64,
    /// Wall time spent.
    pub elapsed: Duration,
    /// Configured threshold.
    pub threshold: Duration,
}

/// User-facing report of a failed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashNotice {
    /// Local client.
    pub client_id: ClientId,
    /// Game being played.
    pub game_id: GameId,
    /// Turn whose step failed.
    pub turn_number: u64,
    /// Simulation tick at the start of the step.
    pub sim_tick: u64,
    /// Failure.
    pub error: SimulationError,
}

impl CrashNotice {
    /// Text to show the user, with enough context for a bug report.
    #[must_use]
    pub fn message(&self) -> String {
        format!(
            "Game crashed! client id: {}, game id: {}\n\
             Please paste the following in your bug report:\n\
             turn {} (tick {}): {}",
            self.client_id, self.game_id, self.turn_number, self.sim_tick, self.error
        )
    }
}

/// Receiver of runner-level notices.
///
/// Every notice is also logged through `tracing`; observers surface them to
/// the user or to tests.
pub trait RunnerObserver: Send + Sync {
    /// A step exceeded the slow-tick threshold.
    fn slow_tick(&self, _warning: &SlowTick) {}

    /// A step failed.
    fn crashed(&self, _notice: &CrashNotice) {}

    /// A live turn did not fit the buffer.
    fn sequence_error(&self, _error: &SequenceError) {}
}

/// Observer that relies on `tracing` output alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl RunnerObserver for NullObserver {}

/// Tick state machine for one client.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    client_id: ClientId,
    game_id: GameId,
    config: SchedulerConfig,
    curr_turn: u64,
    phase: Phase,
}

impl TickScheduler {
    /// Create a scheduler positioned at turn 0.
    #[must_use]
    pub fn new(client_id: ClientId, game_id: GameId, config: SchedulerConfig) -> Self {
        Self {
            client_id,
            game_id,
            config,
            curr_turn: 0,
            phase: Phase::Idle,
        }
    }

    /// Next turn to apply.
    #[must_use]
    pub const fn curr_turn(&self) -> u64 {
        self.curr_turn
    }

    /// Current guard state.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// True while a step is in flight.
    #[must_use]
    pub const fn is_processing(&self) -> bool {
        matches!(self.phase, Phase::Processing { .. })
    }

    /// Guarded read of the next turn.
    pub fn begin(&mut self, buffer: &TurnBuffer, executor: &Executor) -> TickDecision {
        if let Phase::Processing { turn_number } = self.phase {
            trace!(turn = turn_number, "tick skipped, step in flight");
            return TickDecision::Busy;
        }
        let Some(turn) = buffer.get(self.curr_turn) else {
            return TickDecision::Starved;
        };

        let executions = executor.create_executions(turn);
        self.phase = Phase::Processing {
            turn_number: self.curr_turn,
        };
        TickDecision::Ready(TurnJob {
            turn_number: self.curr_turn,
            executions,
        })
    }

    /// Record a finished step: advance past its turn and report.
    pub fn finish(&mut self, report: StepReport, observer: &dyn RunnerObserver) -> TickOutcome {
        if self.phase
            != (Phase::Processing {
                turn_number: report.turn_number,
            })
        {
            warn!(
                turn = report.turn_number,
                phase = ?self.phase,
                "step finished without a matching begin"
            );
        }
        self.curr_turn = report.turn_number + 1;
        self.phase = Phase::Idle;

        let threshold = self.config.slow_tick_threshold;
        if report.elapsed > threshold {
            let elapsed_ms = report.elapsed.as_millis();
            warn!(
                turn = report.turn_number,
                elapsed_ms,
                "tick {} took {}ms",
                report.turn_number,
                elapsed_ms
            );
            observer.slow_tick(&SlowTick {
                turn_number: report.turn_number,
                elapsed: report.elapsed,
                threshold,
            });
        }

        match report.result {
            Ok(events) => TickOutcome::Applied {
                turn_number: report.turn_number,
                elapsed: report.elapsed,
                events,
            },
            Err(error) => {
                let notice = CrashNotice {
                    client_id: self.client_id.clone(),
                    game_id: self.game_id.clone(),
                    turn_number: report.turn_number,
                    sim_tick: report.sim_tick,
                    error: error.clone(),
                };
                error!(
                    client = %notice.client_id,
                    game = %notice.game_id,
                    turn = notice.turn_number,
                    tick = notice.sim_tick,
                    %error,
                    "simulation step failed"
                );
                observer.crashed(&notice);
                TickOutcome::Failed {
                    turn_number: report.turn_number,
                    error,
                }
            }
        }
    }

    /// Run one full tick synchronously.
    pub fn tick<S: Simulate>(
        &mut self,
        buffer: &TurnBuffer,
        executor: &Executor,
        game: &mut S,
        observer: &dyn RunnerObserver,
    ) -> TickOutcome {
        match self.begin(buffer, executor) {
            TickDecision::Starved => TickOutcome::Starved,
            TickDecision::Busy => TickOutcome::Busy,
            TickDecision::Ready(job) => {
                let report = run_step(game, job);
                self.finish(report, observer)
            }
        }
    }
}

/// Inject a job's executions and advance the simulation one step.
///
/// Errors and panics from the simulation are captured in the report.
pub fn run_step<S: Simulate>(game: &mut S, job: TurnJob) -> StepReport {
    let sim_tick = game.ticks();
    let TurnJob {
        turn_number,
        executions,
    } = job;

    let start = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        game.add_executions(executions);
        game.execute_next_tick()
    }))
    .unwrap_or_else(|payload| Err(SimulationError::Panicked(panic_message(payload.as_ref()))));

    StepReport {
        turn_number,
        sim_tick,
        elapsed: start.elapsed(),
        result,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Turn;
    use crate::terrain::TerrainMap;
    use std::sync::{Arc, Mutex};

    /// Simulation stub that fails or panics on chosen ticks.
    #[derive(Default)]
    struct Scripted {
        ticks: u64,
        seen: Vec<usize>,
        fail_on: Option<u64>,
        panic_on: Option<u64>,
        sleep: Duration,
        pending: usize,
    }

    impl Simulate for Scripted {
        fn add_executions(&mut self, executions: Vec<Execution>) {
            self.pending += executions.len();
        }

        fn execute_next_tick(&mut self) -> Result<TickEvents, SimulationError> {
            let tick = self.ticks;
            self.ticks += 1;
            self.seen.push(std::mem::take(&mut self.pending));
            std::thread::sleep(self.sleep);
            if self.panic_on == Some(tick) {
                panic!("boom at {tick}");
            }
            if self.fail_on == Some(tick) {
                return Err(SimulationError::InvariantViolated {
                    tick,
                    message: "scripted".into(),
                });
            }
            Ok(TickEvents::default())
        }

        fn ticks(&self) -> u64 {
            self.ticks
        }

        fn state_hash(&self) -> u64 {
            self.ticks
        }
    }

    #[derive(Default)]
    struct Recording {
        slow: Mutex<Vec<SlowTick>>,
        crashes: Mutex<Vec<CrashNotice>>,
    }

    impl RunnerObserver for Recording {
        fn slow_tick(&self, warning: &SlowTick) {
            self.slow.lock().unwrap().push(warning.clone());
        }

        fn crashed(&self, notice: &CrashNotice) {
            self.crashes.lock().unwrap().push(notice.clone());
        }
    }

    fn setup(turns: u64) -> (TurnBuffer, Executor, TickScheduler) {
        let game_id = GameId::new("g");
        let mut buffer = TurnBuffer::new();
        buffer
            .append_catch_up((0..turns).map(|n| Turn::empty(n, game_id.clone())).collect())
            .unwrap();
        let executor = Executor::new(game_id.clone(), Arc::new(TerrainMap::new(4, 4)));
        let scheduler = TickScheduler::new(ClientId::new("c"), game_id, SchedulerConfig::default());
        (buffer, executor, scheduler)
    }

    #[test]
    fn test_starved_when_buffer_empty() {
        let (buffer, executor, mut scheduler) = setup(0);
        let mut sim = Scripted::default();
        let outcome = scheduler.tick(&buffer, &executor, &mut sim, &NullObserver);
        assert!(matches!(outcome, TickOutcome::Starved));
        assert_eq!(scheduler.curr_turn(), 0);
        assert_eq!(sim.ticks, 0);
    }

    #[test]
    fn test_applies_each_turn_once() {
        let (buffer, executor, mut scheduler) = setup(3);
        let mut sim = Scripted::default();
        for _ in 0..5 {
            scheduler.tick(&buffer, &executor, &mut sim, &NullObserver);
        }
        assert_eq!(scheduler.curr_turn(), 3);
        assert_eq!(sim.ticks, 3);
        assert_eq!(scheduler.phase(), Phase::Idle);
    }

    #[test]
    fn test_begin_while_processing_is_busy() {
        let (buffer, executor, mut scheduler) = setup(2);
        let TickDecision::Ready(job) = scheduler.begin(&buffer, &executor) else {
            panic!("expected a job");
        };
        assert!(scheduler.is_processing());
        assert_eq!(scheduler.begin(&buffer, &executor), TickDecision::Busy);
        assert_eq!(scheduler.curr_turn(), 0);

        let mut sim = Scripted::default();
        let report = run_step(&mut sim, job);
        let outcome = scheduler.finish(report, &NullObserver);
        assert!(outcome.consumed_turn());
        assert_eq!(scheduler.curr_turn(), 1);
        assert!(!scheduler.is_processing());
    }

    #[test]
    fn test_failed_step_still_advances() {
        let (buffer, executor, mut scheduler) = setup(3);
        let observer = Recording::default();
        let mut sim = Scripted {
            fail_on: Some(1),
            ..Scripted::default()
        };
        let outcomes: Vec<_> = (0..3)
            .map(|_| scheduler.tick(&buffer, &executor, &mut sim, &observer))
            .collect();
        assert!(matches!(outcomes[1], TickOutcome::Failed { turn_number: 1, .. }));
        assert!(matches!(outcomes[2], TickOutcome::Applied { turn_number: 2, .. }));
        assert_eq!(scheduler.curr_turn(), 3);

        let crashes = observer.crashes.lock().unwrap();
        assert_eq!(crashes.len(), 1);
        assert_eq!(crashes[0].turn_number, 1);
        assert!(crashes[0].message().contains("client id: c"));
    }

    #[test]
    fn test_panicking_step_is_caught() {
        let (buffer, executor, mut scheduler) = setup(2);
        let mut sim = Scripted {
            panic_on: Some(0),
            ..Scripted::default()
        };
        let outcome = scheduler.tick(&buffer, &executor, &mut sim, &NullObserver);
        let TickOutcome::Failed { error, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error, SimulationError::Panicked("boom at 0".into()));
        assert_eq!(scheduler.curr_turn(), 1);

        let outcome = scheduler.tick(&buffer, &executor, &mut sim, &NullObserver);
        assert!(matches!(outcome, TickOutcome::Applied { turn_number: 1, .. }));
    }

    #[test]
    fn test_slow_tick_reported() {
        let (buffer, executor, _) = setup(1);
        let mut scheduler = TickScheduler::new(
            ClientId::new("c"),
            GameId::new("g"),
            SchedulerConfig {
                slow_tick_threshold: Duration::from_millis(1),
            },
        );
        let observer = Recording::default();
        let mut sim = Scripted {
            sleep: Duration::from_millis(5),
            ..Scripted::default()
        };
        scheduler.tick(&buffer, &executor, &mut sim, &observer);
        let slow = observer.slow.lock().unwrap();
        assert_eq!(slow.len(), 1);
        assert_eq!(slow[0].turn_number, 0);
        assert!(slow[0].elapsed >= Duration::from_millis(5));
    }

    #[test]
    fn test_gap_policy() {
        let gap = SequenceError {
            expected: 3,
            received: 5,
        };
        let stale = SequenceError {
            expected: 3,
            received: 1,
        };
        assert!(GapPolicy::Resync.should_rejoin(&gap));
        assert!(!GapPolicy::Resync.should_rejoin(&stale));
        assert!(!GapPolicy::Drop.should_rejoin(&gap));
    }
}
