//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the same ordered turns, applied to
//! the same initial state, always produce the same simulation state.
//!
//! # Testing Strategy
//!
//! Lockstep only works if every client's step is a pure function of the
//! previous state and the injected executions. Sources of divergence include:
//!
//! - **Floating-point math**: troop arithmetic uses
//!   [`lockstep_core::math::Fixed`] instead.
//!
//! - **HashMap iteration order**: simulation state lives in ordered
//!   collections.
//!
//! - **System randomness**: bots and NPCs draw from a generator seeded by
//!   the game id.
//!
//! - **Turn handling**: a turn applied twice, skipped, or out of order
//!   diverges immediately; the turn buffer guards against this.

use std::thread;

use lockstep_core::execution::Executor;
use lockstep_core::scheduler::{NullObserver, SchedulerConfig, TickScheduler};
use lockstep_core::schema::{ClientId, Turn};
use lockstep_core::setup::GameSetup;
use lockstep_core::simulation::{Game, Simulate};
use lockstep_core::turn_buffer::TurnBuffer;
use tracing::{debug, warn};

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of turns applied per run.
    pub turns: u64,
}

impl DeterminismResult {
    fn from_hashes(hashes: Vec<u64>, turns: u64) -> Self {
        Self {
            is_deterministic: hashes.windows(2).all(|w| w[0] == w[1]),
            hashes,
            turns,
        }
    }

    /// All unique hashes (1 for a deterministic simulation).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that every run matched.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            panic!(
                "Simulation is non-deterministic!\n\
                 Runs: {}\n\
                 Turns: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.turns,
                self.unique_hashes().len(),
                self.hashes
            );
        }
    }
}

/// Run a simulation multiple times and verify determinism.
///
/// * `runs` - Number of times to run
/// * `steps` - Steps per run
/// * `setup` - Creates the initial state
/// * `step` - Advances the state by one step
/// * `hash` - Computes the state hash
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    steps: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S, u64),
    HashFn: Fn(&S) -> u64,
{
    let hashes = (0..runs)
        .map(|_| {
            let mut state = setup();
            for n in 0..steps {
                step(&mut state, n);
            }
            hash(&state)
        })
        .collect();
    DeterminismResult::from_hashes(hashes, steps)
}

/// Build the game for `setup` and apply `turns` through the tick scheduler,
/// exactly as a live client does.
///
/// # Panics
///
/// Panics if the setup is invalid, `turns` is not numbered contiguously
/// from 0, or a step fails.
#[must_use]
pub fn run_turns(setup: &GameSetup, turns: &[Turn]) -> Game {
    let (mut game, executor) = setup.build().expect("valid game setup");
    let mut buffer = TurnBuffer::new();
    buffer
        .append_catch_up(turns.to_vec())
        .expect("turns must be contiguous from 0");
    let mut scheduler = scheduler_for(setup);
    apply_all(&mut scheduler, &buffer, &executor, &mut game);
    game
}

fn scheduler_for(setup: &GameSetup) -> TickScheduler {
    TickScheduler::new(
        ClientId::new("determinism"),
        setup.game_id.clone(),
        SchedulerConfig::default(),
    )
}

fn apply_all(
    scheduler: &mut TickScheduler,
    buffer: &TurnBuffer,
    executor: &Executor,
    game: &mut Game,
) {
    while scheduler.curr_turn() < buffer.len() {
        let outcome = scheduler.tick(buffer, executor, game, &NullObserver);
        assert!(
            outcome.consumed_turn(),
            "turn {} was not consumed",
            scheduler.curr_turn()
        );
    }
}

/// Apply the same turns `runs` times and compare final hashes.
#[must_use]
pub fn verify_turn_determinism(setup: &GameSetup, turns: &[Turn], runs: usize) -> DeterminismResult {
    let hashes = (0..runs)
        .map(|_| run_turns(setup, turns).state_hash())
        .collect();
    DeterminismResult::from_hashes(hashes, turns.len() as u64)
}

/// Apply the same turns on `runs` threads at once and compare final hashes.
///
/// Catches divergence that only shows up under concurrent scheduling.
#[must_use]
pub fn verify_parallel_turn_determinism(
    setup: &GameSetup,
    turns: &[Turn],
    runs: usize,
) -> DeterminismResult {
    let hashes = thread::scope(|s| {
        let handles: Vec<_> = (0..runs)
            .map(|_| s.spawn(|| run_turns(setup, turns).state_hash()))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("simulation thread panicked"))
            .collect()
    });
    DeterminismResult::from_hashes(hashes, turns.len() as u64)
}

/// Apply two turn sequences side by side and return the first turn number
/// after which the state hashes differ.
///
/// Returns `None` if the shared prefix never diverges.
///
/// # Panics
///
/// Panics if the setup is invalid.
#[must_use]
pub fn find_first_divergence(setup: &GameSetup, left: &[Turn], right: &[Turn]) -> Option<u64> {
    let (mut game_a, executor_a) = setup.build().expect("valid game setup");
    let (mut game_b, executor_b) = setup.build().expect("valid game setup");
    if game_a.state_hash() != game_b.state_hash() {
        warn!("initial states differ");
        return Some(0);
    }

    for (a, b) in left.iter().zip(right) {
        game_a.add_executions(executor_a.create_executions(a));
        game_b.add_executions(executor_b.create_executions(b));
        let _ = game_a.execute_next_tick();
        let _ = game_b.execute_next_tick();
        let (hash_a, hash_b) = (game_a.state_hash(), game_b.state_hash());
        if hash_a != hash_b {
            warn!(
                turn = a.turn_number,
                left = format_args!("{hash_a:016x}"),
                right = format_args!("{hash_b:016x}"),
                "state hashes diverged"
            );
            return Some(a.turn_number);
        }
    }
    None
}

/// Verify that a bincode snapshot mid-game resumes to the same final state.
///
/// # Panics
///
/// Panics if the setup is invalid or `turns` is not contiguous from 0.
#[must_use]
pub fn verify_snapshot_determinism(setup: &GameSetup, turns: &[Turn], split: usize) -> bool {
    let split = split.min(turns.len());
    let expected = run_turns(setup, turns).state_hash();

    let (mut game, executor) = setup.build().expect("valid game setup");
    for turn in &turns[..split] {
        game.add_executions(executor.create_executions(turn));
        if game.execute_next_tick().is_err() {
            return false;
        }
    }

    let bytes = match game.serialize() {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, split, "snapshot failed");
            return false;
        }
    };
    let mut restored = match Game::deserialize(&bytes) {
        Ok(game) => game,
        Err(e) => {
            debug!(error = %e, split, "snapshot restore failed");
            return false;
        }
    };
    for turn in &turns[split..] {
        restored.add_executions(executor.create_executions(turn));
        if restored.execute_next_tick().is_err() {
            return false;
        }
    }
    let actual = restored.state_hash();
    if actual != expected {
        warn!(
            split,
            expected = format_args!("{expected:016x}"),
            actual = format_args!("{actual:016x}"),
            "restored snapshot diverged"
        );
    }
    actual == expected
}
