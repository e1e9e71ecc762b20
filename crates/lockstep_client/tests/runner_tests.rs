//! End-to-end tests for the runner over a loopback transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lockstep_client::prelude::*;
use lockstep_core::error::SimulationError;
use lockstep_core::execution::Execution;
use lockstep_core::replay::ReplayPlayer;
use lockstep_core::scheduler::{CrashPolicy, GapPolicy, RunnerObserver};
use lockstep_core::schema::{ClientId, ClientMessage, GameId, Intent, LogSeverity, ServerMessage, Turn};
use lockstep_core::simulation::{Simulate, SimulationConfig, TickEvents};
use lockstep_core::terrain::{MapParams, TerrainMap};
use lockstep_test_utils::determinism::run_turns;
use lockstep_test_utils::fixtures::{self, RecordingObserver};
use tokio::sync::mpsc;
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Same map and rules as `fixtures::small_setup`.
fn config() -> ClientConfig {
    ClientConfig {
        runner: RunnerConfig {
            map: MapParams {
                width: 7,
                height: 40,
                seed: 11,
            },
            simulation: SimulationConfig {
                spawn_radius: 1,
                ..SimulationConfig::default()
            },
            ..RunnerConfig::default()
        },
        lobby: LobbyConfig {
            client_id: ClientId::new("c1"),
            game_id: GameId::new("g1"),
            ..LobbyConfig::default()
        },
    }
}

fn game_id() -> GameId {
    GameId::new("g1")
}

fn start(count: u64) -> ServerMessage {
    ServerMessage::Start {
        turns: fixtures::empty_turns(count, &game_id()),
        config: None,
    }
}

async fn expect_message(server: &mut LoopbackServer) -> ClientMessage {
    timeout(TIMEOUT, server.recv())
        .await
        .expect("timed out waiting for client message")
        .expect("client transport dropped")
}

async fn expect_join(server: &mut LoopbackServer) -> u64 {
    match expect_message(server).await {
        ClientMessage::Join { last_turn, .. } => last_turn,
        other => panic!("expected join, got {other:?}"),
    }
}

async fn wait(
    handle: &mut RunnerHandle,
    predicate: impl FnMut(&RunnerStatus) -> bool,
) -> RunnerStatus {
    timeout(TIMEOUT, handle.wait_for(predicate))
        .await
        .expect("timed out waiting for runner status")
        .expect("runner exited early")
}

async fn started_game(
    config: ClientConfig,
    observer: Arc<RecordingObserver>,
) -> (RunnerHandle, LoopbackServer) {
    let (transport, mut server) = loopback();
    let runner = create_client_game(config, transport, observer)
        .await
        .expect("runner created");
    let handle = runner.start().expect("runner started");
    assert_eq!(expect_join(&mut server).await, 0);
    (handle, server)
}

async fn ready_worker(config: &ClientConfig) -> ReadyWorker {
    let map = Arc::new(TerrainMap::generate(config.runner.map));
    WorkerClient::spawn(map).initialize().await.unwrap()
}

#[tokio::test]
async fn test_scenario_start_applies_three_turns() {
    let observer = Arc::new(RecordingObserver::default());
    let (mut handle, mut server) = started_game(config(), observer.clone()).await;

    server.push(&start(3)).unwrap();
    let status = wait(&mut handle, |s| s.curr_turn == 3 && !s.processing).await;
    assert_eq!(status.sim_ticks, 3);
    assert_eq!(status.buffered_turns, 3);
    assert_eq!(status.crashes, 0);

    let report = handle.stop().await.unwrap();
    assert!(report.status.stopped);
    assert_eq!(report.replay.turn_count(), 3);
    assert!(matches!(
        expect_message(&mut server).await,
        ClientMessage::Leave { .. }
    ));
    assert!(observer.crashes().is_empty());
}

#[tokio::test]
async fn test_scenario_gap_triggers_resync() {
    let observer = Arc::new(RecordingObserver::default());
    let (mut handle, mut server) = started_game(config(), observer.clone()).await;

    server.push(&start(3)).unwrap();
    wait(&mut handle, |s| s.buffered_turns == 3).await;

    server
        .push(&ServerMessage::Turn {
            turn: Turn::empty(5, game_id()),
        })
        .unwrap();
    assert_eq!(expect_join(&mut server).await, 3);

    let status = wait(&mut handle, |s| s.rejoins == 1).await;
    assert_eq!(status.buffered_turns, 3);
    let errors = observer.sequence_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!((errors[0].expected, errors[0].received), (3, 5));

    // The server answers the rejoin with the missing range.
    server
        .push(&ServerMessage::Start {
            turns: fixtures::empty_turns(6, &game_id()),
            config: None,
        })
        .unwrap();
    wait(&mut handle, |s| s.curr_turn == 6).await;
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_gap_burst_sends_one_join() {
    let observer = Arc::new(RecordingObserver::default());
    let (mut handle, mut server) = started_game(config(), observer.clone()).await;

    server.push(&start(3)).unwrap();
    wait(&mut handle, |s| s.buffered_turns == 3).await;

    for n in 5..9 {
        server
            .push(&ServerMessage::Turn {
                turn: Turn::empty(n, game_id()),
            })
            .unwrap();
    }
    assert_eq!(expect_join(&mut server).await, 3);
    timeout(TIMEOUT, async {
        while observer.sequence_errors().len() < 4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(handle.status().rejoins, 1);
    assert!(server.try_recv().is_none());

    // Once the catch-up lands, a new gap asks again.
    server
        .push(&ServerMessage::Start {
            turns: fixtures::empty_turns(9, &game_id()),
            config: None,
        })
        .unwrap();
    wait(&mut handle, |s| s.buffered_turns == 9).await;
    server
        .push(&ServerMessage::Turn {
            turn: Turn::empty(12, game_id()),
        })
        .unwrap();
    assert_eq!(expect_join(&mut server).await, 9);
    wait(&mut handle, |s| s.rejoins == 2).await;
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_scenario_gap_dropped_without_rejoin() {
    let mut config = config();
    config.runner.gap_policy = GapPolicy::Drop;
    let observer = Arc::new(RecordingObserver::default());
    let (mut handle, mut server) = started_game(config, observer.clone()).await;

    server.push(&start(3)).unwrap();
    server
        .push(&ServerMessage::Turn {
            turn: Turn::empty(5, game_id()),
        })
        .unwrap();
    server
        .push(&ServerMessage::Turn {
            turn: Turn::empty(3, game_id()),
        })
        .unwrap();

    let status = wait(&mut handle, |s| s.buffered_turns == 4).await;
    assert_eq!(status.rejoins, 0);
    assert_eq!(observer.sequence_errors().len(), 1);
    assert!(server.try_recv().is_none());
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_scenario_turn_before_start_rejoins_from_zero() {
    let observer = Arc::new(RecordingObserver::default());
    let (mut handle, mut server) = started_game(config(), observer).await;

    server
        .push(&ServerMessage::Turn {
            turn: Turn::empty(0, game_id()),
        })
        .unwrap();
    assert_eq!(expect_join(&mut server).await, 0);

    let status = wait(&mut handle, |s| s.rejoins == 1).await;
    assert_eq!(status.buffered_turns, 0);
    assert_eq!(status.curr_turn, 0);
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_payloads_are_dropped() {
    let observer = Arc::new(RecordingObserver::default());
    let (mut handle, mut server) = started_game(config(), observer).await;

    server.push_raw("not json").unwrap();
    server.push_raw(r#"{"type":"turn"}"#).unwrap();
    server
        .push_raw(r#"{"type":"start","turns":[{"turnNumber":"zero","gameID":"g1","intents":[]}]}"#)
        .unwrap();
    server.push(&start(2)).unwrap();

    let status = wait(&mut handle, |s| s.curr_turn == 2).await;
    assert_eq!(status.buffered_turns, 2);
    assert_eq!(status.crashes, 0);
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_rejoins_with_held_turns() {
    let observer = Arc::new(RecordingObserver::default());
    let (mut handle, mut server) = started_game(config(), observer).await;

    server.push(&start(4)).unwrap();
    wait(&mut handle, |s| s.buffered_turns == 4).await;

    server.drop_connection("network change").unwrap();
    server.reconnect().unwrap();
    assert_eq!(expect_join(&mut server).await, 4);
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_worker_failure_blocks_start() {
    let mut config = config();
    config.runner.map = MapParams {
        width: 2,
        height: 2,
        seed: 0,
    };
    let (transport, mut server) = loopback();
    let result = create_client_game(config, transport, Arc::new(RecordingObserver::default())).await;

    assert!(matches!(
        result,
        Err(RunnerError::Worker(WorkerError::Init(_)))
    ));
    assert!(!server.is_open());
    assert!(server.try_recv().is_none());
}

#[tokio::test]
async fn test_invalid_map_blocks_start() {
    let mut config = config();
    config.runner.map.width = 0;
    let (transport, server) = loopback();
    let result = create_client_game(config, transport, Arc::new(RecordingObserver::default())).await;

    assert!(matches!(
        result,
        Err(RunnerError::Config(ConfigError::Invalid(_)))
    ));
    assert!(!server.is_open());
}

#[tokio::test]
async fn test_runner_replay_verifies() {
    let observer = Arc::new(RecordingObserver::default());
    let (mut handle, mut server) = started_game(config(), observer).await;

    let turns = fixtures::skirmish_turns(&game_id());
    server
        .push(&ServerMessage::Start {
            turns: turns.clone(),
            config: None,
        })
        .unwrap();
    let status = wait(&mut handle, |s| s.curr_turn == 6 && !s.processing).await;

    let expected = run_turns(&config().game_setup(), &turns).state_hash();
    assert_eq!(status.state_hash, expected);

    let report = handle.stop().await.unwrap();
    let mut player = ReplayPlayer::new(report.replay).unwrap();
    player.verify().unwrap();
}

#[tokio::test]
async fn test_two_clients_reach_same_state() {
    let turns = fixtures::skirmish_turns(&game_id());
    let mut hashes = Vec::new();
    for client in ["c1", "c2"] {
        let mut config = config();
        config.lobby.client_id = ClientId::new(client);
        let (mut handle, server) =
            started_game(config, Arc::new(RecordingObserver::default())).await;
        server
            .push(&ServerMessage::Start {
                turns: turns.clone(),
                config: None,
            })
            .unwrap();
        let status = wait(&mut handle, |s| s.curr_turn == 6 && !s.processing).await;
        hashes.push(status.state_hash);
        handle.stop().await.unwrap();
    }
    assert_eq!(hashes[0], hashes[1]);
}

#[tokio::test]
async fn test_relay_session_with_submitted_intent() {
    let config = config();
    let (transport, server) = loopback();
    let relay = LocalRelay::new(server, game_id(), Duration::from_millis(10))
        .with_turn_limit(30)
        .with_script(vec![vec![fixtures::spawn("c1", "c1", 3, 10)]]);
    let relay_task = tokio::spawn(relay.run());

    let runner = create_client_game(config, transport, Arc::new(RecordingObserver::default()))
        .await
        .unwrap();
    let mut handle = runner.start().unwrap();
    wait(&mut handle, |s| s.curr_turn >= 1).await;
    handle
        .submit_intent(fixtures::update_name("c1", "Renamed"))
        .unwrap();
    wait(&mut handle, |s| s.curr_turn == 30 && !s.processing).await;

    let report = handle.stop().await.unwrap();
    let turns = timeout(TIMEOUT, relay_task).await.unwrap().unwrap();
    assert_eq!(turns.len(), 30);
    assert!(turns
        .iter()
        .flat_map(|t| &t.intents)
        .any(|i| matches!(i, Intent::UpdateName(u) if u.name == "Renamed")));

    let mut player = ReplayPlayer::new(report.replay).unwrap();
    player.verify().unwrap();
    let renamed = player
        .game()
        .player(&lockstep_core::schema::PlayerId::new("c1"))
        .expect("spawned");
    assert_eq!(renamed.name, "Renamed");
}

#[tokio::test]
async fn test_remote_log_records_forwarded() {
    let config = config();
    let (transport, mut server) = loopback();
    let worker = ready_worker(&config).await;
    let game = lockstep_core::simulation::Game::new(
        worker.map().as_ref().clone(),
        config.runner.simulation,
    );
    let (records_tx, records_rx) = mpsc::unbounded_channel();
    let runner = GameRunner::new(
        config,
        transport,
        game,
        worker,
        Arc::new(RecordingObserver::default()),
    )
    .with_remote_logs(records_rx);
    let handle = runner.start().unwrap();
    assert_eq!(expect_join(&mut server).await, 0);

    records_tx
        .send(LogRecord {
            severity: LogSeverity::Warn,
            log: "tick 4 took 120ms".to_string(),
        })
        .unwrap();
    match expect_message(&mut server).await {
        ClientMessage::Log {
            severity,
            log,
            client_id,
            ..
        } => {
            assert_eq!(severity, LogSeverity::Warn);
            assert_eq!(log, "tick 4 took 120ms");
            assert_eq!(client_id, ClientId::new("c1"));
        }
        other => panic!("expected log, got {other:?}"),
    }
    handle.stop().await.unwrap();
}

// ============================================================================
// Custom simulations
// ============================================================================

/// Sleeps through every step and records overlapping steps.
struct Sluggish {
    ticks: u64,
    delay: Duration,
    in_step: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
}

impl Simulate for Sluggish {
    fn add_executions(&mut self, _executions: Vec<Execution>) {}

    fn execute_next_tick(&mut self) -> std::result::Result<TickEvents, SimulationError> {
        if self.in_step.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        thread::sleep(self.delay);
        self.in_step.store(false, Ordering::SeqCst);
        self.ticks += 1;
        Ok(TickEvents::default())
    }

    fn ticks(&self) -> u64 {
        self.ticks
    }

    fn state_hash(&self) -> u64 {
        self.ticks
    }
}

/// Fails on one tick, succeeds otherwise.
struct Faulty {
    ticks: u64,
    fail_on: u64,
}

impl Simulate for Faulty {
    fn add_executions(&mut self, _executions: Vec<Execution>) {}

    fn execute_next_tick(&mut self) -> std::result::Result<TickEvents, SimulationError> {
        let tick = self.ticks;
        self.ticks += 1;
        if tick == self.fail_on {
            return Err(SimulationError::InvariantViolated {
                tick,
                message: "owner table out of sync".to_string(),
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

async fn start_custom<S: Simulate>(
    config: ClientConfig,
    game: S,
    observer: Arc<dyn RunnerObserver>,
) -> (RunnerHandle, LoopbackServer) {
    let (transport, mut server) = loopback();
    let worker = ready_worker(&config).await;
    let handle = GameRunner::new(config, transport, game, worker, observer)
        .start()
        .unwrap();
    assert_eq!(expect_join(&mut server).await, 0);
    (handle, server)
}

#[tokio::test]
async fn test_slow_step_never_overlaps() {
    let mut config = config();
    config.runner.tick_period_ms = 5;
    config.runner.slow_tick_threshold_ms = 20;
    let overlaps = Arc::new(AtomicUsize::new(0));
    let sim = Sluggish {
        ticks: 0,
        delay: Duration::from_millis(40),
        in_step: Arc::new(AtomicBool::new(false)),
        overlaps: Arc::clone(&overlaps),
    };
    let observer = Arc::new(RecordingObserver::default());
    let (mut handle, server) = start_custom(config, sim, observer.clone()).await;

    server.push(&start(4)).unwrap();
    let status = wait(&mut handle, |s| s.curr_turn == 4 && !s.processing).await;

    assert_eq!(status.sim_ticks, 4);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert!(status.busy_skips > 0, "timer never fired during a step");
    let slow = observer.slow_ticks();
    assert_eq!(slow.len(), 4);
    assert_eq!(
        slow.iter().map(|s| s.turn_number).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_step_continues_by_default() {
    let observer = Arc::new(RecordingObserver::default());
    let (mut handle, server) =
        start_custom(config(), Faulty { ticks: 0, fail_on: 1 }, observer.clone()).await;

    server.push(&start(3)).unwrap();
    let status = wait(&mut handle, |s| s.curr_turn == 3 && !s.processing).await;

    assert_eq!(status.crashes, 1);
    assert_eq!(status.sim_ticks, 3);
    let crashes = observer.crashes();
    assert_eq!(crashes.len(), 1);
    assert_eq!(crashes[0].turn_number, 1);
    let message = crashes[0].message();
    assert!(message.starts_with("Game crashed! client id: c1, game id: g1"));
    assert!(message.contains("owner table out of sync"));
    assert!(!handle.is_finished());
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_step_halts_when_configured() {
    let mut config = config();
    config.runner.crash_policy = CrashPolicy::Halt;
    let observer = Arc::new(RecordingObserver::default());
    let (mut handle, mut server) =
        start_custom(config, Faulty { ticks: 0, fail_on: 1 }, observer.clone()).await;

    server.push(&start(5)).unwrap();
    let status = wait(&mut handle, |s| s.stopped).await;

    // The failed turn still counts as consumed.
    assert_eq!(status.curr_turn, 2);
    assert_eq!(status.crashes, 1);
    assert!(matches!(
        expect_message(&mut server).await,
        ClientMessage::Leave { .. }
    ));
    let report = handle.join().await.unwrap();
    assert_eq!(report.replay.turn_count(), 2);
    assert_eq!(observer.crashes().len(), 1);
}
