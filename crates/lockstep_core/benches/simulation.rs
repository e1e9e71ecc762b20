//! Step throughput benchmarks for lockstep_core.
//!
//! Run with: `cargo bench -p lockstep_core`

// Benchmark binaries don't need docs on macro-generated functions
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use lockstep_core::prelude::*;
use lockstep_core::schema::AttackIntent;

fn attack_turn(turn_number: u64, game_id: &GameId, attackers: &[PlayerId]) -> Turn {
    let intents = attackers
        .iter()
        .map(|attacker| {
            Intent::Attack(AttackIntent {
                client_id: ClientId::new("bench"),
                attacker_id: attacker.clone(),
                target_id: None,
                troops: 20,
                source_x: None,
                source_y: None,
                target_x: None,
                target_y: None,
            })
        })
        .collect();
    Turn::new(turn_number, game_id.clone(), intents)
}

/// Executor conversion plus one step on a populated 128x128 map.
pub fn simulation_benchmark(c: &mut Criterion) {
    let setup = GameSetup {
        map: MapParams {
            width: 128,
            height: 128,
            seed: 3,
        },
        num_bots: 16,
        ..GameSetup::new(GameId::new("bench"))
    };
    let (mut game, executor) = setup.build().expect("valid game setup");
    // Apply the bot spawns so attacks have owners.
    let _ = game.execute_next_tick();

    let attackers: Vec<PlayerId> = game.players().iter().map(|p| p.id.clone()).collect();
    let turn = attack_turn(1, &setup.game_id, &attackers);

    c.bench_function("create_executions", |b| {
        b.iter(|| black_box(executor.create_executions(black_box(&turn))))
    });

    c.bench_function("step_with_attacks", |b| {
        b.iter_batched(
            || game.clone(),
            |mut g| {
                g.add_executions(executor.create_executions(&turn));
                black_box(g.execute_next_tick())
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("empty_step", |b| {
        b.iter_batched(
            || game.clone(),
            |mut g| black_box(g.execute_next_tick()),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, simulation_benchmark);
criterion_main!(benches);
