//! Proptest strategies for turn sequences.
//!
//! Intents draw from a small pool of clients and players so generated turns
//! actually interact (attacks hit spawned players, alliances pair up).

use proptest::prelude::*;

use lockstep_core::schema::{
    AllianceRequestIntent, AttackIntent, BoatAttackIntent, ClientId, GameId, Intent, PlayerId,
    PlayerType, SpawnIntent, Turn, UpdateNameIntent,
};

static POOL: [&str; 4] = ["a", "b", "c", "d"];

/// One of four pooled player ids.
pub fn arb_player_id() -> impl Strategy<Value = PlayerId> {
    prop::sample::select(&POOL[..]).prop_map(|p| PlayerId::new(format!("p-{p}")))
}

/// One of four pooled client ids.
pub fn arb_client_id() -> impl Strategy<Value = ClientId> {
    prop::sample::select(&POOL[..]).prop_map(|c| ClientId::new(format!("c-{c}")))
}

/// Coordinate on a map of up to 64 tiles per side, plus a little overshoot.
pub fn arb_coord() -> impl Strategy<Value = i32> {
    -2i32..66
}

fn arb_player_type() -> impl Strategy<Value = PlayerType> {
    prop_oneof![
        Just(PlayerType::Human),
        Just(PlayerType::Bot),
        Just(PlayerType::FakeHuman),
    ]
}

/// Any intent.
pub fn arb_intent() -> impl Strategy<Value = Intent> {
    prop_oneof![
        (
            arb_client_id(),
            arb_player_id(),
            proptest::option::of(arb_player_id()),
            0u32..2_000,
            proptest::option::of((arb_coord(), arb_coord())),
        )
            .prop_map(|(client_id, attacker_id, target_id, troops, source)| {
                Intent::Attack(AttackIntent {
                    client_id,
                    attacker_id,
                    target_id,
                    troops,
                    source_x: source.map(|s| s.0),
                    source_y: source.map(|s| s.1),
                    target_x: None,
                    target_y: None,
                })
            }),
        (
            arb_client_id(),
            arb_player_id(),
            arb_player_type(),
            arb_coord(),
            arb_coord()
        )
            .prop_map(|(client_id, player_id, player_type, x, y)| {
                Intent::Spawn(SpawnIntent {
                    client_id,
                    name: player_id.to_string(),
                    player_id,
                    player_type,
                    x,
                    y,
                })
            }),
        (
            arb_client_id(),
            arb_player_id(),
            proptest::option::of(arb_player_id()),
            0u32..2_000,
            arb_coord(),
            arb_coord(),
        )
            .prop_map(|(client_id, attacker_id, target_id, troops, x, y)| {
                Intent::BoatAttack(BoatAttackIntent {
                    client_id,
                    attacker_id,
                    target_id,
                    troops,
                    x,
                    y,
                })
            }),
        (arb_client_id(), "[a-zA-Z ]{0,32}").prop_map(|(client_id, name)| {
            Intent::UpdateName(UpdateNameIntent { client_id, name })
        }),
        (arb_client_id(), arb_player_id(), arb_player_id()).prop_map(
            |(client_id, requestor, recipient)| {
                Intent::AllianceRequest(AllianceRequestIntent {
                    client_id,
                    requestor,
                    recipient,
                })
            }
        ),
    ]
}

/// Turns numbered `0..len` for `game_id`, each with up to `max_intents`.
pub fn arb_turn_sequence(
    game_id: GameId,
    max_len: usize,
    max_intents: usize,
) -> impl Strategy<Value = Vec<Turn>> {
    prop::collection::vec(prop::collection::vec(arb_intent(), 0..=max_intents), 0..=max_len)
        .prop_map(move |batches| {
            batches
                .into_iter()
                .zip(0u64..)
                .map(|(intents, n)| Turn::new(n, game_id.clone(), intents))
                .collect()
        })
}

/// Arbitrary turn numbers as a misbehaving server might deliver them:
/// duplicates, gaps and reordering.
pub fn arb_delivery_order(max_turn: u64, max_len: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0..=max_turn, 0..=max_len)
}
