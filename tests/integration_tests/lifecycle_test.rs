//! Lifecycle runs with several coordinators sharing one store, one lock
//! backend and one ledger

use std::sync::Arc;

use chrono::Utc;
use roundkeeper::ledger::encoding::encode;
use roundkeeper::ledger::logs::{ROUND_COMPLETED_NO_WINNER, WINNER_SELECTED};
use roundkeeper::lifecycle::{DrawOutcome, FreezeMarkers, LifecyclePhase, TickAction};
use roundkeeper::lock::LockManager;
use roundkeeper::models::NewEntry;
use roundkeeper::storage::{EntryStore, MemoryStore};
use serde_json::json;

use crate::common::{coordinator, verified_entry, FakeLedger, WALLET_A, WALLET_B};

const NOW: i64 = 1_700_000_000;
const DAY: i64 = 86_400;

fn is_frozen(action: &TickAction) -> bool {
    matches!(action, TickAction::Frozen { .. })
}

#[tokio::test]
async fn test_full_round_cycle_across_instances() {
    let ledger = FakeLedger::new();
    let store = Arc::new(MemoryStore::new());
    let locks = LockManager::in_memory();
    let a = coordinator(&ledger, &store, &locks);
    let b = coordinator(&ledger, &store, &locks);

    verified_entry(&store, WALLET_A, 5, "100").await;
    verified_entry(&store, WALLET_B, 3, "101").await;

    // Creation
    let created = a.tick_at(NOW).await.unwrap();
    assert!(matches!(created.action, TickAction::RoundCreated { round: 1, .. }));
    let active = b.tick_at(NOW).await.unwrap();
    assert_eq!(active.phase, LifecyclePhase::Active);
    assert_eq!(ledger.state().rounds.len(), 1);

    let end = NOW + DAY;

    // Both instances tick inside the freeze window at the same moment
    let (ra, rb) = tokio::join!(a.tick_at(end - 100), b.tick_at(end - 100));
    let actions = [ra.unwrap().action, rb.unwrap().action];
    assert_eq!(actions.iter().filter(|a| is_frozen(a)).count(), 1);
    assert!(actions.iter().all(|a| is_frozen(a)
        || matches!(a, TickAction::AlreadyFrozen { .. } | TickAction::LockBusy { .. })));

    {
        let state = ledger.state();
        assert_eq!(state.pushes.len(), 1);
        let (round, owners, tokens) = &state.pushes[0];
        assert_eq!(*round, 1);
        assert_eq!(owners, &vec![WALLET_A.to_lowercase(), WALLET_B.to_lowercase()]);
        assert_eq!(tokens, &vec![encode(5), encode(3)]);
    }

    // A late entry waits for the next round
    verified_entry(&store, WALLET_A, 9, "102").await;
    let again = b.tick_at(end - 50).await.unwrap();
    assert_eq!(again.action, TickAction::AlreadyFrozen { round: 1 });
    assert_eq!(ledger.state().pushes.len(), 1);

    // Settlement
    let waiting = a.tick_at(end + 1).await.unwrap();
    assert_eq!(waiting.phase, LifecyclePhase::AwaitingSettlement);
    ledger.emit(
        WINNER_SELECTED,
        json!({ "roundId": "1", "winner": WALLET_B, "tokenId": encode(3).to_string() }),
    );
    let settled = a.tick_at(end + 2).await.unwrap();
    assert!(matches!(settled.action, TickAction::Settled { .. }));

    let mirror = store.get_round(1).await.unwrap().unwrap();
    assert!(mirror.is_completed);
    assert_eq!(mirror.winning_token_id, Some(3));

    // The next round only carries the late entry
    let next = b.tick_at(end + 3).await.unwrap();
    assert_eq!(next.phase, LifecyclePhase::Completed);
    assert!(matches!(next.action, TickAction::RoundCreated { round: 2, .. }));

    let end2 = end + 3 + DAY;
    let frozen = a.tick_at(end2 - 100).await.unwrap();
    assert!(matches!(frozen.action, TickAction::Frozen { snapshot_size: 1, .. }));
    let state = ledger.state();
    assert_eq!(state.pushes[1].1, vec![WALLET_A.to_lowercase()]);
    assert_eq!(state.pushes[1].2, vec![encode(9)]);
}

#[tokio::test]
async fn test_freeze_survives_restart() {
    let ledger = FakeLedger::new();
    let store = Arc::new(MemoryStore::new());
    let locks = LockManager::in_memory();
    verified_entry(&store, WALLET_A, 1, "100").await;
    ledger.add_round(NOW - 3_600, NOW + 120);

    let first = coordinator(&ledger, &store, &locks);
    assert!(is_frozen(&first.tick_at(NOW).await.unwrap().action));
    drop(first);

    let restarted = coordinator(&ledger, &store, &locks);
    let report = restarted.tick_at(NOW + 30).await.unwrap();
    assert_eq!(report.action, TickAction::AlreadyFrozen { round: 1 });
    assert_eq!(ledger.state().pushes.len(), 1);
}

#[tokio::test]
async fn test_crash_before_markers_resubmits_same_set() {
    let ledger = FakeLedger::new();
    let store = Arc::new(MemoryStore::new());
    let locks = LockManager::in_memory();
    let e1 = verified_entry(&store, WALLET_A, 1, "100").await;
    let e2 = verified_entry(&store, WALLET_B, 2, "101").await;
    ledger.add_round(NOW - 3_600, NOW + 120);

    // Entries were marked, then the process died before the markers landed
    store
        .mark_pushed(&[e1, e2], 1, "0xfirst", Utc::now())
        .await
        .unwrap();

    let c = coordinator(&ledger, &store, &locks);
    let report = c.tick_at(NOW).await.unwrap();
    let TickAction::Frozen {
        snapshot_size,
        tx_hash: Some(tx_hash),
        ..
    } = report.action
    else {
        panic!("expected a freeze, got {:?}", report.action);
    };
    assert_eq!(snapshot_size, 2);

    let markers = FreezeMarkers::load(store.as_ref(), 1).await.unwrap();
    assert_eq!(markers.snapshot_tx, Some(tx_hash));

    // Existing pushed markers are never rewritten
    for entry in store.all_entries().await {
        assert_eq!(entry.pushed_tx_hash.as_deref(), Some("0xfirst"));
    }
}

#[tokio::test]
async fn test_snapshot_ignores_unverified_and_foreign_entries() {
    let ledger = FakeLedger::new();
    let store = Arc::new(MemoryStore::new());
    let locks = LockManager::in_memory();

    verified_entry(&store, WALLET_A, 1, "100").await;
    store
        .insert_entry(&NewEntry::new(WALLET_B, 2, "101"))
        .await
        .unwrap();
    let foreign = verified_entry(&store, WALLET_B, 3, "102").await;
    store
        .mark_pushed(&[foreign], 7, "0xother", Utc::now())
        .await
        .unwrap();

    ledger.add_round(NOW - 3_600, NOW + 120);
    let c = coordinator(&ledger, &store, &locks);
    let report = c.tick_at(NOW).await.unwrap();
    assert!(matches!(report.action, TickAction::Frozen { snapshot_size: 1, .. }));
    assert_eq!(ledger.state().pushes[0].2, vec![encode(1)]);
}

#[tokio::test]
async fn test_no_winner_completion_unblocks_creation() {
    let ledger = FakeLedger::new();
    let store = Arc::new(MemoryStore::new());
    let locks = LockManager::in_memory();
    ledger.add_round(NOW - DAY, NOW - 10);
    let c = coordinator(&ledger, &store, &locks);

    ledger.emit(ROUND_COMPLETED_NO_WINNER, json!({ "roundId": 1 }));
    let settled = c.tick_at(NOW).await.unwrap();
    assert!(matches!(settled.action, TickAction::Settled { .. }));
    assert_eq!(store.get_round(1).await.unwrap().unwrap().winner, None);

    verified_entry(&store, WALLET_A, 4, "200").await;
    let created = c.tick_at(NOW + 1).await.unwrap();
    assert!(matches!(created.action, TickAction::RoundCreated { round: 2, .. }));
}

#[tokio::test]
async fn test_draw_guarded_across_instances() {
    let ledger = FakeLedger::new();
    let store = Arc::new(MemoryStore::new());
    let locks = LockManager::in_memory();
    ledger.add_round(NOW - DAY, NOW - 1);

    let a = coordinator(&ledger, &store, &locks);
    let b = coordinator(&ledger, &store, &locks);

    let first = a.draw_winner_at(NOW).await.unwrap();
    assert!(matches!(first, DrawOutcome::Drawn { round: 1, .. }));
    let second = b.draw_winner_at(NOW).await.unwrap();
    assert!(matches!(second, DrawOutcome::AlreadyDrawn { round: 1, .. }));
    assert_eq!(ledger.state().draws, vec![1]);
}
