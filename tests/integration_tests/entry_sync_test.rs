//! Mention polling and entry validation against scripted feed and ledger

use std::sync::Arc;

use chrono::Utc;
use roundkeeper::feed::poller::POLLER_LOCK;
use roundkeeper::feed::{
    EntrySync, EntryValidator, MentionPoller, MENTIONS_BUCKET, TWEET_LOOKUP_BUCKET,
};
use roundkeeper::ledger::encoding::encode;
use roundkeeper::lifecycle::TickAction;
use roundkeeper::limiter::RateLimiter;
use roundkeeper::lock::LockManager;
use roundkeeper::storage::{EntryStore, MemoryStore, StateStore, MENTIONS_SINCE_KEY};

use crate::common::{coordinator, verified_entry, FakeFeed, FakeLedger, WALLET_A, WALLET_B};

const NOW: i64 = 1_700_000_000;

struct Fixture {
    feed: Arc<FakeFeed>,
    ledger: Arc<FakeLedger>,
    store: Arc<MemoryStore>,
    locks: LockManager,
    sync: EntrySync,
}

fn fixture() -> Fixture {
    let feed = FakeFeed::new();
    let ledger = FakeLedger::new();
    let store = Arc::new(MemoryStore::new());
    let locks = LockManager::in_memory();
    let limiter = Arc::new(
        RateLimiter::new()
            .with_bucket(MENTIONS_BUCKET, 10.0, 10.0)
            .unwrap()
            .with_bucket(TWEET_LOOKUP_BUCKET, 50.0, 50.0)
            .unwrap(),
    );

    let poller = Arc::new(MentionPoller::new(
        feed.clone(),
        store.clone(),
        limiter.clone(),
        locks.clone(),
    ));
    let validator = Arc::new(EntryValidator::new(
        feed.clone(),
        ledger.clone(),
        store.clone(),
        limiter,
        locks.clone(),
    ));

    Fixture {
        feed,
        ledger,
        store,
        locks,
        sync: EntrySync::new(poller, validator),
    }
}

#[tokio::test]
async fn test_poll_ingests_and_advances_since_id() {
    let f = fixture();
    f.feed.mention("100", &format!("count me in {WALLET_A} #1 #2"));
    f.feed.mention("101", "gm, no entry here");
    f.feed.mention("102", &format!("{WALLET_B} #3"));

    let report = f.sync.poller().poll().await.unwrap().unwrap();
    assert_eq!(report.fetched, 3);
    assert_eq!(report.inserted, 3);
    assert_eq!(report.ignored, 1);
    assert_eq!(report.since_id.as_deref(), Some("102"));
    assert_eq!(
        f.store.get(MENTIONS_SINCE_KEY).await.unwrap().as_deref(),
        Some("102")
    );

    let entries = f.store.all_entries().await;
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| !e.verified && !e.is_pushed()));

    // The second poll asks only for newer mentions
    let again = f.sync.poller().poll().await.unwrap().unwrap();
    assert_eq!(again.fetched, 0);
    assert_eq!(again.since_id.as_deref(), Some("102"));
    assert_eq!(
        f.feed.fetches.lock().unwrap().as_slice(),
        &[None, Some("102".to_string())]
    );
}

#[tokio::test]
async fn test_poll_reprocessing_is_harmless() {
    let f = fixture();
    f.feed.mention("100", &format!("{WALLET_A} #1"));
    f.sync.poller().poll().await.unwrap();

    // High-water mark lost, e.g. a crash before it was written
    f.store.set(MENTIONS_SINCE_KEY, "99").await.unwrap();
    let report = f.sync.poller().poll().await.unwrap().unwrap();

    assert_eq!(report.inserted, 0);
    assert_eq!(report.duplicates, 1);
    assert_eq!(f.store.all_entries().await.len(), 1);
}

#[tokio::test]
async fn test_poll_skips_when_lock_held() {
    let f = fixture();
    f.feed.mention("100", &format!("{WALLET_A} #1"));

    let mut held = f.locks.lock(POLLER_LOCK);
    assert!(held.acquire(std::time::Duration::from_secs(1)).await.unwrap());

    assert!(f.sync.poller().poll().await.unwrap().is_none());
    assert!(f.store.all_entries().await.is_empty());

    held.release().await.unwrap();
    assert!(f.sync.poller().poll().await.unwrap().is_some());
}

#[tokio::test]
async fn test_validation_checks_sources_and_ownership() {
    let f = fixture();
    f.feed.mention("100", &format!("{WALLET_A} #1 #2"));
    f.feed.mention("102", &format!("{WALLET_B} #3"));
    f.sync.poller().poll().await.unwrap();

    // Ownership comparison ignores case
    f.ledger.set_owner(1, &WALLET_A.to_lowercase());
    f.ledger.set_owner(2, WALLET_B);
    f.ledger.set_owner(3, WALLET_B);
    f.feed.delete("102");

    let report = f.sync.validator().validate().await.unwrap().unwrap();
    assert_eq!(report.sources_checked, 2);
    assert_eq!(report.sources_removed, 1);
    assert_eq!(report.entries_purged, 1);
    assert_eq!(report.newly_verified, 1);
    assert_eq!(report.unchanged, 1);

    let entries = f.store.all_entries().await;
    assert_eq!(entries.len(), 2);
    let verified: Vec<u128> = entries
        .iter()
        .filter(|e| e.verified)
        .map(|e| e.token_id)
        .collect();
    assert_eq!(verified, vec![1]);

    // Transfer away: the entry drops out of the pool
    f.ledger.set_owner(1, WALLET_B);
    let report = f.sync.validator().validate().await.unwrap().unwrap();
    assert_eq!(report.newly_unverified, 1);
    assert_eq!(f.store.count_eligible().await.unwrap(), 0);
}

#[tokio::test]
async fn test_validation_leaves_pushed_entries_alone() {
    let f = fixture();
    let id = verified_entry(&f.store, WALLET_A, 5, "200").await;
    f.store
        .mark_pushed(&[id], 1, "0xabc", Utc::now())
        .await
        .unwrap();
    f.ledger.set_owner(5, WALLET_B);

    let report = f.sync.validator().validate().await.unwrap().unwrap();
    assert_eq!(report.sources_checked, 0);

    let entry = &f.store.all_entries().await[0];
    assert!(entry.verified);
    assert_eq!(entry.pushed_round, Some(1));
}

#[tokio::test]
async fn test_freeze_refreshes_pool_first() {
    let f = fixture();
    f.feed.mention("300", &format!("last minute {WALLET_B} #8"));
    f.ledger.set_owner(8, WALLET_B);
    f.ledger.add_round(NOW - 3_600, NOW + 120);

    let c = coordinator(&f.ledger, &f.store, &f.locks).with_sync(f.sync.clone());
    let report = c.tick_at(NOW).await.unwrap();

    assert!(matches!(report.action, TickAction::Frozen { snapshot_size: 1, .. }));
    let state = f.ledger.state();
    assert_eq!(state.pushes[0].1, vec![WALLET_B.to_lowercase()]);
    assert_eq!(state.pushes[0].2, vec![encode(8)]);
}

#[tokio::test]
async fn test_manual_sync_reports_both_halves() {
    let f = fixture();
    f.feed.mention("400", &format!("{WALLET_A} #11"));
    f.ledger.set_owner(11, WALLET_A);

    let c = coordinator(&f.ledger, &f.store, &f.locks).with_sync(f.sync.clone());
    let report = c.sync_entries().await.unwrap();

    assert_eq!(report.poll.unwrap().inserted, 1);
    assert_eq!(report.validation.unwrap().newly_verified, 1);
    assert_eq!(f.store.count_eligible().await.unwrap(), 1);
}
