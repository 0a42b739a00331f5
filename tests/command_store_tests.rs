//! Integration tests for the durable command store
//!
//! Exercise claiming, releasing, deleting and stale-lock reclaim directly
//! against temporary sled databases, including the concurrent-claimer
//! exclusivity the rest of the queue is built on.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use sledbox::{CommandRecord, CommandStore};
use std::collections::HashSet;
use std::time::Duration;

fn open_store(max_attempts: u32) -> (sled::Db, CommandStore) {
    let db = sled::Config::new()
        .temporary(true)
        .open()
        .expect("Failed to open temporary database");
    let store = CommandStore::new(&db, max_attempts).expect("Failed to open command store");
    (db, store)
}

fn sample_record(command: &str) -> CommandRecord {
    CommandRecord::new(command, &json!({"case_id": "case-1"}))
}

#[test]
fn test_create_and_get_round_trip() {
    let (_db, store) = open_store(5);
    assert!(store.is_empty());

    let record = sample_record("notifyDownstream");
    store.create(&record).unwrap();

    assert_eq!(store.len(), 1);
    let loaded = store.get(&record.id).unwrap().expect("record should exist");
    assert_eq!(loaded, record);
    assert_eq!(store.all_commands().unwrap(), vec![record]);

    assert!(store.get("no-such-id").unwrap().is_none());
}

#[test]
fn test_claim_batch_stamps_locks_and_respects_max_count() {
    let (_db, store) = open_store(5);
    for _ in 0..5 {
        store.create(&sample_record("notifyDownstream")).unwrap();
    }

    assert!(store.claim_batch(0).unwrap().is_empty());

    let claimed = store.claim_batch(3).unwrap();
    assert_eq!(claimed.len(), 3);
    for record in &claimed {
        assert!(record.locked.is_some(), "claimed records carry a lock stamp");
        let stored = store.get(&record.id).unwrap().unwrap();
        assert_eq!(stored.locked, record.locked, "the lock stamp is persisted");
    }

    // the three locked records are invisible to the next claimer
    let second = store.claim_batch(10).unwrap();
    assert_eq!(second.len(), 2);
    let first_ids: HashSet<_> = claimed.iter().map(|r| r.id.clone()).collect();
    assert!(second.iter().all(|r| !first_ids.contains(&r.id)));
}

#[test]
fn test_claim_batch_skips_locked_and_exhausted_records() {
    let (_db, store) = open_store(3);

    let eligible = sample_record("notifyDownstream");
    store.create(&eligible).unwrap();

    let mut locked = sample_record("notifyDownstream");
    locked.locked = Some(Utc::now());
    store.create(&locked).unwrap();

    let mut exhausted = sample_record("notifyDownstream");
    exhausted.attempts = 3;
    store.create(&exhausted).unwrap();

    let claimed = store.claim_batch(10).unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, eligible.id);

    // the dead-lettered record is still there for inspection
    let stored = store.get(&exhausted.id).unwrap().unwrap();
    assert_eq!(stored.attempts, 3);
    assert!(stored.locked.is_none());
}

#[test]
fn test_claim_one_only_succeeds_while_eligible() {
    let (_db, store) = open_store(5);
    assert!(store.claim_one("missing").unwrap().is_none());

    let record = sample_record("notifyDownstream");
    store.create(&record).unwrap();

    let claimed = store
        .claim_one(&record.id)
        .unwrap()
        .expect("first claim should win");
    assert!(claimed.locked.is_some());

    // already locked, a second claim loses
    assert!(store.claim_one(&record.id).unwrap().is_none());

    store.release(&record.id).unwrap();
    assert!(store.claim_one(&record.id).unwrap().is_some());
}

#[test]
fn test_claim_one_refuses_exhausted_records() {
    let (_db, store) = open_store(2);
    let mut record = sample_record("notifyDownstream");
    record.attempts = 2;
    store.create(&record).unwrap();

    assert!(store.claim_one(&record.id).unwrap().is_none());
}

#[test]
fn test_release_unlocks_and_counts_the_failed_attempt() {
    let (_db, store) = open_store(5);
    let record = sample_record("notifyDownstream");
    store.create(&record).unwrap();

    for expected_attempts in 1..=3 {
        let claimed = store.claim_one(&record.id).unwrap().expect("claimable");
        assert!(claimed.locked.is_some());

        store.release(&record.id).unwrap();
        let stored = store.get(&record.id).unwrap().unwrap();
        assert_eq!(stored.attempts, expected_attempts);
        assert!(stored.locked.is_none());
    }
}

#[test]
fn test_release_of_vanished_record_is_a_noop() {
    let (_db, store) = open_store(5);
    store.release("already-deleted").unwrap();
    assert!(store.is_empty());
}

#[test]
fn test_attempts_never_exceed_the_budget_across_claim_release_cycles() {
    let (_db, store) = open_store(5);
    let record = sample_record("notifyDownstream");
    store.create(&record).unwrap();

    let mut seen = vec![store.get(&record.id).unwrap().unwrap().attempts];
    while let Some(claimed) = store.claim_one(&record.id).unwrap() {
        assert!(claimed.attempts < 5);
        store.release(&record.id).unwrap();
        seen.push(store.get(&record.id).unwrap().unwrap().attempts);
    }

    // one failed attempt per claim, then the record goes quiet forever
    assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    let stored = store.get(&record.id).unwrap().unwrap();
    assert_eq!(stored.attempts, 5);
    assert!(stored.locked.is_none(), "exhausted records are left unlocked");
    assert!(store.claim_one(&record.id).unwrap().is_none());
    assert!(store.claim_batch(10).unwrap().is_empty());
}

#[test]
fn test_delete_removes_the_record_permanently() {
    let (_db, store) = open_store(5);
    let record = sample_record("notifyDownstream");
    store.create(&record).unwrap();

    store.delete(&record.id).unwrap();
    assert!(store.get(&record.id).unwrap().is_none());
    assert!(store.is_empty());

    // deleting again is harmless
    store.delete(&record.id).unwrap();
}

#[test]
fn test_reclaim_stale_frees_only_old_locks_and_keeps_attempts() {
    let (_db, store) = open_store(5);

    let mut stale = sample_record("notifyDownstream");
    stale.attempts = 2;
    stale.locked = Some(Utc::now() - ChronoDuration::minutes(10));
    store.create(&stale).unwrap();

    let mut fresh = sample_record("notifyDownstream");
    fresh.locked = Some(Utc::now());
    store.create(&fresh).unwrap();

    let unlocked = sample_record("notifyDownstream");
    store.create(&unlocked).unwrap();

    let reclaimed = store.reclaim_stale(Duration::from_secs(60)).unwrap();
    assert_eq!(reclaimed, 1);

    let stale_now = store.get(&stale.id).unwrap().unwrap();
    assert!(stale_now.locked.is_none());
    assert_eq!(stale_now.attempts, 2, "being stuck is not a failed attempt");

    let fresh_now = store.get(&fresh.id).unwrap().unwrap();
    assert!(fresh_now.locked.is_some(), "recent locks are left alone");

    assert_eq!(store.reclaim_stale(Duration::from_secs(60)).unwrap(), 0);
}

#[test]
fn test_reclaim_with_zero_timeout_frees_any_held_lock() {
    let (_db, store) = open_store(5);
    let record = sample_record("notifyDownstream");
    store.create(&record).unwrap();
    store.claim_one(&record.id).unwrap().expect("claimable");

    assert_eq!(store.reclaim_stale(Duration::ZERO).unwrap(), 1);
    assert!(store.get(&record.id).unwrap().unwrap().locked.is_none());
}

#[test]
fn test_concurrent_claimers_never_share_a_record() {
    let (_db, store) = open_store(5);
    for _ in 0..20 {
        store.create(&sample_record("notifyDownstream")).unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let claimer = store.clone();
        handles.push(std::thread::spawn(move || {
            claimer.claim_batch(10).expect("claim batch should not fail")
        }));
    }

    let mut all_claimed = Vec::new();
    for handle in handles {
        all_claimed.extend(handle.join().expect("claimer thread panicked"));
    }

    let unique: HashSet<_> = all_claimed.iter().map(|r| r.id.clone()).collect();
    assert_eq!(
        unique.len(),
        all_claimed.len(),
        "no record was handed to two claimers"
    );
    assert_eq!(
        unique.len(),
        20,
        "every eligible record went to exactly one claimer"
    );
    assert!(store.claim_batch(10).unwrap().is_empty());
}

#[test]
fn test_claim_and_reclaim_survive_undecodable_rows() {
    let (_db, store) = open_store(5);
    let record = sample_record("notifyDownstream");
    store.create(&record).unwrap();
    store
        .tree()
        .insert("junk".as_bytes(), "not-json".as_bytes())
        .unwrap();

    let claimed = store.claim_batch(10).unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, record.id);

    assert_eq!(store.reclaim_stale(Duration::ZERO).unwrap(), 1);
}

#[test]
fn test_create_in_is_atomic_with_the_surrounding_transaction() {
    use sled::transaction::TransactionResult;
    use sledbox::SledboxError;

    let (_db, store) = open_store(5);

    let committed = sample_record("notifyDownstream");
    let outcome: TransactionResult<(), SledboxError> = store.tree().transaction(|tx| {
        store.create_in(tx, &committed)?;
        Ok(())
    });
    outcome.expect("transaction should commit");
    assert_eq!(store.get(&committed.id).unwrap().unwrap(), committed);

    let rolled_back = sample_record("notifyDownstream");
    let outcome: TransactionResult<(), SledboxError> = store.tree().transaction(|tx| {
        store.create_in(tx, &rolled_back)?;
        sled::transaction::abort(SledboxError::Internal("caller rolled back".to_string()))
    });
    assert!(outcome.is_err());
    assert!(store.get(&rolled_back.id).unwrap().is_none());
}
