//! End-to-end watcher scenarios: a full tower driven by scripted chains.
//!
//! These tests exercise the pipeline the way production does: announce a
//! head hash, let the processor backfill and dispatch, observe effects on
//! the signer and the store.

use crate::mock_infrastructure::{
    appointment_request, block, block_hash, dispute_log, test_config, FixedGasEstimator,
    MockBlockSource, RecordingSigner,
};
use pisa_core::{appointment::AppointmentError, runtime::Watchtower};
use std::sync::Arc;

struct Pipeline {
    tower: Watchtower,
    source: Arc<MockBlockSource>,
    signer: Arc<RecordingSigner>,
}

fn pipeline() -> Pipeline {
    let source = Arc::new(MockBlockSource::new());
    let signer = Arc::new(RecordingSigner::new(0, 1));
    let tower = Watchtower::new(
        &test_config(),
        Arc::clone(&source) as Arc<dyn pisa_core::chain::BlockSource>,
        Arc::clone(&signer) as Arc<dyn pisa_core::signer::Signer>,
        Arc::new(FixedGasEstimator(10)),
    )
    .expect("test config is valid");
    Pipeline { tower, source, signer }
}

impl Pipeline {
    /// Inserts and announces one block.
    async fn announce(&mut self, block: pisa_core::types::Block) {
        let hash = block.hash;
        self.source.insert(block);
        self.tower.process_head_hash(hash).await.expect("head processing");
    }
}

/// Scenario: appointment added at block 100, event fires in block 103.
/// With a response depth of 2, the response goes out at block 104 and
/// exactly once.
#[tokio::test]
async fn test_happy_watch_responds_exactly_once() {
    let mut p = pipeline();

    p.announce(block(100, 100, 0, vec![], vec![])).await;
    p.tower.add_appointment(&appointment_request()).expect("accepted");
    assert_eq!(p.tower.store().len(), 1);

    p.announce(block(101, 101, 100, vec![], vec![])).await;
    p.announce(block(102, 102, 101, vec![], vec![])).await;
    p.announce(block(103, 103, 102, vec![dispute_log()], vec![])).await;
    // One confirmation is not enough yet.
    assert_eq!(p.signer.sent_count(), 0);

    p.announce(block(104, 104, 103, vec![], vec![])).await;
    let sent = p.signer.sent();
    assert_eq!(sent.len(), 1, "response must fire at depth 2");
    assert_eq!(sent[0].data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(sent[0].to, crate::mock_infrastructure::WATCHED_CONTRACT);
    assert_eq!(sent[0].nonce, 0);

    // Further heads never re-fire the edge.
    p.announce(block(105, 105, 104, vec![], vec![])).await;
    assert_eq!(p.signer.sent_count(), 1);
}

/// Scenario: continuing the happy watch, the appointment is evicted once
/// the observation is five blocks deep.
#[tokio::test]
async fn test_confirmed_eviction() {
    let mut p = pipeline();

    p.announce(block(100, 100, 0, vec![], vec![])).await;
    p.tower.add_appointment(&appointment_request()).expect("accepted");

    for number in 101..=102u64 {
        p.announce(block(number, number, number - 1, vec![], vec![])).await;
    }
    p.announce(block(103, 103, 102, vec![dispute_log()], vec![])).await;
    for number in 104..=106u64 {
        p.announce(block(number, number, number - 1, vec![], vec![])).await;
    }
    // Four confirmations: still stored.
    assert_eq!(p.tower.store().len(), 1);

    p.announce(block(107, 107, 106, vec![], vec![])).await;
    assert!(p.tower.store().is_empty(), "store must be empty at depth 5");
    // The response still went out exactly once on the way.
    assert_eq!(p.signer.sent_count(), 1);
}

/// Scenario: the event fires at block 103, but a reorg replaces 103 before
/// the response depth is reached. No response goes out and the
/// appointment stays stored.
#[tokio::test]
async fn test_reorg_before_response() {
    let mut p = pipeline();

    p.announce(block(100, 100, 0, vec![], vec![])).await;
    p.tower.add_appointment(&appointment_request()).expect("accepted");

    p.announce(block(101, 101, 100, vec![], vec![])).await;
    p.announce(block(102, 102, 101, vec![], vec![])).await;
    p.announce(block(103, 1031, 102, vec![dispute_log()], vec![])).await;
    assert_eq!(p.signer.sent_count(), 0);

    // Competing branch without the event wins.
    p.source.insert(block(103, 1032, 102, vec![], vec![]));
    p.announce(block(104, 1041, 1032, vec![], vec![])).await;

    assert_eq!(p.signer.sent_count(), 0, "respond must not fire on the new chain");
    assert_eq!(p.tower.store().len(), 1, "appointment must survive the reorg");
}

/// Scenario: after a reorg erased the first observation, the event recurs
/// on the new chain and the response fires there, exactly once.
#[tokio::test]
async fn test_event_recurs_after_reorg() {
    let mut p = pipeline();

    p.announce(block(100, 100, 0, vec![], vec![])).await;
    p.tower.add_appointment(&appointment_request()).expect("accepted");

    p.announce(block(101, 101, 100, vec![], vec![])).await;
    p.announce(block(102, 1021, 101, vec![dispute_log()], vec![])).await;

    // Reorg past the observation.
    p.source.insert(block(102, 1022, 101, vec![], vec![]));
    p.announce(block(103, 1031, 1022, vec![], vec![])).await;
    assert_eq!(p.signer.sent_count(), 0);

    // The contract fires again on the canonical branch.
    p.announce(block(104, 1041, 1031, vec![dispute_log()], vec![])).await;
    p.announce(block(105, 1051, 1041, vec![], vec![])).await;
    assert_eq!(p.signer.sent_count(), 1, "response fires for the recurring event");

    p.announce(block(106, 1061, 1051, vec![], vec![])).await;
    assert_eq!(p.signer.sent_count(), 1);
}

/// The state-locator rule holds across the ingest path: a higher job id
/// supersedes, anything else is refused.
#[tokio::test]
async fn test_appointment_versions_supersede() {
    let mut p = pipeline();
    p.announce(block(100, 100, 0, vec![], vec![])).await;

    let v1 = appointment_request();
    let first = p.tower.add_appointment(&v1).expect("accepted");

    let mut v2 = appointment_request();
    v2.job_id = 2;
    v2.data = "0xfeedface".to_string();
    let second = p.tower.add_appointment(&v2).expect("newer version accepted");

    assert_ne!(first.id, second.id);
    assert_eq!(p.tower.store().len(), 1, "newer version replaces the old one");
    assert!(p.tower.store().get_by_id(&first.id).is_none());

    let stale = appointment_request();
    assert!(matches!(
        p.tower.add_appointment(&stale),
        Err(AppointmentError::Superseded)
    ));
}

/// A malformed request is rejected without touching the store.
#[tokio::test]
async fn test_rejected_appointment_leaves_store_untouched() {
    let mut p = pipeline();
    p.announce(block(100, 100, 0, vec![], vec![])).await;

    let mut bad = appointment_request();
    bad.end_block = 90; // window already closed
    assert!(p.tower.add_appointment(&bad).is_err());
    assert!(p.tower.store().is_empty());
}

/// Deep head announcements are backfilled: skipping heads must not skip
/// events.
#[tokio::test]
async fn test_skipped_heads_are_backfilled() {
    let mut p = pipeline();

    p.announce(block(100, 100, 0, vec![], vec![])).await;
    p.tower.add_appointment(&appointment_request()).expect("accepted");

    // Blocks 101-104 exist but only 104 is announced; the event hides in
    // the unannounced 103.
    p.source.insert(block(101, 101, 100, vec![], vec![]));
    p.source.insert(block(102, 102, 101, vec![], vec![]));
    p.source.insert(block(103, 103, 102, vec![dispute_log()], vec![]));
    p.announce(block(104, 104, 103, vec![], vec![])).await;

    assert_eq!(p.signer.sent_count(), 1, "backfilled event must trigger the response");
    assert_eq!(p.tower.cache().max_height(), Some(104));
    assert!(p.tower.cache().contains_block(&block_hash(103)));
}
