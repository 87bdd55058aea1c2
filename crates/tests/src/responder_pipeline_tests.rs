//! End-to-end responder scenarios: queue shaping, inclusion tracking, and
//! reorg-safe re-broadcast.

use crate::mock_infrastructure::{
    appointment_request, block, dispute_log, mined_transaction, test_config, MockBlockSource,
    PayloadGasEstimator, RecordingSigner,
};
use pisa_core::{
    cache::BlockCache,
    components::HeadListener,
    responder::{MultiResponder, ResponderHandle, TransactionTracker},
    runtime::Watchtower,
    types::ResponseData,
};
use primitive_types::U256;
use std::sync::Arc;

struct ResponderRig {
    responder: Arc<MultiResponder>,
    tracker: Arc<TransactionTracker>,
    signer: Arc<RecordingSigner>,
    cache: Arc<BlockCache>,
}

fn responder_rig() -> ResponderRig {
    let cache = Arc::new(BlockCache::new(100).expect("valid depth"));
    let signer = Arc::new(RecordingSigner::new(0, 1));
    let tracker = Arc::new(TransactionTracker::new(Arc::clone(&cache)));
    let responder = MultiResponder::new(
        Arc::clone(&signer) as Arc<dyn pisa_core::signer::Signer>,
        Arc::new(PayloadGasEstimator),
        Arc::clone(&tracker),
        U256::from(400_000u64),
        13,
        12,
        10,
    );
    ResponderRig { responder, tracker, signer, cache }
}

/// A response whose payload's first byte doubles as its ideal gas price.
fn priced_response(ideal_gas: u8) -> ResponseData {
    ResponseData::raw([0x33; 20], vec![ideal_gas])
}

/// Scenario: queue `[g=10 n=0, g=5 n=1]` (rate 13%), add `g=8`. Expect
/// `[10@0, 8@1, 6@2]` and a broadcast set of exactly the latter two.
#[tokio::test]
async fn test_queue_promotion_broadcasts_displaced_items() {
    let rig = responder_rig();

    rig.responder.start_response("apt-a", &priced_response(10)).await.unwrap();
    rig.responder.start_response("apt-b", &priced_response(5)).await.unwrap();
    assert_eq!(rig.signer.sent_count(), 2);

    rig.responder.start_response("apt-c", &priced_response(8)).await.unwrap();

    let queue = rig.responder.queue_snapshot().await;
    let stamped: Vec<(u64, u64)> =
        queue.iter().map(|item| (item.current_gas.as_u64(), item.nonce)).collect();
    assert_eq!(stamped, vec![(10, 0), (8, 1), (6, 2)]);

    // Two fresh broadcasts: the inserted item and the displaced one.
    let sent = rig.signer.sent();
    assert_eq!(sent.len(), 4);
    assert_eq!((sent[2].gas_price.as_u64(), sent[2].nonce), (8, 1));
    assert_eq!((sent[3].gas_price.as_u64(), sent[3].nonce), (6, 2));
}

/// Scenario: with queue `[A@0, B@1]`, A mines at nonce 0. The queue drops
/// to `[B@1]` and nothing is re-broadcast.
#[tokio::test]
async fn test_front_mine_through_tracker() {
    let rig = responder_rig();

    rig.responder.start_response("apt-a", &priced_response(20)).await.unwrap();
    rig.responder.start_response("apt-b", &priced_response(10)).await.unwrap();
    let sends_before = rig.signer.sent_count();

    // A's broadcast (nonce 0) lands in block 101.
    let front_request = rig.signer.sent()[0].clone();
    rig.cache.add_block(block(100, 100, 0, vec![], vec![])).unwrap();
    rig.cache
        .add_block(block(101, 101, 100, vec![], vec![mined_transaction(&front_request, 900)]))
        .unwrap();

    let b100 = rig.cache.get_block(&crate::mock_infrastructure::block_hash(100)).unwrap();
    let b101 = rig.cache.get_block(&crate::mock_infrastructure::block_hash(101)).unwrap();
    rig.tracker.on_new_head(&b100, &b100).await;
    rig.tracker.on_new_head(&b100, &b101).await;

    let queue = rig.responder.queue_snapshot().await;
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].nonce, 1);
    assert_eq!(rig.signer.sent_count(), sends_before, "front mine re-broadcasts nothing");
}

/// Scenario: with queue `[A@0, B@1, C@2]`, B's inclusion is delivered
/// while nonce 0 is still outstanding. The consistency check rejects the
/// notification and the queue is untouched.
#[tokio::test]
async fn test_out_of_order_mine_leaves_queue_untouched() {
    let rig = responder_rig();

    rig.responder.start_response("apt-a", &priced_response(20)).await.unwrap();
    rig.responder.start_response("apt-b", &priced_response(10)).await.unwrap();
    rig.responder.start_response("apt-c", &priced_response(5)).await.unwrap();
    let queue_before = rig.responder.queue_snapshot().await;
    let sends_before = rig.signer.sent_count();

    // B was broadcast at nonce 1; a block carrying it arrives while the
    // nonce-0 inclusion was never seen.
    let second_request = rig
        .signer
        .sent()
        .iter()
        .find(|request| request.nonce == 1)
        .cloned()
        .expect("second broadcast");
    rig.cache.add_block(block(100, 100, 0, vec![], vec![])).unwrap();
    rig.cache
        .add_block(block(101, 101, 100, vec![], vec![mined_transaction(&second_request, 901)]))
        .unwrap();

    let b100 = rig.cache.get_block(&crate::mock_infrastructure::block_hash(100)).unwrap();
    let b101 = rig.cache.get_block(&crate::mock_infrastructure::block_hash(101)).unwrap();
    rig.tracker.on_new_head(&b100, &b100).await;
    rig.tracker.on_new_head(&b100, &b101).await;

    // The error is logged, the queue stays exactly as it was.
    assert_eq!(rig.responder.queue_snapshot().await, queue_before);
    assert_eq!(rig.signer.sent_count(), sends_before);
}

/// Scenario: a response mines, the including block reorgs away, and the
/// reconciliation pass puts the response back in flight.
#[tokio::test]
async fn test_reorged_response_is_rebroadcast() {
    let source = Arc::new(MockBlockSource::new());
    let signer = Arc::new(RecordingSigner::new(0, 1));
    let mut tower = Watchtower::new(
        &test_config(),
        Arc::clone(&source) as Arc<dyn pisa_core::chain::BlockSource>,
        Arc::clone(&signer) as Arc<dyn pisa_core::signer::Signer>,
        Arc::new(PayloadGasEstimator),
    )
    .expect("test config is valid");

    let announce = |source: &Arc<MockBlockSource>, b: pisa_core::types::Block| {
        source.insert(b.clone());
        b.hash
    };

    // Event at 103; response broadcast at 104.
    let mut head = announce(&source, block(100, 100, 0, vec![], vec![]));
    tower.process_head_hash(head).await.unwrap();
    tower.add_appointment(&appointment_request()).expect("accepted");
    for (number, tag, parent, logs) in [
        (101u64, 101u64, 100u64, vec![]),
        (102, 102, 101, vec![]),
        (103, 103, 102, vec![dispute_log()]),
        (104, 104, 103, vec![]),
    ] {
        head = announce(&source, block(number, tag, parent, logs, vec![]));
        tower.process_head_hash(head).await.unwrap();
    }
    assert_eq!(signer.sent_count(), 1);

    // The response mines in 105a and the tracker dequeues it.
    let response_request = signer.sent()[0].clone();
    head = announce(
        &source,
        block(105, 1051, 104, vec![], vec![mined_transaction(&response_request, 950)]),
    );
    tower.process_head_hash(head).await.unwrap();
    assert!(tower.responder().queue_snapshot().await.is_empty());

    // A competing branch erases the inclusion.
    announce(&source, block(105, 1052, 104, vec![], vec![]));
    head = announce(&source, block(106, 1061, 1052, vec![], vec![]));
    tower.process_head_hash(head).await.unwrap();

    // Reconciliation re-enqueued and re-broadcast the response.
    let queue = tower.responder().queue_snapshot().await;
    assert_eq!(queue.len(), 1, "reorged response must be back in flight");
    assert_eq!(signer.sent_count(), 2);
    let resent = signer.sent()[1].clone();
    assert_eq!(resent.data, response_request.data);
    assert_eq!(resent.nonce, 1, "queue base advanced past the consumed nonce");
}
