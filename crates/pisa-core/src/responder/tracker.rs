//! Watches new blocks for the tower's own transactions.
//!
//! The tracker holds only an identifier → callback map; callbacks capture
//! the minimal responder operation they must invoke, which keeps the
//! tracker ↔ responder coupling acyclic. A callback fires at most once: it
//! is removed from the registry before invocation.

use crate::{
    cache::BlockCache,
    components::HeadListener,
    types::{Block, TransactionIdentifier},
};
use ahash::RandomState;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

/// Invoked with the nonce the transaction was observed to mine with.
pub type MinedCallback = Box<dyn Fn(u64) -> BoxFuture<'static, ()> + Send + Sync>;

/// Scans each new head's fresh ancestry blocks and fires mined callbacks
/// in increasing block-number (hence nonce) order.
pub struct TransactionTracker {
    cache: Arc<BlockCache>,
    callbacks: DashMap<TransactionIdentifier, MinedCallback, RandomState>,
    /// Highest block number already scanned; `None` until the first head.
    last_block: Mutex<Option<u64>>,
}

impl TransactionTracker {
    #[must_use]
    pub fn new(cache: Arc<BlockCache>) -> Self {
        Self {
            cache,
            callbacks: DashMap::with_hasher(RandomState::new()),
            last_block: Mutex::new(None),
        }
    }

    /// Registers (or refreshes) the callback for an identifier.
    pub fn add_tx(&self, identifier: TransactionIdentifier, callback: MinedCallback) {
        trace!(chain_id = identifier.chain_id, "tracking transaction identity");
        self.callbacks.insert(identifier, callback);
    }

    /// Whether a callback is currently registered for the identifier.
    #[must_use]
    pub fn is_tracking(&self, identifier: &TransactionIdentifier) -> bool {
        self.callbacks.contains_key(identifier)
    }

    async fn scan_block(&self, block: &Block) {
        for tx in &block.transactions {
            let Some(identifier) = TransactionIdentifier::from_transaction(tx) else {
                continue;
            };
            if let Some((_, callback)) = self.callbacks.remove(&identifier) {
                debug!(
                    block = block.number,
                    nonce = tx.nonce,
                    "tracked transaction mined"
                );
                callback(tx.nonce).await;
            }
        }
    }
}

#[async_trait]
impl HeadListener for TransactionTracker {
    async fn on_new_head(&self, _prev: &Arc<Block>, head: &Arc<Block>) {
        let scan_from = {
            let mut last = self.last_block.lock();
            let from = match *last {
                // First head: scan just the head block itself.
                None => head.number,
                Some(scanned) => scanned + 1,
            };
            if head.number >= from {
                *last = Some(head.number);
            }
            from
        };

        if head.number < scan_from {
            // A shorter competing head; already-scanned heights are not
            // revisited (reorg recovery is the responder's reconciliation
            // pass, not the tracker's).
            return;
        }

        // Ancestry is newest-first; deliver oldest-first.
        let mut fresh: Vec<Arc<Block>> = self
            .cache
            .ancestry(&head.hash)
            .into_iter()
            .take_while(|block| block.number >= scan_from)
            .collect();
        fresh.reverse();

        for block in fresh {
            self.scan_block(&block).await;
        }
    }
}
