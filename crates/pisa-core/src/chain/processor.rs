//! Head linearisation and component dispatch.
//!
//! A single task owns the cache's write side. For every head hash the node
//! announces, the processor backfills the block and any missing ancestors
//! into the cache, then emits exactly one `NEW_HEAD(prev, head)` event to
//! the registered listeners, in registration order, strictly serialised.
//!
//! Contract at emit time: the cache contains `prev`, `head`, and the whole
//! path from their common ancestor to `head`. Components can therefore
//! fold reducers over that path without touching the network.

use crate::{
    cache::BlockCache,
    chain::source::{BlockSource, BlockSourceError},
    components::HeadListener,
    types::Block,
    utils::hex::format_hash32,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Block source error: {0}")]
    Source(#[from] BlockSourceError),

    #[error("Cache rejected block: {0}")]
    Cache(#[from] crate::cache::BlockCacheError),

    /// The backfill walk exhausted the cache depth without attaching to a
    /// known ancestor. The pipeline cannot recover from this.
    #[error("No cached ancestor found within {walked} blocks of head {head}")]
    AncestorNotFound { head: String, walked: u64 },

    /// A block the processor just inserted is missing again; indicates a
    /// cache bug rather than anything chain-side.
    #[error("Head block {0} missing from cache after insert")]
    HeadMissing(String),
}

impl ProcessorError {
    /// Transient errors are logged and the head is skipped; fatal ones
    /// terminate the run loop.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AncestorNotFound { .. } | Self::HeadMissing(_))
    }
}

/// Capacity of the broadcast feed of processed head blocks.
const HEAD_FEED_CAPACITY: usize = 64;

/// Single-owner head processor.
pub struct BlockProcessor {
    cache: Arc<BlockCache>,
    source: Arc<dyn BlockSource>,
    listeners: Vec<Arc<dyn HeadListener>>,
    /// Maximum backfill walk per head; matches the cache depth.
    max_backfill: u64,
    head: Option<Arc<Block>>,
    head_feed: broadcast::Sender<Arc<Block>>,
}

impl BlockProcessor {
    #[must_use]
    pub fn new(cache: Arc<BlockCache>, source: Arc<dyn BlockSource>, max_backfill: u64) -> Self {
        let (head_feed, _) = broadcast::channel(HEAD_FEED_CAPACITY);
        Self { cache, source, listeners: Vec::new(), max_backfill, head: None, head_feed }
    }

    /// Registers a listener. Dispatch order is registration order.
    pub fn register_listener(&mut self, listener: Arc<dyn HeadListener>) {
        self.listeners.push(listener);
    }

    /// Subscribes to the feed of processed head blocks (used by auxiliary
    /// consumers such as the dedicated miner; the component pipeline gets
    /// the richer `NEW_HEAD` dispatch instead).
    #[must_use]
    pub fn subscribe_heads(&self) -> broadcast::Receiver<Arc<Block>> {
        self.head_feed.subscribe()
    }

    /// The most recently processed head, if any.
    #[must_use]
    pub fn current_head(&self) -> Option<Arc<Block>> {
        self.head.clone()
    }

    /// Ingests one announced head hash: backfill, cache insert, dispatch.
    ///
    /// # Errors
    ///
    /// Transient source failures bubble up so the caller can decide to
    /// skip; `AncestorNotFound` means the chain moved further than the
    /// cache window can bridge and is fatal.
    pub async fn process_head_hash(&mut self, hash: [u8; 32]) -> Result<(), ProcessorError> {
        if self.head.as_ref().is_some_and(|h| h.hash == hash) {
            debug!(hash = %format_hash32(&hash), "duplicate head announcement");
            return Ok(());
        }

        // Walk backwards fetching blocks until one attaches to the cache.
        let mut pending: Vec<Block> = Vec::new();
        let mut cursor = hash;
        while !self.cache.contains_block(&cursor) {
            let block = self.source.get_block_by_hash(cursor).await?;
            cursor = block.parent_hash;
            let attachable = self.cache.can_add_block(&block);
            pending.push(block);
            if attachable {
                break;
            }
            if pending.len() as u64 > self.max_backfill {
                return Err(ProcessorError::AncestorNotFound {
                    head: format_hash32(&hash),
                    walked: pending.len() as u64,
                });
            }
        }

        // Oldest first, so every insert attaches to its parent.
        pending.reverse();
        for block in pending {
            self.cache.add_block(block)?;
        }

        let head = self
            .cache
            .get_block(&hash)
            .ok_or_else(|| ProcessorError::HeadMissing(format_hash32(&hash)))?;
        // The very first head is its own predecessor; component folds then
        // collapse to the anchor seed and no edges fire.
        let prev = self.head.clone().unwrap_or_else(|| Arc::clone(&head));

        info!(
            head = head.number,
            hash = %format_hash32(&head.hash),
            prev = prev.number,
            "new chain head"
        );

        for listener in &self.listeners {
            listener.on_new_head(&prev, &head).await;
        }

        // Feed subscribers after the component pipeline has settled.
        let _ = self.head_feed.send(Arc::clone(&head));
        self.head = Some(head);
        Ok(())
    }

    /// Drives the processor until the head stream closes or shutdown is
    /// signalled.
    ///
    /// # Errors
    ///
    /// Returns the first fatal `ProcessorError`; transient errors are
    /// logged and the offending head skipped (the next announcement
    /// re-fetches whatever was missed).
    pub async fn run(
        mut self,
        mut heads: mpsc::Receiver<[u8; 32]>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ProcessorError> {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    debug!("block processor received shutdown signal");
                    return Ok(());
                }

                maybe_hash = heads.recv() => {
                    let Some(hash) = maybe_hash else {
                        debug!("head stream closed, block processor exiting");
                        return Ok(());
                    };
                    if let Err(err) = self.process_head_hash(hash).await {
                        if err.is_fatal() {
                            return Err(err);
                        }
                        warn!(error = %err, "skipping head after transient error");
                    }
                }
            }
        }
    }
}
