//! Bounded-depth, fork-aware store of recent blocks.
//!
//! Unlike a canonical-chain cache, this one deliberately retains *every*
//! fork inside its depth window: concurrent chains can be inserted side by
//! side, and all appointment reasoning runs as ancestry queries from
//! whichever head is current. A reorganisation therefore needs no
//! invalidation pass: the abandoned branch simply stops being anyone's
//! ancestry and ages out of the window.
//!
//! ```text
//!            ┌── 103a (event)          ← abandoned fork, still cached
//!  101 ── 102┤
//!            └── 103b ── 104b (head)   ← current ancestry
//! ```
//!
//! Writes come only from the `BlockProcessor`; every other component holds
//! a read-only view.

use crate::types::Block;
use ahash::RandomState;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum BlockCacheError {
    /// Invalid construction parameter.
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// The block neither attaches to a cached parent nor qualifies as a
    /// new root-range entry.
    #[error("Block {number} cannot be attached to the cache")]
    NotAttachable { number: u64 },
}

struct Inner {
    blocks_by_hash: HashMap<[u8; 32], Arc<Block>, RandomState>,
    /// All block hashes per height; multiple entries mean live forks.
    hashes_by_height: BTreeMap<u64, Vec<[u8; 32]>>,
    /// Height of the first block ever inserted; anchors `min_height` until
    /// the window fills up.
    initial_height: Option<u64>,
}

impl Inner {
    fn max_height(&self) -> Option<u64> {
        self.hashes_by_height.keys().next_back().copied()
    }

    fn min_height(&self, max_depth: u64) -> Option<u64> {
        let max = self.max_height()?;
        let initial = self.initial_height?;
        Some(initial.min(max.saturating_sub(max_depth)))
    }
}

/// Bounded-depth block cache with ancestry queries.
pub struct BlockCache {
    max_depth: u64,
    inner: RwLock<Inner>,
}

impl BlockCache {
    /// Creates a cache retaining blocks within `max_depth` of the highest
    /// contained block.
    ///
    /// # Errors
    ///
    /// Returns `BlockCacheError::InvalidConfig` if `max_depth` is zero.
    pub fn new(max_depth: u64) -> Result<Self, BlockCacheError> {
        if max_depth == 0 {
            return Err(BlockCacheError::InvalidConfig(
                "max_depth must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            max_depth,
            inner: RwLock::new(Inner {
                blocks_by_hash: HashMap::with_hasher(RandomState::new()),
                hashes_by_height: BTreeMap::new(),
                initial_height: None,
            }),
        })
    }

    /// Whether `block` would be accepted by [`add_block`](Self::add_block).
    ///
    /// True iff the cache is empty, the block's height is at or below
    /// `min_height` (a new root-range entry), or its parent is cached.
    #[must_use]
    pub fn can_add_block(&self, block: &Block) -> bool {
        let inner = self.inner.read();
        Self::can_add_inner(&inner, self.max_depth, block)
    }

    fn can_add_inner(inner: &Inner, max_depth: u64, block: &Block) -> bool {
        if inner.blocks_by_hash.is_empty() {
            return true;
        }
        if let Some(min) = inner.min_height(max_depth) {
            if block.number <= min {
                return true;
            }
        }
        inner.blocks_by_hash.contains_key(&block.parent_hash)
    }

    /// Inserts a block and evicts everything below the retention window.
    ///
    /// # Errors
    ///
    /// Returns `BlockCacheError::NotAttachable` when the block fails
    /// [`can_add_block`](Self::can_add_block).
    pub fn add_block(&self, block: Block) -> Result<(), BlockCacheError> {
        let mut inner = self.inner.write();

        if !Self::can_add_inner(&inner, self.max_depth, &block) {
            return Err(BlockCacheError::NotAttachable { number: block.number });
        }

        trace!(
            block = block.number,
            hash = %crate::utils::hex::format_hash32(&block.hash),
            "inserting block"
        );

        if inner.initial_height.is_none() {
            inner.initial_height = Some(block.number);
        }

        let number = block.number;
        let hash = block.hash;
        if inner.blocks_by_hash.insert(hash, Arc::new(block)).is_none() {
            inner.hashes_by_height.entry(number).or_default().push(hash);
        }

        // Evict below the window. Forks are pruned together with the
        // canonical branch once they fall behind the highest tip.
        let max = inner.max_height().unwrap_or(number);
        let cutoff = max.saturating_sub(self.max_depth);
        let stale: Vec<u64> =
            inner.hashes_by_height.range(..cutoff).map(|(height, _)| *height).collect();
        for height in stale {
            if let Some(hashes) = inner.hashes_by_height.remove(&height) {
                debug!(height, evicted = hashes.len(), "evicting blocks below retention window");
                for hash in hashes {
                    inner.blocks_by_hash.remove(&hash);
                }
            }
        }

        Ok(())
    }

    /// Highest block number among contained blocks (any fork tip).
    #[must_use]
    pub fn max_height(&self) -> Option<u64> {
        self.inner.read().max_height()
    }

    /// Lowest height at which new root-range blocks are still accepted:
    /// `min(initial_height, max_height − max_depth)`.
    #[must_use]
    pub fn min_height(&self) -> Option<u64> {
        self.inner.read().min_height(self.max_depth)
    }

    #[must_use]
    pub fn get_block(&self, hash: &[u8; 32]) -> Option<Arc<Block>> {
        self.inner.read().blocks_by_hash.get(hash).map(Arc::clone)
    }

    #[must_use]
    pub fn contains_block(&self, hash: &[u8; 32]) -> bool {
        self.inner.read().blocks_by_hash.contains_key(hash)
    }

    /// The chain from `hash` toward older blocks along parent links,
    /// inclusive of `hash`, ending where the parent is no longer cached.
    #[must_use]
    pub fn ancestry(&self, hash: &[u8; 32]) -> Vec<Arc<Block>> {
        let inner = self.inner.read();
        let mut chain = Vec::new();
        let mut cursor = *hash;
        while let Some(block) = inner.blocks_by_hash.get(&cursor) {
            chain.push(Arc::clone(block));
            cursor = block.parent_hash;
        }
        chain
    }

    /// First block along the ancestry of `hash` (inclusive) satisfying
    /// `predicate`.
    #[must_use]
    pub fn find_ancestor<P>(&self, hash: &[u8; 32], predicate: P) -> Option<Arc<Block>>
    where
        P: Fn(&Block) -> bool,
    {
        let inner = self.inner.read();
        let mut cursor = *hash;
        while let Some(block) = inner.blocks_by_hash.get(&cursor) {
            if predicate(block) {
                return Some(Arc::clone(block));
            }
            cursor = block.parent_hash;
        }
        None
    }

    /// Deepest cached block that is an ancestor of both `a` and `b`
    /// (inclusive on both sides).
    #[must_use]
    pub fn common_ancestor(&self, a: &[u8; 32], b: &[u8; 32]) -> Option<Arc<Block>> {
        let inner = self.inner.read();

        let mut seen = HashSet::new();
        let mut cursor = *a;
        while let Some(block) = inner.blocks_by_hash.get(&cursor) {
            seen.insert(block.hash);
            cursor = block.parent_hash;
        }

        let mut cursor = *b;
        while let Some(block) = inner.blocks_by_hash.get(&cursor) {
            if seen.contains(&block.hash) {
                return Some(Arc::clone(block));
            }
            cursor = block.parent_hash;
        }
        None
    }

    /// The path from `ancestor` (exclusive) down to `tip` (inclusive),
    /// oldest first. `None` if `ancestor` is not on `tip`'s ancestry.
    #[must_use]
    pub fn chain_between(&self, ancestor: &[u8; 32], tip: &[u8; 32]) -> Option<Vec<Arc<Block>>> {
        if ancestor == tip {
            return Some(Vec::new());
        }

        let inner = self.inner.read();
        let mut path = Vec::new();
        let mut cursor = *tip;
        loop {
            let block = inner.blocks_by_hash.get(&cursor)?;
            path.push(Arc::clone(block));
            if &block.parent_hash == ancestor {
                path.reverse();
                return Some(path);
            }
            cursor = block.parent_hash;
        }
    }

    /// Number of blocks from `head` (inclusive) back along its ancestry
    /// that contain the transaction. Zero when the transaction is unseen
    /// or the head is unknown.
    #[must_use]
    pub fn get_confirmations(&self, head: &[u8; 32], tx_hash: &[u8; 32]) -> u64 {
        let inner = self.inner.read();
        let mut confirmations = 0;
        let mut cursor = *head;
        while let Some(block) = inner.blocks_by_hash.get(&cursor) {
            if block.contains_transaction(tx_hash) {
                confirmations += 1;
            }
            cursor = block.parent_hash;
        }
        confirmations
    }
}
