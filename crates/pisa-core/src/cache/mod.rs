//! Fork-aware block storage for the watchtower pipeline.

pub mod block_cache;

pub use block_cache::{BlockCache, BlockCacheError};
