//! Port onto the blockchain node's block-by-hash endpoint.

use crate::types::Block;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlockSourceError {
    /// The node does not know the hash. Can happen transiently right after
    /// a reorg when the head notification outruns block availability.
    #[error("Block not found: {0}")]
    NotFound(String),

    #[error("Block source transport error: {0}")]
    Transport(String),
}

/// Yields full blocks (transactions and event logs included) by hash.
///
/// Head *notifications* arrive separately as a hash stream; the processor
/// uses this port to backfill the bodies and any missed ancestors.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn get_block_by_hash(&self, hash: [u8; 32]) -> Result<Block, BlockSourceError>;
}
