//! Dedicated single-transaction miner.
//!
//! For one-shot submissions outside the shared queue (the simpler variant
//! of response delivery), the miner broadcasts a transaction and awaits a
//! confirmation depth, bounded by two independent timeouts: a wall-clock
//! bound on block arrival and a block-count deadline on inclusion. Either
//! rejection bumps the gas price and retries, up to a fixed attempt count.

use crate::{
    cache::BlockCache,
    signer::{Signer, SignerError},
    types::{Block, TransactionRequest},
    utils::hex::format_hash32,
};
use primitive_types::U256;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum MinerError {
    /// No block arrived within the wall-clock bound; the node's head feed
    /// is stalled or disconnected.
    #[error("No new block within {0:?}")]
    NoNewBlock(Duration),

    /// The transaction stayed unmined for too many blocks; it is being
    /// out-priced.
    #[error("Transaction unconfirmed after {0} blocks")]
    BlockThresholdReached(u64),

    /// The transaction was included and then dropped by a reorganisation.
    #[error("Transaction reorged out after inclusion")]
    Reorged,

    #[error("All {0} mining attempts exhausted")]
    AttemptsExhausted(u32),

    /// The processor's head feed closed; the tower is shutting down.
    #[error("Head feed closed")]
    HeadFeedClosed,

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),
}

impl MinerError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoNewBlock(_) | Self::BlockThresholdReached(_) | Self::Reorged
        )
    }
}

#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Confirmation depth required before an inclusion counts as mined.
    pub confirmations_required: u64,
    /// Blocks to wait for an inclusion before bumping gas and retrying.
    pub wait_blocks_before_retrying: u64,
    /// Wall-clock bound on the arrival of each new block.
    pub new_block_timeout: Duration,
    /// Attempts before giving up entirely.
    pub max_attempts: u32,
    /// Gas bump per retry, matching the node's replacement rate.
    pub replacement_rate_pct: u32,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            confirmations_required: 1,
            wait_blocks_before_retrying: 20,
            new_block_timeout: Duration::from_secs(120),
            max_attempts: 5,
            replacement_rate_pct: 13,
        }
    }
}

/// Mines one transaction to a confirmation depth, with bounded retries.
pub struct TransactionMiner {
    signer: Arc<dyn Signer>,
    cache: Arc<BlockCache>,
    config: MinerConfig,
}

impl TransactionMiner {
    #[must_use]
    pub fn new(signer: Arc<dyn Signer>, cache: Arc<BlockCache>, config: MinerConfig) -> Self {
        Self { signer, cache, config }
    }

    /// Broadcasts `request` and waits until it reaches the configured
    /// confirmation depth, bumping gas and re-sending on each transient
    /// failure.
    ///
    /// # Errors
    ///
    /// `AttemptsExhausted` after `max_attempts` transient failures; signer
    /// failures and a closed head feed are terminal immediately.
    pub async fn send_and_confirm(
        &self,
        mut request: TransactionRequest,
        heads: &mut broadcast::Receiver<Arc<Block>>,
    ) -> Result<[u8; 32], MinerError> {
        for attempt in 1..=self.config.max_attempts {
            match self.mine_once(&request, heads).await {
                Ok(tx_hash) => {
                    info!(
                        attempt,
                        hash = %format_hash32(&tx_hash),
                        "transaction confirmed"
                    );
                    return Ok(tx_hash);
                }
                Err(err) if err.is_retryable() => {
                    let bumped = replacement_gas(request.gas_price, self.config.replacement_rate_pct);
                    warn!(
                        attempt,
                        error = %err,
                        gas = %bumped,
                        "mining attempt failed; bumping gas and retrying"
                    );
                    request.gas_price = bumped;
                }
                Err(err) => return Err(err),
            }
        }
        Err(MinerError::AttemptsExhausted(self.config.max_attempts))
    }

    async fn mine_once(
        &self,
        request: &TransactionRequest,
        heads: &mut broadcast::Receiver<Arc<Block>>,
    ) -> Result<[u8; 32], MinerError> {
        let tx_hash = self.signer.send_transaction(request.clone()).await?;
        debug!(hash = %format_hash32(&tx_hash), nonce = request.nonce, "transaction submitted");

        let mut blocks_waited = 0u64;
        let mut seen_included = false;

        loop {
            let head = match tokio::time::timeout(self.config.new_block_timeout, heads.recv())
                .await
            {
                Err(_) => return Err(MinerError::NoNewBlock(self.config.new_block_timeout)),
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(MinerError::HeadFeedClosed)
                }
                // Falling behind the feed is fine; confirmations are
                // measured against whatever head we see next.
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Ok(head)) => head,
            };

            // Depth of the inclusion below the current head, zero while
            // unmined (or reorged out).
            let confirmations = self
                .cache
                .find_ancestor(&head.hash, |block| block.contains_transaction(&tx_hash))
                .map_or(0, |included| head.number.saturating_sub(included.number) + 1);
            if confirmations >= self.config.confirmations_required {
                return Ok(tx_hash);
            }
            if seen_included && confirmations == 0 {
                return Err(MinerError::Reorged);
            }
            seen_included = seen_included || confirmations > 0;

            blocks_waited += 1;
            if confirmations == 0 && blocks_waited >= self.config.wait_blocks_before_retrying {
                return Err(MinerError::BlockThresholdReached(blocks_waited));
            }
        }
    }
}

/// Minimum replacement price after a failed attempt.
fn replacement_gas(gas: U256, rate_pct: u32) -> U256 {
    (gas * U256::from(100 + rate_pct) + U256::from(99u64)) / U256::from(100u64)
}
