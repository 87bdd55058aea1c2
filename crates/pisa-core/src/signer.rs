//! Ports onto the signing key and gas market.
//!
//! Exactly one `MultiResponder` owns the signing key; everything behind
//! these traits (key management, RPC transport) lives outside the core.

use crate::types::{ResponseData, TransactionRequest};
use async_trait::async_trait;
use primitive_types::U256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Signer transport error: {0}")]
    Transport(String),

    /// The node rejected the transaction (bad nonce, underpriced
    /// replacement, insufficient funds).
    #[error("Transaction rejected by node: {0}")]
    Rejected(String),
}

/// The signing key and its view of the account, as exposed by a node.
#[async_trait]
pub trait Signer: Send + Sync {
    /// The account address responses are sent from.
    async fn address(&self) -> Result<[u8; 20], SignerError>;

    /// The next unused nonce for the account.
    async fn transaction_count(&self) -> Result<u64, SignerError>;

    /// Chain id the key signs for.
    async fn chain_id(&self) -> Result<u64, SignerError>;

    /// Signs and submits a transaction, returning its hash.
    async fn send_transaction(&self, request: TransactionRequest)
        -> Result<[u8; 32], SignerError>;
}

#[derive(Debug, Error)]
pub enum GasEstimateError {
    #[error("Gas estimation failed: {0}")]
    Unavailable(String),
}

/// Supplies the ideal gas price for a response.
///
/// The ideal price is the price the tower *wants* to pay; the queue raises
/// the effective price above it when nonce replacement demands it.
#[async_trait]
pub trait GasEstimator: Send + Sync {
    async fn estimate(&self, response: &ResponseData) -> Result<U256, GasEstimateError>;
}
