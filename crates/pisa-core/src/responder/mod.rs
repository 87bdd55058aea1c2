//! Response delivery: gas-priced queueing, broadcast, inclusion tracking.
//!
//! One [`MultiResponder`] owns the signing key and the [`GasQueue`];
//! everything else talks to it through message-style operations
//! (`start_response`, `tx_mined`) so no mutable state is ever shared across
//! tasks. The [`TransactionTracker`] watches blocks for our inclusions and
//! the dedicated [`TransactionMiner`] serves one-shot submissions outside
//! the queue.

pub mod gas_queue;
pub mod miner;
pub mod multi_responder;
pub mod tracker;

pub use gas_queue::{GasQueue, GasQueueError, GasQueueItem, GasQueueItemRequest};
pub use miner::{MinerConfig, MinerError, TransactionMiner};
pub use multi_responder::{MultiResponder, ResponderAppointmentState};
pub use tracker::{MinedCallback, TransactionTracker};

use crate::{
    abi::AbiError,
    signer::{GasEstimateError, SignerError},
    types::ResponseData,
};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResponderError {
    /// A responder invariant was violated: unknown identifier mined, mined
    /// nonce out of order, or an empty queue notified. The queue is left
    /// untouched; this signals a bug and must surface in tests rather
    /// than be silently repaired.
    #[error("Queue consistency violated: {0}")]
    QueueConsistency(String),

    /// The identifier is already queued for broadcast.
    #[error("Response already in flight")]
    AlreadyInFlight,

    #[error("Gas queue error: {0}")]
    Queue(#[from] GasQueueError),

    #[error("Calldata encoding failed: {0}")]
    Abi(#[from] AbiError),

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),

    #[error("Gas estimation failed: {0}")]
    GasEstimate(#[from] GasEstimateError),
}

/// The watcher-facing surface of the responder.
#[async_trait]
pub trait ResponderHandle: Send + Sync {
    /// Queues and broadcasts the response for an observed appointment.
    async fn start_response(
        &self,
        appointment_id: &str,
        response: &ResponseData,
    ) -> Result<(), ResponderError>;
}
