//! Owner of the signing key and the response queue.
//!
//! Every response transaction in flight shares one account, so nonce
//! assignment must be centralised: the responder holds the only mutable
//! reference to the [`GasQueue`] and exposes two message-style operations,
//! [`start_response`](ResponderHandle::start_response) from the watcher and
//! [`tx_mined`](MultiResponder::tx_mined) from the tracker. Reorg
//! reconciliation runs through the component framework: the responder's
//! reducer derives, per tracked identifier, whether the current chain still
//! carries its inclusion, and re-enqueues what a reorg erased.

use crate::{
    abi,
    cache::BlockCache,
    components::{Component, HeadListener, MappedStateReducer, StateEventHandler, StateReducer},
    responder::{
        gas_queue::{GasQueue, GasQueueItem, GasQueueItemRequest},
        tracker::{MinedCallback, TransactionTracker},
        ResponderError, ResponderHandle,
    },
    signer::{GasEstimator, Signer},
    types::{Block, ResponseData, TransactionIdentifier},
    utils::hex::format_hash32,
};
use ahash::RandomState;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use primitive_types::U256;
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};
use tracing::{debug, error, info, warn};

/// Whether the current chain carries an inclusion for a tracked response.
///
/// A `Mined` state can revert to `Pending` across head events when the
/// including block is reorged away; the anchor fold recomputes it from the
/// chain alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderAppointmentState {
    Pending,
    Mined { block_number: u64, nonce: u64 },
}

/// Per-identifier reducer: scans blocks for a transaction carrying the
/// identity.
struct ResponseReducer {
    cache: Arc<BlockCache>,
    identifier: TransactionIdentifier,
}

impl ResponseReducer {
    fn mined_in(&self, block: &Block) -> Option<u64> {
        block
            .transactions
            .iter()
            .find(|tx| self.identifier.matches_transaction(tx))
            .map(|tx| tx.nonce)
    }
}

impl StateReducer for ResponseReducer {
    type State = ResponderAppointmentState;

    fn initial_state(&self, block: &Block) -> Self::State {
        // The anchor may sit above an old inclusion; walk down so a
        // deep-mined response is not mistaken for pending.
        let mined = self
            .cache
            .find_ancestor(&block.hash, |candidate| {
                candidate.transactions.iter().any(|tx| self.identifier.matches_transaction(tx))
            })
            .and_then(|including| self.mined_in(&including).map(|nonce| (including.number, nonce)));

        match mined {
            Some((block_number, nonce)) => {
                ResponderAppointmentState::Mined { block_number, nonce }
            }
            None => ResponderAppointmentState::Pending,
        }
    }

    fn reduce(&self, prev: &Self::State, block: &Block) -> Self::State {
        match prev {
            ResponderAppointmentState::Pending => match self.mined_in(block) {
                Some(nonce) => {
                    ResponderAppointmentState::Mined { block_number: block.number, nonce }
                }
                None => ResponderAppointmentState::Pending,
            },
            mined => mined.clone(),
        }
    }
}

struct ResponderState {
    chain_id: u64,
    queue: GasQueue,
}

/// Drives many concurrent response transactions through one signing key.
pub struct MultiResponder {
    signer: Arc<dyn Signer>,
    gas_estimator: Arc<dyn GasEstimator>,
    tracker: Arc<TransactionTracker>,
    /// Fixed gas limit stamped into every response identifier.
    response_gas_limit: U256,
    replacement_rate_pct: u32,
    max_queue_depth: usize,
    /// Inclusions deeper than this can no longer reorg inside the cache
    /// window; their bookkeeping is dropped.
    prune_confirmations: u64,
    /// Queue and chain context, populated lazily on the first response.
    state: tokio::sync::Mutex<Option<ResponderState>>,
    /// Every response ever started, for reorg re-enqueueing. Sync lock:
    /// the component reducer snapshots it from synchronous folds.
    responded: Mutex<HashMap<TransactionIdentifier, GasQueueItemRequest, RandomState>>,
    weak_self: Weak<MultiResponder>,
}

impl MultiResponder {
    #[must_use]
    pub fn new(
        signer: Arc<dyn Signer>,
        gas_estimator: Arc<dyn GasEstimator>,
        tracker: Arc<TransactionTracker>,
        response_gas_limit: U256,
        replacement_rate_pct: u32,
        max_queue_depth: usize,
        prune_confirmations: u64,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            signer,
            gas_estimator,
            tracker,
            response_gas_limit,
            replacement_rate_pct,
            max_queue_depth,
            prune_confirmations,
            state: tokio::sync::Mutex::new(None),
            responded: Mutex::new(HashMap::with_hasher(RandomState::new())),
            weak_self: weak_self.clone(),
        })
    }

    /// Snapshot of the queue, for inspection and tests.
    pub async fn queue_snapshot(&self) -> Vec<GasQueueItem> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|state| state.queue.items().to_vec())
            .unwrap_or_default()
    }

    /// Handles a mined notification from the tracker.
    ///
    /// Front item mined at the front nonce → dequeue, nothing to re-send.
    /// A non-front item mined at the front nonce means an older queue
    /// version broadcast it there → consume and re-send the shifted items.
    ///
    /// # Errors
    ///
    /// `QueueConsistency` when the queue is empty, the identifier is not
    /// queued, or the observed nonce is not the front nonce (the tracker
    /// delivers inclusions in nonce order). The queue is left untouched.
    pub async fn tx_mined(
        &self,
        identifier: &TransactionIdentifier,
        observed_nonce: u64,
    ) -> Result<(), ResponderError> {
        let mut guard = self.state.lock().await;
        let Some(state) = guard.as_mut() else {
            return Err(ResponderError::QueueConsistency(
                "mined notification before any response was started".to_string(),
            ));
        };

        if state.queue.is_empty() {
            return Err(ResponderError::QueueConsistency(
                "mined notification on an empty queue".to_string(),
            ));
        }
        if !state.queue.contains(identifier) {
            return Err(ResponderError::QueueConsistency(
                "mined transaction is not in the queue".to_string(),
            ));
        }

        let (front_nonce, front_is_mined) = match state.queue.front() {
            Some(front) => (front.nonce, &front.request.identifier == identifier),
            None => {
                return Err(ResponderError::QueueConsistency(
                    "mined notification on an empty queue".to_string(),
                ))
            }
        };

        if front_nonce != observed_nonce {
            return Err(ResponderError::QueueConsistency(format!(
                "observed nonce {observed_nonce} mined out of order; queue front holds {front_nonce}"
            )));
        }

        if front_is_mined {
            state.queue = state.queue.dequeue()?;
            debug!(nonce = observed_nonce, "front response mined");
            Ok(())
        } else {
            let reduced = state.queue.consume(identifier)?;
            let replaced = reduced.difference(&state.queue);
            state.queue = reduced;
            info!(
                nonce = observed_nonce,
                replaced = replaced.len(),
                "response mined from an older queue position; re-sending shifted items"
            );
            drop(guard);
            self.broadcast(&replaced).await;
            Ok(())
        }
    }

    /// Builds the component that reconciles the queue with the chain on
    /// every head event.
    #[must_use]
    pub fn component(self: Arc<Self>, cache: Arc<BlockCache>) -> Arc<dyn HeadListener> {
        let responder = Arc::clone(&self);
        let reducer_cache = Arc::clone(&cache);
        let reducer = MappedStateReducer::new(move || {
            responder
                .responded
                .lock()
                .keys()
                .cloned()
                .map(|identifier| {
                    let reducer = ResponseReducer {
                        cache: Arc::clone(&reducer_cache),
                        identifier: identifier.clone(),
                    };
                    (identifier, reducer)
                })
                .collect()
        });
        Arc::new(Component::new("responder", cache, reducer, self))
    }

    fn mined_callback(&self, identifier: TransactionIdentifier) -> MinedCallback {
        let weak = self.weak_self.clone();
        Box::new(move |nonce| {
            let weak = weak.clone();
            let identifier = identifier.clone();
            async move {
                let Some(responder) = weak.upgrade() else { return };
                if let Err(err) = responder.tx_mined(&identifier, nonce).await {
                    error!(error = %err, "mined notification rejected");
                }
            }
            .boxed()
        })
    }

    /// Registers and sends a batch of (re-)broadcasts. Send failures are
    /// logged only: the reconciliation pass re-sends on a later block.
    async fn broadcast(&self, items: &[GasQueueItem]) {
        for item in items {
            let identifier = item.request.identifier.clone();
            self.tracker.add_tx(identifier.clone(), self.mined_callback(identifier));

            match self.signer.send_transaction(item.to_transaction_request()).await {
                Ok(tx_hash) => debug!(
                    nonce = item.nonce,
                    hash = %format_hash32(&tx_hash),
                    "response broadcast"
                ),
                Err(err) => warn!(
                    nonce = item.nonce,
                    error = %err,
                    "broadcast failed; retrying on a later block"
                ),
            }
        }
    }
}

#[async_trait]
impl ResponderHandle for MultiResponder {
    async fn start_response(
        &self,
        appointment_id: &str,
        response: &ResponseData,
    ) -> Result<(), ResponderError> {
        let mut guard = self.state.lock().await;

        if guard.is_none() {
            let base_nonce = self.signer.transaction_count().await?;
            let chain_id = self.signer.chain_id().await?;
            let queue =
                GasQueue::new(base_nonce, self.replacement_rate_pct, self.max_queue_depth)?;
            info!(base_nonce, chain_id, "responder initialised");
            *guard = Some(ResponderState { chain_id, queue });
        }
        let Some(state) = guard.as_mut() else {
            return Err(ResponderError::QueueConsistency(
                "responder state unavailable".to_string(),
            ));
        };

        let data = abi::encode_call(response)?;
        let identifier = TransactionIdentifier {
            chain_id: state.chain_id,
            data,
            to: response.contract_address,
            value: U256::zero(),
            gas_limit: self.response_gas_limit,
        };

        if state.queue.contains(&identifier) {
            return Err(ResponderError::AlreadyInFlight);
        }

        let ideal_gas = self.gas_estimator.estimate(response).await?;
        let request = GasQueueItemRequest {
            identifier: identifier.clone(),
            ideal_gas,
            response_data: response.clone(),
        };

        let reshuffled = state.queue.add(request.clone())?;
        let replaced = reshuffled.difference(&state.queue);
        state.queue = reshuffled;
        self.responded.lock().insert(identifier, request);

        info!(
            appointment = appointment_id,
            ideal_gas = %ideal_gas,
            broadcasts = replaced.len(),
            "response started"
        );

        drop(guard);
        self.broadcast(&replaced).await;
        Ok(())
    }
}

#[async_trait]
impl StateEventHandler<HashMap<TransactionIdentifier, ResponderAppointmentState>>
    for MultiResponder
{
    async fn handle_new_state_event(
        &self,
        _prev_state: &HashMap<TransactionIdentifier, ResponderAppointmentState>,
        _prev: &Block,
        new_state: &HashMap<TransactionIdentifier, ResponderAppointmentState>,
        head: &Block,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut guard = self.state.lock().await;
        let Some(state) = guard.as_mut() else {
            return Ok(());
        };

        let mut to_broadcast: Vec<GasQueueItem> = Vec::new();

        for (identifier, item_state) in new_state {
            match item_state {
                ResponderAppointmentState::Pending => {
                    if state.queue.contains(identifier) {
                        continue;
                    }
                    // Mined once, then reorged out: put it back in flight.
                    let Some(request) = self.responded.lock().get(identifier).cloned() else {
                        continue;
                    };
                    match state.queue.add(request) {
                        Ok(reshuffled) => {
                            let replaced = reshuffled.difference(&state.queue);
                            state.queue = reshuffled;
                            info!(
                                head = head.number,
                                broadcasts = replaced.len(),
                                "re-enqueueing response lost to a reorg"
                            );
                            to_broadcast.extend(replaced);
                        }
                        Err(err) => {
                            warn!(error = %err, "failed to re-enqueue reorged response");
                        }
                    }
                }
                ResponderAppointmentState::Mined { block_number, .. } => {
                    let confirmations = head.number.saturating_sub(*block_number) + 1;
                    if confirmations >= self.prune_confirmations &&
                        self.responded.lock().remove(identifier).is_some()
                    {
                        debug!(
                            block = block_number,
                            confirmations, "response settled; dropping bookkeeping"
                        );
                    }
                }
            }
        }

        drop(guard);
        self.broadcast(&to_broadcast).await;
        Ok(())
    }
}
