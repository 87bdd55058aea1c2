//! Tower assembly and lifecycle.
//!
//! `Watchtower` wires the pipeline together: one cache, one processor, and
//! the three head listeners in deterministic dispatch order: transaction
//! tracker first (mined notifications dequeue before anything else reacts),
//! then the watcher (may start new responses), then the responder's
//! reorg reconciliation (sees the post-dequeue queue).

use crate::{
    appointment::{AppointmentError, AppointmentRequest, Inspector},
    cache::BlockCache,
    chain::{BlockProcessor, BlockSource, ProcessorError},
    config::{ConfigError, PisaConfig},
    responder::{MultiResponder, ResponderHandle, TransactionTracker},
    signer::{GasEstimator, Signer},
    store::AppointmentStore,
    types::{Block, SharedAppointment},
    watcher::Watcher,
};
use primitive_types::U256;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

/// A fully wired watchtower core.
pub struct Watchtower {
    cache: Arc<BlockCache>,
    store: Arc<AppointmentStore>,
    responder: Arc<MultiResponder>,
    inspector: Inspector,
    processor: BlockProcessor,
}

impl Watchtower {
    /// Validates the configuration and assembles the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when any constructor invariant is violated;
    /// this is fatal at startup by design.
    pub fn new(
        config: &PisaConfig,
        source: Arc<dyn BlockSource>,
        signer: Arc<dyn Signer>,
        gas_estimator: Arc<dyn GasEstimator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let cache = Arc::new(
            BlockCache::new(u64::from(config.block_cache_depth))
                .map_err(|err| ConfigError::Invalid(err.to_string()))?,
        );
        let store = Arc::new(AppointmentStore::new());
        let tracker = Arc::new(TransactionTracker::new(Arc::clone(&cache)));

        let responder = MultiResponder::new(
            signer,
            gas_estimator,
            Arc::clone(&tracker),
            U256::from(config.response_gas_limit),
            config.replacement_rate_pct,
            config.max_queue_depth as usize,
            u64::from(config.confirmations_before_removal),
        );

        let watcher = Arc::new(
            Watcher::new(
                Arc::clone(&store),
                Arc::clone(&responder) as Arc<dyn ResponderHandle>,
                u64::from(config.confirmations_before_response),
                u64::from(config.confirmations_before_removal),
            )
            .map_err(|err| ConfigError::Invalid(err.to_string()))?,
        );

        let mut processor =
            BlockProcessor::new(Arc::clone(&cache), source, u64::from(config.block_cache_depth));
        processor.register_listener(Arc::clone(&tracker) as Arc<dyn crate::components::HeadListener>);
        processor.register_listener(watcher.component(Arc::clone(&cache)));
        processor.register_listener(Arc::clone(&responder).component(Arc::clone(&cache)));

        info!(
            cache_depth = config.block_cache_depth,
            queue_depth = config.max_queue_depth,
            "watchtower assembled"
        );

        Ok(Self {
            cache,
            store,
            responder,
            inspector: Inspector::new(config),
            processor,
        })
    }

    /// Ingests a customer appointment request: inspect, then store.
    ///
    /// The appointment participates in watching from the next head event:
    /// insertion into the store strictly precedes any state advancement.
    ///
    /// # Errors
    ///
    /// Inspection failures, or `AppointmentError::Superseded` when the
    /// locator already holds an equal or newer version.
    pub fn add_appointment(
        &self,
        request: &AppointmentRequest,
    ) -> Result<SharedAppointment, AppointmentError> {
        let current_height = self.cache.max_height().unwrap_or(0);
        let appointment = self.inspector.inspect(request, current_height)?;
        let id = appointment.id.clone();

        if !self.store.add_or_update_by_locator(appointment) {
            return Err(AppointmentError::Superseded);
        }
        self.store.get_by_id(&id).ok_or(AppointmentError::Superseded)
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    #[must_use]
    pub fn store(&self) -> &Arc<AppointmentStore> {
        &self.store
    }

    #[must_use]
    pub fn responder(&self) -> &Arc<MultiResponder> {
        &self.responder
    }

    /// Feed of processed head blocks for auxiliary consumers.
    #[must_use]
    pub fn subscribe_heads(&self) -> broadcast::Receiver<Arc<Block>> {
        self.processor.subscribe_heads()
    }

    /// Drives one announced head through the pipeline. Exposed for callers
    /// that own their head delivery; [`run`](Self::run) is the channel
    /// loop.
    ///
    /// # Errors
    ///
    /// See [`BlockProcessor::process_head_hash`].
    pub async fn process_head_hash(&mut self, hash: [u8; 32]) -> Result<(), ProcessorError> {
        self.processor.process_head_hash(hash).await
    }

    /// Runs the pipeline until the head stream closes, shutdown is
    /// signalled, or a fatal processor error occurs.
    ///
    /// # Errors
    ///
    /// The first fatal `ProcessorError`.
    pub async fn run(
        self,
        heads: mpsc::Receiver<[u8; 32]>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ProcessorError> {
        self.processor.run(heads, shutdown).await
    }
}
