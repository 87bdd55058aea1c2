//! Per-appointment event watching.
//!
//! Each appointment folds to a two-state machine over the chain: `Watching`
//! until a block carries a log matching its filter, then `Observed` pinned
//! to the block that carried it. The state is recomputed from the chain on
//! every head event, so a reorganisation that erases the event simply puts
//! the appointment back to `Watching`: no edge has fired for the new
//! chain, and none will unless the event recurs.
//!
//! Two edges act on the diff between the previous and current head states:
//!
//! - **Respond** once the observation is `confirmations_before_response`
//!   deep: hand the appointment's response to the responder.
//! - **Evict** once it is `confirmations_before_removal` deep: drop the
//!   appointment from the store.
//!
//! Respond fires strictly before evict because the response depth is
//! bounded by the removal depth at construction.

use crate::{
    cache::BlockCache,
    components::{Component, HeadListener, MappedStateReducer, StateEventHandler, StateReducer},
    responder::ResponderHandle,
    store::AppointmentStore,
    types::{Block, SharedAppointment},
};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WatcherError {
    /// Constructor invariant violated; fatal at startup.
    #[error("Invalid watcher configuration: {0}")]
    InvalidConfig(String),
}

/// Anchor state of one appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherAppointmentState {
    Watching,
    Observed { block_observed: u64 },
}

/// Reducer for a single appointment's event filter.
pub struct WatcherReducer {
    cache: Arc<BlockCache>,
    appointment: SharedAppointment,
}

impl WatcherReducer {
    #[must_use]
    pub fn new(cache: Arc<BlockCache>, appointment: SharedAppointment) -> Self {
        Self { cache, appointment }
    }
}

impl StateReducer for WatcherReducer {
    type State = WatcherAppointmentState;

    fn initial_state(&self, block: &Block) -> Self::State {
        // The event may predate the anchor; search the ancestry below it.
        match self
            .cache
            .find_ancestor(&block.hash, |candidate| {
                self.appointment.event_filter.matches_block(candidate)
            }) {
            Some(observed) => {
                WatcherAppointmentState::Observed { block_observed: observed.number }
            }
            None => WatcherAppointmentState::Watching,
        }
    }

    fn reduce(&self, prev: &Self::State, block: &Block) -> Self::State {
        match prev {
            WatcherAppointmentState::Watching
                if self.appointment.event_filter.matches_block(block) =>
            {
                WatcherAppointmentState::Observed { block_observed: block.number }
            }
            state => state.clone(),
        }
    }
}

/// Watches all stored appointments and drives respond/evict edges.
pub struct Watcher {
    store: Arc<AppointmentStore>,
    responder: Arc<dyn ResponderHandle>,
    confirmations_before_response: u64,
    confirmations_before_removal: u64,
}

impl Watcher {
    /// # Errors
    ///
    /// Returns `WatcherError::InvalidConfig` unless
    /// `1 ≤ confirmations_before_response ≤ confirmations_before_removal`.
    pub fn new(
        store: Arc<AppointmentStore>,
        responder: Arc<dyn ResponderHandle>,
        confirmations_before_response: u64,
        confirmations_before_removal: u64,
    ) -> Result<Self, WatcherError> {
        if confirmations_before_response == 0 {
            return Err(WatcherError::InvalidConfig(
                "confirmations_before_response must be at least 1".to_string(),
            ));
        }
        if confirmations_before_response > confirmations_before_removal {
            return Err(WatcherError::InvalidConfig(format!(
                "confirmations_before_response ({confirmations_before_response}) must not exceed confirmations_before_removal ({confirmations_before_removal})"
            )));
        }

        Ok(Self {
            store,
            responder,
            confirmations_before_response,
            confirmations_before_removal,
        })
    }

    /// Builds the dispatchable component over the store's appointments.
    #[must_use]
    pub fn component(self: Arc<Self>, cache: Arc<BlockCache>) -> Arc<dyn HeadListener> {
        let store = Arc::clone(&self.store);
        let reducer_cache = Arc::clone(&cache);
        let reducer = MappedStateReducer::new(move || {
            store
                .get_all()
                .into_iter()
                .map(|appointment| {
                    let key = appointment.id.clone();
                    (key, WatcherReducer::new(Arc::clone(&reducer_cache), appointment))
                })
                .collect()
        });
        Arc::new(Component::new("watcher", cache, reducer, self))
    }

    /// Whether a state at a given tip has reached a confirmation depth.
    fn depth_reached(state: &WatcherAppointmentState, tip: u64, required: u64) -> bool {
        match state {
            WatcherAppointmentState::Observed { block_observed } => {
                tip >= *block_observed && tip - block_observed + 1 >= required
            }
            WatcherAppointmentState::Watching => false,
        }
    }
}

#[async_trait]
impl StateEventHandler<HashMap<String, WatcherAppointmentState>> for Watcher {
    async fn handle_new_state_event(
        &self,
        prev_state: &HashMap<String, WatcherAppointmentState>,
        prev: &Block,
        new_state: &HashMap<String, WatcherAppointmentState>,
        head: &Block,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        for (id, state) in new_state {
            let previously = prev_state.get(id);

            let respond_now =
                Self::depth_reached(state, head.number, self.confirmations_before_response);
            let responded_before = previously.is_some_and(|p| {
                Self::depth_reached(p, prev.number, self.confirmations_before_response)
            });

            if respond_now && !responded_before {
                match self.store.get_by_id(id) {
                    Some(appointment) => {
                        info!(
                            appointment = %id,
                            head = head.number,
                            "event confirmed; starting response"
                        );
                        if let Err(err) = self
                            .responder
                            .start_response(&appointment.id, &appointment.response_data)
                            .await
                        {
                            // Never fatal: other appointments continue and
                            // the reorg machinery can retrigger this edge.
                            warn!(appointment = %id, error = %err, "response failed to start");
                        }
                    }
                    None => debug!(appointment = %id, "appointment gone before respond edge"),
                }
            }

            let evict_now =
                Self::depth_reached(state, head.number, self.confirmations_before_removal);
            let evicted_before = previously.is_some_and(|p| {
                Self::depth_reached(p, prev.number, self.confirmations_before_removal)
            });

            if evict_now && !evicted_before {
                info!(appointment = %id, head = head.number, "observation settled; evicting");
                self.store.remove_by_id(id);
            }
        }

        Ok(())
    }
}
