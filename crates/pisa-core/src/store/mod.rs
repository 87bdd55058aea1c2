//! In-memory appointment store with a state-locator index.
//!
//! Appointments are indexed twice: by unique id, and by state locator. A
//! locator identifies a logical channel state shared across appointment
//! versions; only the highest `state_nonce` per locator is active, so an
//! insert either lands fresh, supersedes a stale version, or is refused.
//!
//! Persistence is an external concern; a durable backing layer can wrap
//! this store behind the same operations.

use crate::types::{Appointment, SharedAppointment};
use ahash::RandomState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

struct Inner {
    by_id: HashMap<String, SharedAppointment, RandomState>,
    id_by_locator: HashMap<String, String, RandomState>,
}

/// Map of live appointments. Writes are serialised; reads observe a
/// point-in-time snapshot.
pub struct AppointmentStore {
    inner: RwLock<Inner>,
}

impl Default for AppointmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_id: HashMap::with_hasher(RandomState::new()),
                id_by_locator: HashMap::with_hasher(RandomState::new()),
            }),
        }
    }

    /// Inserts the appointment unless its locator already holds a version
    /// with an equal or higher state nonce.
    ///
    /// Returns `true` when the appointment was stored (fresh locator, or
    /// strictly newer nonce superseding the previous version).
    pub fn add_or_update_by_locator(&self, appointment: Appointment) -> bool {
        let mut inner = self.inner.write();

        if let Some(existing_id) = inner.id_by_locator.get(&appointment.state_locator) {
            let superseded = inner
                .by_id
                .get(existing_id)
                .is_some_and(|existing| existing.state_nonce < appointment.state_nonce);
            if !superseded {
                trace!(
                    locator = %appointment.state_locator,
                    nonce = appointment.state_nonce,
                    "appointment refused: locator holds an equal or newer version"
                );
                return false;
            }

            let stale_id = existing_id.clone();
            inner.by_id.remove(&stale_id);
            debug!(
                locator = %appointment.state_locator,
                superseded = %stale_id,
                "appointment version superseded"
            );
        }

        inner
            .id_by_locator
            .insert(appointment.state_locator.clone(), appointment.id.clone());
        inner.by_id.insert(appointment.id.clone(), Arc::new(appointment));
        true
    }

    /// Snapshot of all live appointments.
    #[must_use]
    pub fn get_all(&self) -> Vec<SharedAppointment> {
        self.inner.read().by_id.values().cloned().collect()
    }

    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<SharedAppointment> {
        self.inner.read().by_id.get(id).cloned()
    }

    /// Removes an appointment. Idempotent: removing an unknown id is a
    /// no-op.
    pub fn remove_by_id(&self, id: &str) {
        let mut inner = self.inner.write();
        if let Some(appointment) = inner.by_id.remove(id) {
            // Only drop the locator entry if it still points at this id;
            // a newer version may have re-bound it.
            if inner
                .id_by_locator
                .get(&appointment.state_locator)
                .is_some_and(|bound| bound == id)
            {
                inner.id_by_locator.remove(&appointment.state_locator);
            }
            debug!(id, "appointment removed");
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }
}
