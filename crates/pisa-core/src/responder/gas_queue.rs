//! Priority queue of pending response transactions.
//!
//! Items are ordered by `current_gas` descending and nonces are stamped by
//! position from a base nonce, so the highest-priced response always holds
//! the lowest nonce and mines first. Whenever an item lands on a nonce
//! whose previous occupant is a different transaction, the node will only
//! accept it as a *replacement*, which requires the gas price to exceed the
//! occupant's by the node's minimum replacement rate.
//!
//! ```text
//!   nonce:     5      6      7
//!   before:  [ A:10 , B:5 ]
//!   add C:8  [ A:10 , C:8  , B:6 ]      B bumped to ceil(5 · 1.13)
//! ```
//!
//! Operations return a new queue; callers commit the result and broadcast
//! the [`difference`](GasQueue::difference) against the old one. A queue is
//! valid after every operation: nonces contiguous from the base, gas
//! non-increasing, identifiers distinct, length within the depth bound.

use crate::types::{TransactionIdentifier, TransactionRequest};
use primitive_types::U256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GasQueueError {
    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),

    #[error("Queue depth {0} reached")]
    DepthReached(usize),

    #[error("Identifier already queued")]
    DuplicateIdentifier,

    #[error("Identifier not in queue")]
    UnknownIdentifier,

    #[error("Queue is empty")]
    Empty,
}

/// What a caller asks the queue to mine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasQueueItemRequest {
    pub identifier: TransactionIdentifier,
    /// The price the tower wants to pay; the effective price never drops
    /// below it.
    pub ideal_gas: U256,
    pub response_data: crate::types::ResponseData,
}

/// A queued response with its assigned nonce and effective gas price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasQueueItem {
    pub request: GasQueueItemRequest,
    pub nonce: u64,
    pub current_gas: U256,
}

impl GasQueueItem {
    /// The concrete broadcast form of this item.
    #[must_use]
    pub fn to_transaction_request(&self) -> TransactionRequest {
        TransactionRequest {
            to: self.request.identifier.to,
            data: self.request.identifier.data.clone(),
            value: self.request.identifier.value,
            gas_limit: self.request.identifier.gas_limit,
            gas_price: self.current_gas,
            nonce: self.nonce,
            chain_id: self.request.identifier.chain_id,
        }
    }
}

/// Minimum price at which the node accepts a replacement of a pending
/// transaction priced at `gas`: `ceil(gas · (100 + rate) / 100)`.
fn replacement_price(gas: U256, rate_pct: u32) -> U256 {
    (gas * U256::from(100 + rate_pct) + U256::from(99u64)) / U256::from(100u64)
}

#[derive(Debug, Clone)]
pub struct GasQueue {
    items: Vec<GasQueueItem>,
    base_nonce: u64,
    replacement_rate_pct: u32,
    max_queue_depth: usize,
}

/// Working entry during a re-stamp: the request plus where the item sat
/// before, if it existed.
struct Restamp {
    request: GasQueueItemRequest,
    prior: Option<(u64, U256)>,
}

impl GasQueue {
    /// Creates an empty queue whose first item will take `initial_nonce`.
    ///
    /// # Errors
    ///
    /// Returns `GasQueueError::InvalidConfig` for a zero replacement rate
    /// or zero depth.
    pub fn new(
        initial_nonce: u64,
        replacement_rate_pct: u32,
        max_queue_depth: usize,
    ) -> Result<Self, GasQueueError> {
        if replacement_rate_pct == 0 {
            return Err(GasQueueError::InvalidConfig(
                "replacement_rate_pct must be non-zero".to_string(),
            ));
        }
        if max_queue_depth == 0 {
            return Err(GasQueueError::InvalidConfig(
                "max_queue_depth must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            items: Vec::new(),
            base_nonce: initial_nonce,
            replacement_rate_pct,
            max_queue_depth,
        })
    }

    #[must_use]
    pub fn items(&self) -> &[GasQueueItem] {
        &self.items
    }

    #[must_use]
    pub fn front(&self) -> Option<&GasQueueItem> {
        self.items.first()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn base_nonce(&self) -> u64 {
        self.base_nonce
    }

    #[must_use]
    pub fn depth_reached(&self) -> bool {
        self.items.len() >= self.max_queue_depth
    }

    #[must_use]
    pub fn contains(&self, identifier: &TransactionIdentifier) -> bool {
        self.items.iter().any(|item| &item.request.identifier == identifier)
    }

    /// Re-stamps nonces by position and recomputes gas prices.
    ///
    /// An item whose nonce changed must out-bid both the old occupant of
    /// its new nonce and its own still-pending transaction; a trailing
    /// back-to-front pass restores gas monotonicity by raising
    /// predecessors (each raise is itself a valid self-replacement).
    fn restamp(&self, entries: Vec<Restamp>, new_base: u64) -> Vec<GasQueueItem> {
        let occupant_gas =
            |nonce: u64| -> Option<U256> {
                let index = nonce.checked_sub(self.base_nonce)? as usize;
                self.items.get(index).map(|item| item.current_gas)
            };

        let mut stamped: Vec<GasQueueItem> = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                let nonce = new_base + index as u64;
                let current_gas = match entry.prior {
                    Some((prior_nonce, prior_gas)) if prior_nonce == nonce => prior_gas,
                    prior => {
                        let mut gas = entry.request.ideal_gas;
                        if let Some(occupant) = occupant_gas(nonce) {
                            gas = gas.max(replacement_price(occupant, self.replacement_rate_pct));
                        }
                        if let Some((_, prior_gas)) = prior {
                            gas =
                                gas.max(replacement_price(prior_gas, self.replacement_rate_pct));
                        }
                        gas
                    }
                };
                GasQueueItem { request: entry.request, nonce, current_gas }
            })
            .collect();

        for index in (0..stamped.len().saturating_sub(1)).rev() {
            if stamped[index].current_gas < stamped[index + 1].current_gas {
                let floor = stamped[index + 1].current_gas;
                let self_replacement =
                    replacement_price(stamped[index].current_gas, self.replacement_rate_pct);
                stamped[index].current_gas = floor.max(self_replacement);
            }
        }

        stamped
    }

    /// Inserts a request at the position its ideal gas dictates and
    /// returns the re-stamped queue.
    ///
    /// # Errors
    ///
    /// `DepthReached` when full, `DuplicateIdentifier` when the identifier
    /// is already queued.
    pub fn add(&self, request: GasQueueItemRequest) -> Result<GasQueue, GasQueueError> {
        if self.depth_reached() {
            return Err(GasQueueError::DepthReached(self.max_queue_depth));
        }
        if self.contains(&request.identifier) {
            return Err(GasQueueError::DuplicateIdentifier);
        }

        let position = self
            .items
            .iter()
            .position(|item| item.request.ideal_gas < request.ideal_gas)
            .unwrap_or(self.items.len());

        let mut entries: Vec<Restamp> = self
            .items
            .iter()
            .map(|item| Restamp {
                request: item.request.clone(),
                prior: Some((item.nonce, item.current_gas)),
            })
            .collect();
        entries.insert(position, Restamp { request, prior: None });

        let items = self.restamp(entries, self.base_nonce);
        Ok(GasQueue { items, ..self.clone_config() })
    }

    /// Removes the front (lowest-nonce) item after it mined at its own
    /// nonce. Nothing else changes, so `difference` against the old queue
    /// is empty.
    ///
    /// # Errors
    ///
    /// `Empty` when there is nothing to dequeue.
    pub fn dequeue(&self) -> Result<GasQueue, GasQueueError> {
        if self.items.is_empty() {
            return Err(GasQueueError::Empty);
        }

        let items = self.items[1..].to_vec();
        Ok(GasQueue { items, base_nonce: self.base_nonce + 1, ..self.clone_config() })
    }

    /// Removes an item that mined out of position.
    ///
    /// A *past* version of the queue broadcast this item at what is now the
    /// front nonce, and that inclusion consumed the nonce: the items in
    /// front of the removed position each move one nonce up (replacing
    /// whatever their successor had pending there) and the base advances.
    ///
    /// # Errors
    ///
    /// `UnknownIdentifier` when the identifier is not queued.
    pub fn consume(&self, identifier: &TransactionIdentifier) -> Result<GasQueue, GasQueueError> {
        let position = self
            .items
            .iter()
            .position(|item| &item.request.identifier == identifier)
            .ok_or(GasQueueError::UnknownIdentifier)?;

        let entries: Vec<Restamp> = self
            .items
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != position)
            .map(|(_, item)| Restamp {
                request: item.request.clone(),
                prior: Some((item.nonce, item.current_gas)),
            })
            .collect();

        let items = self.restamp(entries, self.base_nonce + 1);
        Ok(GasQueue { items, base_nonce: self.base_nonce + 1, ..self.clone_config() })
    }

    /// Items of `self` that are not present in `prev` with the same nonce
    /// and gas: exactly the set that must be (re-)broadcast.
    #[must_use]
    pub fn difference(&self, prev: &GasQueue) -> Vec<GasQueueItem> {
        self.items
            .iter()
            .filter(|item| {
                !prev.items.iter().any(|old| {
                    old.request.identifier == item.request.identifier &&
                        old.nonce == item.nonce &&
                        old.current_gas == item.current_gas
                })
            })
            .cloned()
            .collect()
    }

    fn clone_config(&self) -> GasQueue {
        GasQueue {
            items: Vec::new(),
            base_nonce: self.base_nonce,
            replacement_rate_pct: self.replacement_rate_pct,
            max_queue_depth: self.max_queue_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResponseData;

    fn identifier(tag: u8) -> TransactionIdentifier {
        TransactionIdentifier {
            chain_id: 1,
            data: vec![tag],
            to: [tag; 20],
            value: U256::zero(),
            gas_limit: U256::from(400_000u64),
        }
    }

    fn request(tag: u8, ideal_gas: u64) -> GasQueueItemRequest {
        GasQueueItemRequest {
            identifier: identifier(tag),
            ideal_gas: U256::from(ideal_gas),
            response_data: ResponseData::raw([tag; 20], vec![tag]),
        }
    }

    fn assert_invariants(queue: &GasQueue) {
        for (index, item) in queue.items().iter().enumerate() {
            assert_eq!(item.nonce, queue.base_nonce() + index as u64, "nonce contiguity");
            if index > 0 {
                assert!(
                    queue.items()[index - 1].current_gas >= item.current_gas,
                    "gas must be non-increasing"
                );
            }
            assert!(item.current_gas >= item.request.ideal_gas, "gas below ideal");
        }
        let mut ids: Vec<_> =
            queue.items().iter().map(|i| i.request.identifier.clone()).collect();
        let total = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), total, "identifiers must be distinct");
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(GasQueue::new(0, 0, 12), Err(GasQueueError::InvalidConfig(_))));
        assert!(matches!(GasQueue::new(0, 13, 0), Err(GasQueueError::InvalidConfig(_))));
    }

    #[test]
    fn test_add_orders_by_ideal_gas() {
        let queue = GasQueue::new(0, 13, 12).unwrap();
        let queue = queue.add(request(1, 10)).unwrap();
        let queue = queue.add(request(2, 20)).unwrap();
        let queue = queue.add(request(3, 15)).unwrap();

        let gas: Vec<u64> = queue.items().iter().map(|i| i.request.ideal_gas.as_u64()).collect();
        assert_eq!(gas, vec![20, 15, 10]);
        assert_invariants(&queue);
    }

    #[test]
    fn test_queue_promotion_scenario() {
        // [g=10 n=0, g=5 n=1], rate 13%; adding g=8 must yield
        // [10@0, 8@1, 6@2] with 6 = ceil(5 · 1.13).
        let queue = GasQueue::new(0, 13, 12).unwrap();
        let queue = queue.add(request(1, 10)).unwrap();
        let queue = queue.add(request(2, 5)).unwrap();

        let promoted = queue.add(request(3, 8)).unwrap();

        let stamped: Vec<(u64, u64)> =
            promoted.items().iter().map(|i| (i.current_gas.as_u64(), i.nonce)).collect();
        assert_eq!(stamped, vec![(10, 0), (8, 1), (6, 2)]);
        assert_invariants(&promoted);

        // Broadcast set: the inserted item and the displaced one.
        let replaced = promoted.difference(&queue);
        let replaced_gas: Vec<u64> =
            replaced.iter().map(|i| i.current_gas.as_u64()).collect();
        assert_eq!(replaced_gas, vec![8, 6]);
    }

    #[test]
    fn test_add_duplicate_identifier_rejected() {
        let queue = GasQueue::new(0, 13, 12).unwrap();
        let queue = queue.add(request(1, 10)).unwrap();
        assert!(matches!(
            queue.add(request(1, 12)),
            Err(GasQueueError::DuplicateIdentifier)
        ));
    }

    #[test]
    fn test_depth_bound() {
        let queue = GasQueue::new(0, 13, 2).unwrap();
        let queue = queue.add(request(1, 10)).unwrap();
        let queue = queue.add(request(2, 9)).unwrap();
        assert!(queue.depth_reached());
        assert!(matches!(queue.add(request(3, 8)), Err(GasQueueError::DepthReached(2))));
    }

    #[test]
    fn test_dequeue_front_changes_nothing_else() {
        let queue = GasQueue::new(5, 13, 12).unwrap();
        let queue = queue.add(request(1, 10)).unwrap();
        let queue = queue.add(request(2, 8)).unwrap();

        let after = queue.dequeue().unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after.base_nonce(), 6);
        assert_eq!(after.front().unwrap().nonce, 6);
        assert_eq!(after.front().unwrap().current_gas.as_u64(), 8);
        // Nothing to re-broadcast after a front mine.
        assert!(after.difference(&queue).is_empty());
        assert_invariants(&after);

        assert!(matches!(
            GasQueue::new(0, 13, 12).unwrap().dequeue(),
            Err(GasQueueError::Empty)
        ));
    }

    #[test]
    fn test_consume_shifts_front_items_up() {
        // [A:10@0, B:5@1]; B mined at nonce 0 (a past queue version had it
        // at the front). A must move to nonce 1 and replace B's pending
        // transaction there.
        let queue = GasQueue::new(0, 13, 12).unwrap();
        let queue = queue.add(request(1, 10)).unwrap();
        let queue = queue.add(request(2, 5)).unwrap();

        let after = queue.consume(&identifier(2)).unwrap();
        assert_eq!(after.base_nonce(), 1);
        assert_eq!(after.len(), 1);

        let survivor = after.front().unwrap();
        assert_eq!(survivor.request.identifier, identifier(1));
        assert_eq!(survivor.nonce, 1);
        // Replacement bound against its own pending price: ceil(10 · 1.13).
        assert_eq!(survivor.current_gas.as_u64(), 12);
        assert_invariants(&after);

        // The shifted item is the entire re-broadcast set.
        let replaced = after.difference(&queue);
        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced[0].nonce, 1);
    }

    #[test]
    fn test_consume_bumps_close_prices() {
        // Successor's pending gas is close to the shifted item's own, so
        // the replacement bound forces a raise.
        let queue = GasQueue::new(0, 13, 12).unwrap();
        let queue = queue.add(request(1, 100)).unwrap();
        let queue = queue.add(request(2, 99)).unwrap();

        let after = queue.consume(&identifier(2)).unwrap();
        let survivor = after.front().unwrap();
        // max(ceil(99 · 1.13), ceil(100 · 1.13)) = 113.
        assert_eq!(survivor.current_gas.as_u64(), 113);
        assert_invariants(&after);
    }

    #[test]
    fn test_consume_unknown_identifier() {
        let queue = GasQueue::new(0, 13, 12).unwrap();
        let queue = queue.add(request(1, 10)).unwrap();
        assert!(matches!(
            queue.consume(&identifier(9)),
            Err(GasQueueError::UnknownIdentifier)
        ));
    }

    #[test]
    fn test_invariants_over_mixed_operations() {
        let mut queue = GasQueue::new(3, 13, 12).unwrap();
        queue = queue.add(request(1, 50)).unwrap();
        queue = queue.add(request(2, 40)).unwrap();
        queue = queue.add(request(3, 45)).unwrap();
        assert_invariants(&queue);

        queue = queue.consume(&identifier(3)).unwrap();
        assert_invariants(&queue);

        queue = queue.add(request(4, 60)).unwrap();
        assert_invariants(&queue);

        queue = queue.dequeue().unwrap();
        assert_invariants(&queue);

        queue = queue.add(request(5, 10)).unwrap();
        queue = queue.add(request(6, 55)).unwrap();
        assert_invariants(&queue);
    }

    #[test]
    fn test_replacement_bound_on_difference() {
        // Every re-broadcast item whose nonce an old transaction occupied
        // must out-bid it by the replacement rate.
        let queue = GasQueue::new(0, 13, 12).unwrap();
        let q1 = queue.add(request(1, 10)).unwrap();
        let q2 = q1.add(request(2, 5)).unwrap();
        let q3 = q2.add(request(3, 8)).unwrap();

        for item in q3.difference(&q2) {
            let index = (item.nonce - q2.base_nonce()) as usize;
            if let Some(occupant) = q2.items().get(index) {
                if occupant.request.identifier != item.request.identifier {
                    let bound = replacement_price(occupant.current_gas, 13);
                    assert!(item.current_gas >= bound, "replacement bound violated");
                }
            }
        }
    }

    #[test]
    fn test_replacement_price_rounds_up() {
        assert_eq!(replacement_price(U256::from(5u64), 13).as_u64(), 6);
        assert_eq!(replacement_price(U256::from(100u64), 13).as_u64(), 113);
        assert_eq!(replacement_price(U256::from(99u64), 13).as_u64(), 112);
        assert_eq!(replacement_price(U256::from(0u64), 13).as_u64(), 0);
    }
}
