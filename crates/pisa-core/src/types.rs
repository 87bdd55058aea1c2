//! Core data model shared across the watchtower.
//!
//! Blocks, transactions and logs mirror what an account-based chain delivers
//! over RPC; appointments capture a customer's standing instruction to watch
//! for an event and respond with a pre-authorised transaction.
//!
//! Hashes are raw `[u8; 32]` and addresses raw `[u8; 20]`. Gas values use
//! `U256` because replacement-rate arithmetic can overflow `u64` on inflated
//! gas markets.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A transaction as observed inside a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: [u8; 32],
    pub from: [u8; 20],
    /// `None` for contract-creation transactions.
    pub to: Option<[u8; 20]>,
    pub value: U256,
    pub gas_limit: U256,
    pub gas_price: U256,
    pub nonce: u64,
    pub chain_id: u64,
    pub data: Vec<u8>,
}

/// An event log emitted inside a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: [u8; 20],
    pub topics: [Option<[u8; 32]>; 4],
    pub data: Vec<u8>,
}

/// A full block: header fields the tower reasons about, plus transactions
/// and event logs. Immutable once inserted into the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub hash: [u8; 32],
    pub number: u64,
    pub parent_hash: [u8; 32],
    pub transactions: Vec<Transaction>,
    pub logs: Vec<LogEntry>,
}

impl Block {
    /// Whether this block contains a transaction with the given hash.
    #[must_use]
    pub fn contains_transaction(&self, tx_hash: &[u8; 32]) -> bool {
        self.transactions.iter().any(|tx| &tx.hash == tx_hash)
    }
}

/// Event filter an appointment watches for.
///
/// Matching rules: the log's emitting address must equal `address`, and for
/// each topic position where the filter specifies a value, the log must
/// carry exactly that topic. `None` positions are wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub address: [u8; 20],
    pub topics: [Option<[u8; 32]>; 4],
}

impl EventFilter {
    /// Whether `log` satisfies this filter.
    #[must_use]
    pub fn matches(&self, log: &LogEntry) -> bool {
        if log.address != self.address {
            return false;
        }

        for (i, filter_topic) in self.topics.iter().enumerate() {
            if let Some(filter_topic) = filter_topic {
                match &log.topics[i] {
                    Some(log_topic) if log_topic == filter_topic => {}
                    _ => return false,
                }
            }
        }

        true
    }

    /// Whether any log in `block` satisfies this filter.
    #[must_use]
    pub fn matches_block(&self, block: &Block) -> bool {
        block.logs.iter().any(|log| self.matches(log))
    }
}

/// One argument of a response call, in ABI terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbiValue {
    Uint(U256),
    Address([u8; 20]),
    Bytes32([u8; 32]),
    Bytes(Vec<u8>),
}

/// What the response transaction carries: a structured call the tower
/// encodes itself, or calldata the customer pre-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponsePayload {
    Call { function_name: String, function_args: Vec<AbiValue> },
    Raw(Vec<u8>),
}

/// The pre-authorised response: which contract to call and with what.
/// Encodes deterministically to calldata, so the same response always
/// produces the same transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    pub contract_address: [u8; 20],
    pub payload: ResponsePayload,
}

impl ResponseData {
    /// Convenience constructor for a structured call.
    #[must_use]
    pub fn call(
        contract_address: [u8; 20],
        function_name: impl Into<String>,
        function_args: Vec<AbiValue>,
    ) -> Self {
        Self {
            contract_address,
            payload: ResponsePayload::Call {
                function_name: function_name.into(),
                function_args,
            },
        }
    }

    /// Convenience constructor for pre-encoded calldata.
    #[must_use]
    pub fn raw(contract_address: [u8; 20], data: Vec<u8>) -> Self {
        Self { contract_address, payload: ResponsePayload::Raw(data) }
    }
}

/// A customer's appointment: watch `event_filter` between `start_block` and
/// `end_block`; if it fires, submit the response transaction.
///
/// `id` is unique. `state_locator` identifies the logical channel state and
/// may be shared across appointment versions; the highest `state_nonce` for
/// a locator supersedes the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub state_locator: String,
    pub state_nonce: u64,
    pub contract_address: [u8; 20],
    pub event_filter: EventFilter,
    pub response_data: ResponseData,
    pub start_block: u64,
    pub end_block: u64,
    pub challenge_period: u64,
}

pub type SharedAppointment = Arc<Appointment>;

/// Semantic identity of a response transaction, independent of nonce and
/// gas price.
///
/// Two queue items with equal identifiers are the same logical response; a
/// mined transaction with a matching identifier proves response delivery
/// regardless of which broadcast attempt won.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionIdentifier {
    pub chain_id: u64,
    pub data: Vec<u8>,
    pub to: [u8; 20],
    pub value: U256,
    pub gas_limit: U256,
}

impl TransactionIdentifier {
    /// Derives the identifier of an observed transaction, if it has a
    /// recipient. Contract creations can never be responses.
    #[must_use]
    pub fn from_transaction(tx: &Transaction) -> Option<Self> {
        let to = tx.to?;
        Some(Self {
            chain_id: tx.chain_id,
            data: tx.data.clone(),
            to,
            value: tx.value,
            gas_limit: tx.gas_limit,
        })
    }

    /// Whether an observed transaction carries this identity.
    #[must_use]
    pub fn matches_transaction(&self, tx: &Transaction) -> bool {
        tx.to == Some(self.to) &&
            tx.chain_id == self.chain_id &&
            tx.value == self.value &&
            tx.gas_limit == self.gas_limit &&
            tx.data == self.data
    }
}

/// A concrete transaction request handed to the signer for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub to: [u8; 20],
    pub data: Vec<u8>,
    pub value: U256,
    pub gas_limit: U256,
    pub gas_price: U256,
    pub nonce: u64,
    pub chain_id: u64,
}
