//! Reusable mock infrastructure for watchtower pipeline tests.
//!
//! The core's ports are plain traits, so the mocks are in-process: a
//! scripted block source backed by an arbitrary fork tree, a signer that
//! records every broadcast, and gas estimators with controllable pricing.
//! Chains are built from [`block`]-style helpers with small integer tags
//! standing in for hashes.

use async_trait::async_trait;
use parking_lot::Mutex;
use pisa_core::{
    abi::keccak256,
    appointment::AppointmentRequest,
    chain::{BlockSource, BlockSourceError},
    config::PisaConfig,
    signer::{GasEstimateError, GasEstimator, Signer, SignerError},
    types::{Block, LogEntry, ResponseData, ResponsePayload, Transaction, TransactionRequest},
};
use primitive_types::U256;
use std::collections::HashMap;

/// Event signature every test appointment watches.
pub const EVENT_SIGNATURE: &str = "EventDispute(uint256)";

/// Contract address every test appointment watches.
pub const WATCHED_CONTRACT: [u8; 20] = [0x11; 20];

/// Deterministic 32-byte hash from a small tag.
#[must_use]
pub fn block_hash(tag: u64) -> [u8; 32] {
    let mut hash = [0u8; 32];
    hash[..8].copy_from_slice(&tag.to_be_bytes());
    hash[31] = 0xB1;
    hash
}

/// A log that matches the standard test appointment's filter.
#[must_use]
pub fn dispute_log() -> LogEntry {
    LogEntry {
        address: WATCHED_CONTRACT,
        topics: [Some(keccak256(EVENT_SIGNATURE.as_bytes())), None, None, None],
        data: vec![],
    }
}

/// Builds a block identified by `tag`, linked to `parent_tag`.
#[must_use]
pub fn block(
    number: u64,
    tag: u64,
    parent_tag: u64,
    logs: Vec<LogEntry>,
    transactions: Vec<Transaction>,
) -> Block {
    Block {
        hash: block_hash(tag),
        number,
        parent_hash: block_hash(parent_tag),
        transactions,
        logs,
    }
}

/// An on-chain transaction carrying exactly the identity of a broadcast
/// request, as a node would mine it.
#[must_use]
pub fn mined_transaction(request: &TransactionRequest, hash_tag: u64) -> Transaction {
    Transaction {
        hash: block_hash(hash_tag),
        from: [0xA0; 20],
        to: Some(request.to),
        value: request.value,
        gas_limit: request.gas_limit,
        gas_price: request.gas_price,
        nonce: request.nonce,
        chain_id: request.chain_id,
        data: request.data.clone(),
    }
}

/// Configuration used by the pipeline scenarios: respond at depth 2,
/// evict at depth 5.
#[must_use]
pub fn test_config() -> PisaConfig {
    PisaConfig {
        confirmations_before_response: 2,
        confirmations_before_removal: 5,
        block_cache_depth: 100,
        ..PisaConfig::default()
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::from("0x");
    for byte in bytes {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

/// A well-formed appointment request watching [`WATCHED_CONTRACT`] for
/// [`EVENT_SIGNATURE`] between blocks 100 and 200.
#[must_use]
pub fn appointment_request() -> AppointmentRequest {
    AppointmentRequest {
        id: 7,
        job_id: 1,
        start_block: 100,
        end_block: 200,
        challenge_period: 150,
        refund: "0x00".to_string(),
        payment_hash: hex(&[0x42; 32]),
        contract_address: hex(&WATCHED_CONTRACT),
        customer_address: hex(&[0x22; 20]),
        gas_limit: 400_000,
        data: "0xdeadbeef".to_string(),
        event_abi: EVENT_SIGNATURE.to_string(),
        event_args: "0x".to_string(),
        pre_condition: "0x".to_string(),
        post_condition: "0x".to_string(),
        mode: 0,
        customer_sig: "0xababab".to_string(),
    }
}

/// Scripted block source backed by a fork tree in memory.
pub struct MockBlockSource {
    blocks: Mutex<HashMap<[u8; 32], Block>>,
}

impl Default for MockBlockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBlockSource {
    #[must_use]
    pub fn new() -> Self {
        Self { blocks: Mutex::new(HashMap::new()) }
    }

    /// Makes a block fetchable; announcing its hash is the test's job.
    pub fn insert(&self, block: Block) {
        self.blocks.lock().insert(block.hash, block);
    }
}

#[async_trait]
impl BlockSource for MockBlockSource {
    async fn get_block_by_hash(&self, hash: [u8; 32]) -> Result<Block, BlockSourceError> {
        self.blocks
            .lock()
            .get(&hash)
            .cloned()
            .ok_or_else(|| BlockSourceError::NotFound(format!("{hash:02x?}")))
    }
}

/// Signer that records every broadcast instead of talking to a node.
pub struct RecordingSigner {
    base_nonce: u64,
    chain_id: u64,
    sent: Mutex<Vec<TransactionRequest>>,
}

impl RecordingSigner {
    #[must_use]
    pub fn new(base_nonce: u64, chain_id: u64) -> Self {
        Self { base_nonce, chain_id, sent: Mutex::new(vec![]) }
    }

    #[must_use]
    pub fn sent(&self) -> Vec<TransactionRequest> {
        self.sent.lock().clone()
    }

    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Signer for RecordingSigner {
    async fn address(&self) -> Result<[u8; 20], SignerError> {
        Ok([0xA0; 20])
    }

    async fn transaction_count(&self) -> Result<u64, SignerError> {
        Ok(self.base_nonce)
    }

    async fn chain_id(&self) -> Result<u64, SignerError> {
        Ok(self.chain_id)
    }

    async fn send_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<[u8; 32], SignerError> {
        self.sent.lock().push(request);
        Ok([0xEE; 32])
    }
}

/// Prices a response by the first byte of its raw payload, so tests can
/// pick the ideal gas per response.
pub struct PayloadGasEstimator;

#[async_trait]
impl GasEstimator for PayloadGasEstimator {
    async fn estimate(&self, response: &ResponseData) -> Result<U256, GasEstimateError> {
        match &response.payload {
            ResponsePayload::Raw(data) if !data.is_empty() => Ok(U256::from(u64::from(data[0]))),
            _ => Ok(U256::from(1u64)),
        }
    }
}

/// Fixed-price estimator for scenarios where gas ordering is irrelevant.
pub struct FixedGasEstimator(pub u64);

#[async_trait]
impl GasEstimator for FixedGasEstimator {
    async fn estimate(&self, _response: &ResponseData) -> Result<U256, GasEstimateError> {
        Ok(U256::from(self.0))
    }
}
