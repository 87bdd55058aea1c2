//! Deterministic ABI encoding for response calldata and appointment digests.
//!
//! The responder's transaction identity is derived from calldata, so the
//! encoding must be byte-stable: same response, same bytes, same identifier.
//! Head/tail layout follows the contract ABI convention: one 32-byte word
//! per argument in the head, dynamic `bytes` spilled into the tail behind an
//! offset word.

use crate::types::{AbiValue, ResponseData};
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Prefix for EIP-191 personal-sign digests over a 32-byte payload.
const PERSONAL_SIGN_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

#[derive(Debug, Error)]
pub enum AbiError {
    /// Function names must be plain identifiers; anything else would change
    /// the selector in surprising ways.
    #[error("Invalid function name: {0:?}")]
    InvalidFunctionName(String),
}

/// Keccak-256 of arbitrary bytes.
#[must_use]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// The canonical ABI type name of a value, as used in function signatures.
fn canonical_type(value: &AbiValue) -> &'static str {
    match value {
        AbiValue::Uint(_) => "uint256",
        AbiValue::Address(_) => "address",
        AbiValue::Bytes32(_) => "bytes32",
        AbiValue::Bytes(_) => "bytes",
    }
}

/// First four bytes of the keccak-256 of the canonical signature.
#[must_use]
pub fn function_selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Encodes one static value into its 32-byte word.
fn encode_static_word(value: &AbiValue, out: &mut Vec<u8>) {
    match value {
        AbiValue::Uint(v) => {
            let mut word = [0u8; 32];
            v.to_big_endian(&mut word);
            out.extend_from_slice(&word);
        }
        AbiValue::Address(addr) => {
            out.extend_from_slice(&[0u8; 12]);
            out.extend_from_slice(addr);
        }
        AbiValue::Bytes32(word) => out.extend_from_slice(word),
        AbiValue::Bytes(_) => unreachable!("dynamic values are encoded in the tail"),
    }
}

/// Encodes an argument list with head/tail layout.
///
/// Static arguments occupy one word in the head. Each `bytes` argument
/// contributes an offset word in the head and `len ++ right-padded data` in
/// the tail, offsets measured from the start of the argument block.
#[must_use]
pub fn encode_arguments(args: &[AbiValue]) -> Vec<u8> {
    let head_len = args.len() * 32;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for arg in args {
        match arg {
            AbiValue::Bytes(data) => {
                let offset = primitive_types::U256::from(head_len + tail.len());
                let mut word = [0u8; 32];
                offset.to_big_endian(&mut word);
                head.extend_from_slice(&word);

                let mut len_word = [0u8; 32];
                primitive_types::U256::from(data.len()).to_big_endian(&mut len_word);
                tail.extend_from_slice(&len_word);
                tail.extend_from_slice(data);
                // Right-pad the payload to a word boundary.
                let remainder = data.len() % 32;
                if remainder != 0 {
                    tail.extend(std::iter::repeat(0u8).take(32 - remainder));
                }
            }
            static_value => encode_static_word(static_value, &mut head),
        }
    }

    head.extend_from_slice(&tail);
    head
}

/// Encodes a response into calldata.
///
/// Structured calls become selector + argument block; raw payloads pass
/// through untouched (the customer already encoded them).
///
/// # Errors
///
/// Returns `AbiError::InvalidFunctionName` if a structured call's name is
/// empty or contains characters outside `[A-Za-z0-9_]`.
pub fn encode_call(response: &ResponseData) -> Result<Vec<u8>, AbiError> {
    match &response.payload {
        crate::types::ResponsePayload::Raw(data) => Ok(data.clone()),
        crate::types::ResponsePayload::Call { function_name, function_args } => {
            let name = function_name.as_str();
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(AbiError::InvalidFunctionName(name.to_string()));
            }

            let types: Vec<&str> = function_args.iter().map(canonical_type).collect();
            let signature = format!("{}({})", name, types.join(","));

            let mut calldata = Vec::with_capacity(4 + function_args.len() * 32);
            calldata.extend_from_slice(&function_selector(&signature));
            calldata.extend_from_slice(&encode_arguments(function_args));
            Ok(calldata)
        }
    }
}

/// The three packed groups of an appointment request, pre-encoded.
///
/// Group one covers the numeric terms and payment hash, group two the
/// contract call, group three the condition payloads. The canonical digest
/// is the keccak of the ABI encoding of the three groups as `bytes`.
#[derive(Debug, Clone)]
pub struct AppointmentDigestInput {
    pub id: primitive_types::U256,
    pub job_id: primitive_types::U256,
    pub start_block: primitive_types::U256,
    pub end_block: primitive_types::U256,
    pub challenge_period: primitive_types::U256,
    pub refund: primitive_types::U256,
    pub payment_hash: [u8; 32],
    pub contract_address: [u8; 20],
    pub customer_address: [u8; 20],
    pub gas_limit: primitive_types::U256,
    pub data: Vec<u8>,
    pub event_abi: String,
    pub event_args: Vec<u8>,
    pub pre_condition: Vec<u8>,
    pub post_condition: Vec<u8>,
    pub mode: primitive_types::U256,
}

/// Computes the canonical appointment digest.
#[must_use]
pub fn appointment_digest(input: &AppointmentDigestInput) -> [u8; 32] {
    let group_one = encode_arguments(&[
        AbiValue::Uint(input.id),
        AbiValue::Uint(input.job_id),
        AbiValue::Uint(input.start_block),
        AbiValue::Uint(input.end_block),
        AbiValue::Uint(input.challenge_period),
        AbiValue::Uint(input.refund),
        AbiValue::Bytes32(input.payment_hash),
    ]);

    let group_two = encode_arguments(&[
        AbiValue::Address(input.contract_address),
        AbiValue::Address(input.customer_address),
        AbiValue::Uint(input.gas_limit),
        AbiValue::Bytes(input.data.clone()),
    ]);

    let group_three = encode_arguments(&[
        AbiValue::Bytes(input.event_abi.as_bytes().to_vec()),
        AbiValue::Bytes(input.event_args.clone()),
        AbiValue::Bytes(input.pre_condition.clone()),
        AbiValue::Bytes(input.post_condition.clone()),
        AbiValue::Uint(input.mode),
    ]);

    let packed = encode_arguments(&[
        AbiValue::Bytes(group_one),
        AbiValue::Bytes(group_two),
        AbiValue::Bytes(group_three),
    ]);

    keccak256(&packed)
}

/// Wraps a digest with the EIP-191 personal-sign prefix and re-hashes.
#[must_use]
pub fn personal_sign_digest(digest: &[u8; 32]) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(PERSONAL_SIGN_PREFIX.len() + 32);
    preimage.extend_from_slice(PERSONAL_SIGN_PREFIX);
    preimage.extend_from_slice(digest);
    keccak256(&preimage)
}
