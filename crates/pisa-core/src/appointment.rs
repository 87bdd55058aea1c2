//! Appointment wire form and acceptance policy.
//!
//! The HTTP layer (outside the core) hands over a JSON request; this module
//! parses it, applies the tower's acceptance policy, and produces the core
//! [`Appointment`] keyed by its canonical digest. A rejection here is fatal
//! to the appointment only; the pipeline keeps running.
//!
//! Topic constraints travel in `eventArgs` as packed 33-byte pairs: one
//! position byte (1 to 3) followed by the 32-byte topic value. Topic 0 is
//! always the keccak-256 of the canonical event signature in `eventABI`.

use crate::{
    abi::{appointment_digest, keccak256, AppointmentDigestInput},
    config::PisaConfig,
    types::{Appointment, EventFilter, ResponseData},
    utils::hex::{format_hash32, parse_hex_array, parse_hex_bytes},
};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AppointmentError {
    #[error("Field {0} is not valid hex of the expected length")]
    InvalidHex(&'static str),

    #[error("Block window invalid: start {start} is not before end {end}")]
    InvalidWindow { start: u64, end: u64 },

    #[error("Block window already closed at height {height} (ends {end})")]
    WindowExpired { end: u64, height: u64 },

    #[error("Challenge period {period} outside accepted range [{min}, {max}]")]
    ChallengePeriodOutOfBounds { period: u64, min: u64, max: u64 },

    #[error("Gas limit {requested} exceeds the accepted cap {cap}")]
    GasLimitTooHigh { requested: u64, cap: u64 },

    #[error("Unsupported response mode {0}")]
    UnsupportedMode(u64),

    #[error("Invalid event filter: {0}")]
    InvalidEventFilter(String),

    #[error("Missing customer signature")]
    MissingSignature,

    /// The state locator already holds a version with an equal or newer
    /// state nonce.
    #[error("Appointment superseded by an equal or newer version")]
    Superseded,
}

/// Response mode: relay the pre-encoded calldata as-is.
const MODE_RELAY: u64 = 0;

/// An appointment as it arrives from a customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRequest {
    pub id: u64,
    pub job_id: u64,
    pub start_block: u64,
    pub end_block: u64,
    pub challenge_period: u64,
    /// Hex-encoded refund amount in wei.
    pub refund: String,
    pub payment_hash: String,
    pub contract_address: String,
    pub customer_address: String,
    pub gas_limit: u64,
    /// Pre-encoded response calldata.
    pub data: String,
    /// Canonical event signature, e.g. `EventDispute(uint256)`.
    #[serde(rename = "eventABI")]
    pub event_abi: String,
    /// Packed positional topic constraints (33 bytes each).
    pub event_args: String,
    pub pre_condition: String,
    pub post_condition: String,
    pub mode: u64,
    pub customer_sig: String,
}

/// Derives the event filter an appointment watches: topic 0 from the
/// signature hash, further positions from the packed constraints.
fn parse_event_filter(
    contract_address: [u8; 20],
    event_abi: &str,
    event_args: &[u8],
) -> Result<EventFilter, AppointmentError> {
    if event_abi.is_empty() || !event_abi.contains('(') || !event_abi.ends_with(')') {
        return Err(AppointmentError::InvalidEventFilter(format!(
            "malformed event signature {event_abi:?}"
        )));
    }

    let mut topics: [Option<[u8; 32]>; 4] = [None; 4];
    topics[0] = Some(keccak256(event_abi.as_bytes()));

    if event_args.len() % 33 != 0 {
        return Err(AppointmentError::InvalidEventFilter(
            "topic constraints must be 33-byte pairs".to_string(),
        ));
    }
    for pair in event_args.chunks(33) {
        let position = pair[0] as usize;
        if !(1..=3).contains(&position) {
            return Err(AppointmentError::InvalidEventFilter(format!(
                "topic position {position} out of range"
            )));
        }
        let mut topic = [0u8; 32];
        topic.copy_from_slice(&pair[1..]);
        topics[position] = Some(topic);
    }

    Ok(EventFilter { address: contract_address, topics })
}

/// Applies the tower's acceptance policy to incoming requests.
pub struct Inspector {
    max_gas_limit: u64,
    min_challenge_period: u64,
    max_challenge_period: u64,
}

impl Inspector {
    #[must_use]
    pub fn new(config: &PisaConfig) -> Self {
        Self {
            max_gas_limit: config.max_appointment_gas_limit,
            min_challenge_period: config.min_challenge_period,
            max_challenge_period: config.max_challenge_period,
        }
    }

    /// Validates a request against the policy and the current chain height
    /// and converts it into a core appointment.
    ///
    /// The appointment id is the hex form of the canonical digest, making
    /// ids deterministic; the state locator binds contract, customer and
    /// the customer-chosen id, with `jobId` as the superseding nonce.
    ///
    /// # Errors
    ///
    /// Any policy violation or malformed field; fatal to this appointment,
    /// never to the tower.
    pub fn inspect(
        &self,
        request: &AppointmentRequest,
        current_height: u64,
    ) -> Result<Appointment, AppointmentError> {
        if request.start_block >= request.end_block {
            return Err(AppointmentError::InvalidWindow {
                start: request.start_block,
                end: request.end_block,
            });
        }
        if request.end_block <= current_height {
            return Err(AppointmentError::WindowExpired {
                end: request.end_block,
                height: current_height,
            });
        }
        if request.challenge_period < self.min_challenge_period ||
            request.challenge_period > self.max_challenge_period
        {
            return Err(AppointmentError::ChallengePeriodOutOfBounds {
                period: request.challenge_period,
                min: self.min_challenge_period,
                max: self.max_challenge_period,
            });
        }
        if request.gas_limit > self.max_gas_limit {
            return Err(AppointmentError::GasLimitTooHigh {
                requested: request.gas_limit,
                cap: self.max_gas_limit,
            });
        }
        if request.mode != MODE_RELAY {
            return Err(AppointmentError::UnsupportedMode(request.mode));
        }
        if request.customer_sig.trim_start_matches("0x").is_empty() {
            return Err(AppointmentError::MissingSignature);
        }

        let contract_address = parse_hex_array::<20>(&request.contract_address)
            .ok_or(AppointmentError::InvalidHex("contractAddress"))?;
        let customer_address = parse_hex_array::<20>(&request.customer_address)
            .ok_or(AppointmentError::InvalidHex("customerAddress"))?;
        let payment_hash = parse_hex_array::<32>(&request.payment_hash)
            .ok_or(AppointmentError::InvalidHex("paymentHash"))?;
        let refund_bytes =
            parse_hex_bytes(&request.refund).ok_or(AppointmentError::InvalidHex("refund"))?;
        if refund_bytes.len() > 32 {
            return Err(AppointmentError::InvalidHex("refund"));
        }
        let data = parse_hex_bytes(&request.data).ok_or(AppointmentError::InvalidHex("data"))?;
        let event_args = parse_hex_bytes(&request.event_args)
            .ok_or(AppointmentError::InvalidHex("eventArgs"))?;
        let pre_condition = parse_hex_bytes(&request.pre_condition)
            .ok_or(AppointmentError::InvalidHex("preCondition"))?;
        let post_condition = parse_hex_bytes(&request.post_condition)
            .ok_or(AppointmentError::InvalidHex("postCondition"))?;

        let event_filter = parse_event_filter(contract_address, &request.event_abi, &event_args)?;

        let digest = appointment_digest(&AppointmentDigestInput {
            id: U256::from(request.id),
            job_id: U256::from(request.job_id),
            start_block: U256::from(request.start_block),
            end_block: U256::from(request.end_block),
            challenge_period: U256::from(request.challenge_period),
            refund: U256::from_big_endian(&refund_bytes),
            payment_hash,
            contract_address,
            customer_address,
            gas_limit: U256::from(request.gas_limit),
            data: data.clone(),
            event_abi: request.event_abi.clone(),
            event_args,
            pre_condition,
            post_condition,
            mode: U256::from(request.mode),
        });

        let state_locator = format!(
            "{}:{}:{}",
            crate::utils::hex::format_address(&contract_address),
            crate::utils::hex::format_address(&customer_address),
            request.id
        );

        debug!(
            id = %format_hash32(&digest),
            locator = %state_locator,
            nonce = request.job_id,
            "appointment passed inspection"
        );

        Ok(Appointment {
            id: format_hash32(&digest),
            state_locator,
            state_nonce: request.job_id,
            contract_address,
            event_filter,
            response_data: ResponseData::raw(contract_address, data),
            start_block: request.start_block,
            end_block: request.end_block,
            challenge_period: request.challenge_period,
        })
    }
}
