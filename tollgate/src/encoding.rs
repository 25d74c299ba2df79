//! Base64 codec for payment headers.
//!
//! On the request side, the `X-PAYMENT` header carries
//! `base64(JSON(PaymentPayload))`. On the response side,
//! `X-PAYMENT-RESPONSE` carries `base64(JSON(SettlementHeader))` as
//! settlement proof. Decoding is strict: invalid base64 or JSON that does
//! not match the payload schema is rejected before any field is read.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde::{Deserialize, Serialize};

use crate::proto::PaymentPayload;
use crate::timestamp::UnixTimestamp;

/// Request header carrying the base64-encoded payment payload.
pub const PAYMENT_HEADER: &str = "X-PAYMENT";

/// Response header carrying the base64-encoded settlement proof.
pub const PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// Error produced when a payment header cannot be decoded.
#[derive(Debug, thiserror::Error)]
pub enum HeaderDecodeError {
    /// The header value is not valid base64.
    #[error("invalid base64 in payment header: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded bytes are not a schema-valid payment payload.
    #[error("invalid payment payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decodes an `X-PAYMENT` header value into a [`PaymentPayload`].
///
/// # Errors
///
/// Returns [`HeaderDecodeError`] if the value is not base64 or the decoded
/// JSON does not match the strict payload schema.
pub fn decode_payment_header(value: &str) -> Result<PaymentPayload, HeaderDecodeError> {
    let bytes = b64.decode(value.trim())?;
    let payload = serde_json::from_slice(&bytes)?;
    Ok(payload)
}

/// Encodes a [`PaymentPayload`] into an `X-PAYMENT` header value.
///
/// # Errors
///
/// Returns an error if the payload cannot be serialized, which indicates a
/// bug rather than bad input.
pub fn encode_payment_header(payload: &PaymentPayload) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(payload)?;
    Ok(b64.encode(json))
}

/// Settlement proof attached to forwarded responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementHeader {
    /// Ledger transaction reference of the settled transfer.
    pub tx_reference: String,
    /// Network the transfer settled on.
    pub network_id: String,
    /// When the facilitator observed finality.
    pub timestamp: UnixTimestamp,
}

impl SettlementHeader {
    /// Encodes this proof into an `X-PAYMENT-RESPONSE` header value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(b64.encode(json))
    }

    /// Decodes an `X-PAYMENT-RESPONSE` header value.
    ///
    /// # Errors
    ///
    /// Returns [`HeaderDecodeError`] on invalid base64 or JSON.
    pub fn decode(value: &str) -> Result<Self, HeaderDecodeError> {
        let bytes = b64.decode(value.trim())?;
        let header = serde_json::from_slice(&bytes)?;
        Ok(header)
    }
}
