//! Wire format types for the tollgate payment protocol.
//!
//! All types serialize to JSON with camelCase field names. Amounts and
//! timestamps are stringified integers so that precision survives every
//! JSON parser on the path.
//!
//! Payment payloads deserialize *strictly*: unknown fields are rejected
//! before any field is read, so a caller cannot smuggle structure past the
//! verifier.

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::timestamp::UnixTimestamp;

/// The protocol version this engine speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// The exact-amount payment scheme identifier.
pub const SCHEME_EXACT: &str = "exact";

/// A [`U256`] amount that serializes as a decimal string.
///
/// Amount comparisons throughout the engine happen on the integer value in
/// the asset's smallest unit; floating point is never involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct U256String(U256);

impl U256String {
    /// Returns the inner amount.
    #[must_use]
    pub const fn inner(&self) -> U256 {
        self.0
    }
}

/// Error returned when parsing an invalid decimal amount string.
#[derive(Debug, thiserror::Error)]
#[error("invalid decimal amount {0:?}")]
pub struct AmountFormatError(String);

impl FromStr for U256String {
    type Err = AmountFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountFormatError(s.into()));
        }
        U256::from_str_radix(s, 10)
            .map(Self)
            .map_err(|_| AmountFormatError(s.into()))
    }
}

impl From<U256> for U256String {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<u64> for U256String {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl fmt::Display for U256String {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for U256String {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for U256String {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Machine-readable reason codes for verification and settlement failures.
///
/// Every failure is reported with exactly one of these codes, never merged
/// into a generic bucket. Serialized in snake_case on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ReasonCode {
    /// The payment payload could not be decoded or parsed.
    MalformedPayload,
    /// The payload's protocol version is not supported.
    VersionMismatch,
    /// The payload's scheme does not match the requirements.
    SchemeMismatch,
    /// The payload's network does not match the requirements.
    NetworkMismatch,
    /// The authorization recipient does not equal the declared payee.
    RecipientMismatch,
    /// The authorization token does not equal the declared asset.
    AssetMismatch,
    /// The authorized amount is below the required amount.
    InsufficientAmount,
    /// The authorization deadline has passed.
    ExpiredDeadline,
    /// The signature field is absent or structurally unusable.
    MissingSignature,
    /// The signature does not verify for the payer's identity.
    InvalidSignature,
    /// The (payer, nonce) pair was already reserved or consumed.
    NonceReused,
    /// The payer's balance cannot cover the authorized amount.
    InsufficientBalance,
    /// The payer's allowance to the facilitator cannot cover the amount.
    InsufficientAllowance,
    /// The ledger rejected the transfer before or at finality.
    SettlementRejected,
    /// The transfer was broadcast but its outcome is unknown.
    SettlementTimeout,
    /// An unexpected engine fault occurred; no payment state changed.
    InternalError,
}

impl ReasonCode {
    /// Returns the snake_case wire string for this code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedPayload => "malformed_payload",
            Self::VersionMismatch => "version_mismatch",
            Self::SchemeMismatch => "scheme_mismatch",
            Self::NetworkMismatch => "network_mismatch",
            Self::RecipientMismatch => "recipient_mismatch",
            Self::AssetMismatch => "asset_mismatch",
            Self::InsufficientAmount => "insufficient_amount",
            Self::ExpiredDeadline => "expired_deadline",
            Self::MissingSignature => "missing_signature",
            Self::InvalidSignature => "invalid_signature",
            Self::NonceReused => "nonce_reused",
            Self::InsufficientBalance => "insufficient_balance",
            Self::InsufficientAllowance => "insufficient_allowance",
            Self::SettlementRejected => "settlement_rejected",
            Self::SettlementTimeout => "settlement_timeout",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment terms declared by a resource owner for one protected resource.
///
/// Created once per resource and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Payment scheme identifier (currently always `"exact"`).
    pub scheme: String,
    /// Network identifier the payment must settle on.
    pub network: String,
    /// Token (asset) identifier the payment must use.
    pub asset: String,
    /// Recipient identifier funds must be sent to.
    pub pay_to: String,
    /// Minimum acceptable authorization amount, in the asset's smallest unit.
    pub max_amount_required: U256String,
    /// Identifier of the protected resource.
    pub resource: String,
    /// Human-readable description of what the payment buys.
    pub description: String,
    /// Upper bound, in seconds, the payer should allow for settlement.
    pub max_timeout_seconds: u64,
}

/// The signed body of a payment authorization.
///
/// Everything except `signature` is covered by the signature; mutating any
/// covered field after signing invalidates it. Unknown fields are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransferAuthorization {
    /// The payer's identity (signer and source of funds).
    pub from: String,
    /// The recipient identity.
    pub to: String,
    /// The token identifier being transferred.
    pub token: String,
    /// The authorized amount in the token's smallest unit.
    pub amount: U256String,
    /// Single-use value binding this authorization; prevents replay.
    pub nonce: String,
    /// Absolute time after which the authorization is invalid (inclusive).
    pub deadline: UnixTimestamp,
    /// Hex-encoded signature over the canonical message encoding.
    pub signature: String,
}

/// A signed, single-use payment authorization as transmitted by a payer.
///
/// Semantically single-use regardless of how many times it crosses the
/// wire. Unknown fields are rejected before any field is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PaymentPayload {
    /// Protocol version; must equal [`PROTOCOL_VERSION`].
    pub version: u8,
    /// Payment scheme identifier.
    pub scheme: String,
    /// Network identifier.
    pub network: String,
    /// The signed authorization body.
    pub payload: TransferAuthorization,
}

/// Pure result of verifying a payment payload against requirements.
///
/// Verification never mutates state; calling it any number of times with
/// identical inputs produces identical results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// Whether the payload satisfies the requirements.
    pub is_valid: bool,
    /// The single precise reason verification failed, if it did.
    pub invalid_reason: Option<ReasonCode>,
    /// Optional human-readable detail for the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl VerificationResult {
    /// Constructs a passing result.
    #[must_use]
    pub const fn valid() -> Self {
        Self {
            is_valid: true,
            invalid_reason: None,
            description: None,
        }
    }

    /// Constructs a failing result with the given reason.
    #[must_use]
    pub fn invalid(reason: ReasonCode, description: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            invalid_reason: Some(reason),
            description: Some(description.into()),
        }
    }
}

/// Outcome of a settlement attempt. Created once per accepted payload and
/// immutable thereafter.
///
/// A timeout outcome carries both `error = settlement_timeout` and the
/// provisional `tx_reference`, so an indeterminate broadcast is
/// distinguishable from a failure that never reached the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    /// Whether the transfer reached finality.
    pub success: bool,
    /// The failure reason, if settlement did not complete.
    pub error: Option<ReasonCode>,
    /// Ledger transaction reference, when one was obtained.
    pub tx_reference: Option<String>,
    /// Network the settlement ran (or was attempted) on.
    pub network_id: Option<String>,
    /// Optional human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SettlementResult {
    /// Constructs a successful settlement result.
    #[must_use]
    pub fn settled(tx_reference: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            success: true,
            error: None,
            tx_reference: Some(tx_reference.into()),
            network_id: Some(network.into()),
            description: None,
        }
    }

    /// Constructs a failed settlement result with no transaction reference.
    #[must_use]
    pub fn failed(
        reason: ReasonCode,
        network: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error: Some(reason),
            tx_reference: None,
            network_id: Some(network.into()),
            description: Some(description.into()),
        }
    }

    /// Constructs an indeterminate settlement result: the transfer was
    /// broadcast but its outcome is unknown within the finality timeout.
    #[must_use]
    pub fn indeterminate(tx_reference: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(ReasonCode::SettlementTimeout),
            tx_reference: Some(tx_reference.into()),
            network_id: Some(network.into()),
            description: Some("transfer broadcast but unconfirmed; do not resubmit".into()),
        }
    }
}

/// Response from the facilitator's `GET /supported` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    /// Payment schemes the facilitator can process.
    pub schemes: Vec<String>,
    /// Networks the facilitator can settle on.
    pub networks: Vec<String>,
}

/// Request body for `POST /verify`.
///
/// `payment_header` is the base64 of the JSON-encoded [`PaymentPayload`],
/// exactly as it travels in the `X-PAYMENT` request header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// Protocol version of the request envelope.
    pub version: u8,
    /// Base64-encoded JSON payment payload.
    pub payment_header: String,
    /// The requirements the payload is checked against.
    pub payment_requirements: PaymentRequirements,
}

/// Request body for `POST /settle`.
///
/// Structurally identical to [`VerifyRequest`] on the wire, but a distinct
/// type so the compiler prevents passing one where the other is expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    /// Protocol version of the request envelope.
    pub version: u8,
    /// Base64-encoded JSON payment payload.
    pub payment_header: String,
    /// The requirements the payload is settled against.
    pub payment_requirements: PaymentRequirements,
}

impl From<VerifyRequest> for SettleRequest {
    fn from(req: VerifyRequest) -> Self {
        Self {
            version: req.version,
            payment_header: req.payment_header,
            payment_requirements: req.payment_requirements,
        }
    }
}

/// Canonical form of an identity string for comparisons and ledger keys.
///
/// Identifiers differing only in case or surrounding whitespace denote the
/// same account; anything beyond that is a mismatch, never tolerated.
#[must_use]
pub fn canonical_identity(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

/// Compares two identity strings under canonicalization.
#[must_use]
pub fn identity_eq(a: &str, b: &str) -> bool {
    canonical_identity(a) == canonical_identity(b)
}
