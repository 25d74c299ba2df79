//! Abstract ledger-access capability.
//!
//! The engine never talks to a ledger directly; everything it needs —
//! signature verification, balance and allowance queries, transfer
//! submission, finality polling — goes through a [`ChainAdapter`].
//! Chain-specific crates provide the implementations; the engine holds one
//! adapter per supported network, shared across all concurrent requests.

use alloy_primitives::{B256, U256};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::proto::TransferAuthorization;

/// Errors surfaced by a chain adapter.
///
/// The distinction between [`Rpc`](AdapterError::Rpc) and
/// [`Rejected`](AdapterError::Rejected) matters for settlement: a
/// transport fault is a transient engine error the caller retries, while a
/// deterministic pre-broadcast refusal is a settlement failure that is
/// safe to retry with the same authorization.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Transport-level failure; the ledger was never reached, or the
    /// response never arrived.
    #[error("ledger rpc failure: {0}")]
    Rpc(String),

    /// The ledger deterministically refused the operation before any
    /// transaction was broadcast.
    #[error("ledger rejected request: {0}")]
    Rejected(String),

    /// A payload field could not be interpreted for this chain.
    #[error("malformed field: {0}")]
    MalformedField(String),
}

/// Reference to a submitted ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxRef(String);

impl TxRef {
    /// Wraps a chain-native transaction identifier.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The ledger's verdict on a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finality {
    /// The transaction is irreversibly included.
    Confirmed,
    /// The transaction was included and reverted, or dropped; no value
    /// moved.
    Rejected,
    /// The bounded wait elapsed without a verdict. The transaction may
    /// still confirm; resubmission is not safe.
    Unknown,
}

/// Abstract capability set over one ledger network.
///
/// Implementations must be cheap to share: connections are pooled and
/// reused across requests, never held exclusively by one caller.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Network identifier this adapter serves.
    fn network(&self) -> &str;

    /// The facilitator's own account on this network.
    ///
    /// This identity submits settlement transactions (the facilitator
    /// bears the transaction cost — an explicit trust tradeoff) and is the
    /// spender for allowance checks.
    fn settler_identity(&self) -> String;

    /// Whether the settlement model requires the payer to pre-approve the
    /// facilitator as a spender.
    fn requires_allowance(&self) -> bool {
        true
    }

    /// Computes the canonical message digest a payer signs for the given
    /// authorization.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::MalformedField`] when an authorization
    /// field cannot be interpreted for this chain.
    fn authorization_digest(&self, auth: &TransferAuthorization) -> Result<B256, AdapterError>;

    /// Verifies `signature` over `digest` for the claimed `identity`.
    ///
    /// # Errors
    ///
    /// Returns an error only on adapter faults; a signature that simply
    /// does not verify yields `Ok(false)`.
    async fn verify_signature(
        &self,
        identity: &str,
        digest: B256,
        signature: &str,
    ) -> Result<bool, AdapterError>;

    /// Queries `account`'s balance of `token`, in the smallest unit.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Rpc`] on transport failure.
    async fn balance(&self, token: &str, account: &str) -> Result<U256, AdapterError>;

    /// Queries the amount of `token` that `owner` has approved `spender`
    /// to move.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Rpc`] on transport failure.
    async fn allowance(
        &self,
        token: &str,
        owner: &str,
        spender: &str,
    ) -> Result<U256, AdapterError>;

    /// Submits a transfer of `amount` of `token` from `from` to `to`,
    /// signed and paid for by the facilitator identity.
    ///
    /// # Errors
    ///
    /// [`AdapterError::Rejected`] when the ledger refuses the transaction
    /// before broadcast; [`AdapterError::Rpc`] when the transaction was
    /// never handed to the ledger. Implementations must not return an
    /// error after a successful broadcast.
    async fn submit_transfer(
        &self,
        token: &str,
        from: &str,
        to: &str,
        amount: U256,
    ) -> Result<TxRef, AdapterError>;

    /// Waits for the ledger's verdict on `tx`, bounded by `timeout`.
    ///
    /// Must map timeout expiry to [`Finality::Unknown`] rather than an
    /// error: after broadcast there is no failure mode that makes
    /// resubmission safe.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Rpc`] only for faults unrelated to the
    /// transaction's fate.
    async fn await_finality(&self, tx: &TxRef, timeout: Duration) -> Result<Finality, AdapterError>;
}
