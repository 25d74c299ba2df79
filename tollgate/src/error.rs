//! Engine fault taxonomy.
//!
//! These are the errors that mean "the engine could not produce an
//! answer" — infrastructure faults a caller may safely retry. They are
//! deliberately distinct from [`VerificationResult`] and
//! [`SettlementResult`], which are successful answers whose content
//! happens to be negative.
//!
//! [`VerificationResult`]: crate::proto::VerificationResult
//! [`SettlementResult`]: crate::proto::SettlementResult

use crate::adapter::AdapterError;
use crate::ledger::LedgerError;

/// A fault that prevented the engine from reaching a verdict.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The chain adapter failed at the transport level (RPC outage,
    /// timeout). Does not mean the payment was bad.
    #[error("chain adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// The nonce ledger backend failed.
    #[error("nonce ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A remote facilitator could not be reached or returned a
    /// non-protocol response.
    #[error("facilitator transport error: {0}")]
    Transport(String),
}
