//! Exactly-once settlement of verified payment payloads.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;

use crate::adapter::{AdapterError, ChainAdapter, Finality};
use crate::error::EngineError;
use crate::ledger::NonceLedger;
use crate::proto::{
    canonical_identity, identity_eq, PaymentPayload, PaymentRequirements, ReasonCode,
    SettlementResult, PROTOCOL_VERSION,
};
use crate::timestamp::UnixTimestamp;

/// Tuning knobs for the settlement path.
#[derive(Debug, Clone)]
pub struct SettleOptions {
    /// Upper bound on waiting for on-chain finality.
    pub finality_timeout: Duration,
    /// Re-run the balance and allowance queries under the reservation,
    /// closing the window between verification and settlement at the cost
    /// of two extra RPC round-trips.
    pub recheck_funds: bool,
}

impl Default for SettleOptions {
    fn default() -> Self {
        Self {
            finality_timeout: Duration::from_secs(30),
            recheck_funds: false,
        }
    }
}

/// Executes verified payments exactly once.
///
/// The settler assumes the caller has just verified the payload but does
/// not trust it: cheap local checks are repeated before the nonce is
/// reserved, so a payload that was tampered with between the two calls
/// burns no reservation.
///
/// Everything that can fail before broadcast releases the reservation;
/// everything after broadcast with an unknown outcome parks it as
/// Pending. A nonce is never returned to Free once funds may have moved.
pub struct Settler {
    adapter: Arc<dyn ChainAdapter>,
    ledger: Arc<dyn NonceLedger>,
    options: SettleOptions,
}

impl std::fmt::Debug for Settler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settler")
            .field("network", &self.adapter.network())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Settler {
    /// Creates a settler over the given chain adapter and nonce ledger.
    #[must_use]
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        ledger: Arc<dyn NonceLedger>,
        options: SettleOptions,
    ) -> Self {
        Self {
            adapter,
            ledger,
            options,
        }
    }

    /// Settles `payload` against `requirements`.
    ///
    /// A failed settlement is a successful answer with `success = false`;
    /// `Err` means an infrastructure fault before any irreversible step,
    /// with the reservation released, so the caller may retry
    /// transparently.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on ledger backend failures and on RPC
    /// transport failures that happened before broadcast.
    pub async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettlementResult, EngineError> {
        let network = requirements.network.clone();

        if let Some(result) = self.recheck_locally(payload, requirements) {
            return Ok(result);
        }

        let auth = &payload.payload;
        let payer = canonical_identity(&auth.from);
        let nonce = canonical_identity(&auth.nonce);
        let amount = auth.amount.inner();

        // The sole point of mutual exclusion: of any number of concurrent
        // settle calls for this (payer, nonce), exactly one passes here.
        if !self.ledger.reserve(&payer, &nonce)? {
            return Ok(SettlementResult::failed(
                ReasonCode::NonceReused,
                network,
                "authorization nonce already reserved or consumed",
            ));
        }

        if self.options.recheck_funds {
            match self.recheck_funds(auth, amount).await {
                Ok(None) => {}
                Ok(Some(reason)) => {
                    self.release(&payer, &nonce);
                    return Ok(SettlementResult::failed(
                        reason,
                        network,
                        "payer funding changed since verification",
                    ));
                }
                Err(e) => {
                    self.release(&payer, &nonce);
                    return Err(e.into());
                }
            }
        }

        let tx = match self
            .adapter
            .submit_transfer(&auth.token, &auth.from, &auth.to, amount)
            .await
        {
            Ok(tx) => tx,
            // Refused before broadcast: nothing moved, the nonce goes back
            // to Free and a retry (same payload or freshly signed) is safe.
            Err(AdapterError::Rejected(detail)) => {
                self.release(&payer, &nonce);
                return Ok(SettlementResult::failed(
                    ReasonCode::SettlementRejected,
                    network,
                    detail,
                ));
            }
            Err(AdapterError::MalformedField(detail)) => {
                self.release(&payer, &nonce);
                return Ok(SettlementResult::failed(
                    ReasonCode::MalformedPayload,
                    network,
                    detail,
                ));
            }
            // Transport fault before the ledger ever saw the transaction.
            Err(e @ AdapterError::Rpc(_)) => {
                self.release(&payer, &nonce);
                return Err(e.into());
            }
        };

        match self
            .adapter
            .await_finality(&tx, self.options.finality_timeout)
            .await
        {
            Ok(Finality::Confirmed) => {
                if let Err(e) = self.ledger.commit(&payer, &nonce, tx.as_str()) {
                    // Funds moved; the payment is settled regardless. The
                    // stuck Reserved row still blocks replay, but it needs
                    // operator attention before any retention purge.
                    tracing::error!(
                        %payer, %nonce, tx = %tx, error = %e,
                        "settled on chain but nonce commit failed"
                    );
                }
                tracing::info!(%payer, tx = %tx, %amount, "payment settled");
                Ok(SettlementResult::settled(tx.as_str(), network))
            }
            Ok(Finality::Rejected) => {
                self.release(&payer, &nonce);
                Ok(SettlementResult::failed(
                    ReasonCode::SettlementRejected,
                    network,
                    format!("transaction {tx} rejected on chain"),
                ))
            }
            // Broadcast but unconfirmed, or we lost sight of it. Either
            // way the outcome is unknown and resubmission is unsafe.
            Ok(Finality::Unknown) | Err(_) => {
                if let Err(e) = self.ledger.mark_pending(&payer, &nonce, tx.as_str()) {
                    tracing::error!(
                        %payer, %nonce, tx = %tx, error = %e,
                        "failed to park indeterminate settlement as pending"
                    );
                }
                tracing::warn!(%payer, tx = %tx, "settlement outcome unknown, parked as pending");
                Ok(SettlementResult::indeterminate(tx.as_str(), network))
            }
        }
    }

    /// Repeats the free local checks so a payload mutated after
    /// verification never reaches the chain. RPC-backed checks are not
    /// repeated here.
    fn recheck_locally(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Option<SettlementResult> {
        let network = &requirements.network;
        let auth = &payload.payload;

        let reason = if payload.version != PROTOCOL_VERSION {
            ReasonCode::VersionMismatch
        } else if payload.scheme != requirements.scheme {
            ReasonCode::SchemeMismatch
        } else if payload.network != requirements.network {
            ReasonCode::NetworkMismatch
        } else if !identity_eq(&auth.to, &requirements.pay_to) {
            ReasonCode::RecipientMismatch
        } else if !identity_eq(&auth.token, &requirements.asset) {
            ReasonCode::AssetMismatch
        } else if auth.amount.inner() < requirements.max_amount_required.inner() {
            ReasonCode::InsufficientAmount
        } else if auth.deadline < UnixTimestamp::now() {
            ReasonCode::ExpiredDeadline
        } else {
            return None;
        };

        Some(SettlementResult::failed(
            reason,
            network.clone(),
            "payload failed settlement recheck",
        ))
    }

    async fn recheck_funds(
        &self,
        auth: &crate::proto::TransferAuthorization,
        amount: U256,
    ) -> Result<Option<ReasonCode>, AdapterError> {
        if self.adapter.balance(&auth.token, &auth.from).await? < amount {
            return Ok(Some(ReasonCode::InsufficientBalance));
        }
        if self.adapter.requires_allowance() {
            let spender = self.adapter.settler_identity();
            if self
                .adapter
                .allowance(&auth.token, &auth.from, &spender)
                .await?
                < amount
            {
                return Ok(Some(ReasonCode::InsufficientAllowance));
            }
        }
        Ok(None)
    }

    fn release(&self, payer: &str, nonce: &str) {
        if let Err(e) = self.ledger.release(payer, nonce) {
            // The key stays Reserved and blocks retries until the backend
            // recovers; loud, but strictly safer than double settlement.
            tracing::error!(%payer, %nonce, error = %e, "failed to release nonce reservation");
        }
    }
}
