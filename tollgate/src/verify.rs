//! Side-effect-free validation of payment payloads.

use std::sync::Arc;

use crate::adapter::{AdapterError, ChainAdapter};
use crate::error::EngineError;
use crate::ledger::NonceLedger;
use crate::proto::{
    canonical_identity, identity_eq, PaymentPayload, PaymentRequirements, ReasonCode,
    VerificationResult, PROTOCOL_VERSION,
};
use crate::timestamp::UnixTimestamp;

/// Validates payment payloads against declared requirements.
///
/// `verify` is pure apart from read-only queries: it never mutates the
/// nonce ledger and never touches chain state, so it can be called any
/// number of times for the same payload — including after settlement,
/// where it will report [`ReasonCode::NonceReused`].
///
/// Checks run in a fixed order and short-circuit on the first failure,
/// cheapest first, so a payload never reaches an RPC round-trip unless
/// everything local about it is already right.
pub struct Verifier {
    adapter: Arc<dyn ChainAdapter>,
    ledger: Arc<dyn NonceLedger>,
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("network", &self.adapter.network())
            .finish_non_exhaustive()
    }
}

impl Verifier {
    /// Creates a verifier over the given chain adapter and nonce ledger.
    #[must_use]
    pub fn new(adapter: Arc<dyn ChainAdapter>, ledger: Arc<dyn NonceLedger>) -> Self {
        Self { adapter, ledger }
    }

    /// Validates `payload` against `requirements`.
    ///
    /// An invalid payload is a successful answer with `is_valid = false`,
    /// not an error; `Err` means the engine itself could not reach a
    /// verdict (RPC outage, ledger failure) and the caller may retry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on chain adapter transport failures or
    /// nonce ledger backend failures.
    pub async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerificationResult, EngineError> {
        // 1. Protocol version.
        if payload.version != PROTOCOL_VERSION {
            return Ok(reject(
                ReasonCode::VersionMismatch,
                format!(
                    "unsupported protocol version {} (expected {PROTOCOL_VERSION})",
                    payload.version
                ),
            ));
        }

        // 2. Scheme.
        if payload.scheme != requirements.scheme {
            return Ok(reject(
                ReasonCode::SchemeMismatch,
                format!(
                    "payload scheme {:?} does not match required {:?}",
                    payload.scheme, requirements.scheme
                ),
            ));
        }

        // 3. Network.
        if payload.network != requirements.network {
            return Ok(reject(
                ReasonCode::NetworkMismatch,
                format!(
                    "payload network {:?} does not match required {:?}",
                    payload.network, requirements.network
                ),
            ));
        }

        let auth = &payload.payload;

        // 4. Recipient. Exact match after canonicalization; no substitution.
        if !identity_eq(&auth.to, &requirements.pay_to) {
            return Ok(reject(
                ReasonCode::RecipientMismatch,
                format!(
                    "authorization pays {} but requirements demand {}",
                    auth.to, requirements.pay_to
                ),
            ));
        }

        // 5. Asset.
        if !identity_eq(&auth.token, &requirements.asset) {
            return Ok(reject(
                ReasonCode::AssetMismatch,
                format!(
                    "authorization spends token {} but requirements demand {}",
                    auth.token, requirements.asset
                ),
            ));
        }

        // 6. Amount. Unbounded-integer comparison, boundary inclusive.
        let amount = auth.amount.inner();
        let required = requirements.max_amount_required.inner();
        if amount < required {
            return Ok(reject(
                ReasonCode::InsufficientAmount,
                format!("authorized amount {amount} below required {required}"),
            ));
        }

        // 7. Deadline. A deadline exactly equal to now is still valid.
        let now = UnixTimestamp::now();
        if auth.deadline < now {
            return Ok(reject(
                ReasonCode::ExpiredDeadline,
                format!(
                    "authorization expired at {} (now {})",
                    auth.deadline.as_secs(),
                    now.as_secs()
                ),
            ));
        }

        // 8. Signature structurally present.
        if auth.signature.trim().is_empty() {
            return Ok(reject(
                ReasonCode::MissingSignature,
                "authorization carries no signature",
            ));
        }

        // 9. Cryptographic signature over the canonical encoding. There is
        // no bypass for this check under any configuration.
        let digest = match self.adapter.authorization_digest(auth) {
            Ok(digest) => digest,
            Err(AdapterError::MalformedField(detail)) => {
                return Ok(reject(ReasonCode::MalformedPayload, detail));
            }
            Err(other) => return Err(other.into()),
        };
        match self
            .adapter
            .verify_signature(&auth.from, digest, &auth.signature)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return Ok(reject(
                    ReasonCode::InvalidSignature,
                    "signature does not recover the payer identity",
                ));
            }
            Err(AdapterError::MalformedField(detail)) => {
                return Ok(reject(ReasonCode::InvalidSignature, detail));
            }
            Err(other) => return Err(other.into()),
        }

        // 10. Replay. Read-only; no reservation happens here.
        let payer = canonical_identity(&auth.from);
        let nonce = canonical_identity(&auth.nonce);
        if self.ledger.is_consumed(&payer, &nonce)? {
            return Ok(reject(
                ReasonCode::NonceReused,
                "authorization nonce already consumed",
            ));
        }

        // 11. Balance.
        let balance = self.adapter.balance(&auth.token, &auth.from).await?;
        if balance < amount {
            return Ok(reject(
                ReasonCode::InsufficientBalance,
                format!("payer balance {balance} below authorized amount {amount}"),
            ));
        }

        // 12. Allowance, when the settlement model moves funds the payer
        // pre-approved to the facilitator.
        if self.adapter.requires_allowance() {
            let spender = self.adapter.settler_identity();
            let allowance = self
                .adapter
                .allowance(&auth.token, &auth.from, &spender)
                .await?;
            if allowance < amount {
                return Ok(reject(
                    ReasonCode::InsufficientAllowance,
                    format!("facilitator allowance {allowance} below authorized amount {amount}"),
                ));
            }
        }

        Ok(VerificationResult::valid())
    }
}

fn reject(reason: ReasonCode, description: impl Into<String>) -> VerificationResult {
    let description = description.into();
    tracing::debug!(reason = %reason, %description, "payment rejected");
    VerificationResult::invalid(reason, description)
}
