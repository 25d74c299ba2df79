//! Facilitator trait and the network-routing payment engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::adapter::ChainAdapter;
use crate::error::EngineError;
use crate::ledger::NonceLedger;
use crate::proto::{
    PaymentPayload, PaymentRequirements, ReasonCode, SettlementResult, SupportedResponse,
    VerificationResult, SCHEME_EXACT,
};
use crate::settle::{SettleOptions, Settler};
use crate::verify::Verifier;

/// The facilitator capability: verify and settle payments.
///
/// Implemented locally by [`PaymentEngine`] and remotely by HTTP clients
/// speaking the facilitator API, so gateway code is written once against
/// this trait.
#[async_trait::async_trait]
pub trait Facilitator: Send + Sync {
    /// Validates a payment payload without settling it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when no verdict could be produced.
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerificationResult, EngineError>;

    /// Executes a verified payment exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on infrastructure faults with no
    /// irreversible effect; retry is then safe.
    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettlementResult, EngineError>;

    /// Lists the schemes and networks this facilitator can settle on.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transport`] for remote implementations.
    async fn supported(&self) -> Result<SupportedResponse, EngineError>;
}

struct Route {
    verifier: Verifier,
    settler: Settler,
}

/// Local facilitator routing payments by network to registered chain
/// adapters, all sharing one nonce ledger.
///
/// An unregistered network is a domain answer (`network_mismatch`), not
/// an engine fault: the caller asked for a chain this deployment does not
/// serve.
pub struct PaymentEngine {
    routes: BTreeMap<String, Route>,
    ledger: Arc<dyn NonceLedger>,
    options: SettleOptions,
}

impl std::fmt::Debug for PaymentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentEngine")
            .field("networks", &self.routes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl PaymentEngine {
    /// Creates an engine with no registered networks.
    #[must_use]
    pub fn new(ledger: Arc<dyn NonceLedger>, options: SettleOptions) -> Self {
        Self {
            routes: BTreeMap::new(),
            ledger,
            options,
        }
    }

    /// Registers a chain adapter under its own network identifier,
    /// replacing any previous adapter for that network.
    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) {
        let network = adapter.network().to_owned();
        tracing::info!(%network, "registered chain adapter");
        self.routes.insert(
            network,
            Route {
                verifier: Verifier::new(Arc::clone(&adapter), Arc::clone(&self.ledger)),
                settler: Settler::new(adapter, Arc::clone(&self.ledger), self.options.clone()),
            },
        );
    }

    /// Registered network identifiers, in sorted order.
    #[must_use]
    pub fn networks(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    fn route(&self, network: &str) -> Option<&Route> {
        self.routes.get(network)
    }
}

#[async_trait::async_trait]
impl Facilitator for PaymentEngine {
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerificationResult, EngineError> {
        match self.route(&requirements.network) {
            Some(route) => route.verifier.verify(payload, requirements).await,
            None => Ok(VerificationResult::invalid(
                ReasonCode::NetworkMismatch,
                format!("no adapter registered for network {:?}", requirements.network),
            )),
        }
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettlementResult, EngineError> {
        match self.route(&requirements.network) {
            Some(route) => route.settler.settle(payload, requirements).await,
            None => Ok(SettlementResult::failed(
                ReasonCode::NetworkMismatch,
                requirements.network.clone(),
                format!("no adapter registered for network {:?}", requirements.network),
            )),
        }
    }

    async fn supported(&self) -> Result<SupportedResponse, EngineError> {
        Ok(SupportedResponse {
            schemes: vec![SCHEME_EXACT.to_owned()],
            networks: self.networks(),
        })
    }
}
