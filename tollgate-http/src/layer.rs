//! Tower layer wiring [`PaymentGate`] into an axum middleware stack.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum_core::extract::Request;
use axum_core::response::Response;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};

use tollgate::proto::PaymentRequirements;
use tollgate::Facilitator;

use crate::gate::PaymentGate;

/// Builds payment-gated layers for protected routes.
///
/// Create one per facilitator, then attach per-route requirements:
///
/// ```ignore
/// let layer = PaymentGateLayer::new(facilitator).with_accept(requirements);
/// let app = Router::new().route("/report", get(report)).layer(layer);
/// ```
///
/// A layer with no requirements forwards every request untouched, so an
/// unconfigured route is never accidentally paywalled shut.
#[allow(missing_debug_implementations)]
pub struct PaymentGateLayer<F> {
    facilitator: F,
    accepts: Arc<Vec<PaymentRequirements>>,
}

impl<F: Clone> Clone for PaymentGateLayer<F> {
    fn clone(&self) -> Self {
        Self {
            facilitator: self.facilitator.clone(),
            accepts: Arc::clone(&self.accepts),
        }
    }
}

impl<F> PaymentGateLayer<F> {
    /// Creates a layer with no payment requirements attached yet.
    #[must_use]
    pub fn new(facilitator: F) -> Self {
        Self {
            facilitator,
            accepts: Arc::new(Vec::new()),
        }
    }

    /// Adds an accepted payment option. Call once per (scheme, network)
    /// the route should accept.
    #[must_use]
    pub fn with_accept(mut self, requirements: PaymentRequirements) -> Self {
        let mut accepts = (*self.accepts).clone();
        accepts.push(requirements);
        self.accepts = Arc::new(accepts);
        self
    }
}

impl<S, F> Layer<S> for PaymentGateLayer<F>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    F: Facilitator + Clone,
{
    type Service = PaymentGateService<F>;

    fn layer(&self, inner: S) -> Self::Service {
        PaymentGateService {
            facilitator: self.facilitator.clone(),
            accepts: Arc::clone(&self.accepts),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// The middleware service produced by [`PaymentGateLayer`].
#[allow(missing_debug_implementations)]
pub struct PaymentGateService<F> {
    facilitator: F,
    accepts: Arc<Vec<PaymentRequirements>>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<F: Clone> Clone for PaymentGateService<F> {
    fn clone(&self) -> Self {
        Self {
            facilitator: self.facilitator.clone(),
            accepts: Arc::clone(&self.accepts),
            inner: self.inner.clone(),
        }
    }
}

impl<F> Service<Request> for PaymentGateService<F>
where
    F: Facilitator + Clone + Send + Sync + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let facilitator = self.facilitator.clone();
        let accepts = Arc::clone(&self.accepts);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if accepts.is_empty() {
                return inner.call(req).await;
            }
            let gate = PaymentGate {
                facilitator,
                accepts,
            };
            gate.handle_request(inner, req).await
        })
    }
}
