//! HTTP gateway middleware for tollgate payments.
//!
//! Protect axum routes with [`PaymentGateLayer`]: requests must carry a
//! valid `X-PAYMENT` header, which is verified and settled through a
//! [`Facilitator`](tollgate::Facilitator) — either an in-process
//! [`PaymentEngine`](tollgate::PaymentEngine) or a remote facilitator via
//! [`FacilitatorClient`] — before the request reaches the inner service.

pub mod client;
pub mod error;
pub mod gate;
pub mod layer;

pub use client::{FacilitatorClient, FacilitatorClientError};
pub use error::GateError;
pub use gate::PaymentGate;
pub use layer::{PaymentGateLayer, PaymentGateService};
