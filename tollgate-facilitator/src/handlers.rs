//! Axum route handlers for the facilitator API.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

use tollgate::encoding::decode_payment_header;
use tollgate::proto::{
    PaymentPayload, SettleRequest, SettlementResult, SupportedResponse, VerificationResult,
    VerifyRequest, PROTOCOL_VERSION,
};
use tollgate::{Facilitator, PaymentEngine};

use crate::error::ApiError;

/// Shared application state.
pub type FacilitatorState = Arc<PaymentEngine>;

/// Decodes the request envelope's payment header, rejecting the request
/// before the engine is involved.
fn decode_request(version: u8, payment_header: &str) -> Result<PaymentPayload, ApiError> {
    if version != PROTOCOL_VERSION {
        return Err(ApiError::Malformed(format!(
            "unsupported envelope version {version} (expected {PROTOCOL_VERSION})"
        )));
    }
    decode_payment_header(payment_header).map_err(|e| ApiError::Malformed(e.to_string()))
}

/// `POST /verify` — validates a payment payload without settling it.
///
/// # Errors
///
/// 400 on a malformed envelope, 500 on engine faults.
pub async fn post_verify(
    State(engine): State<FacilitatorState>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<VerificationResult>, ApiError> {
    let payload = decode_request(body.version, &body.payment_header)?;
    let result = engine.verify(&payload, &body.payment_requirements).await?;
    Ok(Json(result))
}

/// `POST /settle` — executes a verified payment exactly once.
///
/// # Errors
///
/// 400 on a malformed envelope, 500 on engine faults.
pub async fn post_settle(
    State(engine): State<FacilitatorState>,
    Json(body): Json<SettleRequest>,
) -> Result<Json<SettlementResult>, ApiError> {
    let payload = decode_request(body.version, &body.payment_header)?;
    let result = engine.settle(&payload, &body.payment_requirements).await?;
    Ok(Json(result))
}

/// `GET /supported` — lists settleable schemes and networks.
///
/// # Errors
///
/// 500 on engine faults.
pub async fn get_supported(
    State(engine): State<FacilitatorState>,
) -> Result<Json<SupportedResponse>, ApiError> {
    Ok(Json(engine.supported().await?))
}

/// Builds the facilitator API router.
#[must_use]
pub fn facilitator_router(state: FacilitatorState) -> Router {
    Router::new()
        .route("/verify", post(post_verify))
        .route("/settle", post(post_settle))
        .route("/supported", get(get_supported))
        .with_state(state)
}
