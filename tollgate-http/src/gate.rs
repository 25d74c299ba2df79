//! Core payment gate: the decision table between a request and the
//! protected resource.

use std::convert::Infallible;
use std::sync::Arc;

use axum_core::body::Body;
use axum_core::response::{IntoResponse, Response};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::json;
use tower::Service;

use tollgate::encoding::{
    decode_payment_header, SettlementHeader, PAYMENT_HEADER, PAYMENT_RESPONSE_HEADER,
};
use tollgate::proto::{PaymentPayload, PaymentRequirements, ReasonCode};
use tollgate::timestamp::UnixTimestamp;
use tollgate::Facilitator;

use crate::error::GateError;

/// Enforces payment on a single protected route.
///
/// Settlement happens before the request is forwarded: the inner service
/// only ever runs for requests whose payment is already irreversible, so
/// a resource is never served against a payment that later fails.
#[allow(missing_debug_implementations)]
pub struct PaymentGate<F> {
    /// Verifies and settles payments, locally or remotely.
    pub facilitator: F,
    /// Payment requirements this route accepts, one per (scheme, network).
    pub accepts: Arc<Vec<PaymentRequirements>>,
}

impl<F> PaymentGate<F>
where
    F: Facilitator,
{
    /// Runs the decision table for one request, converting every gate
    /// refusal into its HTTP response.
    ///
    /// # Errors
    ///
    /// Infallible; refusals become responses.
    pub async fn handle_request<ReqBody, ResBody, S>(
        &self,
        inner: S,
        req: http::Request<ReqBody>,
    ) -> Result<Response, Infallible>
    where
        S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
        S::Response: IntoResponse,
        S::Error: IntoResponse,
        S::Future: Send,
    {
        match self.handle_request_fallible(inner, req).await {
            Ok(response) => Ok(response),
            Err(err) => Ok(refusal_into_response(&err, &self.accepts)),
        }
    }

    /// Fallible form of [`Self::handle_request`], for callers that want
    /// the [`GateError`] rather than a finished response.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] when the request does not pay its way.
    pub async fn handle_request_fallible<ReqBody, ResBody, S>(
        &self,
        mut inner: S,
        req: http::Request<ReqBody>,
    ) -> Result<Response, GateError>
    where
        S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>,
        S::Response: IntoResponse,
        S::Error: IntoResponse,
        S::Future: Send,
    {
        let payload = extract_payment(req.headers())?;
        let requirements = self.matching_requirements(&payload)?;

        let verdict = self
            .facilitator
            .verify(&payload, requirements)
            .await
            .map_err(|e| GateError::Engine(e.to_string()))?;
        if !verdict.is_valid {
            return Err(GateError::Rejected {
                reason: verdict.invalid_reason.unwrap_or(ReasonCode::InternalError),
                detail: verdict.description,
            });
        }

        let outcome = self
            .facilitator
            .settle(&payload, requirements)
            .await
            .map_err(|e| GateError::Engine(e.to_string()))?;
        if !outcome.success {
            return Err(GateError::SettlementFailed {
                reason: outcome.error.unwrap_or(ReasonCode::InternalError),
                detail: outcome.description,
            });
        }
        let proof = SettlementHeader {
            tx_reference: outcome.tx_reference.unwrap_or_default(),
            network_id: outcome.network_id.unwrap_or_default(),
            timestamp: UnixTimestamp::now(),
        };
        let proof_value = proof
            .encode()
            .ok()
            .and_then(|v| HeaderValue::from_str(&v).ok())
            .ok_or_else(|| GateError::Engine("unencodable settlement proof".into()))?;

        // Payment is settled; serve the resource and attach the proof.
        let response = match inner.call(req).await {
            Ok(response) => response.into_response(),
            Err(err) => err.into_response(),
        };
        let mut response = response;
        response
            .headers_mut()
            .insert(PAYMENT_RESPONSE_HEADER, proof_value);
        Ok(response)
    }

    fn matching_requirements(
        &self,
        payload: &PaymentPayload,
    ) -> Result<&PaymentRequirements, GateError> {
        self.accepts
            .iter()
            .find(|r| r.scheme == payload.scheme && r.network == payload.network)
            .ok_or(GateError::NoMatchingRequirements)
    }
}

fn extract_payment(headers: &HeaderMap) -> Result<PaymentPayload, GateError> {
    let value = headers.get(PAYMENT_HEADER).ok_or(GateError::MissingPayment)?;
    let value = value
        .to_str()
        .map_err(|_| GateError::MalformedPayment("header is not valid ascii".into()))?;
    decode_payment_header(value).map_err(|e| GateError::MalformedPayment(e.to_string()))
}

/// Renders a gate refusal as its HTTP response. 402 responses carry the
/// accepted requirements so the payer can construct a valid payment.
fn refusal_into_response(err: &GateError, accepts: &[PaymentRequirements]) -> Response {
    let status = err.status();
    tracing::debug!(%status, error = %err, "request refused at payment gate");

    let mut body = json!({ "error": err.to_string() });
    match err {
        GateError::Rejected { reason, .. } | GateError::SettlementFailed { reason, .. } => {
            body["reason"] = json!(reason);
        }
        _ => {}
    }
    if status == StatusCode::PAYMENT_REQUIRED {
        body["accepts"] = json!(accepts);
    }

    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
