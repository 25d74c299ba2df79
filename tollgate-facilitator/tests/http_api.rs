//! Facilitator HTTP API against an in-memory engine.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{B256, U256};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use tollgate::adapter::{AdapterError, ChainAdapter, Finality, TxRef};
use tollgate::encoding::encode_payment_header;
use tollgate::ledger::MemoryNonceLedger;
use tollgate::proto::{
    PaymentPayload, PaymentRequirements, SettleRequest, TransferAuthorization, VerifyRequest,
    PROTOCOL_VERSION, SCHEME_EXACT,
};
use tollgate::settle::SettleOptions;
use tollgate::timestamp::UnixTimestamp;
use tollgate::PaymentEngine;
use tollgate_facilitator::handlers::facilitator_router;

struct TestChain;

#[async_trait::async_trait]
impl ChainAdapter for TestChain {
    fn network(&self) -> &str {
        "testnet"
    }

    fn settler_identity(&self) -> String {
        "0xfacilitator".into()
    }

    fn authorization_digest(&self, _auth: &TransferAuthorization) -> Result<B256, AdapterError> {
        Ok(B256::ZERO)
    }

    async fn verify_signature(
        &self,
        _identity: &str,
        _digest: B256,
        signature: &str,
    ) -> Result<bool, AdapterError> {
        Ok(signature == "0xgood")
    }

    async fn balance(&self, _token: &str, _account: &str) -> Result<U256, AdapterError> {
        Ok(U256::from(1_000_u64))
    }

    async fn allowance(
        &self,
        _token: &str,
        _owner: &str,
        _spender: &str,
    ) -> Result<U256, AdapterError> {
        Ok(U256::from(1_000_u64))
    }

    async fn submit_transfer(
        &self,
        _token: &str,
        _from: &str,
        _to: &str,
        _amount: U256,
    ) -> Result<TxRef, AdapterError> {
        Ok(TxRef::new("0xsettled"))
    }

    async fn await_finality(
        &self,
        _tx: &TxRef,
        _timeout: Duration,
    ) -> Result<Finality, AdapterError> {
        Ok(Finality::Confirmed)
    }
}

fn app() -> axum::Router {
    let mut engine = PaymentEngine::new(
        Arc::new(MemoryNonceLedger::new()),
        SettleOptions::default(),
    );
    engine.register(Arc::new(TestChain));
    facilitator_router(Arc::new(engine))
}

fn requirements() -> PaymentRequirements {
    PaymentRequirements {
        scheme: SCHEME_EXACT.into(),
        network: "testnet".into(),
        asset: "0xtoken".into(),
        pay_to: "0xmerchant".into(),
        max_amount_required: "100".parse().unwrap(),
        resource: "https://example.com/report".into(),
        description: "one report".into(),
        max_timeout_seconds: 30,
    }
}

fn payment_header(nonce: &str, signature: &str) -> String {
    let payload = PaymentPayload {
        version: PROTOCOL_VERSION,
        scheme: SCHEME_EXACT.into(),
        network: "testnet".into(),
        payload: TransferAuthorization {
            from: "0xpayer".into(),
            to: "0xmerchant".into(),
            token: "0xtoken".into(),
            amount: "100".parse().unwrap(),
            nonce: nonce.into(),
            deadline: UnixTimestamp::now().saturating_add(600),
            signature: signature.into(),
        },
    };
    encode_payment_header(&payload).unwrap()
}

fn json_request(uri: &str, body: &impl serde::Serialize) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn supported_reports_schemes_and_networks() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/supported")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["schemes"], serde_json::json!(["exact"]));
    assert_eq!(body["networks"], serde_json::json!(["testnet"]));
}

#[tokio::test]
async fn verify_answers_valid_and_invalid_payments() {
    let request = VerifyRequest {
        version: PROTOCOL_VERSION,
        payment_header: payment_header("0x01", "0xgood"),
        payment_requirements: requirements(),
    };
    let response = app()
        .oneshot(json_request("/verify", &request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["isValid"], true);

    let request = VerifyRequest {
        version: PROTOCOL_VERSION,
        payment_header: payment_header("0x01", "0xbad"),
        payment_requirements: requirements(),
    };
    let response = app()
        .oneshot(json_request("/verify", &request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["isValid"], false);
    assert_eq!(body["invalidReason"], "invalid_signature");
}

#[tokio::test]
async fn malformed_payment_header_is_a_400() {
    let request = VerifyRequest {
        version: PROTOCOL_VERSION,
        payment_header: "%%%not-base64%%%".into(),
        payment_requirements: requirements(),
    };
    let response = app()
        .oneshot(json_request("/verify", &request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unsupported_envelope_version_is_a_400() {
    let request = VerifyRequest {
        version: 0,
        payment_header: payment_header("0x01", "0xgood"),
        payment_requirements: requirements(),
    };
    let response = app()
        .oneshot(json_request("/verify", &request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn settle_succeeds_once_then_reports_replay() {
    let app = app();
    let request = SettleRequest {
        version: PROTOCOL_VERSION,
        payment_header: payment_header("0x02", "0xgood"),
        payment_requirements: requirements(),
    };

    let response = app
        .clone()
        .oneshot(json_request("/settle", &request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["txReference"], "0xsettled");
    assert_eq!(body["networkId"], "testnet");

    let response = app
        .oneshot(json_request("/settle", &request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "nonce_reused");
}
