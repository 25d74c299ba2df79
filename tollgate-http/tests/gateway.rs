//! Gateway middleware behavior against each row of the decision table.

use axum::body::Body;
use axum::routing::get;
use axum::Router;
use http::{Request, StatusCode};
use tower::ServiceExt;

use tollgate::encoding::{encode_payment_header, SettlementHeader, PAYMENT_RESPONSE_HEADER};
use tollgate::error::EngineError;
use tollgate::proto::{
    PaymentPayload, PaymentRequirements, ReasonCode, SettlementResult, SupportedResponse,
    TransferAuthorization, VerificationResult, PROTOCOL_VERSION, SCHEME_EXACT,
};
use tollgate::timestamp::UnixTimestamp;
use tollgate::Facilitator;
use tollgate_http::PaymentGateLayer;

#[derive(Clone)]
struct StubFacilitator {
    verify: VerificationResult,
    settle: SettlementResult,
}

impl StubFacilitator {
    fn accepting() -> Self {
        Self {
            verify: VerificationResult::valid(),
            settle: SettlementResult::settled("0xtx", "testnet"),
        }
    }
}

#[async_trait::async_trait]
impl Facilitator for StubFacilitator {
    async fn verify(
        &self,
        _payload: &PaymentPayload,
        _requirements: &PaymentRequirements,
    ) -> Result<VerificationResult, EngineError> {
        Ok(self.verify.clone())
    }

    async fn settle(
        &self,
        _payload: &PaymentPayload,
        _requirements: &PaymentRequirements,
    ) -> Result<SettlementResult, EngineError> {
        Ok(self.settle.clone())
    }

    async fn supported(&self) -> Result<SupportedResponse, EngineError> {
        Ok(SupportedResponse {
            schemes: vec![SCHEME_EXACT.into()],
            networks: vec!["testnet".into()],
        })
    }
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

fn payment_header() -> String {
    let payload = PaymentPayload {
        version: PROTOCOL_VERSION,
        scheme: SCHEME_EXACT.into(),
        network: "testnet".into(),
        payload: TransferAuthorization {
            from: "0xpayer".into(),
            to: "0xmerchant".into(),
            token: "0xtoken".into(),
            amount: "100".parse().unwrap(),
            nonce: "0x01".into(),
            deadline: UnixTimestamp::now().saturating_add(600),
            signature: "0xgood".into(),
        },
    };
    encode_payment_header(&payload).unwrap()
}

fn app(facilitator: StubFacilitator) -> Router {
    let layer = PaymentGateLayer::new(facilitator).with_accept(requirements());
    Router::new()
        .route("/report", get(|| async { "the report" }))
        .layer(layer)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn unprotected_layer_forwards_unchanged() {
    let layer = PaymentGateLayer::new(StubFacilitator::accepting());
    let app = Router::new()
        .route("/free", get(|| async { "free" }))
        .layer(layer);

    let response = app
        .oneshot(Request::builder().uri("/free").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(PAYMENT_RESPONSE_HEADER).is_none());
}

#[tokio::test]
async fn missing_header_yields_402_with_accepts() {
    let response = app(StubFacilitator::accepting())
        .oneshot(Request::builder().uri("/report").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

    let body = body_json(response).await;
    let accepts = body["accepts"].as_array().unwrap();
    assert_eq!(accepts.len(), 1);
    assert_eq!(accepts[0]["payTo"], "0xmerchant");
    assert_eq!(accepts[0]["maxAmountRequired"], "100");
}

#[tokio::test]
async fn malformed_header_yields_400() {
    let response = app(StubFacilitator::accepting())
        .oneshot(
            Request::builder()
                .uri("/report")
                .header("X-PAYMENT", "!!!not-base64!!!")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rejected_verification_yields_403_with_reason() {
    let facilitator = StubFacilitator {
        verify: VerificationResult::invalid(ReasonCode::InvalidSignature, "bad signature"),
        ..StubFacilitator::accepting()
    };
    let response = app(facilitator)
        .oneshot(
            Request::builder()
                .uri("/report")
                .header("X-PAYMENT", payment_header())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["reason"], "invalid_signature");
}

#[tokio::test]
async fn failed_settlement_yields_402_with_reason() {
    let facilitator = StubFacilitator {
        settle: SettlementResult::failed(
            ReasonCode::SettlementRejected,
            "testnet",
            "reverted on chain",
        ),
        ..StubFacilitator::accepting()
    };
    let response = app(facilitator)
        .oneshot(
            Request::builder()
                .uri("/report")
                .header("X-PAYMENT", payment_header())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body_json(response).await["reason"], "settlement_rejected");
}

#[tokio::test]
async fn unmatched_network_yields_402() {
    let facilitator = StubFacilitator::accepting();
    let mut other = requirements();
    other.network = "othernet".into();
    let layer = PaymentGateLayer::new(facilitator).with_accept(other);
    let app = Router::new()
        .route("/report", get(|| async { "the report" }))
        .layer(layer);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/report")
                .header("X-PAYMENT", payment_header())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn settled_payment_forwards_with_proof_header() {
    let response = app(StubFacilitator::accepting())
        .oneshot(
            Request::builder()
                .uri("/report")
                .header("X-PAYMENT", payment_header())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let proof = response
        .headers()
        .get(PAYMENT_RESPONSE_HEADER)
        .expect("settlement proof header")
        .to_str()
        .unwrap()
        .to_owned();
    let proof = SettlementHeader::decode(&proof).unwrap();
    assert_eq!(proof.tx_reference, "0xtx");
    assert_eq!(proof.network_id, "testnet");
    assert!(proof.timestamp.as_secs() > 0);

    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"the report");
}

#[tokio::test]
async fn engine_fault_yields_500() {
    #[derive(Clone)]
    struct DownFacilitator;

    #[async_trait::async_trait]
    impl Facilitator for DownFacilitator {
        async fn verify(
            &self,
            _payload: &PaymentPayload,
            _requirements: &PaymentRequirements,
        ) -> Result<VerificationResult, EngineError> {
            Err(EngineError::Transport("facilitator unreachable".into()))
        }

        async fn settle(
            &self,
            _payload: &PaymentPayload,
            _requirements: &PaymentRequirements,
        ) -> Result<SettlementResult, EngineError> {
            Err(EngineError::Transport("facilitator unreachable".into()))
        }

        async fn supported(&self) -> Result<SupportedResponse, EngineError> {
            Err(EngineError::Transport("facilitator unreachable".into()))
        }
    }

    let layer = PaymentGateLayer::new(DownFacilitator).with_accept(requirements());
    let app = Router::new()
        .route("/report", get(|| async { "the report" }))
        .layer(layer);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/report")
                .header("X-PAYMENT", payment_header())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
