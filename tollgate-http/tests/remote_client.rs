//! Remote facilitator client against a mocked HTTP facilitator.

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tollgate::proto::{
    PaymentPayload, PaymentRequirements, ReasonCode, TransferAuthorization, PROTOCOL_VERSION,
    SCHEME_EXACT,
};
use tollgate::timestamp::UnixTimestamp;
use tollgate_http::FacilitatorClient;

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

fn payload() -> PaymentPayload {
    PaymentPayload {
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
    }
}

async fn client_for(server: &MockServer) -> FacilitatorClient {
    FacilitatorClient::try_new(Url::parse(&server.uri()).unwrap()).unwrap()
}

#[tokio::test]
async fn verify_round_trips_the_wire_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .and(body_partial_json(json!({
            "version": 1,
            "paymentRequirements": { "network": "testnet" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isValid": false,
            "invalidReason": "insufficient_balance",
            "description": "payer balance 0 below authorized amount 100"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let verdict = client.verify(&payload(), &requirements()).await.unwrap();
    assert!(!verdict.is_valid);
    assert_eq!(
        verdict.invalid_reason,
        Some(ReasonCode::InsufficientBalance)
    );
}

#[tokio::test]
async fn settle_decodes_a_successful_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/settle"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "error": null,
            "txReference": "0xabc123",
            "networkId": "testnet",
            "description": null
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let outcome = client.settle(&payload(), &requirements()).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.tx_reference.as_deref(), Some("0xabc123"));
}

#[tokio::test]
async fn supported_lists_capabilities() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/supported"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "schemes": ["exact"],
            "networks": ["base", "testnet"]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let supported = client.supported().await.unwrap();
    assert_eq!(supported.schemes, vec!["exact"]);
    assert_eq!(supported.networks, vec!["base", "testnet"]);
}

#[tokio::test]
async fn server_errors_surface_with_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/verify"))
        .respond_with(ResponseTemplate::new(500).set_body_string("nonce ledger unavailable"))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let err = client
        .verify(&payload(), &requirements())
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("500"), "{message}");
    assert!(message.contains("nonce ledger unavailable"), "{message}");
}
