//! End-to-end flow: header decode, verification, settlement, replay.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{hex, keccak256, B256, U256};
use tollgate::adapter::{AdapterError, ChainAdapter, Finality, TxRef};
use tollgate::encoding::{decode_payment_header, encode_payment_header, SettlementHeader};
use tollgate::ledger::{MemoryNonceLedger, SqliteNonceLedger};
use tollgate::proto::{canonical_identity, TransferAuthorization, SCHEME_EXACT};
use tollgate::settle::SettleOptions;
use tollgate::timestamp::UnixTimestamp;
use tollgate::{
    Facilitator, PaymentEngine, PaymentPayload, PaymentRequirements, ReasonCode,
};

/// Test chain whose "signature" over an authorization is the hex of its
/// digest: tamper with any signed field and the signature stops matching,
/// mirroring how a real signature binds the message.
struct HashChain;

fn digest_of(auth: &TransferAuthorization) -> B256 {
    keccak256(format!(
        "{}|{}|{}|{}|{}|{}",
        canonical_identity(&auth.from),
        canonical_identity(&auth.to),
        canonical_identity(&auth.token),
        auth.amount.inner(),
        canonical_identity(&auth.nonce),
        auth.deadline.as_secs(),
    ))
}

#[async_trait::async_trait]
impl ChainAdapter for HashChain {
    fn network(&self) -> &str {
        "testnet"
    }

    fn settler_identity(&self) -> String {
        "0xfacilitator".into()
    }

    fn authorization_digest(&self, auth: &TransferAuthorization) -> Result<B256, AdapterError> {
        Ok(digest_of(auth))
    }

    async fn verify_signature(
        &self,
        _identity: &str,
        digest: B256,
        signature: &str,
    ) -> Result<bool, AdapterError> {
        let raw = hex::decode(signature.trim_start_matches("0x"))
            .map_err(|e| AdapterError::MalformedField(format!("bad signature hex: {e}")))?;
        Ok(raw == digest.as_slice())
    }

    async fn balance(&self, _token: &str, _account: &str) -> Result<U256, AdapterError> {
        Ok(U256::from(10_000_000_000_000_000_u64))
    }

    async fn allowance(
        &self,
        _token: &str,
        _owner: &str,
        _spender: &str,
    ) -> Result<U256, AdapterError> {
        Ok(U256::from(10_000_000_000_000_000_u64))
    }

    async fn submit_transfer(
        &self,
        _token: &str,
        from: &str,
        to: &str,
        amount: U256,
    ) -> Result<TxRef, AdapterError> {
        let hash = keccak256(format!("{from}->{to}:{amount}"));
        Ok(TxRef::new(format!("0x{}", hex::encode(hash))))
    }

    async fn await_finality(
        &self,
        _tx: &TxRef,
        _timeout: Duration,
    ) -> Result<Finality, AdapterError> {
        Ok(Finality::Confirmed)
    }
}

fn requirements() -> PaymentRequirements {
    PaymentRequirements {
        scheme: SCHEME_EXACT.into(),
        network: "testnet".into(),
        asset: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".into(),
        pay_to: "0x209693bc6afc0c5328ba36faf03c514ef312287c".into(),
        max_amount_required: "10000000000000000".parse().unwrap(),
        resource: "https://api.example.com/reports/weather".into(),
        description: "one weather report".into(),
        max_timeout_seconds: 30,
    }
}

fn signed_payload(nonce: &str) -> PaymentPayload {
    let mut auth = TransferAuthorization {
        from: "0x857b06519E91e3A54538791bDbb0E22373e36b66".into(),
        to: "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".into(),
        token: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913".into(),
        amount: "10000000000000000".parse().unwrap(),
        nonce: nonce.into(),
        deadline: UnixTimestamp::now().saturating_add(600),
        signature: String::new(),
    };
    auth.signature = format!("0x{}", hex::encode(digest_of(&auth)));
    PaymentPayload {
        version: tollgate::proto::PROTOCOL_VERSION,
        scheme: SCHEME_EXACT.into(),
        network: "testnet".into(),
        payload: auth,
    }
}

fn engine_with(ledger: Arc<dyn tollgate::ledger::NonceLedger>) -> PaymentEngine {
    let mut engine = PaymentEngine::new(ledger, SettleOptions::default());
    engine.register(Arc::new(HashChain));
    engine
}

#[tokio::test]
async fn wire_roundtrip_verify_settle_and_replay() {
    let engine = engine_with(Arc::new(MemoryNonceLedger::new()));
    let requirements = requirements();

    // The payload crosses the wire as a base64 header and comes back intact.
    let header = encode_payment_header(&signed_payload("0x0101")).unwrap();
    let payload = decode_payment_header(&header).expect("decodes");
    assert_eq!(payload, signed_payload("0x0101"));

    // Verification passes and is repeatable.
    for _ in 0..2 {
        let verdict = engine.verify(&payload, &requirements).await.unwrap();
        assert!(verdict.is_valid, "{verdict:?}");
    }

    // Settlement succeeds once and yields a proof header.
    let outcome = engine.settle(&payload, &requirements).await.unwrap();
    assert!(outcome.success, "{outcome:?}");
    let tx = outcome.tx_reference.clone().expect("has tx reference");
    let proof = SettlementHeader {
        tx_reference: tx.clone(),
        network_id: outcome.network_id.clone().expect("has network"),
        timestamp: UnixTimestamp::now(),
    };
    let decoded = SettlementHeader::decode(&proof.encode().unwrap()).unwrap();
    assert_eq!(decoded.tx_reference, tx);
    assert_eq!(decoded.network_id, "testnet");

    // The same signed payload can never settle twice.
    let replay = engine.settle(&payload, &requirements).await.unwrap();
    assert!(!replay.success);
    assert_eq!(replay.error, Some(ReasonCode::NonceReused));

    // And verification now reports it as spent too.
    let verdict = engine.verify(&payload, &requirements).await.unwrap();
    assert_eq!(verdict.invalid_reason, Some(ReasonCode::NonceReused));
}

#[tokio::test]
async fn tampering_after_signing_invalidates_the_signature() {
    let engine = engine_with(Arc::new(MemoryNonceLedger::new()));
    let requirements = requirements();

    let mut payload = signed_payload("0x0202");
    payload.payload.amount = "20000000000000000".parse().unwrap();

    let verdict = engine.verify(&payload, &requirements).await.unwrap();
    assert_eq!(verdict.invalid_reason, Some(ReasonCode::InvalidSignature));
}

#[tokio::test]
async fn amount_below_requirement_is_rejected_at_the_boundary() {
    let engine = engine_with(Arc::new(MemoryNonceLedger::new()));
    let requirements = requirements();

    let mut auth = signed_payload("0x0303").payload;
    auth.amount = "9999999999999999".parse().unwrap();
    auth.signature = format!("0x{}", hex::encode(digest_of(&auth)));
    let payload = PaymentPayload {
        payload: auth,
        ..signed_payload("0x0303")
    };

    let verdict = engine.verify(&payload, &requirements).await.unwrap();
    assert_eq!(verdict.invalid_reason, Some(ReasonCode::InsufficientAmount));
}

#[tokio::test]
async fn replay_safety_spans_engine_instances_sharing_the_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nonces.db");
    let requirements = requirements();
    let payload = signed_payload("0x0404");

    {
        let engine = engine_with(Arc::new(SqliteNonceLedger::open(&path).unwrap()));
        let outcome = engine.settle(&payload, &requirements).await.unwrap();
        assert!(outcome.success);
    }

    // A second engine over the same database sees the consumed nonce.
    let engine = engine_with(Arc::new(SqliteNonceLedger::open(&path).unwrap()));
    let replay = engine.settle(&payload, &requirements).await.unwrap();
    assert!(!replay.success);
    assert_eq!(replay.error, Some(ReasonCode::NonceReused));
}
