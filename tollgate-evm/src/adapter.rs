//! `ChainAdapter` implementation for eip155 networks.

use std::time::Duration;

use alloy_primitives::{hex, Address, Bytes, Signature, B256, U256};
use alloy_provider::Provider;
use alloy_rpc_types_eth::TransactionRequest;
use alloy_sol_types::{eip712_domain, sol, SolCall, SolStruct};
use alloy_transport::TransportError;
use tokio::time::Instant;

use tollgate::adapter::{AdapterError, ChainAdapter, Finality, TxRef};
use tollgate::proto::TransferAuthorization;

use crate::networks::chain_id_for;

sol! {
    /// EIP-712 struct the payer signs. Field order is part of the type
    /// hash and must never change.
    struct PaymentAuthorization {
        address from;
        address to;
        address token;
        uint256 amount;
        bytes32 nonce;
        uint256 deadline;
    }

    function balanceOf(address account) external view returns (uint256);
    function allowance(address owner, address spender) external view returns (uint256);
    function transferFrom(address from, address to, uint256 value) external returns (bool);
}

const EIP712_NAME: &str = "Tollgate";
const EIP712_VERSION: &str = "1";

/// How often settled transactions are polled for a receipt.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Errors constructing an [`Eip155Adapter`].
#[derive(Debug, thiserror::Error)]
pub enum EvmAdapterError {
    /// The network name is not in the built-in registry and no explicit
    /// chain ID was supplied.
    #[error("unknown eip155 network {0:?}")]
    UnknownNetwork(String),
}

/// Chain adapter for EVM networks.
///
/// Settlement uses the allowance model: the payer pre-approves the
/// facilitator's signer, and the signer submits `transferFrom`, bearing
/// the gas cost itself.
pub struct Eip155Adapter<P> {
    provider: P,
    signer: Address,
    network: String,
    chain_id: u64,
}

impl<P> std::fmt::Debug for Eip155Adapter<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Eip155Adapter")
            .field("signer", &self.signer)
            .field("network", &self.network)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

impl<P> Eip155Adapter<P>
where
    P: Provider + Send + Sync + 'static,
{
    /// Creates an adapter for a network in the built-in registry.
    ///
    /// `signer` is the facilitator's own wallet address; the provider is
    /// expected to sign transactions from it.
    ///
    /// # Errors
    ///
    /// Returns [`EvmAdapterError::UnknownNetwork`] for unregistered names.
    pub fn new(provider: P, signer: Address, network: &str) -> Result<Self, EvmAdapterError> {
        let chain_id =
            chain_id_for(network).ok_or_else(|| EvmAdapterError::UnknownNetwork(network.into()))?;
        Ok(Self::with_chain_id(provider, signer, network, chain_id))
    }

    /// Creates an adapter for an arbitrary network with an explicit
    /// chain ID.
    pub fn with_chain_id(provider: P, signer: Address, network: &str, chain_id: u64) -> Self {
        Self {
            provider,
            signer,
            network: network.to_owned(),
            chain_id,
        }
    }

    async fn read_u256(&self, token: Address, calldata: Vec<u8>) -> Result<U256, AdapterError> {
        let tx = TransactionRequest::default()
            .to(token)
            .input(Bytes::from(calldata).into());
        let result = self
            .provider
            .call(tx)
            .await
            .map_err(|e| AdapterError::Rpc(e.to_string()))?;
        if result.len() >= 32 {
            Ok(U256::from_be_slice(&result[..32]))
        } else {
            Err(AdapterError::Rpc(format!(
                "short eth_call response ({} bytes)",
                result.len()
            )))
        }
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address, AdapterError> {
    value
        .trim()
        .parse()
        .map_err(|e| AdapterError::MalformedField(format!("bad {field} address {value:?}: {e}")))
}

fn parse_nonce(value: &str) -> Result<B256, AdapterError> {
    let raw = hex::decode(value.trim().trim_start_matches("0x"))
        .map_err(|e| AdapterError::MalformedField(format!("bad nonce hex {value:?}: {e}")))?;
    if raw.len() == 32 {
        Ok(B256::from_slice(&raw))
    } else {
        Err(AdapterError::MalformedField(format!(
            "nonce must be 32 bytes, got {}",
            raw.len()
        )))
    }
}

/// Computes the EIP-712 signing hash of an authorization for a chain.
fn signing_digest(auth: &TransferAuthorization, chain_id: u64) -> Result<B256, AdapterError> {
    let message = PaymentAuthorization {
        from: parse_address("from", &auth.from)?,
        to: parse_address("to", &auth.to)?,
        token: parse_address("token", &auth.token)?,
        amount: auth.amount.inner(),
        nonce: parse_nonce(&auth.nonce)?,
        deadline: U256::from(auth.deadline.as_secs()),
    };
    let domain = eip712_domain! {
        name: EIP712_NAME,
        version: EIP712_VERSION,
        chain_id: chain_id,
    };
    Ok(message.eip712_signing_hash(&domain))
}

/// Recovers the signing address of a 64- or 65-byte hex ECDSA signature.
fn recover_signer(digest: B256, signature: &str) -> Result<Address, AdapterError> {
    let raw = hex::decode(signature.trim().trim_start_matches("0x"))
        .map_err(|e| AdapterError::MalformedField(format!("bad signature hex: {e}")))?;
    let signature = match raw.len() {
        65 => Signature::from_raw(&raw)
            .map_err(|e| AdapterError::MalformedField(format!("bad signature: {e}")))?
            .normalized_s(),
        64 => Signature::from_erc2098(&raw).normalized_s(),
        n => {
            return Err(AdapterError::MalformedField(format!(
                "signature must be 64 or 65 bytes, got {n}"
            )));
        }
    };
    signature
        .recover_address_from_prehash(&digest)
        .map_err(|e| AdapterError::MalformedField(format!("unrecoverable signature: {e}")))
}

#[async_trait::async_trait]
impl<P> ChainAdapter for Eip155Adapter<P>
where
    P: Provider + Send + Sync + 'static,
{
    fn network(&self) -> &str {
        &self.network
    }

    fn settler_identity(&self) -> String {
        self.signer.to_string()
    }

    fn authorization_digest(&self, auth: &TransferAuthorization) -> Result<B256, AdapterError> {
        signing_digest(auth, self.chain_id)
    }

    async fn verify_signature(
        &self,
        identity: &str,
        digest: B256,
        signature: &str,
    ) -> Result<bool, AdapterError> {
        let expected = parse_address("payer", identity)?;
        let recovered = recover_signer(digest, signature)?;
        Ok(recovered == expected)
    }

    async fn balance(&self, token: &str, account: &str) -> Result<U256, AdapterError> {
        let token = parse_address("token", token)?;
        let account = parse_address("account", account)?;
        self.read_u256(token, balanceOfCall { account }.abi_encode())
            .await
    }

    async fn allowance(
        &self,
        token: &str,
        owner: &str,
        spender: &str,
    ) -> Result<U256, AdapterError> {
        let token = parse_address("token", token)?;
        let owner = parse_address("owner", owner)?;
        let spender = parse_address("spender", spender)?;
        self.read_u256(token, allowanceCall { owner, spender }.abi_encode())
            .await
    }

    async fn submit_transfer(
        &self,
        token: &str,
        from: &str,
        to: &str,
        amount: U256,
    ) -> Result<TxRef, AdapterError> {
        let token = parse_address("token", token)?;
        let call = transferFromCall {
            from: parse_address("from", from)?,
            to: parse_address("to", to)?,
            value: amount,
        };
        let tx = TransactionRequest::default()
            .from(self.signer)
            .to(token)
            .input(Bytes::from(call.abi_encode()).into());

        match self.provider.send_transaction(tx).await {
            Ok(pending) => {
                let hash = *pending.tx_hash();
                tracing::debug!(tx = %hash, %amount, "transfer broadcast");
                Ok(TxRef::new(format!("{hash:?}")))
            }
            // The node examined and refused the transaction; nothing was
            // broadcast, so the caller may retry.
            Err(TransportError::ErrorResp(payload)) => {
                Err(AdapterError::Rejected(payload.message.to_string()))
            }
            Err(e) => Err(AdapterError::Rpc(e.to_string())),
        }
    }

    async fn await_finality(&self, tx: &TxRef, timeout: Duration) -> Result<Finality, AdapterError> {
        let hash: B256 = tx
            .as_str()
            .parse()
            .map_err(|e| AdapterError::MalformedField(format!("bad tx reference {tx}: {e}")))?;
        let deadline = Instant::now() + timeout;

        loop {
            match self.provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    return Ok(if receipt.status() {
                        Finality::Confirmed
                    } else {
                        Finality::Rejected
                    });
                }
                Ok(None) => {}
                // The transaction is already out; a flaky node here does
                // not change its fate, so keep polling until the deadline.
                Err(e) => tracing::debug!(tx = %hash, error = %e, "receipt poll failed"),
            }
            if Instant::now() + RECEIPT_POLL_INTERVAL > deadline {
                return Ok(Finality::Unknown);
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}
