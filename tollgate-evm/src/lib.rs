//! EVM chain adapter for the tollgate payment engine.
//!
//! Implements [`ChainAdapter`](tollgate::adapter::ChainAdapter) for
//! eip155 networks: EIP-712 authorization digests, ECDSA signature
//! recovery, ERC-20 balance/allowance queries, and settlement via
//! `transferFrom` under a payer-granted allowance.

pub mod adapter;
pub mod networks;

pub use adapter::{Eip155Adapter, EvmAdapterError};
pub use networks::{chain_id_for, known_networks, NetworkInfo};
