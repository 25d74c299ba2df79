//! Library surface of the tollgate facilitator server.
//!
//! The binary in `main.rs` wires configuration, chain adapters, and the
//! nonce ledger into a [`PaymentEngine`](tollgate::PaymentEngine) and
//! serves it over the routes built by [`handlers::facilitator_router`].

pub mod config;
pub mod error;
pub mod handlers;
