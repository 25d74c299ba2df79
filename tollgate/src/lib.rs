//! Core payment verification and settlement engine for tollgate.
//!
//! Tollgate is an HTTP-native micropayment facilitator: a client embeds a
//! signed, single-use payment authorization in an HTTP request, a resource
//! server forwards that authorization here, and the engine validates it
//! against merchant-declared payment requirements before converting it into
//! an irrevocable ledger transfer.
//!
//! This crate is ledger-agnostic. Chain-specific access (signature
//! recovery, balance queries, transfer submission) is provided by
//! implementations of [`adapter::ChainAdapter`] in separate crates.
//!
//! # Modules
//!
//! - [`adapter`] - Abstract ledger-access capability
//! - [`encoding`] - Base64 payment header codec
//! - [`error`] - Engine fault types
//! - [`facilitator`] - The [`Facilitator`](facilitator::Facilitator) trait
//!   and [`PaymentEngine`](facilitator::PaymentEngine)
//! - [`ledger`] - Durable nonce ledger guaranteeing at-most-once settlement
//! - [`proto`] - Wire format types and the reason-code taxonomy
//! - [`settle`] - Settlement executor
//! - [`timestamp`] - Unix timestamp wire type
//! - [`verify`] - Pure, ordered payment verification

pub mod adapter;
pub mod encoding;
pub mod error;
pub mod facilitator;
pub mod ledger;
pub mod proto;
pub mod settle;
pub mod timestamp;
pub mod verify;

pub use error::EngineError;
pub use facilitator::{Facilitator, PaymentEngine};
pub use proto::{
    PaymentPayload, PaymentRequirements, ReasonCode, SettlementResult, SupportedResponse,
    VerificationResult,
};
