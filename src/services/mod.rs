//! Business logic services.
//!
//! Services contain the correctness-critical core separated from the HTTP
//! handlers: the idempotency ledger, the atomic transaction processor,
//! and gateway webhook verification.

pub mod gateway_service;
pub mod idempotency_service;
pub mod transaction_service;
