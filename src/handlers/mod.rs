//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that parses and validates external
//! input, invokes the relevant service, and maps the result to an HTTP
//! response. Handlers hold no state of their own; every coordination
//! primitive lives in the database.

/// Card provisioning and balance snapshots
pub mod cards;
/// Payment-gateway webhook receiver
pub mod gateway;
/// Health check endpoint
pub mod health;
/// Idempotency ledger monitoring
pub mod monitoring;
/// Recharge/purchase entry points and audit reads
pub mod transactions;
