//! Data models representing database entities and API payloads.

/// Terminal API key authentication model
pub mod api_key;
/// Stored-value card model
pub mod card;
/// Payment-gateway webhook payloads
pub mod gateway;
/// Idempotency ledger rows and statuses
pub mod idempotency;
/// Transaction log entities and request/response types
pub mod transaction;
