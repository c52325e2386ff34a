//! API key model for terminal authentication.
//!
//! Checkpoint and bar terminals authenticate with an API key handed out
//! during provisioning. Keys are stored as SHA-256 hashes; the plaintext
//! never touches the database.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Represents an API key record from the database.
///
/// # Database Table
///
/// Maps to the `api_keys` table. When a request arrives with
/// `Authorization: Bearer <key>`, the key is hashed and looked up by
/// `key_hash` with `is_active = true`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKey {
    /// Unique identifier for this API key
    pub id: Uuid,

    /// SHA-256 hash of the actual key (64 hex characters)
    pub key_hash: String,

    /// Human-readable name of the terminal using this key
    pub terminal_name: String,

    /// Timestamp when this key was created
    pub created_at: DateTime<Utc>,

    /// Whether this key is currently valid.
    ///
    /// Deactivating a key revokes the terminal without deleting the
    /// record, keeping audit references intact.
    pub is_active: bool,
}
