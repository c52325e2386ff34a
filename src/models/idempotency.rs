//! Idempotency ledger rows and their state machine.
//!
//! A row moves `PROCESSING -> COMPLETED | FAILED` and never leaves a
//! terminal state. The `request_id` primary key doubles as the
//! concurrency primitive: racing reservations resolve through the unique
//! index, so exactly one caller ever observes a fresh insert.

use chrono::{DateTime, Utc};

/// Status of an idempotency ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyStatus {
    /// Reserved; the owning request is still executing
    Processing,
    /// Terminal: the operation committed, payload cached
    Completed,
    /// Terminal: the operation was rejected, rejection cached
    Failed,
}

impl IdempotencyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IdempotencyStatus::Processing => "processing",
            IdempotencyStatus::Completed => "completed",
            IdempotencyStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "processing" => Some(IdempotencyStatus::Processing),
            "completed" => Some(IdempotencyStatus::Completed),
            "failed" => Some(IdempotencyStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IdempotencyStatus::Completed | IdempotencyStatus::Failed
        )
    }
}

/// The terminal states a PROCESSING row may be finalized into.
///
/// Kept separate from [`IdempotencyStatus`] so `finalize` cannot be
/// called with `Processing` by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Completed,
    Failed,
}

impl TerminalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminalStatus::Completed => IdempotencyStatus::Completed.as_str(),
            TerminalStatus::Failed => IdempotencyStatus::Failed.as_str(),
        }
    }
}

/// Represents an idempotency ledger row from the database.
///
/// # Database Table
///
/// Maps to the `idempotency_keys` table. `response_payload` is populated
/// on finalization and returned verbatim to replayed requests.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IdempotencyKey {
    /// Client-generated request id, unique per logical operation
    pub request_id: String,

    /// Operation type that created the reservation
    pub source_function: String,

    /// Current status as stored (`processing`/`completed`/`failed`)
    pub status: String,

    /// Cached terminal response, `None` while processing
    pub response_payload: Option<serde_json::Value>,

    /// When the reservation was created
    pub created_at: DateTime<Utc>,

    /// Last transition time
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            IdempotencyStatus::Processing,
            IdempotencyStatus::Completed,
            IdempotencyStatus::Failed,
        ] {
            assert_eq!(IdempotencyStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(IdempotencyStatus::parse("pending"), None);
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!IdempotencyStatus::Processing.is_terminal());
        assert!(IdempotencyStatus::Completed.is_terminal());
        assert!(IdempotencyStatus::Failed.is_terminal());
    }

    #[test]
    fn terminal_status_maps_onto_storage_form() {
        assert_eq!(TerminalStatus::Completed.as_str(), "completed");
        assert_eq!(TerminalStatus::Failed.as_str(), "failed");
    }
}
