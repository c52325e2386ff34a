//! Idempotency ledger - durable at-most-once bookkeeping.
//!
//! Every balance-mutating operation is keyed by a client-supplied request
//! id. The ledger maps that id to a processing status and, once terminal,
//! to the cached response payload. Handlers run as many stateless
//! processes with no shared memory, so the "first writer wins" semantics
//! come from the database's unique index, not from any application lock:
//! two callers racing to reserve the same id resolve through
//! `INSERT ... ON CONFLICT DO NOTHING`, and exactly one sees its row
//! created.
//!
//! # State machine
//!
//! `absent -> PROCESSING -> {COMPLETED | FAILED}`. Terminal rows are
//! immutable; `finalize` refuses to touch them. A PROCESSING row left
//! behind by a crashed request is a monitoring signal (see
//! [`stale_processing`]), never something this module retries on its own.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgExecutor;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::idempotency::{IdempotencyKey, IdempotencyStatus, TerminalStatus};

/// Outcome of a reservation attempt.
#[derive(Debug)]
pub enum Reservation {
    /// No prior row existed; this caller owns the execution.
    Created,

    /// A terminal row exists; `response` is the cached payload of the
    /// original execution.
    Replay {
        status: IdempotencyStatus,
        response: Option<serde_json::Value>,
    },

    /// A PROCESSING row exists; another execution of this request id is
    /// still in flight.
    InFlight,
}

/// Reserve a request id for execution.
///
/// The insert runs in autocommit so the PROCESSING row is durable and
/// visible to concurrent reservations immediately, before any business
/// work begins. On conflict the existing row decides the outcome:
/// terminal rows replay their cached payload, a PROCESSING row reports
/// the in-flight conflict so the caller can answer without executing
/// twice.
pub async fn reserve(
    pool: &DbPool,
    request_id: &str,
    source_function: &str,
) -> Result<Reservation, AppError> {
    let created = sqlx::query_scalar::<_, String>(
        r#"
        INSERT INTO idempotency_keys (request_id, source_function, status)
        VALUES ($1, $2, 'processing')
        ON CONFLICT (request_id) DO NOTHING
        RETURNING request_id
        "#,
    )
    .bind(request_id)
    .bind(source_function)
    .fetch_optional(pool)
    .await?;

    if created.is_some() {
        return Ok(Reservation::Created);
    }

    let existing = sqlx::query_as::<_, IdempotencyKey>(
        "SELECT * FROM idempotency_keys WHERE request_id = $1",
    )
    .bind(request_id)
    .fetch_optional(pool)
    .await?;

    match existing {
        // The competing reservation was released between our insert and
        // this read. Report the conflict; the client's retry will win the
        // reservation cleanly.
        None => Ok(Reservation::InFlight),
        Some(row) => {
            let status = IdempotencyStatus::parse(&row.status).ok_or_else(|| {
                AppError::Internal(format!(
                    "idempotency key {} has unknown status {:?}",
                    row.request_id, row.status
                ))
            })?;
            if status.is_terminal() {
                Ok(Reservation::Replay {
                    status,
                    response: row.response_payload,
                })
            } else {
                Ok(Reservation::InFlight)
            }
        }
    }
}

/// Transition a PROCESSING row to a terminal state, caching the payload.
///
/// Takes any executor so COMPLETED finalization can run inside the
/// processor's transaction (one commit with the balance write and the
/// audit entry) while FAILED finalization runs on the pool after the
/// rollback.
///
/// # Errors
///
/// Raises if the row is missing or already terminal; terminal rows are
/// immutable and a second finalization means the caller's state machine
/// is broken.
pub async fn finalize(
    executor: impl PgExecutor<'_>,
    request_id: &str,
    status: TerminalStatus,
    response_payload: &serde_json::Value,
) -> Result<(), AppError> {
    let updated = sqlx::query(
        r#"
        UPDATE idempotency_keys
        SET status = $2,
            response_payload = $3,
            updated_at = now()
        WHERE request_id = $1 AND status = 'processing'
        "#,
    )
    .bind(request_id)
    .bind(status.as_str())
    .bind(response_payload)
    .execute(executor)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(AppError::Internal(format!(
            "idempotency key {request_id} was not in processing state at finalization"
        )));
    }

    Ok(())
}

/// Release a PROCESSING reservation after an infrastructure failure.
///
/// The business work rolled back, so the reservation must not survive:
/// deleting it lets the client's retry re-attempt the operation. If the
/// delete itself fails the row stays PROCESSING and will surface through
/// [`stale_processing`].
pub async fn release(pool: &DbPool, request_id: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM idempotency_keys WHERE request_id = $1 AND status = 'processing'")
        .bind(request_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Summary of reservations stuck in PROCESSING.
#[derive(Debug, Serialize)]
pub struct StaleProcessingSummary {
    /// Threshold used for this query, in seconds
    pub threshold_secs: u64,

    /// Number of PROCESSING rows older than the threshold
    pub stale_count: i64,

    /// Creation time of the oldest stale row, if any
    pub oldest_started_at: Option<DateTime<Utc>>,
}

/// Report reservations that have been PROCESSING for longer than
/// `threshold_secs`.
///
/// A stale row means a request crashed or was killed mid-execution. There
/// is deliberately no automatic reconciliation here - replaying could
/// execute the operation a second time, marking failed could discard a
/// commit that actually happened. The summary feeds monitoring; the
/// resolution is an operational decision.
pub async fn stale_processing(
    pool: &DbPool,
    threshold_secs: u64,
) -> Result<StaleProcessingSummary, AppError> {
    let (stale_count, oldest_started_at) =
        sqlx::query_as::<_, (i64, Option<DateTime<Utc>>)>(
            r#"
            SELECT COUNT(*), MIN(created_at)
            FROM idempotency_keys
            WHERE status = 'processing'
              AND created_at < now() - make_interval(secs => $1)
            "#,
        )
        .bind(threshold_secs as f64)
        .fetch_one(pool)
        .await?;

    Ok(StaleProcessingSummary {
        threshold_secs,
        stale_count,
        oldest_started_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use serde_json::json;

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
    async fn reserve_then_replay() {
        let pool = test_support::pool().await;
        let request_id = test_support::unique("req");

        assert!(matches!(
            reserve(&pool, &request_id, "purchase").await.unwrap(),
            Reservation::Created
        ));

        // Second reservation while still processing reports the conflict.
        assert!(matches!(
            reserve(&pool, &request_id, "purchase").await.unwrap(),
            Reservation::InFlight
        ));

        let payload = json!({"success": true, "new_balance": "75.50"});
        finalize(&pool, &request_id, TerminalStatus::Completed, &payload)
            .await
            .unwrap();

        match reserve(&pool, &request_id, "purchase").await.unwrap() {
            Reservation::Replay { status, response } => {
                assert_eq!(status, IdempotencyStatus::Completed);
                assert_eq!(response, Some(payload));
            }
            other => panic!("expected replay, got {other:?}"),
        }
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
    async fn finalize_refuses_terminal_rows() {
        let pool = test_support::pool().await;
        let request_id = test_support::unique("req");

        reserve(&pool, &request_id, "purchase").await.unwrap();
        let payload = json!({"success": false});
        finalize(&pool, &request_id, TerminalStatus::Failed, &payload)
            .await
            .unwrap();

        let err = finalize(&pool, &request_id, TerminalStatus::Completed, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
    async fn release_clears_processing_reservation() {
        let pool = test_support::pool().await;
        let request_id = test_support::unique("req");

        reserve(&pool, &request_id, "purchase").await.unwrap();
        release(&pool, &request_id).await.unwrap();

        // The id is reservable again after release.
        assert!(matches!(
            reserve(&pool, &request_id, "purchase").await.unwrap(),
            Reservation::Created
        ));
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
    async fn concurrent_reservations_admit_exactly_one_winner() {
        let pool = test_support::pool().await;
        let request_id = test_support::unique("req");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let request_id = request_id.clone();
            handles.push(tokio::spawn(async move {
                reserve(&pool, &request_id, "purchase").await.unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Reservation::Created) {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }
}
