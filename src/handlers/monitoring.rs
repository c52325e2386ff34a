//! Idempotency ledger monitoring endpoint.

use axum::{Json, extract::State};

use crate::{
    AppState,
    error::AppError,
    services::idempotency_service::{self, StaleProcessingSummary},
};

/// Report idempotency keys stuck in PROCESSING.
///
/// A key still PROCESSING past the configured threshold means a request
/// crashed or was killed mid-flight. There is no automatic
/// reconciliation - replaying risks double execution, failing risks
/// discarding a commit - so this endpoint exists to feed alerting and
/// leave the resolution to an operator.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "threshold_secs": 300,
///   "stale_count": 1,
///   "oldest_started_at": "2026-06-12T18:40:12Z"
/// }
/// ```
pub async fn idempotency_status(
    State(state): State<AppState>,
) -> Result<Json<StaleProcessingSummary>, AppError> {
    let summary =
        idempotency_service::stale_processing(&state.pool, state.config.stale_processing_secs)
            .await?;

    if summary.stale_count > 0 {
        tracing::warn!(
            stale_count = summary.stale_count,
            oldest_started_at = ?summary.oldest_started_at,
            "idempotency keys stuck in processing"
        );
    }

    Ok(Json(summary))
}
