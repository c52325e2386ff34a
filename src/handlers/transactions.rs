//! Transaction HTTP handlers.
//!
//! Balance-mutating entry points:
//! - POST /api/v1/transactions/recharge - staff recharge at a checkpoint
//! - POST /api/v1/transactions/purchase - card-present bar purchase
//!
//! Audit read path:
//! - GET /api/v1/transactions/{id} - one log entry
//! - GET /api/v1/cards/{id}/transactions - a card's history
//!
//! The mutating handlers validate everything locally first - a request
//! that fails validation never reserves an idempotency key and never
//! touches a card row - then hand a fully-validated [`Operation`] to the
//! transaction processor and return its payload as-is.

use std::time::Instant;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    AppState,
    error::AppError,
    middleware::auth::AuthContext,
    models::transaction::{PurchaseRequest, RechargeRequest, TransactionLogEntry},
    services::transaction_service::{self, Operation, OperationKind},
};

/// Recharge a card at a staffed checkpoint.
///
/// # Request Body
///
/// ```json
/// {
///   "card_id": "CARD-00421",
///   "amount": "25.50",
///   "payment_method": "cash",
///   "staff_id": "S1",
///   "checkpoint_id": "north-gate",
///   "client_request_id": "R1"
/// }
/// ```
///
/// # Response (200)
///
/// ```json
/// {
///   "success": true,
///   "transaction_id": "770e8400-...",
///   "card_id": "CARD-00421",
///   "previous_balance": "50.00",
///   "new_balance": "75.50",
///   "recharge_amount": "25.50",
///   "payment_method": "cash",
///   "staff_id": "S1",
///   "checkpoint_id": "north-gate",
///   "request_id": "R1",
///   "processing_time_ms": 12
/// }
/// ```
///
/// Retrying with the same `client_request_id` returns 409 whose body is
/// this exact payload; the balance mutates once.
pub async fn create_recharge(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<RechargeRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let started = Instant::now();
    let valid = request.validate(state.config.max_recharge_amount)?;

    let receipt = transaction_service::execute_operation(
        &state.pool,
        Operation {
            kind: OperationKind::CheckpointRecharge,
            request_id: valid.request_id,
            correlation_id: Uuid::new_v4(),
            card_id: valid.card_id,
            amount: valid.amount,
            staff_id: Some(valid.staff_id),
            payment_method: Some(valid.payment_method),
            checkpoint_id: valid.checkpoint_id,
            session_id: None,
            terminal_name: Some(auth.terminal_name),
            started,
        },
    )
    .await?;

    Ok(Json(receipt))
}

/// Charge a purchase against a card's stored balance.
///
/// # Validation
///
/// - Card must exist and cover the amount (`INSUFFICIENT_BALANCE`
///   otherwise; the balance is never partially deducted)
/// - Staff member must exist and be active
pub async fn create_purchase(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<PurchaseRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let started = Instant::now();
    let valid = request.validate(state.config.max_purchase_amount)?;

    let receipt = transaction_service::execute_operation(
        &state.pool,
        Operation {
            kind: OperationKind::Purchase,
            request_id: valid.request_id,
            correlation_id: Uuid::new_v4(),
            card_id: valid.card_id,
            amount: valid.amount,
            staff_id: Some(valid.staff_id),
            payment_method: None,
            checkpoint_id: valid.checkpoint_id,
            session_id: None,
            terminal_name: Some(auth.terminal_name),
            started,
        },
    )
    .await?;

    Ok(Json(receipt))
}

/// Get one transaction log entry by id.
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<TransactionLogEntry>, AppError> {
    let entry = transaction_service::get_transaction(&state.pool, transaction_id)
        .await?
        .ok_or(AppError::TransactionNotFound)?;

    Ok(Json(entry))
}

/// Query parameters for the card history listing.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of entries to return (1-500, default 100)
    pub limit: Option<i64>,
}

/// List a card's transaction log entries, newest first.
///
/// Read-only reconciliation/reporting surface; 404 for unknown cards.
pub async fn list_card_transactions(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<TransactionLogEntry>>, AppError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let entries = transaction_service::list_card_transactions(&state.pool, &card_id, limit).await?;

    Ok(Json(entries))
}
