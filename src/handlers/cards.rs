//! Card provisioning and balance snapshot handlers.
//!
//! - POST /api/v1/cards - provision a new card
//! - GET /api/v1/cards/{id} - current balance snapshot
//!
//! Provisioning is an admin surface used before and during the event;
//! the balance snapshot is the read path dashboards poll. Neither goes
//! anywhere near the transaction processor.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    AppState,
    error::AppError,
    models::card::{Card, ProvisionCardRequest},
};

/// Provision a new card.
///
/// # Request Body
///
/// ```json
/// {
///   "card_id": "CARD-00421",
///   "initial_balance": "0.00"
/// }
/// ```
///
/// # Response
///
/// - **201 Created**: the provisioned card
/// - **400**: validation failure (missing id, negative balance, ...)
/// - **409 CARD_ALREADY_EXISTS**: a card with this uid is already known
pub async fn provision_card(
    State(state): State<AppState>,
    Json(request): Json<ProvisionCardRequest>,
) -> Result<(StatusCode, Json<Card>), AppError> {
    let (card_id, initial_balance) = request.validate()?;

    // DO NOTHING on conflict keeps provisioning idempotent-by-inspection:
    // a duplicate uid is reported, never overwritten.
    let card = sqlx::query_as::<_, Card>(
        r#"
        INSERT INTO cards (id, balance)
        VALUES ($1, $2)
        ON CONFLICT (id) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(&card_id)
    .bind(initial_balance)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::CardAlreadyExists)?;

    Ok((StatusCode::CREATED, Json(card)))
}

/// Get a card's current balance snapshot.
///
/// # Response
///
/// - **200 OK**: card with current balance
/// - **404 CARD_NOT_FOUND**: unknown card uid
pub async fn get_card(
    State(state): State<AppState>,
    Path(card_id): Path<String>,
) -> Result<Json<Card>, AppError> {
    let card = sqlx::query_as::<_, Card>("SELECT * FROM cards WHERE id = $1")
        .bind(&card_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::CardNotFound)?;

    Ok(Json(card))
}
