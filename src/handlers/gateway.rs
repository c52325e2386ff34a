//! Payment-gateway webhook receiver.
//!
//! The gateway delivers payment notifications at-least-once; this
//! handler converts that into at-most-once effect by driving the
//! transaction processor with the gateway's session id as the
//! idempotency key. Redelivery of an already-processed notification is
//! acknowledged with 200 and the cached receipt, so the gateway stops
//! retrying.
//!
//! Order of operations is deliberate: the HMAC signature over the raw
//! body is verified before a single business field is parsed.

use std::time::Instant;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    AppState,
    error::{AppError, FieldViolation},
    models::gateway::{GatewayEvent, PAYMENT_COMPLETED},
    services::{
        gateway_service::{self, SIGNATURE_HEADER},
        transaction_service::{self, Operation, OperationKind},
    },
};

/// Receive a gateway notification.
///
/// # Responses
///
/// - **200**: payment credited, or event type we do not act on, or
///   redelivery of an already-credited session
/// - **400 INVALID_SIGNATURE**: body does not verify against the shared
///   secret
/// - **400 INVALID_REQUEST**: verified but malformed payload
/// - **404 CARD_NOT_FOUND**: metadata references an unknown card
/// - **409 DUPLICATE_REQUEST**: a concurrent delivery of the same
///   session is still in flight; the gateway's retry will collect the
///   terminal result
/// - **500**: unexpected failure; the gateway will redeliver
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let started = Instant::now();

    // Authenticity first. Nothing in the body is trusted until the
    // signature over the raw bytes checks out.
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    gateway_service::verify_signature(&state.config.gateway_webhook_secret, signature, &body)?;

    let event: GatewayEvent = serde_json::from_slice(&body).map_err(|err| {
        AppError::InvalidRequest(vec![FieldViolation::new(
            "body",
            format!("malformed event payload: {err}"),
        )])
    })?;

    // Acknowledge everything we do not act on; the gateway only needs to
    // know the delivery landed.
    if event.event_type != PAYMENT_COMPLETED {
        tracing::debug!(event_type = %event.event_type, "ignoring gateway event");
        return Ok((
            StatusCode::OK,
            Json(json!({ "received": true, "handled": false })),
        ));
    }

    event.validate(state.config.max_recharge_amount)?;
    let session = event.session;

    let result = transaction_service::execute_operation(
        &state.pool,
        Operation {
            kind: OperationKind::GatewayRecharge,
            // The session id is the idempotency key: redelivery converges
            // to the same terminal record and credits at most once.
            request_id: session.id.clone(),
            correlation_id: Uuid::new_v4(),
            card_id: session.metadata.card_id,
            amount: session.metadata.amount,
            staff_id: None,
            payment_method: None,
            checkpoint_id: None,
            session_id: Some(session.id),
            terminal_name: None,
            started,
        },
    )
    .await;

    match result {
        Ok(receipt) => Ok((StatusCode::OK, Json(receipt))),
        // Expected at-least-once redelivery; a non-2xx here would make
        // the gateway retry a payment that already landed.
        Err(AppError::DuplicateRequest { cached: Some(receipt) }) => {
            Ok((StatusCode::OK, Json(receipt)))
        }
        Err(err) => Err(err),
    }
}
