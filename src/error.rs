//! Error types and HTTP error response handling.
//!
//! This module defines the failure taxonomy of the payment core and how
//! each failure is converted into an HTTP response with the appropriate
//! status code and JSON body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

/// A single field-level validation problem, reported back to the client
/// inside an `INVALID_REQUEST` response.
#[derive(Debug, Clone, Serialize)]
pub struct FieldViolation {
    /// Name of the offending request field
    pub field: &'static str,

    /// What was wrong with it
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Application-wide error type.
///
/// Every variant maps to one code of the externally documented failure
/// taxonomy and to a specific HTTP status.
///
/// # Error Categories
///
/// - **Input-shape errors** (`InvalidRequest`, `InvalidPaymentMethod`,
///   `AmountLimitExceeded`): rejected by the request handler before any
///   store access, with field-level detail where available.
/// - **Business-rule errors** (`CardNotFound`, `StaffNotFound`,
///   `InsufficientBalance`): detected inside the transaction processor;
///   the idempotency key is finalized FAILED so identical retries replay
///   the rejection.
/// - **Idempotency conflicts** (`DuplicateRequest`): the request id has
///   already reached a terminal state, or is still in flight.
/// - **Infrastructure errors** (`Database`, `Internal`): rolled back and
///   surfaced as a generic message with a correlation id.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Terminal API key is missing, invalid, or inactive.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Referenced card does not exist.
    #[error("Card not found")]
    CardNotFound,

    /// A card with this id has already been provisioned.
    #[error("Card already exists")]
    CardAlreadyExists,

    /// Referenced staff member does not exist or is inactive.
    #[error("Staff member not found")]
    StaffNotFound,

    /// Requested transaction log entry does not exist.
    #[error("Transaction not found")]
    TransactionNotFound,

    /// Card balance cannot cover the requested debit.
    #[error("Insufficient balance")]
    InsufficientBalance,

    /// Payment method is not one of the accepted values.
    #[error("Unsupported payment method")]
    InvalidPaymentMethod,

    /// Amount exceeds the configured per-operation ceiling.
    #[error("Amount exceeds the configured limit")]
    AmountLimitExceeded,

    /// Request body failed validation. Carries the field-level details
    /// so clients can tell exactly what to fix before retrying.
    #[error("Invalid request")]
    InvalidRequest(Vec<FieldViolation>),

    /// The client request id has already been seen.
    ///
    /// `cached` holds the terminal payload of the original execution when
    /// one exists; it is `None` while the original is still in flight.
    #[error("Duplicate request")]
    DuplicateRequest { cached: Option<serde_json::Value> },

    /// Gateway webhook signature did not verify against the raw body.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Unexpected internal failure outside the database layer.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable error code exposed on the wire and cached in FAILED
    /// idempotency payloads.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) | AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::InvalidApiKey => "INVALID_API_KEY",
            AppError::CardNotFound => "CARD_NOT_FOUND",
            AppError::CardAlreadyExists => "CARD_ALREADY_EXISTS",
            AppError::StaffNotFound => "STAFF_NOT_FOUND",
            AppError::TransactionNotFound => "TRANSACTION_NOT_FOUND",
            AppError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            AppError::InvalidPaymentMethod => "INVALID_PAYMENT_METHOD",
            AppError::AmountLimitExceeded => "AMOUNT_LIMIT_EXCEEDED",
            AppError::InvalidRequest(_) => "INVALID_REQUEST",
            AppError::DuplicateRequest { .. } => "DUPLICATE_REQUEST",
            AppError::InvalidSignature => "INVALID_SIGNATURE",
        }
    }

    /// Whether this is a deterministic business-rule rejection.
    ///
    /// Business-rule rejections finalize the idempotency key as FAILED so
    /// an identical retry replays the rejection instead of re-executing;
    /// everything else leaves the key unreserved for a clean retry.
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            AppError::CardNotFound | AppError::StaffNotFound | AppError::InsufficientBalance
        )
    }
}

/// Convert AppError into an HTTP response.
///
/// All errors share the JSON envelope:
/// ```json
/// {
///   "error": {
///     "code": "CARD_NOT_FOUND",
///     "message": "Card not found"
///   }
/// }
/// ```
///
/// `INVALID_REQUEST` adds a `details` array of field violations, and 500s
/// add a `correlation_id` the caller can quote to support. The one
/// exception is a `DuplicateRequest` that carries a cached terminal
/// payload: the 409 body is that payload verbatim, byte-identical to the
/// original response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            AppError::CardNotFound | AppError::StaffNotFound | AppError::TransactionNotFound => {
                StatusCode::NOT_FOUND
            }
            AppError::InsufficientBalance => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::CardAlreadyExists | AppError::DuplicateRequest { .. } => StatusCode::CONFLICT,
            AppError::InvalidRequest(_)
            | AppError::InvalidPaymentMethod
            | AppError::AmountLimitExceeded
            | AppError::InvalidSignature => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match self {
            // Replays echo the original terminal payload untouched so the
            // client receives the exact result of the first execution.
            AppError::DuplicateRequest { cached: Some(payload) } => payload,

            AppError::DuplicateRequest { cached: None } => json!({
                "error": {
                    "code": "DUPLICATE_REQUEST",
                    "message": "A request with this id is already being processed"
                }
            }),

            AppError::InvalidRequest(ref details) => json!({
                "error": {
                    "code": self.code(),
                    "message": self.to_string(),
                    "details": details,
                }
            }),

            // Internal detail is logged, never echoed to the caller. The
            // correlation id ties the response to the server-side log line.
            AppError::Database(ref err) => {
                let correlation_id = Uuid::new_v4();
                tracing::error!(%correlation_id, error = ?err, "database error");
                internal_error_body(correlation_id)
            }
            AppError::Internal(ref message) => {
                let correlation_id = Uuid::new_v4();
                tracing::error!(%correlation_id, error = %message, "internal error");
                internal_error_body(correlation_id)
            }

            ref err => json!({
                "error": {
                    "code": err.code(),
                    "message": err.to_string(),
                }
            }),
        };

        (status, Json(body)).into_response()
    }
}

fn internal_error_body(correlation_id: Uuid) -> serde_json::Value {
    json!({
        "error": {
            "code": "INTERNAL_ERROR",
            "message": "An internal error occurred",
            "correlation_id": correlation_id,
        }
    })
}
