//! Payment-gateway webhook payloads.
//!
//! The gateway notifies this service when an online top-up completes.
//! Only the fields below are trusted, and only after the raw-body
//! signature check passed: `card_id` and `amount` come from the session
//! metadata this service's checkout flow attached when the session was
//! created, never from client-controlled fields.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::transaction::{validate_amount_shape, validate_id_shape};

/// Event type acted on by the webhook receiver. Everything else is
/// acknowledged and dropped.
pub const PAYMENT_COMPLETED: &str = "payment.completed";

/// An inbound gateway notification.
///
/// # JSON Example
///
/// ```json
/// {
///   "event_type": "payment.completed",
///   "session": {
///     "id": "cs_a1b2c3d4",
///     "metadata": {
///       "card_id": "CARD-00421",
///       "amount": "30.00"
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    /// Gateway event kind, e.g. `payment.completed`
    pub event_type: String,

    /// The checkout session the event refers to
    pub session: CheckoutSession,
}

/// A gateway checkout session reference.
///
/// The session id is the gateway's own identifier for this top-up and is
/// used directly as the idempotency request id: redelivery of the same
/// notification reserves the same key and converges to the same terminal
/// result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,

    pub metadata: SessionMetadata,
}

/// Metadata attached to the session at checkout time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Card to credit
    pub card_id: String,

    /// Top-up amount, two decimal places
    pub amount: Decimal,
}

impl GatewayEvent {
    /// Validate the trusted fields before driving the processor.
    ///
    /// Malformed metadata means the checkout flow and the webhook
    /// disagree about the contract; rejecting with `INVALID_REQUEST`
    /// keeps the failure visible in the gateway's delivery log.
    pub fn validate(&self, max_amount: Decimal) -> Result<(), AppError> {
        let mut violations = Vec::new();

        if let Some(violation) = validate_id_shape("session.id", Some(self.session.id.as_str())) {
            violations.push(violation);
        }
        if let Some(violation) =
            validate_id_shape("session.metadata.card_id", Some(self.session.metadata.card_id.as_str()))
        {
            violations.push(violation);
        }
        if let Some(violation) = validate_amount_shape(
            "session.metadata.amount",
            Some(self.session.metadata.amount),
            false,
        ) {
            violations.push(violation);
        }

        if !violations.is_empty() {
            return Err(AppError::InvalidRequest(violations));
        }

        if self.session.metadata.amount > max_amount {
            return Err(AppError::AmountLimitExceeded);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(amount: &str) -> GatewayEvent {
        GatewayEvent {
            event_type: PAYMENT_COMPLETED.to_string(),
            session: CheckoutSession {
                id: "cs_a1b2c3d4".into(),
                metadata: SessionMetadata {
                    card_id: "CARD-00421".into(),
                    amount: amount.parse().unwrap(),
                },
            },
        }
    }

    #[test]
    fn well_formed_event_passes() {
        assert!(event("30.00").validate("500.00".parse().unwrap()).is_ok());
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let err = event("0.00").validate("500.00".parse().unwrap()).unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[test]
    fn amount_over_ceiling_is_rejected() {
        let err = event("500.01").validate("500.00".parse().unwrap()).unwrap_err();
        assert!(matches!(err, AppError::AmountLimitExceeded));
    }

    #[test]
    fn empty_session_id_is_rejected() {
        let mut bad = event("30.00");
        bad.session.id = "".into();
        assert!(matches!(
            bad.validate("500.00".parse().unwrap()),
            Err(AppError::InvalidRequest(_))
        ));
    }
}
