//! Stored-value card model and provisioning request type.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::transaction::{validate_amount_shape, validate_id_shape};

/// Represents a card record from the database.
///
/// # Database Table
///
/// Maps to the `cards` table. The id is the opaque uid carried by the
/// physical card; the balance is a two-place decimal mutated only by the
/// transaction processor. Cards are provisioned before the event and
/// never deleted while it runs.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Card {
    /// Opaque card uid
    pub id: String,

    /// Current stored balance.
    ///
    /// `NUMERIC(12, 2)` in the database; never negative (enforced both by
    /// the processor and a CHECK constraint).
    pub balance: Decimal,

    /// Timestamp when the card was provisioned
    pub created_at: DateTime<Utc>,

    /// Timestamp of the last balance mutation
    pub updated_at: DateTime<Utc>,
}

/// Request body for provisioning a new card.
///
/// # JSON Example
///
/// ```json
/// {
///   "card_id": "CARD-00421",
///   "initial_balance": "0.00"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct ProvisionCardRequest {
    /// Uid of the card being provisioned
    pub card_id: Option<String>,

    /// Starting balance, defaults to zero
    #[serde(default)]
    pub initial_balance: Option<Decimal>,
}

impl ProvisionCardRequest {
    /// Validate the provisioning payload before touching the store.
    pub fn validate(&self) -> Result<(String, Decimal), AppError> {
        let mut violations = Vec::new();

        if let Some(violation) = validate_id_shape("card_id", self.card_id.as_deref()) {
            violations.push(violation);
        }

        let balance = self.initial_balance.unwrap_or(Decimal::ZERO);
        if let Some(violation) = validate_amount_shape("initial_balance", Some(balance), true) {
            violations.push(violation);
        }

        if !violations.is_empty() {
            return Err(AppError::InvalidRequest(violations));
        }

        // Shape checks above guarantee card_id is present.
        let card_id = self.card_id.clone().unwrap_or_default();
        Ok((card_id, balance))
    }
}
