//! Transaction log entities and API request types.
//!
//! This module defines:
//! - `TransactionLogEntry`: append-only audit record of a balance mutation
//! - `RechargeRequest` / `PurchaseRequest`: request bodies for the two
//!   staff-initiated operations, with field-level validation
//! - `PaymentMethod`: accepted tender at a checkpoint
//!
//! Validation runs entirely in memory, before the handler touches the
//! store: a request that fails here never reserves an idempotency key and
//! never locks a card row.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, FieldViolation};

/// Upper bound for card / staff / checkpoint identifiers.
const MAX_ID_LEN: usize = 64;

/// Represents one row of the append-only transaction log.
///
/// # Database Table
///
/// Maps to the `transaction_log` table. Every row satisfies
/// `new_balance = previous_balance ± amount` (sign by type), which the
/// schema enforces with a CHECK constraint. Rows are never updated or
/// deleted; corrections are new compensating entries.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TransactionLogEntry {
    /// Unique transaction identifier
    pub id: Uuid,

    /// Identifier threading this entry to the request that produced it
    pub correlation_id: Uuid,

    /// Card whose balance was mutated
    pub card_id: String,

    /// One of `recharge_checkpoint`, `recharge_gateway`, `purchase`
    pub transaction_type: String,

    /// Entry status; rows exist only for committed mutations, so this is
    /// `completed` today. Compensating entries may carry other values in
    /// the future.
    pub status: String,

    /// Unsigned amount involved; direction follows `transaction_type`
    pub amount: Decimal,

    /// Card balance before the mutation
    pub previous_balance: Decimal,

    /// Card balance after the mutation
    pub new_balance: Decimal,

    /// Structured context: staff id, checkpoint id, payment method,
    /// gateway session id, terminal name
    pub details: serde_json::Value,

    /// When the entry was committed
    pub created_at: DateTime<Utc>,
}

/// Tender accepted at a staffed checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    Cash,
    Card,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cash" => Some(PaymentMethod::Cash),
            "card" => Some(PaymentMethod::Card),
            _ => None,
        }
    }
}

/// Request body for a staff-initiated checkpoint recharge.
///
/// # JSON Example
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
/// Required fields are modeled as `Option` so that a missing field shows
/// up as a named violation in the `INVALID_REQUEST` details instead of an
/// opaque deserialization failure.
#[derive(Debug, Deserialize)]
pub struct RechargeRequest {
    /// Card to credit
    pub card_id: Option<String>,

    /// Amount to add, two decimal places
    pub amount: Option<Decimal>,

    /// `cash` or `card`
    pub payment_method: Option<String>,

    /// Staff member performing the recharge
    pub staff_id: Option<String>,

    /// Checkpoint where the recharge happens
    pub checkpoint_id: Option<String>,

    /// Client-generated idempotency key, stable across retries of the
    /// same user action
    pub client_request_id: Option<String>,
}

/// A recharge request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidRecharge {
    pub card_id: String,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub staff_id: String,
    pub checkpoint_id: Option<String>,
    pub request_id: String,
}

impl RechargeRequest {
    /// Validate the payload against the configured recharge ceiling.
    ///
    /// Field-shape problems are collected into a single
    /// `INVALID_REQUEST`; an unrecognized payment method and a
    /// ceiling-exceeding amount surface as their own taxonomy codes.
    pub fn validate(&self, max_amount: Decimal) -> Result<ValidRecharge, AppError> {
        let mut violations = Vec::new();

        collect_id(&mut violations, "card_id", self.card_id.as_deref());
        collect_id(&mut violations, "staff_id", self.staff_id.as_deref());
        if let Some(violation) = validate_amount_shape("amount", self.amount, false) {
            violations.push(violation);
        }
        if let Some(violation) = validate_request_id_shape(self.client_request_id.as_deref()) {
            violations.push(violation);
        }
        if let Some(checkpoint_id) = self.checkpoint_id.as_deref() {
            collect_id(&mut violations, "checkpoint_id", Some(checkpoint_id));
        }
        if self.payment_method.is_none() {
            violations.push(FieldViolation::new("payment_method", "is required"));
        }

        if !violations.is_empty() {
            return Err(AppError::InvalidRequest(violations));
        }

        let payment_method = self
            .payment_method
            .as_deref()
            .and_then(PaymentMethod::parse)
            .ok_or(AppError::InvalidPaymentMethod)?;

        let amount = self.amount.unwrap_or_default();
        if amount > max_amount {
            return Err(AppError::AmountLimitExceeded);
        }

        Ok(ValidRecharge {
            card_id: self.card_id.clone().unwrap_or_default(),
            amount,
            payment_method,
            staff_id: self.staff_id.clone().unwrap_or_default(),
            checkpoint_id: self.checkpoint_id.clone(),
            request_id: self.client_request_id.clone().unwrap_or_default(),
        })
    }
}

/// Request body for a card-present bar purchase.
///
/// # JSON Example
///
/// ```json
/// {
///   "card_id": "CARD-00421",
///   "amount": "7.50",
///   "staff_id": "S9",
///   "checkpoint_id": "main-bar",
///   "client_request_id": "POS7-000124"
/// }
/// ```
///
/// Purchases are paid from the card's stored balance, so there is no
/// payment method to choose.
#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    /// Card to debit
    pub card_id: Option<String>,

    /// Amount to deduct, two decimal places
    pub amount: Option<Decimal>,

    /// Staff member ringing up the purchase
    pub staff_id: Option<String>,

    /// Bar / point-of-sale location
    pub checkpoint_id: Option<String>,

    /// Client-generated idempotency key
    pub client_request_id: Option<String>,
}

/// A purchase request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidPurchase {
    pub card_id: String,
    pub amount: Decimal,
    pub staff_id: String,
    pub checkpoint_id: Option<String>,
    pub request_id: String,
}

impl PurchaseRequest {
    /// Validate the payload against the configured purchase ceiling.
    pub fn validate(&self, max_amount: Decimal) -> Result<ValidPurchase, AppError> {
        let mut violations = Vec::new();

        collect_id(&mut violations, "card_id", self.card_id.as_deref());
        collect_id(&mut violations, "staff_id", self.staff_id.as_deref());
        if let Some(violation) = validate_amount_shape("amount", self.amount, false) {
            violations.push(violation);
        }
        if let Some(violation) = validate_request_id_shape(self.client_request_id.as_deref()) {
            violations.push(violation);
        }
        if let Some(checkpoint_id) = self.checkpoint_id.as_deref() {
            collect_id(&mut violations, "checkpoint_id", Some(checkpoint_id));
        }

        if !violations.is_empty() {
            return Err(AppError::InvalidRequest(violations));
        }

        let amount = self.amount.unwrap_or_default();
        if amount > max_amount {
            return Err(AppError::AmountLimitExceeded);
        }

        Ok(ValidPurchase {
            card_id: self.card_id.clone().unwrap_or_default(),
            amount,
            staff_id: self.staff_id.clone().unwrap_or_default(),
            checkpoint_id: self.checkpoint_id.clone(),
            request_id: self.client_request_id.clone().unwrap_or_default(),
        })
    }
}

fn collect_id(violations: &mut Vec<FieldViolation>, field: &'static str, value: Option<&str>) {
    if let Some(violation) = validate_id_shape(field, value) {
        violations.push(violation);
    }
}

/// Check a generic identifier field: present, non-empty, bounded length.
pub(crate) fn validate_id_shape(
    field: &'static str,
    value: Option<&str>,
) -> Option<FieldViolation> {
    match value {
        None => Some(FieldViolation::new(field, "is required")),
        Some(value) if value.trim().is_empty() => {
            Some(FieldViolation::new(field, "must not be empty"))
        }
        Some(value) if value.len() > MAX_ID_LEN => Some(FieldViolation::new(
            field,
            format!("must be at most {MAX_ID_LEN} characters"),
        )),
        Some(_) => None,
    }
}

/// Check a monetary amount: present, positive (or non-negative), and
/// carrying at most two fractional digits. Amounts are exact decimals
/// end to end; anything finer than a cent is rejected rather than
/// rounded.
pub(crate) fn validate_amount_shape(
    field: &'static str,
    value: Option<Decimal>,
    allow_zero: bool,
) -> Option<FieldViolation> {
    let Some(amount) = value else {
        return Some(FieldViolation::new(field, "is required"));
    };

    if allow_zero {
        if amount < Decimal::ZERO {
            return Some(FieldViolation::new(field, "must not be negative"));
        }
    } else if amount <= Decimal::ZERO {
        return Some(FieldViolation::new(field, "must be a positive amount"));
    }

    // normalize() drops trailing zeros so "1.00" (scale 2) and "1.0"
    // both pass while "1.001" fails.
    if amount.normalize().scale() > 2 {
        return Some(FieldViolation::new(
            field,
            "must have at most two decimal places",
        ));
    }

    None
}

/// Check the client request id: 1-64 characters from `[A-Za-z0-9._-]`.
///
/// Terminals generate these ids; the shape keeps them safe to embed in
/// URLs and log lines without escaping.
pub(crate) fn validate_request_id_shape(value: Option<&str>) -> Option<FieldViolation> {
    let field = "client_request_id";
    let Some(value) = value else {
        return Some(FieldViolation::new(field, "is required"));
    };

    if value.is_empty() || value.len() > MAX_ID_LEN {
        return Some(FieldViolation::new(
            field,
            format!("must be between 1 and {MAX_ID_LEN} characters"),
        ));
    }

    let well_formed = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !well_formed {
        return Some(FieldViolation::new(
            field,
            "may only contain letters, digits, '.', '_' and '-'",
        ));
    }

    None
}
