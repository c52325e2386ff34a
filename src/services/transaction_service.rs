//! Transaction processor - the atomic balance-mutation core.
//!
//! Every balance mutation, whatever its entry point (checkpoint terminal,
//! bar POS, gateway webhook), funnels through [`execute_operation`]. One
//! call is one logical operation:
//!
//! 1. Reserve the idempotency key; replays short-circuit with the cached
//!    terminal payload.
//! 2. Inside a single database transaction: validate referenced entities,
//!    lock the card row, compute the new balance with exact decimal
//!    arithmetic, reject debits that would go negative.
//! 3. Write the card balance, append the audit entry, and finalize the
//!    idempotency key COMPLETED - one commit, all or nothing.
//!
//! # Atomicity Guarantees
//!
//! PostgreSQL is the single source of ordering truth. `FOR UPDATE` on the
//! card row serializes concurrent operations against the same card while
//! operations on other cards proceed in parallel; the unique index on
//! `idempotency_keys.request_id` serializes retries of the same logical
//! operation.

use std::time::Instant;

use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::idempotency::TerminalStatus;
use crate::models::transaction::{PaymentMethod, TransactionLogEntry};
use crate::services::idempotency_service::{self, Reservation};

/// The three balance-mutating operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Cash/card recharge performed by staff at a checkpoint
    CheckpointRecharge,
    /// Online top-up confirmed by the payment gateway
    GatewayRecharge,
    /// Card-present purchase at a bar terminal
    Purchase,
}

impl OperationKind {
    /// Storage form, used both as the audit `transaction_type` and as
    /// the idempotency ledger's `source_function`.
    pub fn transaction_type(self) -> &'static str {
        match self {
            OperationKind::CheckpointRecharge => "recharge_checkpoint",
            OperationKind::GatewayRecharge => "recharge_gateway",
            OperationKind::Purchase => "purchase",
        }
    }

    /// Purchases deduct; both recharge kinds credit.
    pub fn is_debit(self) -> bool {
        matches!(self, OperationKind::Purchase)
    }
}

/// One fully-validated balance mutation, ready for the processor.
///
/// Handlers construct this after their own input validation; by the time
/// an `Operation` exists, the amount is a positive two-place decimal
/// within the configured ceiling.
#[derive(Debug)]
pub struct Operation {
    pub kind: OperationKind,

    /// Idempotency key: the client request id, or the gateway session id
    pub request_id: String,

    /// Threads this operation through logs and the audit entry
    pub correlation_id: Uuid,

    pub card_id: String,

    /// Unsigned amount; direction follows `kind`
    pub amount: Decimal,

    /// Staff member driving the operation (checkpoint and bar ops)
    pub staff_id: Option<String>,

    /// Tender used for checkpoint recharges
    pub payment_method: Option<PaymentMethod>,

    /// Physical location (checkpoint, bar) when reported by the client
    pub checkpoint_id: Option<String>,

    /// Gateway checkout session (gateway recharges only)
    pub session_id: Option<String>,

    /// Authenticated terminal name, recorded in the audit details
    pub terminal_name: Option<String>,

    /// Start of request handling, for the reported processing time
    pub started: Instant,
}

impl Operation {
    /// Structured audit context persisted in `transaction_log.details`.
    fn details(&self) -> Value {
        let mut details = serde_json::Map::new();
        if let Some(staff_id) = &self.staff_id {
            details.insert("staff_id".into(), Value::String(staff_id.clone()));
        }
        if let Some(method) = self.payment_method {
            details.insert("payment_method".into(), Value::String(method.as_str().into()));
        }
        if let Some(checkpoint_id) = &self.checkpoint_id {
            details.insert("checkpoint_id".into(), Value::String(checkpoint_id.clone()));
        }
        if let Some(session_id) = &self.session_id {
            details.insert("gateway_session_id".into(), Value::String(session_id.clone()));
        }
        if let Some(terminal_name) = &self.terminal_name {
            details.insert("terminal".into(), Value::String(terminal_name.clone()));
        }
        Value::Object(details)
    }
}

/// Execute one balance mutation exactly once.
///
/// # Returns
///
/// The success payload, exactly as cached in the idempotency ledger -
/// a later replay of the same request id echoes these bytes.
///
/// # Errors
///
/// - `DuplicateRequest`: the request id already reached a terminal state
///   (carries the cached payload) or is still in flight.
/// - `CardNotFound` / `StaffNotFound` / `InsufficientBalance`: business
///   rejections; the transaction rolled back and the idempotency key is
///   FAILED with the rejection cached, so identical retries replay it.
/// - `Database` / `Internal`: infrastructure failures; everything rolled
///   back and the reservation was released so a retry can re-attempt.
pub async fn execute_operation(pool: &DbPool, op: Operation) -> Result<Value, AppError> {
    match idempotency_service::reserve(pool, &op.request_id, op.kind.transaction_type()).await? {
        Reservation::Created => {}
        Reservation::Replay { response, .. } => {
            return Err(AppError::DuplicateRequest { cached: response });
        }
        Reservation::InFlight => {
            return Err(AppError::DuplicateRequest { cached: None });
        }
    }

    match apply(pool, &op).await {
        Ok(receipt) => Ok(receipt),
        Err(err) if err.is_business_rule() => {
            // Deterministic rejection: cache it so a retried identical
            // request does not re-attempt work known to fail.
            let rejection = json!({
                "success": false,
                "error": { "code": err.code(), "message": err.to_string() },
                "request_id": op.request_id,
            });
            if let Err(finalize_err) = idempotency_service::finalize(
                pool,
                &op.request_id,
                TerminalStatus::Failed,
                &rejection,
            )
            .await
            {
                tracing::error!(
                    request_id = %op.request_id,
                    error = %finalize_err,
                    "failed to record rejection in idempotency ledger"
                );
            }
            Err(err)
        }
        Err(err) => {
            // Transient/infrastructure failure: the reservation must not
            // survive, or retries would be refused forever.
            if let Err(release_err) = idempotency_service::release(pool, &op.request_id).await {
                tracing::error!(
                    request_id = %op.request_id,
                    error = %release_err,
                    "failed to release idempotency reservation; key stuck in processing"
                );
            }
            Err(err)
        }
    }
}

/// The atomic section: everything in here commits or rolls back as one.
async fn apply(pool: &DbPool, op: &Operation) -> Result<Value, AppError> {
    let mut tx = pool.begin().await?;

    // Staff-driven operations must reference an active staff member.
    if let Some(staff_id) = &op.staff_id {
        let active: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM staff WHERE id = $1 AND is_active)")
                .bind(staff_id)
                .fetch_one(&mut *tx)
                .await?;
        if !active {
            tx.rollback().await?;
            return Err(AppError::StaffNotFound);
        }
    }

    // Lock the card row. This serializes concurrent operations against
    // the same card for the rest of the transaction; other cards are
    // unaffected.
    let previous_balance: Decimal =
        sqlx::query_scalar("SELECT balance FROM cards WHERE id = $1 FOR UPDATE")
            .bind(&op.card_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::CardNotFound)?;

    let new_balance = apply_amount(previous_balance, op.amount, op.kind);

    // Debits must never take the balance negative; there is no partial
    // deduction.
    if new_balance < Decimal::ZERO {
        tx.rollback().await?;
        return Err(AppError::InsufficientBalance);
    }

    sqlx::query("UPDATE cards SET balance = $1, updated_at = now() WHERE id = $2")
        .bind(new_balance)
        .bind(&op.card_id)
        .execute(&mut *tx)
        .await?;

    let entry = sqlx::query_as::<_, TransactionLogEntry>(
        r#"
        INSERT INTO transaction_log (
            correlation_id,
            card_id,
            transaction_type,
            amount,
            previous_balance,
            new_balance,
            details
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(op.correlation_id)
    .bind(&op.card_id)
    .bind(op.kind.transaction_type())
    .bind(op.amount)
    .bind(previous_balance)
    .bind(new_balance)
    .bind(op.details())
    .fetch_one(&mut *tx)
    .await?;

    // Gateway recharges also record the checkout session for later
    // reconciliation against gateway exports.
    if let Some(session_id) = &op.session_id {
        sqlx::query(
            r#"
            INSERT INTO payment_sessions (session_id, card_id, amount)
            VALUES ($1, $2, $3)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(session_id)
        .bind(&op.card_id)
        .bind(op.amount)
        .execute(&mut *tx)
        .await?;
    }

    let receipt = receipt_payload(op, &entry);

    // Finalizing inside the transaction makes the balance write, the
    // audit entry and the COMPLETED ledger row one indivisible commit.
    idempotency_service::finalize(
        &mut *tx,
        &op.request_id,
        TerminalStatus::Completed,
        &receipt,
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        correlation_id = %op.correlation_id,
        transaction_id = %entry.id,
        card_id = %entry.card_id,
        transaction_type = %entry.transaction_type,
        amount = %entry.amount,
        new_balance = %entry.new_balance,
        "transaction committed"
    );

    Ok(receipt)
}

/// Apply the signed amount to a balance.
///
/// Amounts are validated upstream to carry at most two fractional
/// digits, so the arithmetic is exact; the final normalization only pins
/// the stored scale to two places.
fn apply_amount(balance: Decimal, amount: Decimal, kind: OperationKind) -> Decimal {
    let delta = if kind.is_debit() { -amount } else { amount };
    (balance + delta).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Build the success payload cached in the idempotency ledger and
/// returned to the caller.
fn receipt_payload(op: &Operation, entry: &TransactionLogEntry) -> Value {
    let processing_time_ms = op.started.elapsed().as_millis() as u64;

    match op.kind {
        OperationKind::CheckpointRecharge => json!({
            "success": true,
            "transaction_id": entry.id,
            "card_id": entry.card_id,
            "previous_balance": entry.previous_balance,
            "new_balance": entry.new_balance,
            "recharge_amount": entry.amount,
            "payment_method": op.payment_method.map(PaymentMethod::as_str),
            "staff_id": op.staff_id.as_deref(),
            "checkpoint_id": op.checkpoint_id.as_deref(),
            "request_id": op.request_id,
            "processing_time_ms": processing_time_ms,
        }),
        OperationKind::GatewayRecharge => json!({
            "success": true,
            "transaction_id": entry.id,
            "card_id": entry.card_id,
            "previous_balance": entry.previous_balance,
            "new_balance": entry.new_balance,
            "recharge_amount": entry.amount,
            "session_id": op.session_id.as_deref(),
            "request_id": op.request_id,
            "processing_time_ms": processing_time_ms,
        }),
        OperationKind::Purchase => json!({
            "success": true,
            "transaction_id": entry.id,
            "card_id": entry.card_id,
            "previous_balance": entry.previous_balance,
            "new_balance": entry.new_balance,
            "purchase_amount": entry.amount,
            "staff_id": op.staff_id.as_deref(),
            "checkpoint_id": op.checkpoint_id.as_deref(),
            "request_id": op.request_id,
            "processing_time_ms": processing_time_ms,
        }),
    }
}

/// Fetch a single audit entry by transaction id.
pub async fn get_transaction(
    pool: &DbPool,
    transaction_id: Uuid,
) -> Result<Option<TransactionLogEntry>, AppError> {
    let entry =
        sqlx::query_as::<_, TransactionLogEntry>("SELECT * FROM transaction_log WHERE id = $1")
            .bind(transaction_id)
            .fetch_optional(pool)
            .await?;

    Ok(entry)
}

/// List a card's audit entries, newest first.
///
/// Read path for reporting and reconciliation; never mutates anything.
pub async fn list_card_transactions(
    pool: &DbPool,
    card_id: &str,
    limit: i64,
) -> Result<Vec<TransactionLogEntry>, AppError> {
    let card_exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM cards WHERE id = $1)")
            .bind(card_id)
            .fetch_one(pool)
            .await?;
    if !card_exists {
        return Err(AppError::CardNotFound);
    }

    let entries = sqlx::query_as::<_, TransactionLogEntry>(
        r#"
        SELECT * FROM transaction_log
        WHERE card_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(card_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    #[test]
    fn recharge_adds_exactly() {
        let balance = apply_amount(dec("50.00"), dec("25.50"), OperationKind::CheckpointRecharge);
        assert_eq!(balance, dec("75.50"));
    }

    #[test]
    fn purchase_subtracts_exactly() {
        let balance = apply_amount(dec("75.50"), dec("7.50"), OperationKind::Purchase);
        assert_eq!(balance, dec("68.00"));
    }

    #[test]
    fn repeated_cent_arithmetic_does_not_drift() {
        let mut balance = dec("0.00");
        for _ in 0..1000 {
            balance = apply_amount(balance, dec("0.10"), OperationKind::GatewayRecharge);
        }
        assert_eq!(balance, dec("100.00"));
        for _ in 0..1000 {
            balance = apply_amount(balance, dec("0.10"), OperationKind::Purchase);
        }
        assert_eq!(balance, dec("0.00"));
    }

    #[test]
    fn overdraft_is_detectable_before_write() {
        let balance = apply_amount(dec("10.00"), dec("30.00"), OperationKind::Purchase);
        assert!(balance < Decimal::ZERO);
    }

    fn sample_operation(kind: OperationKind) -> Operation {
        Operation {
            kind,
            request_id: "R1".into(),
            correlation_id: Uuid::new_v4(),
            card_id: "C1".into(),
            amount: dec("25.50"),
            staff_id: Some("S1".into()),
            payment_method: Some(PaymentMethod::Cash),
            checkpoint_id: Some("north-gate".into()),
            session_id: None,
            terminal_name: Some("checkpoint-7".into()),
            started: Instant::now(),
        }
    }

    fn sample_entry(op: &Operation) -> TransactionLogEntry {
        TransactionLogEntry {
            id: Uuid::new_v4(),
            correlation_id: op.correlation_id,
            card_id: op.card_id.clone(),
            transaction_type: op.kind.transaction_type().to_string(),
            status: "completed".into(),
            amount: op.amount,
            previous_balance: dec("50.00"),
            new_balance: dec("75.50"),
            details: op.details(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn checkpoint_receipt_has_spec_fields() {
        let op = sample_operation(OperationKind::CheckpointRecharge);
        let receipt = receipt_payload(&op, &sample_entry(&op));

        assert_eq!(receipt["success"], true);
        assert_eq!(receipt["previous_balance"], "50.00");
        assert_eq!(receipt["new_balance"], "75.50");
        assert_eq!(receipt["recharge_amount"], "25.50");
        assert_eq!(receipt["payment_method"], "cash");
        assert_eq!(receipt["staff_id"], "S1");
        assert_eq!(receipt["request_id"], "R1");
        assert!(receipt["processing_time_ms"].is_u64());
    }

    #[test]
    fn purchase_receipt_names_the_amount_by_operation() {
        let mut op = sample_operation(OperationKind::Purchase);
        op.payment_method = None;
        let receipt = receipt_payload(&op, &sample_entry(&op));

        assert_eq!(receipt["purchase_amount"], "25.50");
        assert!(receipt.get("recharge_amount").is_none());
        assert!(receipt.get("payment_method").is_none());
    }

    #[test]
    fn details_capture_audit_context() {
        let op = sample_operation(OperationKind::CheckpointRecharge);
        let details = op.details();
        assert_eq!(details["staff_id"], "S1");
        assert_eq!(details["payment_method"], "cash");
        assert_eq!(details["checkpoint_id"], "north-gate");
        assert_eq!(details["terminal"], "checkpoint-7");
        assert!(details.get("gateway_session_id").is_none());
    }

    mod database {
        use super::*;
        use crate::models::idempotency::IdempotencyStatus;
        use crate::services::idempotency_service::{self, Reservation};
        use crate::test_support;

        fn operation(
            kind: OperationKind,
            card_id: &str,
            staff_id: Option<&str>,
            amount: &str,
            request_id: &str,
        ) -> Operation {
            Operation {
                kind,
                request_id: request_id.into(),
                correlation_id: Uuid::new_v4(),
                card_id: card_id.into(),
                amount: dec(amount),
                staff_id: staff_id.map(str::to_owned),
                payment_method: (kind == OperationKind::CheckpointRecharge)
                    .then_some(PaymentMethod::Cash),
                checkpoint_id: None,
                session_id: (kind == OperationKind::GatewayRecharge)
                    .then(|| request_id.to_string()),
                terminal_name: None,
                started: Instant::now(),
            }
        }

        async fn card_balance(pool: &crate::db::DbPool, card_id: &str) -> Decimal {
            sqlx::query_scalar("SELECT balance FROM cards WHERE id = $1")
                .bind(card_id)
                .fetch_one(pool)
                .await
                .unwrap()
        }

        #[tokio::test]
        #[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
        async fn recharge_credits_exactly_once_across_replays() {
            let pool = test_support::pool().await;
            let card_id = test_support::seed_card(&pool, "50.00").await;
            let staff_id = test_support::seed_staff(&pool).await;
            let request_id = test_support::unique("req");

            let receipt = execute_operation(
                &pool,
                operation(
                    OperationKind::CheckpointRecharge,
                    &card_id,
                    Some(&staff_id),
                    "25.50",
                    &request_id,
                ),
            )
            .await
            .unwrap();

            assert_eq!(receipt["previous_balance"], "50.00");
            assert_eq!(receipt["new_balance"], "75.50");

            // Sequential replay: identical payload, no second mutation.
            let err = execute_operation(
                &pool,
                operation(
                    OperationKind::CheckpointRecharge,
                    &card_id,
                    Some(&staff_id),
                    "25.50",
                    &request_id,
                ),
            )
            .await
            .unwrap_err();
            match err {
                AppError::DuplicateRequest { cached: Some(cached) } => {
                    assert_eq!(cached, receipt);
                }
                other => panic!("expected cached duplicate, got {other:?}"),
            }
            assert_eq!(card_balance(&pool, &card_id).await, dec("75.50"));
        }

        #[tokio::test]
        #[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
        async fn overdraft_purchase_rejects_and_leaves_balance() {
            let pool = test_support::pool().await;
            let card_id = test_support::seed_card(&pool, "10.00").await;
            let staff_id = test_support::seed_staff(&pool).await;
            let request_id = test_support::unique("req");

            let err = execute_operation(
                &pool,
                operation(
                    OperationKind::Purchase,
                    &card_id,
                    Some(&staff_id),
                    "30.00",
                    &request_id,
                ),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, AppError::InsufficientBalance));
            assert_eq!(card_balance(&pool, &card_id).await, dec("10.00"));

            // The rejection is cached; a retry replays it.
            match idempotency_service::reserve(&pool, &request_id, "purchase")
                .await
                .unwrap()
            {
                Reservation::Replay { status, response } => {
                    assert_eq!(status, IdempotencyStatus::Failed);
                    let response = response.unwrap();
                    assert_eq!(response["error"]["code"], "INSUFFICIENT_BALANCE");
                }
                other => panic!("expected cached rejection, got {other:?}"),
            }
        }

        #[tokio::test]
        #[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
        async fn missing_card_rejects_without_log_entry() {
            let pool = test_support::pool().await;
            let staff_id = test_support::seed_staff(&pool).await;
            let request_id = test_support::unique("req");

            let err = execute_operation(
                &pool,
                operation(
                    OperationKind::CheckpointRecharge,
                    "no-such-card",
                    Some(&staff_id),
                    "25.50",
                    &request_id,
                ),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, AppError::CardNotFound));

            let entries: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM transaction_log WHERE details->>'staff_id' = $1",
            )
            .bind(&staff_id)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(entries, 0);
        }

        #[tokio::test]
        #[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
        async fn concurrent_distinct_requests_lose_no_updates() {
            let pool = test_support::pool().await;
            let card_id = test_support::seed_card(&pool, "0.00").await;
            let staff_id = test_support::seed_staff(&pool).await;

            let mut handles = Vec::new();
            for _ in 0..8 {
                let pool = pool.clone();
                let card_id = card_id.clone();
                let staff_id = staff_id.clone();
                let request_id = test_support::unique("req");
                handles.push(tokio::spawn(async move {
                    execute_operation(
                        &pool,
                        operation(
                            OperationKind::CheckpointRecharge,
                            &card_id,
                            Some(&staff_id),
                            "10.00",
                            &request_id,
                        ),
                    )
                    .await
                }));
            }
            for handle in handles {
                handle.await.unwrap().unwrap();
            }

            assert_eq!(card_balance(&pool, &card_id).await, dec("80.00"));
        }

        #[tokio::test]
        #[ignore = "requires a running PostgreSQL (set DATABASE_URL)"]
        async fn gateway_redelivery_credits_once() {
            let pool = test_support::pool().await;
            let card_id = test_support::seed_card(&pool, "0.00").await;
            let session_id = test_support::unique("cs");

            let receipt = execute_operation(
                &pool,
                operation(
                    OperationKind::GatewayRecharge,
                    &card_id,
                    None,
                    "30.00",
                    &session_id,
                ),
            )
            .await
            .unwrap();
            assert_eq!(receipt["new_balance"], "30.00");

            let err = execute_operation(
                &pool,
                operation(
                    OperationKind::GatewayRecharge,
                    &card_id,
                    None,
                    "30.00",
                    &session_id,
                ),
            )
            .await
            .unwrap_err();
            assert!(matches!(err, AppError::DuplicateRequest { cached: Some(_) }));

            assert_eq!(card_balance(&pool, &card_id).await, dec("30.00"));
            let entries: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM transaction_log WHERE details->>'gateway_session_id' = $1",
            )
            .bind(&session_id)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(entries, 1);
        }
    }
}
