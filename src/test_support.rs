//! Shared helpers for database-backed tests.
//!
//! These tests run against a real PostgreSQL instance pointed to by
//! `DATABASE_URL` and are `#[ignore]`d by default:
//!
//! ```text
//! DATABASE_URL=postgres://... cargo test -- --ignored
//! ```
//!
//! Fixtures use uuid-suffixed ids so tests can share a database without
//! stepping on each other.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{self, DbPool};

/// Connect to the test database and bring the schema up to date.
pub async fn pool() -> DbPool {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set to run database-backed tests");
    let pool = db::create_pool(&url).await.expect("connect to database");
    db::run_migrations(&pool).await.expect("run migrations");
    pool
}

/// A unique identifier with a readable prefix.
pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Insert a card with the given starting balance, returning its id.
pub async fn seed_card(pool: &DbPool, balance: &str) -> String {
    let card_id = unique("card");
    let balance: Decimal = balance.parse().expect("valid decimal balance");
    sqlx::query("INSERT INTO cards (id, balance) VALUES ($1, $2)")
        .bind(&card_id)
        .bind(balance)
        .execute(pool)
        .await
        .expect("seed card");
    card_id
}

/// Insert an active staff member, returning their id.
pub async fn seed_staff(pool: &DbPool) -> String {
    let staff_id = unique("staff");
    sqlx::query("INSERT INTO staff (id, display_name) VALUES ($1, $2)")
        .bind(&staff_id)
        .bind("Test Staffer")
        .execute(pool)
        .await
        .expect("seed staff");
    staff_id
}
