//! Application configuration management.
//!
//! Configuration is loaded from environment variables with the `envy`
//! crate, which deserializes them into a type-safe struct.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `GATEWAY_WEBHOOK_SECRET` (required): shared secret for verifying
///   payment-gateway webhook signatures
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `MAX_RECHARGE_AMOUNT` (optional): per-request recharge ceiling,
///   defaults to 500.00
/// - `MAX_PURCHASE_AMOUNT` (optional): per-request purchase ceiling,
///   defaults to 250.00
/// - `STALE_PROCESSING_SECS` (optional): age after which an idempotency
///   key still in PROCESSING is reported by the monitoring endpoint,
///   defaults to 300
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    pub gateway_webhook_secret: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_recharge_amount")]
    pub max_recharge_amount: Decimal,

    #[serde(default = "default_max_purchase_amount")]
    pub max_purchase_amount: Decimal,

    #[serde(default = "default_stale_processing_secs")]
    pub stale_processing_secs: u64,
}

fn default_port() -> u16 {
    3000
}

fn default_max_recharge_amount() -> Decimal {
    Decimal::new(500_00, 2)
}

fn default_max_purchase_amount() -> Decimal {
    Decimal::new(250_00, 2)
}

fn default_stale_processing_secs() -> u64 {
    300
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file is loaded first if present (ignored otherwise), then
    /// the environment is deserialized. Field names map to upper-case
    /// variable names: `database_url` reads `DATABASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value
    /// cannot be parsed into its field type.
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        envy::from_env::<Config>()
    }
}
