//! Festpay - Cashless Event Payment Core
//!
//! HTTP service operating the stored-value card scheme for a live event:
//! staff-initiated recharges at checkpoints, card-present purchases at
//! bar terminals, and gateway-confirmed online top-ups. The
//! correctness-critical piece is the idempotent transaction core - every
//! balance mutation happens exactly once, atomically, with an
//! append-only audit trail, under any number of concurrent and retried
//! requests.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx; the database is the single
//!   source of coordination (unique-index idempotency, row-level card
//!   locks)
//! - **Authentication**: terminal API keys with SHA-256 hashing;
//!   gateway webhooks authenticate by HMAC signature instead
//! - **Format**: JSON requests/responses, exact-decimal amounts
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Build HTTP router with routes and middleware
//! 5. Start server on configured port

mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod services;
#[cfg(test)]
mod test_support;

use tracing_subscriber::EnvFilter;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: db::DbPool,
    pub config: config::Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG
    // (defaults to "info" level).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let state = AppState {
        pool,
        config: config.clone(),
    };

    // Terminal-facing routes, all behind API key authentication
    let authenticated_routes = Router::new()
        // Card provisioning and balance snapshots
        .route("/api/v1/cards", post(handlers::cards::provision_card))
        .route("/api/v1/cards/{id}", get(handlers::cards::get_card))
        .route(
            "/api/v1/cards/{id}/transactions",
            get(handlers::transactions::list_card_transactions),
        )
        // Balance-mutating operations
        .route(
            "/api/v1/transactions/recharge",
            post(handlers::transactions::create_recharge),
        )
        .route(
            "/api/v1/transactions/purchase",
            post(handlers::transactions::create_purchase),
        )
        // Audit read path
        .route(
            "/api/v1/transactions/{id}",
            get(handlers::transactions::get_transaction),
        )
        // Operational visibility for stuck idempotency keys
        .route(
            "/api/v1/monitoring/idempotency",
            get(handlers::monitoring::idempotency_status),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    let app = Router::new()
        // Public routes: health, and the gateway webhook which
        // authenticates by signature rather than API key
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api/v1/gateway/webhook",
            post(handlers::gateway::receive_webhook),
        )
        .merge(authenticated_routes)
        // Distributed tracing middleware for observability
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Serve HTTP requests until the process is stopped
    axum::serve(listener, app).await?;

    Ok(())
}
