//! Terminal API key authentication middleware.
//!
//! Checkpoint and bar terminals authenticate every request with an API
//! key. The middleware hashes the presented key, looks it up in the
//! `api_keys` table and injects an [`AuthContext`] into the request, or
//! rejects with HTTP 401. State lives entirely in the database so any
//! number of handler processes can verify keys without shared memory.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{AppState, error::AppError, models::api_key::ApiKey};

/// Authentication context attached to authenticated requests.
///
/// Route handlers extract this with `Extension<AuthContext>` to know
/// which terminal made the request; the processor records the terminal
/// name in the audit details.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// ID of the authenticated API key
    pub api_key_id: Uuid,

    /// Name of the terminal making the request
    pub terminal_name: String,
}

/// API key authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <key>` from the request
/// 2. Hash `<key>` with SHA-256
/// 3. Look the hash up where `is_active = true`
/// 4. Found: inject [`AuthContext`], call the next handler
/// 5. Not found: return 401 Unauthorized
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::InvalidApiKey)?;

    let api_key = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::InvalidApiKey)?;

    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    let key_hash = hex::encode(hasher.finalize());

    let api_key_record = sqlx::query_as::<_, ApiKey>(
        "SELECT id, key_hash, terminal_name, created_at, is_active
         FROM api_keys
         WHERE key_hash = $1 AND is_active = true",
    )
    .bind(&key_hash)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::InvalidApiKey)?;

    let auth_context = AuthContext {
        api_key_id: api_key_record.id,
        terminal_name: api_key_record.terminal_name,
    };

    request.extensions_mut().insert(auth_context);

    Ok(next.run(request).await)
}
