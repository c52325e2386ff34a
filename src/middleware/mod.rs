//! HTTP middleware components.
//!
//! Middleware runs before route handlers and can short-circuit requests
//! (for example, rejecting an unauthenticated terminal).

/// Terminal API key authentication middleware
pub mod auth;
