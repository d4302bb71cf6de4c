//! Authentication routes

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::auth;
use crate::state::AppState;

/// Create authentication routes
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/request-nonce", post(auth::request_nonce))
        .route("/auth/verify-wallet", post(auth::verify_wallet))
        .route("/auth/social-login", post(auth::social_login))
        .route("/auth/me", get(auth::get_current_user))
}
