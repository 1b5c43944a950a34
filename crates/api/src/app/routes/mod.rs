use axum::{
    Router,
    routing::{patch, post},
};

pub mod auth;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new().nest(
        "/auth",
        Router::new()
            .route("/check", post(auth::check))
            .route("/logout", post(auth::logout))
            .route("/revoke", post(auth::revoke))
            .route("/refresh", patch(auth::refresh)),
    )
}
