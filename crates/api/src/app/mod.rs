//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: keys, stores, caches and the auth pipeline
//! - `routes/`: HTTP routes + handlers
//! - `errors.rs`: consistent error responses
//! - `maintenance.rs`: background revocation purge

use std::sync::Arc;

use axum::{
    Extension, Router,
    routing::{get, post},
};
use tower::ServiceBuilder;

use crate::middleware;

pub mod errors;
pub mod maintenance;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<services::AuthServices>) -> Router {
    let auth_state = middleware::AuthState {
        authorizer: services.authorizer.clone(),
    };

    // Protected routes: every request passes the authorization pipeline.
    let protected = routes::router()
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn_with_state(auth_state, middleware::auth_middleware));

    let public = Router::new()
        .route("/health", get(routes::system::health))
        .route("/auth/login", post(routes::auth::login))
        .layer(Extension(services));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(ServiceBuilder::new())
}
