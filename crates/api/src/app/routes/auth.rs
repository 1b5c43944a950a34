use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use keystone_auth::{IssuanceError, PrincipalRecord, StoreError, TokenClass, TokenId, TokenPair};

use crate::app::errors::{invalid_token, json_error, unavailable};
use crate::app::services::AuthServices;
use crate::context::PrincipalContext;
use crate::middleware::REFRESH_COOKIE;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token_id: String,
    pub class: String,
}

/// Exchange email and password for a fresh token pair.
pub async fn login(
    Extension(services): Extension<Arc<AuthServices>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return json_error(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text()),
    };

    let email = body.email.trim();
    if !is_plausible_email(email) {
        return json_error(
            StatusCode::BAD_REQUEST,
            "invalid_email",
            "Please, enter a valid email address.",
        );
    }
    if body.password.chars().count() < services.min_password_length {
        return json_error(
            StatusCode::BAD_REQUEST,
            "invalid_password",
            format!(
                "The password must be at least {} characters long.",
                services.min_password_length
            ),
        );
    }

    let record = match authenticate(&services, email, &body.password).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::info!("login rejected");
            return json_error(
                StatusCode::BAD_REQUEST,
                "invalid_credentials",
                "The user credentials are invalid.",
            );
        }
        Err(err) => return unavailable(err),
    };
    let roles = match services.authorizer.resolver().get_roles(record.id).await {
        Ok(roles) => roles,
        Err(err) => return unavailable(err),
    };

    let pair = match services.issuer.issue_pair(&record, &roles, Utc::now()) {
        Ok(pair) => pair,
        Err(err) => return issuance_failed(&record, err),
    };

    tracing::info!(principal_id = %record.id, "logged in");
    pair_response(&services, &pair)
}

pub async fn check(Extension(principal): Extension<PrincipalContext>) -> impl IntoResponse {
    Json(json!({
        "principal": principal.principal(),
        "roles": principal.roles(),
        "token_id": principal.access_claims().jti,
        "expires_at": principal.access_claims().exp,
    }))
}

/// Revoke the presented access token and, when present, its refresh token.
pub async fn logout(
    Extension(services): Extension<Arc<AuthServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(err) = revoke_presented(&services, &principal).await {
        return unavailable(err);
    }

    tracing::info!(principal_id = %principal.principal_id(), "logged out");
    (StatusCode::NO_CONTENT, [(header::SET_COOKIE, clear_refresh_cookie())]).into_response()
}

pub async fn revoke(
    Extension(services): Extension<Arc<AuthServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<RevokeRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return json_error(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text()),
    };

    let token_id = TokenId::new(body.token_id);
    if token_id.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "invalid_token_id", "token_id must not be empty");
    }
    let class = match body.class.parse::<TokenClass>() {
        Ok(class) => class,
        Err(reason) => return json_error(StatusCode::BAD_REQUEST, "invalid_class", reason),
    };

    if let Err(err) = services.revocations.revoke(&token_id, class).await {
        return unavailable(err);
    }

    tracing::info!(
        principal_id = %principal.principal_id(),
        token_id = %token_id,
        class = %class,
        "token revoked on request"
    );
    StatusCode::NO_CONTENT.into_response()
}

/// Rotate the verified pair: issue a new one with freshly resolved roles and
/// revoke the presented tokens.
pub async fn refresh(
    Extension(services): Extension<Arc<AuthServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if principal.refresh_claims().is_none() {
        return invalid_token();
    }

    let record = match find_principal(&services, &principal).await {
        Ok(Some(record)) => record,
        Ok(None) => return invalid_token(),
        Err(err) => return unavailable(err),
    };
    let roles = match services.authorizer.resolver().get_roles(record.id).await {
        Ok(roles) => roles,
        Err(err) => return unavailable(err),
    };

    let pair = match services.issuer.issue_pair(&record, &roles, Utc::now()) {
        Ok(pair) => pair,
        Err(err) => return issuance_failed(&record, err),
    };

    if let Err(err) = revoke_presented(&services, &principal).await {
        return unavailable(err);
    }

    pair_response(&services, &pair)
}

/// Access token in the body, refresh token in an HttpOnly cookie.
fn pair_response(services: &AuthServices, pair: &TokenPair) -> Response {
    let max_age = services.config.refresh_ttl.effective().as_secs();
    (
        StatusCode::OK,
        [(header::SET_COOKIE, refresh_cookie(&pair.refresh.token, max_age))],
        Json(json!({ "access_token": pair.access.token })),
    )
        .into_response()
}

fn issuance_failed(record: &PrincipalRecord, err: IssuanceError) -> Response {
    tracing::error!(principal_id = %record.id, error = %err, "token issuance failed");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "issuance_failed",
        "Could not issue a new token.",
    )
}

async fn revoke_presented(services: &AuthServices, principal: &PrincipalContext) -> Result<(), StoreError> {
    services
        .revocations
        .revoke_claims(principal.access_claims(), TokenClass::Access)
        .await?;
    if let Some(refresh) = principal.refresh_claims() {
        services.revocations.revoke_claims(refresh, TokenClass::Refresh).await?;
    }
    Ok(())
}

async fn find_principal(
    services: &AuthServices,
    principal: &PrincipalContext,
) -> Result<Option<PrincipalRecord>, StoreError> {
    let limit = services.config.store_timeout;
    tokio::time::timeout(limit, services.directory.find(principal.principal_id()))
        .await
        .unwrap_or(Err(StoreError::Timeout(limit)))
}

async fn authenticate(
    services: &AuthServices,
    email: &str,
    password: &str,
) -> Result<Option<PrincipalRecord>, StoreError> {
    let limit = services.config.store_timeout;
    tokio::time::timeout(limit, services.credentials.authenticate(email, password))
        .await
        .unwrap_or(Err(StoreError::Timeout(limit)))
}

/// One `@` with something on both sides and no whitespace.
fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn refresh_cookie(token: &str, max_age_secs: u64) -> String {
    format!("{REFRESH_COOKIE}={token}; Path=/; Max-Age={max_age_secs}; HttpOnly; Secure; SameSite=Strict")
}

fn clear_refresh_cookie() -> String {
    refresh_cookie("", 0)
}
