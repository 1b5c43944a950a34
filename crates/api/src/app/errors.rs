use axum::http::{HeaderValue, StatusCode, header};
use axum::response::IntoResponse;
use serde_json::json;

use keystone_auth::{AuthzError, StoreError, VerificationError, verifier::INVALID_TOKEN_MESSAGE};

/// Seconds a client should wait before retrying after a backend outage.
const RETRY_AFTER_SECS: &str = "5";

pub fn authz_error_to_response(err: AuthzError) -> axum::response::Response {
    match err {
        AuthzError::InvalidToken(err) => verification_error_to_response(err),
        AuthzError::Forbidden { .. } => json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "You do not have permission to perform this action.",
        ),
        AuthzError::Unavailable(err) => unavailable(err),
    }
}

/// Every rejection reason maps to the same generic body.
pub fn verification_error_to_response(err: VerificationError) -> axum::response::Response {
    match err {
        VerificationError::StoreUnavailable(err) => unavailable(err),
        other => json_error(StatusCode::UNAUTHORIZED, "invalid_token", other.public_message()),
    }
}

pub fn unavailable(err: StoreError) -> axum::response::Response {
    tracing::error!(error = %err, "auth backend unavailable");
    let mut response = json_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "service_unavailable",
        "Authorization is temporarily unavailable.",
    );
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
    response
}

pub fn invalid_token() -> axum::response::Response {
    json_error(StatusCode::UNAUTHORIZED, "invalid_token", INVALID_TOKEN_MESSAGE)
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
