use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use keystone_auth::{Authorizer, Credentials};

use crate::app::errors::{authz_error_to_response, invalid_token};
use crate::context::PrincipalContext;

/// Cookie carrying the refresh token bound to the bearer token.
pub const REFRESH_COOKIE: &str = "refresh_token";

#[derive(Clone)]
pub struct AuthState {
    pub authorizer: Arc<Authorizer>,
}

/// Verify the presented tokens and check the principal may call
/// `(path, method)`. Only an authorized request reaches the handler.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let bearer = extract_bearer(req.headers()).ok_or_else(invalid_token)?.to_owned();
    let refresh = extract_cookie(req.headers(), REFRESH_COOKIE).map(str::to_owned);

    let mut credentials = Credentials::bearer(&bearer);
    if let Some(refresh) = refresh.as_deref() {
        credentials = credentials.with_refresh(refresh);
    }

    let resource = req.uri().path().to_owned();
    let action = req.method().as_str().to_owned();

    let authorized = state
        .authorizer
        .authorize(credentials, &resource, &action, Utc::now())
        .await
        .map_err(authz_error_to_response)?;

    req.extensions_mut().insert(PrincipalContext::new(authorized));

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = header.split_at_checked(7)?;
    if !scheme.eq_ignore_ascii_case("Bearer ") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn extract_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_requires_scheme_and_value() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer a.b.c.d.e"));
        assert_eq!(extract_bearer(&headers), Some("a.b.c.d.e"));
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        for value in ["bearer a.b.c.d.e", "BEARER a.b.c.d.e", "bEaReR a.b.c.d.e"] {
            headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
            assert_eq!(extract_bearer(&headers), Some("a.b.c.d.e"), "{value}");
        }

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearers a.b.c.d.e"));
        assert_eq!(extract_bearer(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bear"));
        assert_eq!(extract_bearer(&headers), None);
    }

    #[test]
    fn refresh_cookie_is_found_among_others() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(header::COOKIE, HeaderValue::from_static("lang=en; refresh_token=r.e.f.r.e; x=1"));
        assert_eq!(extract_cookie(&headers, REFRESH_COOKIE), Some("r.e.f.r.e"));
        assert_eq!(extract_cookie(&headers, "missing"), None);

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("refresh_token="));
        assert_eq!(extract_cookie(&headers, REFRESH_COOKIE), None);
    }
}
