//! Authorization extractor for job endpoints.
//!
//! Collects credentials from:
//! - `Authorization: Bearer <secret>` header
//! - `X-Taskloom-Secret: <secret>` header
//!
//! and hands them to the configured [`AccessPolicy`]. The run trigger never
//! executes unless the policy allows the request.
//!
//! [`AccessPolicy`]: taskloom_core::access::AccessPolicy

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use taskloom_core::access::{AccessDecision, AccessRequest};

use crate::http::error::AppError;
use crate::state::AppState;

/// Header carrying the shared run secret.
pub const SECRET_HEADER: &str = "x-taskloom-secret";

/// Authorized request marker. Extracting this consults the access policy.
pub struct Authorized;

impl FromRequestParts<AppState> for Authorized {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let request = access_request(parts)?;

        match state.access.authorize(&request) {
            AccessDecision::Allow => Ok(Authorized),
            AccessDecision::Deny(reason) => {
                tracing::debug!(path = %parts.uri.path(), %reason, "request denied");
                Err(AppError::Unauthorized(format!(
                    "{reason}. Provide the run secret via 'Authorization: Bearer <secret>' or 'X-Taskloom-Secret: <secret>' header."
                )))
            }
        }
    }
}

/// Build an [`AccessRequest`] from request headers.
fn access_request(parts: &Parts) -> Result<AccessRequest, AppError> {
    let mut request = AccessRequest::new();

    if let Some(auth) = parts.headers.get("authorization") {
        let auth_str = auth.to_str().map_err(|_| {
            AppError::Unauthorized("Invalid Authorization header encoding".to_string())
        })?;
        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            request = request.bearer(token.trim());
        }
    }

    if let Some(secret) = parts.headers.get(SECRET_HEADER) {
        let secret_str = secret.to_str().map_err(|_| {
            AppError::Unauthorized("Invalid X-Taskloom-Secret header encoding".to_string())
        })?;
        request = request.secret_header(secret_str.trim());
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/api/v1/jobs/run");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_access_request_from_headers() {
        let request = access_request(&parts(&[
            ("authorization", "Bearer  abc "),
            ("x-taskloom-secret", "xyz"),
        ]))
        .unwrap();
        assert_eq!(request.bearer.as_deref(), Some("abc"));
        assert_eq!(request.secret_header.as_deref(), Some("xyz"));
        assert!(request.principal.is_none());
    }

    #[test]
    fn test_non_bearer_authorization_is_ignored() {
        let request = access_request(&parts(&[("authorization", "Basic Zm9vOmJhcg==")])).unwrap();
        assert!(request.bearer.is_none());
    }
}
