use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::AppState;
use crate::api::error::ApiError;
use crate::auth::check_mac;
use crate::cache::CachedUser;

pub const SESSION_COOKIE: &str = "__Secure-events_session_token";
pub const CSRF_COOKIE: &str = "__Secure-events_csrf_token";
pub const REDIRECT_COOKIE: &str = "__events_client_redirect";

/// The principal attached to every request by [`authenticate`].
#[derive(Debug, Clone)]
pub enum CurrentUser {
    Anonymous,
    User(CachedUser),
}

impl CurrentUser {
    #[allow(dead_code)]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, CurrentUser::Anonymous)
    }

    /// The authenticated user, or the 401 the handler should return.
    pub fn require(&self) -> Result<&CachedUser, ApiError> {
        match self {
            CurrentUser::User(user) => Ok(user),
            CurrentUser::Anonymous => Err(ApiError::unauthorized("authentication required")),
        }
    }
}

/// Verify the session/CSRF cookie pair and attach the principal.
///
/// Either cookie missing means the request proceeds anonymously. A present
/// pair must satisfy `check_mac(session ‖ secret, csrf)` before the session
/// token is ever looked up, so a forged CSRF never reaches the cache.
pub async fn authenticate(State(app): State<AppState>, mut req: Request, next: Next) -> Response {
    let session = find_cookie(req.headers(), SESSION_COOKIE);
    let csrf = find_cookie(req.headers(), CSRF_COOKIE);

    let (Some(session), Some(csrf)) = (session, csrf) else {
        req.extensions_mut().insert(CurrentUser::Anonymous);
        return next.run(req).await;
    };

    let secret = app.session_secret.as_ref();
    if !check_mac(&format!("{session}{secret}"), &csrf, secret) {
        return ApiError::unauthorized("invalid credentials").into_response();
    }

    match app.cache.get_user(&session).await {
        Ok(Some(user)) => {
            req.extensions_mut().insert(CurrentUser::User(user));
            next.run(req).await
        }
        Ok(None) => ApiError::unauthorized("authentication required").into_response(),
        Err(err) => {
            tracing::error!(error = %err, "session cache lookup failed");
            ApiError::Internal(err.into()).into_response()
        }
    }
}

/// First value for `name` across all `Cookie` headers.
pub fn find_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(header::COOKIE) {
        let Ok(raw) = header.to_str() else { continue };

        for part in raw.split(';') {
            let mut kv = part.trim().splitn(2, '=');
            if kv.next() == Some(name) {
                return kv.next().map(str::to_string);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_cookie(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn find_cookie_picks_the_named_pair() {
        let headers = headers_with_cookie(
            "__Secure-events_session_token=abc123; __Secure-events_csrf_token=def456",
        );

        assert_eq!(
            find_cookie(&headers, SESSION_COOKIE).as_deref(),
            Some("abc123")
        );
        assert_eq!(find_cookie(&headers, CSRF_COOKIE).as_deref(), Some("def456"));
        assert_eq!(find_cookie(&headers, REDIRECT_COOKIE), None);
    }

    #[test]
    fn find_cookie_ignores_name_prefixes() {
        let headers = headers_with_cookie("session_token_old=zzz; session_token=real");
        assert_eq!(
            find_cookie(&headers, "session_token").as_deref(),
            Some("real")
        );
    }

    #[test]
    fn find_cookie_handles_missing_header() {
        assert_eq!(find_cookie(&HeaderMap::new(), SESSION_COOKIE), None);
    }

    #[test]
    fn issued_cookie_pair_passes_the_mac_check() {
        // What /auth/callback issues is exactly what authenticate verifies.
        let secret = "session-secret";
        let token = "a".repeat(256);
        let csrf = crate::auth::make_token(&format!("{token}{secret}"), secret);

        assert!(check_mac(&format!("{token}{secret}"), &csrf, secret));

        let other = "b".repeat(256);
        assert!(!check_mac(&format!("{other}{secret}"), &csrf, secret));
    }
}
