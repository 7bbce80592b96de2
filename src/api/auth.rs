// ============================================
// Sign-in flow: OAuth handshake, session issue, cookie management
// ============================================

use async_trait::async_trait;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Redirect, Response};
use cookie::time::{Duration as CookieDuration, OffsetDateTime};
use cookie::{Cookie, SameSite};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use super::error::ApiError;
use crate::cache::CachedUser;
use crate::config::Environment;
use crate::db::{self, DbError, sessions};
use crate::middleware::{CSRF_COOKIE, REDIRECT_COOKIE, SESSION_COOKIE, find_cookie};

/// Lifetime of the post-auth redirect cookie.
const REDIRECT_TTL_MINUTES: i64 = 10;

/// Entropy for the OAuth state parameter.
const STATE_TOKEN_BYTES: usize = 16;

// ============================================
// Identity provider boundary
// ============================================

/// What the provider hands back once the user consents.
#[derive(Debug, Clone)]
pub struct ProviderUser {
    pub email: String,
    pub name: String,
    pub username: String,
    pub profile_picture: String,
}

/// The external OAuth handshake, reduced to the two calls this server
/// makes. The callback code is opaque here; only the provider can turn it
/// into an identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider name accepted in `/auth?provider=...`.
    fn provider(&self) -> &'static str;

    /// Where to send the user's browser to begin consent.
    fn authorize_url(&self, state: &str) -> String;

    /// Exchange the callback code for the user's identity.
    async fn complete_auth(&self, code: &str) -> anyhow::Result<ProviderUser>;
}

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

pub struct GoogleProvider {
    client_id: String,
    client_secret: String,
    redirect_url: String,
    http: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(client_id: String, client_secret: String, redirect_url: String) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_url,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn provider(&self) -> &'static str {
        "google"
    }

    fn authorize_url(&self, state: &str) -> String {
        format!(
            "{GOOGLE_AUTH_URL}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_url),
            urlencoding::encode("openid email profile"),
            urlencoding::encode(state),
        )
    }

    async fn complete_auth(&self, code: &str) -> anyhow::Result<ProviderUser> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        #[derive(Deserialize)]
        struct UserInfo {
            email: String,
            name: Option<String>,
            picture: Option<String>,
        }

        let token: TokenResponse = self
            .http
            .post(GOOGLE_TOKEN_URL)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let info: UserInfo = self
            .http
            .get(GOOGLE_USERINFO_URL)
            .bearer_auth(&token.access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(ProviderUser {
            username: username_from_email(&info.email),
            name: info.name.unwrap_or_default(),
            profile_picture: info.picture.unwrap_or_default(),
            email: info.email,
        })
    }
}

fn username_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

// ============================================
// Handlers
// ============================================

#[derive(Debug, Deserialize)]
pub struct SigninParams {
    pub redirect: Option<String>,
}

/// Park the caller's post-auth destination in a short-lived cookie before
/// the OAuth round trip begins.
pub async fn signin(
    State(app): State<AppState>,
    Query(params): Query<SigninParams>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(redirect) = params.redirect.filter(|r| !r.is_empty()) else {
        return Err(ApiError::bad_request("redirect query parameter must be provided"));
    };

    let cookie = build_cookie(REDIRECT_COOKIE, redirect, app.env)
        .max_age(CookieDuration::minutes(REDIRECT_TTL_MINUTES))
        .build();

    Ok((
        [(header::SET_COOKIE, cookie.to_string())],
        Json(json!({ "message": "ready to authenticate" })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct BeginAuthParams {
    pub provider: Option<String>,
}

pub async fn begin_auth(
    State(app): State<AppState>,
    Query(params): Query<BeginAuthParams>,
) -> Result<Response, ApiError> {
    if params.provider.as_deref() != Some(app.identity.provider()) {
        return Err(ApiError::bad_request("unsupported auth provider"));
    }

    let state = crate::auth::generate_token(STATE_TOKEN_BYTES)
        .map_err(|err| ApiError::Internal(err.into()))?;
    app.cache.put_oauth_state(&state).await?;

    Ok(Redirect::temporary(&app.identity.authorize_url(&state)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// Complete the handshake: verify the one-time state, resolve the
/// identity, upsert the user, issue a session, cache the projection, and
/// hand the browser its cookie pair.
pub async fn auth_callback(
    State(app): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<Response, ApiError> {
    let (Some(code), Some(state)) = (params.code, params.state) else {
        return Err(ApiError::bad_request("missing code or state parameter"));
    };

    if !app.cache.take_oauth_state(&state).await? {
        return Err(ApiError::unauthorized("invalid credentials"));
    }

    let identity = app.identity.complete_auth(&code).await.map_err(|err| {
        tracing::warn!(error = %err, "OAuth completion failed");
        ApiError::unauthorized("invalid credentials")
    })?;

    let user = db::users::upsert(
        &app.db,
        &identity.email,
        &identity.name,
        &identity.username,
        &identity.profile_picture,
    )
    .await?;

    // Reuse a still-live session; expired rows are deleted by the read and
    // replaced with a fresh token.
    let token = match sessions::get_by_user_id(&app.db, user.id).await {
        Ok(token) => token,
        Err(DbError::SessionNotFound) => sessions::insert(&app.db, user.id).await?,
        Err(err) => return Err(err.into()),
    };

    let cached = CachedUser {
        user_id: user.id,
        username: user.username.clone(),
        profile_picture: user.profile_picture.clone(),
    };
    app.cache
        .set_user(&token, &cached, sessions::expiry_seconds())
        .await?;

    let secret = app.session_secret.as_ref();
    let csrf = crate::auth::make_token(&format!("{token}{secret}"), secret);

    let redirect_to =
        find_cookie(&headers, REDIRECT_COOKIE).unwrap_or_else(|| "/".to_string());

    let session_expiry = OffsetDateTime::now_utc()
        + CookieDuration::days(sessions::SESSION_EXPIRY_DAYS);

    let mut response = Redirect::temporary(&redirect_to).into_response();
    set_cookie(
        &mut response,
        build_cookie(SESSION_COOKIE, token, app.env)
            .expires(session_expiry)
            .build(),
    )?;
    set_cookie(
        &mut response,
        build_cookie(CSRF_COOKIE, csrf, app.env)
            .expires(session_expiry)
            .build(),
    )?;
    set_cookie(&mut response, expired_cookie(REDIRECT_COOKIE, app.env))?;

    tracing::info!(user_id = user.id, "user signed in");

    Ok(response)
}

/// Drop the session row, the cached projection, and both cookies, then
/// send the browser back to the sign-in page.
pub async fn signout(State(app): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    if let Some(token) = find_cookie(&headers, SESSION_COOKIE) {
        match sessions::get_by_token(&app.db, &token).await {
            Ok(session) => {
                sessions::delete(&app.db, session.user_id).await?;
                if let Err(err) = app.cache.delete(&session.token).await {
                    tracing::warn!(error = %err, "failed to drop cached session");
                }
                tracing::info!(
                    session_id = session.id,
                    user_id = session.user_id,
                    "user signed out"
                );
            }
            // An expired or unknown token still gets its cookies cleared,
            // along with any lingering cache entry.
            Err(DbError::SessionNotFound) => {
                if let Err(err) = app.cache.delete(&token).await {
                    tracing::warn!(error = %err, "failed to drop cached session");
                }
            }
            Err(err) => return Err(err.into()),
        }
    }

    let mut response = Redirect::temporary("/signin").into_response();
    set_cookie(&mut response, expired_cookie(SESSION_COOKIE, app.env))?;
    set_cookie(&mut response, expired_cookie(CSRF_COOKIE, app.env))?;

    Ok(response)
}

// ============================================
// Cookie helpers
// ============================================

fn build_cookie(
    name: &'static str,
    value: String,
    env: Environment,
) -> cookie::CookieBuilder<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(env.is_production())
}

fn expired_cookie(name: &'static str, env: Environment) -> Cookie<'static> {
    build_cookie(name, String::new(), env)
        .max_age(CookieDuration::ZERO)
        .build()
}

fn set_cookie(response: &mut Response, cookie: Cookie<'static>) -> Result<(), ApiError> {
    let value = HeaderValue::from_str(&cookie.to_string())
        .map_err(|err| ApiError::Internal(err.into()))?;
    response.headers_mut().append(header::SET_COOKIE, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookies_carry_the_hardening_attributes() {
        let cookie = build_cookie(SESSION_COOKIE, "token".to_string(), Environment::Production)
            .expires(OffsetDateTime::now_utc() + CookieDuration::days(30))
            .build();
        let rendered = cookie.to_string();

        assert!(rendered.starts_with("__Secure-events_session_token=token"));
        assert!(rendered.contains("Path=/"));
        assert!(rendered.contains("HttpOnly"));
        assert!(rendered.contains("SameSite=Strict"));
        assert!(rendered.contains("Expires="));
        assert_eq!(cookie.secure(), Some(true));
    }

    #[test]
    fn development_cookies_skip_the_secure_flag() {
        let cookie =
            build_cookie(SESSION_COOKIE, "token".to_string(), Environment::Development).build();
        assert_ne!(cookie.secure(), Some(true));
    }

    #[test]
    fn expired_cookie_zeroes_the_value_and_age() {
        let cookie = expired_cookie(CSRF_COOKIE, Environment::Development);
        let rendered = cookie.to_string();

        assert!(rendered.starts_with("__Secure-events_csrf_token="));
        assert!(rendered.contains("Max-Age=0"));
    }

    #[test]
    fn authorize_url_carries_client_and_state() {
        let provider = GoogleProvider::new(
            "client-id".to_string(),
            "client-secret".to_string(),
            "http://localhost:4000/auth/callback".to_string(),
        );

        let url = provider.authorize_url("state-token");
        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("client_id=client-id"));
        assert!(url.contains("state=state-token"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A4000%2Fauth%2Fcallback"));
        assert!(!url.contains("client-secret"));
    }

    #[test]
    fn username_falls_back_to_the_email_local_part() {
        assert_eq!(username_from_email("ada@example.com"), "ada");
        assert_eq!(username_from_email("no-at-sign"), "no-at-sign");
    }
}
