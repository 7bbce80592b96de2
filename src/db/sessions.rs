use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};

use super::DbError;
use crate::auth;

/// Sessions live for 30 days; the cached user projection shares this TTL.
pub const SESSION_EXPIRY_DAYS: i64 = 30;

/// Random bytes per session token, hex-encoded to 256 characters.
const TOKEN_BYTES: usize = 128;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: i64,
    pub token: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

pub fn expiry_seconds() -> u64 {
    (SESSION_EXPIRY_DAYS * 24 * 60 * 60) as u64
}

/// Create a session for `user_id` and return the opaque token. A user holds
/// at most one session; re-authenticating replaces the previous row.
pub async fn insert(pool: &PgPool, user_id: i64) -> Result<String, DbError> {
    let token = auth::generate_token(TOKEN_BYTES).map_err(DbError::TokenGeneration)?;
    let expires_at = Utc::now() + Duration::days(SESSION_EXPIRY_DAYS);

    let row = sqlx::query(
        r#"
        INSERT INTO sessions (token, user_id, expires_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id) DO UPDATE
            SET token = excluded.token,
                expires_at = excluded.expires_at
        RETURNING token
        "#,
    )
    .bind(&token)
    .bind(user_id)
    .bind(expires_at)
    .fetch_one(pool)
    .await?;

    Ok(row.get("token"))
}

/// The live token for `user_id`. An expired row is deleted on read and
/// reported as `SessionNotFound`.
pub async fn get_by_user_id(pool: &PgPool, user_id: i64) -> Result<String, DbError> {
    let row = sqlx::query(
        r#"
        SELECT id, token, user_id, expires_at
        FROM sessions
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::SessionNotFound)?;

    let session = session_from_row(&row);
    if session.expires_at <= Utc::now() {
        delete(pool, user_id).await?;
        return Err(DbError::SessionNotFound);
    }

    Ok(session.token)
}

pub async fn get_by_token(pool: &PgPool, token: &str) -> Result<Session, DbError> {
    let row = sqlx::query(
        r#"
        SELECT id, token, user_id, expires_at
        FROM sessions
        WHERE token = $1
        "#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::SessionNotFound)?;

    let session = session_from_row(&row);
    if session.expires_at <= Utc::now() {
        delete(pool, session.user_id).await?;
        return Err(DbError::SessionNotFound);
    }

    Ok(session)
}

pub async fn delete(pool: &PgPool, user_id: i64) -> Result<(), DbError> {
    sqlx::query("DELETE FROM sessions WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

fn session_from_row(row: &sqlx::postgres::PgRow) -> Session {
    Session {
        id: row.get("id"),
        token: row.get("token"),
        user_id: row.get("user_id"),
        expires_at: row.get("expires_at"),
    }
}
