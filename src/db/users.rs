use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};

use super::{DbError, is_unique_violation};

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub username: String,
    pub profile_picture: String,
}

/// The projection of a user joined into posts, comments and likes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub profile_picture: String,
}

/// Insert or refresh a user keyed by their unique email. The id is
/// immutable once assigned; only the mutable profile fields are updated on
/// conflict.
pub async fn upsert(
    pool: &PgPool,
    email: &str,
    name: &str,
    username: &str,
    profile_picture: &str,
) -> Result<User, DbError> {
    let row = sqlx::query(
        r#"
        INSERT INTO users (email, name, username, profile_picture)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE
            SET name = excluded.name,
                profile_picture = excluded.profile_picture
        RETURNING id, email, name, username, profile_picture
        "#,
    )
    .bind(email)
    .bind(name)
    .bind(username)
    .bind(profile_picture)
    .fetch_one(pool)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            DbError::DuplicateEmail
        } else {
            err.into()
        }
    })?;

    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        username: row.get("username"),
        profile_picture: row.get("profile_picture"),
    })
}

pub async fn get(pool: &PgPool, user_id: i64) -> Result<UserSummary, DbError> {
    let row = sqlx::query(
        r#"
        SELECT id, username, profile_picture
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::RecordNotFound)?;

    Ok(UserSummary {
        id: row.get("id"),
        username: row.get("username"),
        profile_picture: row.get("profile_picture"),
    })
}
