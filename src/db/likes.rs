use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};

use super::{DbError, is_foreign_key_violation, is_unique_violation};

#[derive(Debug, Clone, Serialize)]
pub struct PostLike {
    pub id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentLike {
    pub id: i64,
    pub comment_id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Insert the like edge and bump the post's counter in one transaction, so
/// `total_likes` can never drift from the edge count. A duplicate edge
/// rolls everything back and reports `AlreadyLiked`.
///
/// Returns the edge and the liked post's author id.
pub async fn like_post(
    pool: &PgPool,
    post_id: i64,
    user_id: i64,
) -> Result<(PostLike, i64), DbError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        INSERT INTO post_likes (post_id, user_id)
        VALUES ($1, $2)
        RETURNING id, created_at
        "#,
    )
    .bind(post_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(map_like_insert_err)?;

    let post_user_id: i64 = sqlx::query(
        r#"
        UPDATE posts SET total_likes = total_likes + 1
        WHERE id = $1
        RETURNING user_id
        "#,
    )
    .bind(post_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::RecordNotFound)?
    .get("user_id");

    tx.commit().await?;

    Ok((
        PostLike {
            id: row.get("id"),
            post_id,
            user_id,
            created_at: row.get("created_at"),
        },
        post_user_id,
    ))
}

/// Like a comment; same transactional shape as [`like_post`]. Returns the
/// edge and the comment author's id.
pub async fn like_comment(
    pool: &PgPool,
    comment_id: i64,
    user_id: i64,
) -> Result<(CommentLike, i64), DbError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        INSERT INTO comment_likes (comment_id, user_id)
        VALUES ($1, $2)
        RETURNING id, created_at
        "#,
    )
    .bind(comment_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(map_like_insert_err)?;

    let comment_user_id: i64 = sqlx::query(
        r#"
        UPDATE comments SET total_likes = total_likes + 1
        WHERE id = $1
        RETURNING user_id
        "#,
    )
    .bind(comment_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::RecordNotFound)?
    .get("user_id");

    tx.commit().await?;

    Ok((
        CommentLike {
            id: row.get("id"),
            comment_id,
            user_id,
            created_at: row.get("created_at"),
        },
        comment_user_id,
    ))
}

fn map_like_insert_err(err: sqlx::Error) -> DbError {
    if is_unique_violation(&err) {
        DbError::AlreadyLiked
    } else if is_foreign_key_violation(&err) {
        DbError::RecordNotFound
    } else {
        err.into()
    }
}
