use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};

use super::comments::Comment;
use super::users::UserSummary;
use super::{DbError, Filters};

#[derive(Debug, Clone, Serialize)]
pub struct Post {
    pub id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_likes: i64,
    pub comments: Vec<Comment>,
    pub user: UserSummary,
}

/// Comment activity summary joined into the post list.
#[derive(Debug, Clone, Serialize)]
pub struct PostMetadata {
    pub comments_count: i64,
    pub last_comment_at: Option<DateTime<Utc>>,
    pub latest_comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostData {
    pub post: Post,
    pub metadata: PostMetadata,
}

/// The author projection needed when a comment or like event references a
/// post someone else wrote.
#[derive(Debug, Clone)]
pub struct PostAuthor {
    pub post_id: i64,
    pub user_id: i64,
}

/// Insert a post and return it joined with the acting user's projection,
/// all in one statement.
pub async fn insert(pool: &PgPool, body: &str, user_id: i64) -> Result<Post, DbError> {
    let row = sqlx::query(
        r#"
        WITH insert_post AS (
            INSERT INTO posts (body, user_id)
            VALUES ($1, $2)
            RETURNING id, body, created_at, updated_at, total_likes
        )
        SELECT insert_post.id, insert_post.body, insert_post.created_at,
               insert_post.updated_at, insert_post.total_likes,
               users.id AS user_id, users.username, users.profile_picture
        FROM insert_post
        LEFT JOIN users ON users.id = $2
        "#,
    )
    .bind(body)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(Post {
        id: row.get("id"),
        body: row.get("body"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        total_likes: row.get("total_likes"),
        comments: Vec::new(),
        user: UserSummary {
            id: row.get("user_id"),
            username: row.get("username"),
            profile_picture: row.get("profile_picture"),
        },
    })
}

/// Newest posts first, each with its root-comment activity summary.
pub async fn get_all(pool: &PgPool, filters: Filters) -> Result<Vec<PostData>, DbError> {
    let rows = sqlx::query(
        r#"
        SELECT post.id, post.body, post.created_at, post.updated_at, post.total_likes,
               COUNT(comment.id) AS comments_count,
               MAX(comment.created_at) AS last_comment_at,
               MAX(comment.body) AS last_comment_body,
               users.id AS user_id, users.username, users.profile_picture
        FROM posts AS post
        LEFT JOIN comments AS comment
            ON comment.post_id = post.id AND comment.path = '0'
        LEFT JOIN users ON users.id = post.user_id
        GROUP BY post.id, users.id
        ORDER BY post.created_at DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(filters.take)
    .bind(filters.offset)
    .fetch_all(pool)
    .await?;

    let posts = rows
        .iter()
        .map(|row| PostData {
            post: Post {
                id: row.get("id"),
                body: row.get("body"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
                total_likes: row.get("total_likes"),
                comments: Vec::new(),
                user: UserSummary {
                    id: row.get("user_id"),
                    username: row.get("username"),
                    profile_picture: row.get("profile_picture"),
                },
            },
            metadata: PostMetadata {
                comments_count: row.get("comments_count"),
                last_comment_at: row.get("last_comment_at"),
                latest_comment: row.get("last_comment_body"),
            },
        })
        .collect();

    Ok(posts)
}

/// One post with a page of its root comments.
pub async fn get(pool: &PgPool, post_id: i64, filters: Filters) -> Result<Post, DbError> {
    let row = sqlx::query(
        r#"
        SELECT post.id, post.body, post.created_at, post.updated_at, post.total_likes,
               users.id AS user_id, users.username, users.profile_picture
        FROM posts AS post
        LEFT JOIN users ON users.id = post.user_id
        WHERE post.id = $1
        "#,
    )
    .bind(post_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::RecordNotFound)?;

    let comments = super::comments::root_comments(pool, post_id, filters).await?;

    Ok(Post {
        id: row.get("id"),
        body: row.get("body"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        total_likes: row.get("total_likes"),
        comments,
        user: UserSummary {
            id: row.get("user_id"),
            username: row.get("username"),
            profile_picture: row.get("profile_picture"),
        },
    })
}

pub async fn delete(pool: &PgPool, post_id: i64) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM posts WHERE id = $1")
        .bind(post_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::RecordNotFound);
    }

    Ok(())
}

pub async fn author(pool: &PgPool, post_id: i64) -> Result<PostAuthor, DbError> {
    let row = sqlx::query("SELECT id, user_id FROM posts WHERE id = $1")
        .bind(post_id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::RecordNotFound)?;

    Ok(PostAuthor {
        post_id: row.get("id"),
        user_id: row.get("user_id"),
    })
}
