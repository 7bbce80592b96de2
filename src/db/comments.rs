use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::users::UserSummary;
use super::{DbError, Filters};

/// A comment row plus its read-time tree slot. `parent_id` is 0 for root
/// comments; `sub_comments` is hydrated for serialization only, never
/// stored.
#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_likes: i64,
    pub num_of_sub_comments: i64,
    pub parent_id: i64,
    pub sub_comments: Vec<Comment>,
    pub user: UserSummary,
}

/// Insert a root comment (`path = '0'`) joined with the acting user.
pub async fn insert_root(
    pool: &PgPool,
    post_id: i64,
    body: &str,
    user_id: i64,
) -> Result<Comment, DbError> {
    let row = sqlx::query(
        r#"
        WITH insert_comment AS (
            INSERT INTO comments (post_id, body, path, user_id)
            VALUES ($1, $2, '0', $3)
            RETURNING id, post_id, body, created_at, updated_at, total_likes
        )
        SELECT insert_comment.id, insert_comment.post_id, insert_comment.body,
               insert_comment.created_at, insert_comment.updated_at,
               insert_comment.total_likes,
               users.id AS user_id, users.username, users.profile_picture
        FROM insert_comment
        LEFT JOIN users ON users.id = $3
        "#,
    )
    .bind(post_id)
    .bind(body)
    .bind(user_id)
    .fetch_one(pool)
    .await
    .map_err(|err| {
        if super::is_foreign_key_violation(&err) {
            DbError::RecordNotFound
        } else {
            err.into()
        }
    })?;

    Ok(comment_from_row(&row, 0))
}

/// Insert a sub-comment under `parent_id`. The parent must exist on the
/// same post; its author id is returned for the notification path.
pub async fn insert_sub(
    pool: &PgPool,
    post_id: i64,
    body: &str,
    user_id: i64,
    parent_id: i64,
) -> Result<(Comment, i64), DbError> {
    let mut tx = pool.begin().await?;

    let parent_user_id: i64 = sqlx::query(
        r#"
        SELECT user_id FROM comments
        WHERE id = $1 AND post_id = $2
        "#,
    )
    .bind(parent_id)
    .bind(post_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::RecordNotFound)?
    .get("user_id");

    let row = sqlx::query(
        r#"
        WITH insert_comment AS (
            INSERT INTO comments (post_id, body, path, user_id)
            VALUES ($1, $2, $3::text::ltree, $4)
            RETURNING id, post_id, body, created_at, updated_at, total_likes
        )
        SELECT insert_comment.id, insert_comment.post_id, insert_comment.body,
               insert_comment.created_at, insert_comment.updated_at,
               insert_comment.total_likes,
               users.id AS user_id, users.username, users.profile_picture
        FROM insert_comment
        LEFT JOIN users ON users.id = $4
        "#,
    )
    .bind(post_id)
    .bind(body)
    .bind(parent_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok((comment_from_row(&row, parent_id), parent_user_id))
}

/// One comment with a page of its direct sub-comments hydrated into
/// `sub_comments`.
pub async fn get(pool: &PgPool, comment_id: i64, filters: Filters) -> Result<Comment, DbError> {
    let row = sqlx::query(
        r#"
        SELECT comments.id, comments.post_id, comments.body, comments.created_at,
               comments.updated_at, comments.total_likes, comments.path::text AS path,
               (SELECT COUNT(*) FROM comments AS c
                WHERE c.path = comments.id::text::ltree) AS num_of_sub_comments,
               users.id AS user_id, users.username, users.profile_picture
        FROM comments
        LEFT JOIN users ON users.id = comments.user_id
        WHERE comments.id = $1
        "#,
    )
    .bind(comment_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::RecordNotFound)?;

    let path: String = row.get("path");
    let mut comment = comment_from_row(&row, path.parse().unwrap_or(0));
    comment.num_of_sub_comments = row.get("num_of_sub_comments");

    let children = sqlx::query(
        r#"
        SELECT comments.id, comments.post_id, comments.body, comments.created_at,
               comments.updated_at, comments.total_likes,
               (SELECT COUNT(*) FROM comments AS c
                WHERE c.path = comments.id::text::ltree) AS num_of_sub_comments,
               users.id AS user_id, users.username, users.profile_picture
        FROM comments
        LEFT JOIN users ON users.id = comments.user_id
        WHERE comments.path = $1::text::ltree
        ORDER BY comments.created_at ASC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(comment_id)
    .bind(filters.take)
    .bind(filters.offset)
    .fetch_all(pool)
    .await?;

    let children = children
        .iter()
        .map(|row| {
            let mut child = comment_from_row(row, comment_id);
            child.num_of_sub_comments = row.get("num_of_sub_comments");
            child
        })
        .collect();

    Ok(hydrate(comment, children))
}

/// A page of root comments for one post, oldest first.
pub async fn root_comments(
    pool: &PgPool,
    post_id: i64,
    filters: Filters,
) -> Result<Vec<Comment>, DbError> {
    let rows = sqlx::query(
        r#"
        SELECT comments.id, comments.post_id, comments.body, comments.created_at,
               comments.updated_at, comments.total_likes,
               (SELECT COUNT(*) FROM comments AS c
                WHERE c.path = comments.id::text::ltree) AS num_of_sub_comments,
               users.id AS user_id, users.username, users.profile_picture
        FROM comments
        LEFT JOIN users ON users.id = comments.user_id
        WHERE comments.post_id = $1 AND comments.path = '0'
        ORDER BY comments.created_at ASC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(post_id)
    .bind(filters.take)
    .bind(filters.offset)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let mut comment = comment_from_row(row, 0);
            comment.num_of_sub_comments = row.get("num_of_sub_comments");
            comment
        })
        .collect())
}

/// Delete a comment and every descendant reachable through parent links.
pub async fn delete(pool: &PgPool, comment_id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        WITH RECURSIVE tree AS (
            SELECT id FROM comments WHERE id = $1
            UNION ALL
            SELECT c.id FROM comments AS c
            JOIN tree ON c.path = tree.id::text::ltree
        )
        DELETE FROM comments WHERE id IN (SELECT id FROM tree)
        "#,
    )
    .bind(comment_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::RecordNotFound);
    }

    Ok(())
}

/// Attach a page of children to their parent for serialization. The rows
/// stay flat in storage; the tree exists only in the response.
fn hydrate(mut parent: Comment, children: Vec<Comment>) -> Comment {
    parent.sub_comments = children;
    parent
}

fn comment_from_row(row: &PgRow, parent_id: i64) -> Comment {
    Comment {
        id: row.get("id"),
        post_id: row.get("post_id"),
        body: row.get("body"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        total_likes: row.get("total_likes"),
        num_of_sub_comments: 0,
        parent_id,
        sub_comments: Vec::new(),
        user: UserSummary {
            id: row.get("user_id"),
            username: row.get("username"),
            profile_picture: row.get("profile_picture"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: i64, parent_id: i64, created_at: DateTime<Utc>) -> Comment {
        Comment {
            id,
            post_id: 1,
            body: format!("comment {id}"),
            created_at,
            updated_at: created_at,
            total_likes: 0,
            num_of_sub_comments: 0,
            parent_id,
            sub_comments: Vec::new(),
            user: UserSummary {
                id: 7,
                username: "ada".to_string(),
                profile_picture: String::new(),
            },
        }
    }

    #[test]
    fn hydrate_attaches_children_in_given_order() {
        let now = Utc::now();
        let parent = comment(1, 0, now);
        let children = vec![comment(2, 1, now), comment(3, 1, now)];

        let tree = hydrate(parent, children);

        assert_eq!(tree.sub_comments.len(), 2);
        assert_eq!(tree.sub_comments[0].id, 2);
        assert_eq!(tree.sub_comments[1].id, 3);
        assert!(tree.sub_comments.iter().all(|c| c.parent_id == tree.id));
    }

    #[test]
    fn root_path_parses_to_zero_parent() {
        assert_eq!("0".parse::<i64>().unwrap_or(0), 0);
        assert_eq!("42".parse::<i64>().unwrap_or(0), 42);
    }
}
