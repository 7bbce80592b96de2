use sqlx::{PgPool, Postgres, Row, Transaction};

use super::{DbError, is_unique_violation};

/// Record that `follower_user_id` follows `following_user_id`. Edge
/// direction: `previous_node` follows `next_node`. Nodes are created on
/// first participation; the edge uniqueness constraint turns a repeat
/// follow into `AlreadyFollowing`.
pub async fn follow(
    pool: &PgPool,
    follower_user_id: i64,
    following_user_id: i64,
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    let follower_node = ensure_node(&mut tx, follower_user_id).await?;
    let following_node = ensure_node(&mut tx, following_user_id).await?;

    sqlx::query(
        r#"
        INSERT INTO friend_edges (previous_node, next_node)
        VALUES ($1, $2)
        "#,
    )
    .bind(follower_node)
    .bind(following_node)
    .execute(&mut *tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            DbError::AlreadyFollowing
        } else {
            err.into()
        }
    })?;

    tx.commit().await?;

    Ok(())
}

/// User ids one hop out from `user_id`, in edge insertion order. A user
/// with no graph node reports `RecordNotFound`.
pub async fn friends_of(pool: &PgPool, user_id: i64) -> Result<Vec<i64>, DbError> {
    let node_id: i64 = sqlx::query("SELECT id FROM friend_nodes WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::RecordNotFound)?
        .get("id");

    let rows = sqlx::query(
        r#"
        SELECT friend_nodes.user_id
        FROM friend_nodes
        JOIN friend_edges ON friend_nodes.id = friend_edges.next_node
        WHERE friend_edges.previous_node = $1
        ORDER BY friend_edges.id ASC
        "#,
    )
    .bind(node_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(|row| row.get("user_id")).collect())
}

async fn ensure_node(tx: &mut Transaction<'_, Postgres>, user_id: i64) -> Result<i64, DbError> {
    // The no-op update makes RETURNING yield the existing row on conflict.
    let row = sqlx::query(
        r#"
        INSERT INTO friend_nodes (user_id)
        VALUES ($1)
        ON CONFLICT (user_id) DO UPDATE SET user_id = excluded.user_id
        RETURNING id
        "#,
    )
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row.get("id"))
}
