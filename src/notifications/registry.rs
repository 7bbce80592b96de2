// The fleet-wide "who is connected right now" table, kept in redis with a
// per-row TTL. This process is never the source of truth: rows written
// here are visible to the routers of every other server process, and rows
// may expire or describe sockets held elsewhere.

use std::collections::HashSet;
use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

/// Connections are reaped an hour after registration unless re-registered.
const CONNECTION_TTL_SECS: u64 = 3600;

const OP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Serialize, Deserialize)]
struct ConnectionRow {
    user_id: i64,
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    conn: ConnectionManager,
    prefix: String,
}

impl ConnectionRegistry {
    pub fn new(conn: ConnectionManager, table_name: &str) -> Self {
        Self {
            conn,
            prefix: table_name.to_string(),
        }
    }

    /// Record a live connection for `user_id` with a one-hour TTL.
    pub async fn register(
        &self,
        connection_id: &str,
        user_id: i64,
    ) -> Result<(), redis::RedisError> {
        let row = serde_json::to_string(&ConnectionRow { user_id }).map_err(|e| {
            redis::RedisError::from((
                redis::ErrorKind::TypeError,
                "serialize connection row",
                e.to_string(),
            ))
        })?;

        let mut conn = self.conn.clone();
        with_timeout(conn.set_ex(row_key(&self.prefix, connection_id), row, CONNECTION_TTL_SECS))
            .await
    }

    /// Remove a connection. Idempotent: deleting an absent or expired row
    /// succeeds.
    pub async fn unregister(&self, connection_id: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        with_timeout(conn.del(row_key(&self.prefix, connection_id))).await
    }

    /// All connection ids currently registered for one user.
    #[allow(dead_code)]
    pub async fn find_by_user(&self, user_id: i64) -> Result<Vec<String>, redis::RedisError> {
        let mut user_ids = HashSet::new();
        user_ids.insert(user_id);

        let found = self.find_by_user_set(&user_ids).await?;
        Ok(found.into_iter().map(|(conn_id, _)| conn_id).collect())
    }

    /// `(connection_id, user_id)` pairs for every user in the set. Rows can
    /// expire between the scan and the fetch; such rows are skipped, and
    /// the router treats any remaining stale entry as a failed delivery.
    pub async fn find_by_user_set(
        &self,
        user_ids: &HashSet<i64>,
    ) -> Result<Vec<(String, i64)>, redis::RedisError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:*", self.prefix);

        let keys: Vec<String> = {
            let mut iter = conn.scan_match::<_, String>(&pattern).await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut matches = Vec::new();
        for key in keys {
            let raw: Option<String> = with_timeout(conn.get(&key)).await?;
            let Some(raw) = raw else { continue };
            let Ok(row) = serde_json::from_str::<ConnectionRow>(&raw) else {
                tracing::warn!(key, "skipping undecodable connection row");
                continue;
            };

            if user_ids.contains(&row.user_id) {
                if let Some(connection_id) = parse_connection_id(&self.prefix, &key) {
                    matches.push((connection_id.to_string(), row.user_id));
                }
            }
        }

        Ok(matches)
    }
}

fn row_key(prefix: &str, connection_id: &str) -> String {
    format!("{prefix}:{connection_id}")
}

fn parse_connection_id<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(prefix)?.strip_prefix(':')
}

async fn with_timeout<T>(
    fut: impl Future<Output = Result<T, redis::RedisError>>,
) -> Result<T, redis::RedisError> {
    match tokio::time::timeout(OP_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "registry operation timed out",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_prefixed_and_reversible() {
        let key = row_key("connections", "abc-123");
        assert_eq!(key, "connections:abc-123");
        assert_eq!(parse_connection_id("connections", &key), Some("abc-123"));
        assert_eq!(parse_connection_id("connections", "other:abc"), None);
    }

    #[test]
    fn connection_row_wire_format_is_stable() {
        let row = ConnectionRow { user_id: 42 };
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"user_id":42}"#);

        let back: ConnectionRow = serde_json::from_str(r#"{"user_id":42}"#).unwrap();
        assert_eq!(back.user_id, 42);
    }
}
