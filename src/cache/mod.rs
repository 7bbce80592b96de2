// Redis cache module

use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

/// Bound on individual redis round-trips.
const OP_TIMEOUT: Duration = Duration::from_secs(3);

/// The session projection stored under the raw session token. TTL matches
/// the session row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedUser {
    pub user_id: i64,
    pub username: String,
    pub profile_picture: String,
}

#[derive(Clone)]
pub struct CacheService {
    conn: ConnectionManager,
}

impl CacheService {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Fetch the cached user for a session token. `Ok(None)` is a miss;
    /// transport failures surface so callers can distinguish 401 from 500.
    pub async fn get_user(&self, token: &str) -> Result<Option<CachedUser>, redis::RedisError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = with_timeout(conn.get(token)).await?;

        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    /// Store the session projection with a TTL in seconds.
    pub async fn set_user(
        &self,
        token: &str,
        user: &CachedUser,
        ttl_seconds: u64,
    ) -> Result<(), redis::RedisError> {
        let json = serde_json::to_string(user).map_err(|e| {
            redis::RedisError::from((
                redis::ErrorKind::TypeError,
                "serialize cached user",
                e.to_string(),
            ))
        })?;

        let mut conn = self.conn.clone();
        with_timeout(conn.set_ex(token, json, ttl_seconds)).await
    }

    /// Delete a cached value; deleting an absent key is a no-op.
    pub async fn delete(&self, key: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        with_timeout(conn.del(key)).await
    }

    /// Park a one-time OAuth state token for ten minutes.
    pub async fn put_oauth_state(&self, state: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        with_timeout(conn.set_ex(oauth_state_key(state), 1u8, 600)).await
    }

    /// Redeem an OAuth state token. GETDEL keeps redemption single-use even
    /// across concurrent callbacks.
    pub async fn take_oauth_state(&self, state: &str) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn.clone();
        let taken: Option<u8> = with_timeout(
            redis::cmd("GETDEL")
                .arg(oauth_state_key(state))
                .query_async(&mut conn),
        )
        .await?;

        Ok(taken.is_some())
    }
}

fn oauth_state_key(state: &str) -> String {
    format!("oauth_state:{state}")
}

async fn with_timeout<T>(
    fut: impl Future<Output = Result<T, redis::RedisError>>,
) -> Result<T, redis::RedisError> {
    match tokio::time::timeout(OP_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "redis operation timed out",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_user_serializes_compactly() {
        let user = CachedUser {
            user_id: 12,
            username: "ada".to_string(),
            profile_picture: "https://example.com/a.png".to_string(),
        };

        let json = serde_json::to_string(&user).unwrap();
        assert_eq!(
            json,
            r#"{"user_id":12,"username":"ada","profile_picture":"https://example.com/a.png"}"#
        );

        let back: CachedUser = serde_json::from_str(&json).unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn oauth_state_keys_are_namespaced() {
        assert_eq!(oauth_state_key("abc"), "oauth_state:abc");
    }
}
