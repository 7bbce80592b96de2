// Data access layer: one module per entity, runtime-checked queries.

pub mod comments;
pub mod likes;
pub mod posts;
pub mod sessions;
pub mod social;
pub mod users;

use serde::Deserialize;
use validator::Validate;

/// Sentinel errors handlers map to HTTP status codes; everything else
/// bubbles as `Sqlx` and becomes a 500.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("record not found")]
    RecordNotFound,
    #[error("session not found")]
    SessionNotFound,
    #[error("user has already liked this")]
    AlreadyLiked,
    #[error("already following user")]
    AlreadyFollowing,
    #[error("a user with this email address already exists")]
    DuplicateEmail,
    #[error("token generation failed")]
    TokenGeneration(#[source] rand::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

/// Pagination window shared by the list endpoints.
#[derive(Debug, Clone, Copy, Deserialize, Validate)]
pub struct Filters {
    #[serde(default = "default_take")]
    #[validate(range(min = 1, max = 20, message = "must be between 1 and 20"))]
    pub take: i64,
    #[serde(default)]
    #[validate(range(min = 0, message = "must be greater than or equal to zero"))]
    pub offset: i64,
}

fn default_take() -> i64 {
    20
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            take: default_take(),
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_reject_out_of_range_take() {
        for take in [0, 21] {
            let filters = Filters { take, offset: 0 };
            assert!(filters.validate().is_err(), "take = {take} should fail");
        }

        for take in [1, 20] {
            let filters = Filters { take, offset: 0 };
            assert!(filters.validate().is_ok(), "take = {take} should pass");
        }
    }

    #[test]
    fn filters_reject_negative_offset() {
        let filters = Filters {
            take: 10,
            offset: -1,
        };
        assert!(filters.validate().is_err());

        let filters = Filters { take: 10, offset: 0 };
        assert!(filters.validate().is_ok());
    }

    #[test]
    fn filters_default_to_a_full_first_page() {
        let filters: Filters = serde_json::from_str("{}").unwrap();
        assert_eq!(filters.take, 20);
        assert_eq!(filters.offset, 0);
    }
}
