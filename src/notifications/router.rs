// ============================================
// Notification router
// ============================================
//
// Consumes the cross-process bus, selects recipients per event kind, and
// pushes the raw event payload to each of their live connections. Every
// message gets its own handler task; every connection send gets its own
// task, so one dead socket never delays its siblings.

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use sqlx::PgPool;

use super::gateway::Gateway;
use super::registry::ConnectionRegistry;
use crate::db::{self, DbError};
use crate::events::{DomainEvent, NotificationEnvelope};

/// Who should hear about one event. `direct` targets specific users (self
/// notifications already suppressed); `friends_of` asks for the one-hop
/// social graph of an author at delivery time.
#[derive(Debug, Default, PartialEq)]
pub struct Recipients {
    pub direct: Vec<i64>,
    pub friends_of: Option<i64>,
}

/// Recipient selection. A sub-comment targets only the parent comment's
/// author here: the write path emits a companion `CommentAdded` that
/// reaches the post author, so re-targeting it would deliver twice.
pub fn recipients_for(event: &DomainEvent) -> Recipients {
    match event {
        DomainEvent::PostAdded { user_id, .. } => Recipients {
            direct: Vec::new(),
            friends_of: Some(*user_id),
        },
        DomainEvent::CommentAdded {
            post_user_id,
            comment_user_id,
            ..
        } => Recipients {
            direct: skip_self(*post_user_id, *comment_user_id),
            friends_of: None,
        },
        DomainEvent::SubCommentAdded {
            parent_comment_user_id,
            child_comment_user_id,
            ..
        } => Recipients {
            direct: skip_self(*parent_comment_user_id, *child_comment_user_id),
            friends_of: None,
        },
        DomainEvent::PostLike {
            post_user_id,
            like_user_id,
            ..
        } => Recipients {
            direct: skip_self(*post_user_id, *like_user_id),
            friends_of: None,
        },
        DomainEvent::CommentLike {
            comment_user_id,
            like_user_id,
            ..
        } => Recipients {
            direct: skip_self(*comment_user_id, *like_user_id),
            friends_of: None,
        },
    }
}

fn skip_self(recipient: i64, actor: i64) -> Vec<i64> {
    if recipient == actor {
        Vec::new()
    } else {
        vec![recipient]
    }
}

pub struct NotificationRouter {
    pool: PgPool,
    registry: ConnectionRegistry,
    gateway: Arc<Gateway>,
}

impl NotificationRouter {
    pub fn new(pool: PgPool, registry: ConnectionRegistry, gateway: Arc<Gateway>) -> Self {
        Self {
            pool,
            registry,
            gateway,
        }
    }

    /// Drain the bus subscription for the process lifetime.
    pub async fn run(self: Arc<Self>, mut pubsub: redis::aio::PubSub) {
        let mut stream = pubsub.on_message();

        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(error = %err, "discarding undecodable bus message");
                    continue;
                }
            };

            let envelope: NotificationEnvelope = match serde_json::from_str(&payload) {
                Ok(envelope) => envelope,
                Err(err) => {
                    tracing::warn!(error = %err, "discarding malformed notification envelope");
                    continue;
                }
            };

            let event = match envelope.event() {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(error = %err, "envelope detail is not a known event");
                    continue;
                }
            };

            let router = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = router.deliver(event).await {
                    tracing::warn!(error = %err, "notification delivery failed");
                }
            });
        }

        tracing::error!("notification bus consumer stream ended");
    }

    async fn deliver(&self, event: DomainEvent) -> anyhow::Result<()> {
        let selection = recipients_for(&event);

        let mut user_ids: HashSet<i64> = selection.direct.into_iter().collect();
        if let Some(author) = selection.friends_of {
            match db::social::friends_of(&self.pool, author).await {
                Ok(friends) => user_ids.extend(friends),
                // An author without a graph node simply has no followers yet.
                Err(DbError::RecordNotFound) => {}
                Err(err) => return Err(err.into()),
            }
        }

        if user_ids.is_empty() {
            return Ok(());
        }

        let connections = self.registry.find_by_user_set(&user_ids).await?;
        if connections.is_empty() {
            return Ok(());
        }

        let payload = serde_json::to_string(&event)?;
        for (connection_id, user_id) in connections {
            let gateway = Arc::clone(&self.gateway);
            let payload = payload.clone();

            tokio::spawn(async move {
                if let Err(err) = gateway.post_to_connection(&connection_id, &payload).await {
                    tracing::warn!(
                        connection_id,
                        user_id,
                        error = %err,
                        "dropping notification for unreachable connection"
                    );
                }
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn post_added_targets_the_authors_friends() {
        let event = DomainEvent::PostAdded {
            post_id: 1,
            user_id: 7,
            username: "ada".to_string(),
            created_at: Utc::now(),
        };

        assert_eq!(
            recipients_for(&event),
            Recipients {
                direct: vec![],
                friends_of: Some(7),
            }
        );
    }

    #[test]
    fn comment_added_notifies_post_author_unless_self() {
        let event = |post_user_id, comment_user_id| DomainEvent::CommentAdded {
            post_id: 1,
            comment_id: 2,
            post_user_id,
            comment_user_id,
            comment_user_name: "grace".to_string(),
            created_at: Utc::now(),
            body_preview: "hi".to_string(),
        };

        assert_eq!(recipients_for(&event(1, 3)).direct, vec![1]);
        assert_eq!(recipients_for(&event(3, 3)).direct, Vec::<i64>::new());
    }

    #[test]
    fn sub_comment_pair_reaches_both_authors_but_never_the_actor() {
        // Post P by u1, root comment C1 by u2, sub-comment C2 by u3: the
        // write path emits both events below. u1 and u2 each get exactly
        // one delivery; u3 gets none.
        let comment_added = DomainEvent::CommentAdded {
            post_id: 1,
            comment_id: 20,
            post_user_id: 1,
            comment_user_id: 3,
            comment_user_name: "u3".to_string(),
            created_at: Utc::now(),
            body_preview: "reply".to_string(),
        };
        let sub_comment_added = DomainEvent::SubCommentAdded {
            post_id: 1,
            parent_comment_id: 10,
            child_comment_id: 20,
            parent_comment_user_id: 2,
            child_comment_user_id: 3,
            child_comment_username: "u3".to_string(),
            created_at: Utc::now(),
            body_preview: "reply".to_string(),
        };

        let mut delivered: Vec<i64> = recipients_for(&comment_added).direct;
        delivered.extend(recipients_for(&sub_comment_added).direct);
        delivered.sort_unstable();

        assert_eq!(delivered, vec![1, 2]);
    }

    #[test]
    fn self_likes_are_suppressed() {
        let post_like = DomainEvent::PostLike {
            post_id: 1,
            post_user_id: 5,
            like_user_id: 5,
            liked_at: Utc::now(),
        };
        assert_eq!(recipients_for(&post_like).direct, Vec::<i64>::new());

        let comment_like = DomainEvent::CommentLike {
            comment_id: 9,
            comment_user_id: 4,
            like_user_id: 6,
            liked_at: Utc::now(),
        };
        assert_eq!(recipients_for(&comment_like).direct, vec![4]);
    }
}
