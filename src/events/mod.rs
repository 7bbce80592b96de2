//! Domain events, the cross-process notification envelope, and the SSE
//! wire frame.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pub/sub topics fanned out to SSE subscribers.
pub const POST_ADDED: &str = "post-added";
pub const COMMENT_ADDED: &str = "comment-added";
pub const SUB_COMMENT_ADDED: &str = "sub-comment-added";

/// Reconnect hint sent with every SSE frame, milliseconds.
pub const SSE_RETRY_MS: u64 = 1000;

/// Longest comment-body slice carried in a notification.
pub const BODY_PREVIEW_MAX: usize = 100;

/// A subscribable SSE channel. Each handler serves exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    PostAdded,
    CommentAdded,
    SubCommentAdded,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::PostAdded => POST_ADDED,
            Channel::CommentAdded => COMMENT_ADDED,
            Channel::SubCommentAdded => SUB_COMMENT_ADDED,
        }
    }
}

// ============================================
// Domain events (notification bus payloads)
// ============================================

/// Everything the notification router knows how to deliver. The
/// `event_type` discriminator is part of the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum DomainEvent {
    PostAdded {
        post_id: i64,
        user_id: i64,
        username: String,
        created_at: DateTime<Utc>,
    },
    CommentAdded {
        post_id: i64,
        comment_id: i64,
        post_user_id: i64,
        comment_user_id: i64,
        comment_user_name: String,
        created_at: DateTime<Utc>,
        body_preview: String,
    },
    SubCommentAdded {
        post_id: i64,
        parent_comment_id: i64,
        child_comment_id: i64,
        parent_comment_user_id: i64,
        child_comment_user_id: i64,
        child_comment_username: String,
        created_at: DateTime<Utc>,
        body_preview: String,
    },
    PostLike {
        post_id: i64,
        post_user_id: i64,
        like_user_id: i64,
        liked_at: DateTime<Utc>,
    },
    CommentLike {
        comment_id: i64,
        comment_user_id: i64,
        like_user_id: i64,
        liked_at: DateTime<Utc>,
    },
}

/// Envelope wrapping a [`DomainEvent`] on the cross-process bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    #[serde(rename = "Detail")]
    pub detail: String,
    #[serde(rename = "DetailType")]
    pub detail_type: String,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "EventBusName")]
    pub event_bus_name: String,
}

impl NotificationEnvelope {
    pub fn new(event: &DomainEvent, bus_name: &str) -> serde_json::Result<Self> {
        Ok(Self {
            detail: serde_json::to_string(event)?,
            detail_type: "NotificationReceived".to_string(),
            source: "notifications".to_string(),
            event_bus_name: bus_name.to_string(),
        })
    }

    /// Decode the concrete event carried in `Detail`.
    pub fn event(&self) -> serde_json::Result<DomainEvent> {
        serde_json::from_str(&self.detail)
    }
}

/// The first `BODY_PREVIEW_MAX` bytes of a comment body, trimmed back to a
/// character boundary so the preview stays valid UTF-8.
pub fn body_preview(body: &str) -> &str {
    if body.len() <= BODY_PREVIEW_MAX {
        return body;
    }

    let mut end = BODY_PREVIEW_MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

// ============================================
// SSE wire frame
// ============================================

/// One Server-Sent-Events frame. `Display` renders the exact wire format:
/// four `key: value` lines followed by a blank line.
#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    pub id: String,
    pub event: String,
    pub data: String,
    pub retry: u64,
}

impl EventData {
    /// A frame for `event` carrying `data`, stamped with a fresh UUID id
    /// and the standard retry hint.
    pub fn new(event: &str, data: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event: event.to_string(),
            data: data.into(),
            retry: SSE_RETRY_MS,
        }
    }

    /// The keepalive frame: `event: ping` with empty data.
    pub fn ping() -> Self {
        Self::new("ping", "")
    }

    pub fn into_sse_event(self) -> axum::response::sse::Event {
        axum::response::sse::Event::default()
            .id(self.id)
            .event(self.event)
            .data(self.data)
            .retry(Duration::from_millis(self.retry))
    }
}

impl fmt::Display for EventData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id: {}\nevent: {}\ndata: {}\nretry: {}\n\n",
            self.id, self.event, self.data, self.retry
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal frame parser mirroring what an SSE client does with the
    /// `key: value` lines.
    fn parse_frame(raw: &str) -> Option<EventData> {
        let mut id = None;
        let mut event = None;
        let mut data = None;
        let mut retry = None;

        for line in raw.lines() {
            if line.is_empty() {
                continue;
            }

            let (key, value) = line.split_once(": ")?;
            match key {
                "id" => id = Some(value.to_string()),
                "event" => event = Some(value.to_string()),
                "data" => data = Some(value.to_string()),
                "retry" => retry = value.parse().ok(),
                _ => return None,
            }
        }

        Some(EventData {
            id: id?,
            event: event?,
            data: data?,
            retry: retry?,
        })
    }

    #[test]
    fn frame_renders_four_lines_and_round_trips() {
        let frame = EventData::new(POST_ADDED, r#"{"id":1}"#);
        let wire = frame.to_string();

        assert!(wire.ends_with("\n\n"));
        assert_eq!(wire.trim_end_matches('\n').lines().count(), 4);

        let parsed = parse_frame(&wire).expect("frame should parse");
        assert_eq!(parsed, frame);
    }

    #[test]
    fn frames_get_unique_ids() {
        let a = EventData::new(POST_ADDED, "x");
        let b = EventData::new(POST_ADDED, "x");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn ping_frame_has_empty_data() {
        let ping = EventData::ping();
        assert_eq!(ping.event, "ping");
        assert_eq!(ping.data, "");
    }

    #[test]
    fn envelope_round_trips_the_tagged_event() {
        let event = DomainEvent::CommentAdded {
            post_id: 1,
            comment_id: 2,
            post_user_id: 3,
            comment_user_id: 4,
            comment_user_name: "ada".to_string(),
            created_at: Utc::now(),
            body_preview: "hello".to_string(),
        };

        let envelope = NotificationEnvelope::new(&event, "test-bus").unwrap();
        assert_eq!(envelope.detail_type, "NotificationReceived");
        assert_eq!(envelope.source, "notifications");
        assert!(envelope.detail.contains(r#""event_type":"CommentAdded""#));

        let wire = serde_json::to_string(&envelope).unwrap();
        let back: NotificationEnvelope = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.event().unwrap(), event);
    }

    #[test]
    fn body_preview_respects_byte_cap_and_char_boundaries() {
        assert_eq!(body_preview("short"), "short");

        let exact = "a".repeat(BODY_PREVIEW_MAX);
        assert_eq!(body_preview(&exact), exact);

        let long = "a".repeat(BODY_PREVIEW_MAX + 50);
        assert_eq!(body_preview(&long).len(), BODY_PREVIEW_MAX);

        // 98 ascii bytes followed by a 3-byte char straddling the cap
        let mixed = format!("{}日本", "a".repeat(98));
        let preview = body_preview(&mixed);
        assert!(preview.len() <= BODY_PREVIEW_MAX);
        assert!(mixed.starts_with(preview));
        assert!(preview.is_char_boundary(preview.len()));
    }
}
