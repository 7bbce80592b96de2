// ============================================
// Server-Sent Events streamers
// ============================================
//
// One handler per subscribable channel. Each stream multiplexes three
// sources: broker events filtered to its channel, a 30-second idle
// keepalive, and client disconnect (axum drops the stream, which
// deregisters the broker subscription).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};

use super::AppState;
use crate::events::{Channel, EventData};

/// Idle gap before a `ping` frame keeps the stream warm.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

pub async fn subscribe_posts(State(app): State<AppState>) -> Response {
    stream_channel(&app, Channel::PostAdded)
}

pub async fn subscribe_comments(State(app): State<AppState>) -> Response {
    stream_channel(&app, Channel::CommentAdded)
}

pub async fn subscribe_sub_comments(State(app): State<AppState>) -> Response {
    stream_channel(&app, Channel::SubCommentAdded)
}

fn stream_channel(app: &AppState, channel: Channel) -> Response {
    let mut subscription = app.broker.subscribe();
    tracing::info!(channel = channel.as_str(), "SSE subscriber connected");

    let stream = async_stream::stream! {
        // The opening ping tells the client the stream is live before any
        // event arrives.
        yield Ok::<Event, Infallible>(EventData::ping().into_sse_event());

        let mut idle = Box::pin(tokio::time::sleep(KEEPALIVE_INTERVAL));

        loop {
            tokio::select! {
                msg = subscription.recv() => match msg {
                    Some(msg) if msg.channel == channel.as_str() => {
                        yield Ok(EventData::new(channel.as_str(), msg.payload).into_sse_event());
                        idle.as_mut().reset(tokio::time::Instant::now() + KEEPALIVE_INTERVAL);
                    }
                    Some(_) => {} // other channels are invisible to this subscriber
                    None => break,
                },
                () = idle.as_mut() => {
                    yield Ok(EventData::ping().into_sse_event());
                    idle.as_mut().reset(tokio::time::Instant::now() + KEEPALIVE_INTERVAL);
                }
            }
        }
    };

    (
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::CONNECTION, "keep-alive"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Sse::new(stream),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, BrokerMessage};
    use crate::events::{COMMENT_ADDED, POST_ADDED};

    /// The channel filter each stream applies to broker messages.
    fn visible(channel: Channel, msg: &BrokerMessage) -> bool {
        msg.channel == channel.as_str()
    }

    #[tokio::test]
    async fn subscriber_sees_only_its_channel() {
        let broker = Broker::new();
        let mut sub = broker.subscribe();

        broker.dispatch(BrokerMessage {
            channel: COMMENT_ADDED.to_string(),
            payload: "{}".to_string(),
        });
        broker.dispatch(BrokerMessage {
            channel: POST_ADDED.to_string(),
            payload: r#"{"id":1}"#.to_string(),
        });

        let first = sub.recv().await.unwrap();
        assert!(!visible(Channel::PostAdded, &first));

        let second = sub.recv().await.unwrap();
        assert!(visible(Channel::PostAdded, &second));
        assert_eq!(second.payload, r#"{"id":1}"#);
    }

    #[tokio::test]
    async fn keepalive_fires_after_idle_gap() {
        tokio::time::pause();

        let mut idle = Box::pin(tokio::time::sleep(KEEPALIVE_INTERVAL));
        let mut pings = 0u32;

        for _ in 0..2 {
            tokio::select! {
                () = idle.as_mut() => {
                    pings += 1;
                    idle.as_mut().reset(tokio::time::Instant::now() + KEEPALIVE_INTERVAL);
                }
            }
        }

        assert_eq!(pings, 2);
    }
}
