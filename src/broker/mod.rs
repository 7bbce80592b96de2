// ============================================
// In-process event broker
// ============================================
//
// One dedicated task drains the redis pub/sub subscription (post-added,
// comment-added, sub-comment-added) into the broker; every live SSE
// subscriber owns a bounded queue fed from it. A slow subscriber only ever
// loses its own oldest events (counted), it can never stall the consumer
// or its sibling subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use redis::aio::ConnectionManager;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Events buffered per subscriber before the oldest are dropped.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Bound on publish round-trips to redis.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(3);

/// One message read off the external pub/sub bus.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: String,
}

pub struct Broker {
    tx: broadcast::Sender<BrokerMessage>,
    dropped: Arc<AtomicU64>,
}

impl Broker {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_QUEUE_CAPACITY);
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a new subscriber. The subscription sees every message
    /// dispatched after this call; dropping it deregisters.
    pub fn subscribe(&self) -> BrokerSubscription {
        BrokerSubscription {
            rx: self.tx.subscribe(),
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// Fan a message out to all current subscribers. With no subscribers
    /// the message is discarded, which is fine: SSE has no replay.
    pub fn dispatch(&self, msg: BrokerMessage) {
        let _ = self.tx.send(msg);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total events lost to slow subscribers since startup.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BrokerSubscription {
    rx: broadcast::Receiver<BrokerMessage>,
    dropped: Arc<AtomicU64>,
}

impl BrokerSubscription {
    /// Next message for this subscriber. Overflow skips to the oldest
    /// retained message after recording how many were lost. `None` means
    /// the broker itself is gone.
    pub async fn recv(&mut self) -> Option<BrokerMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(RecvError::Lagged(missed)) => {
                    self.dropped.fetch_add(missed, Ordering::Relaxed);
                    tracing::warn!(missed, "slow SSE subscriber dropped oldest events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Drain the external pub/sub subscription into the broker. Runs for the
/// process lifetime; exit means the subscription died.
pub async fn run_consumer(mut pubsub: redis::aio::PubSub, broker: Arc<Broker>) {
    let mut stream = pubsub.on_message();

    while let Some(msg) = stream.next().await {
        let channel = msg.get_channel_name().to_string();
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(channel, error = %err, "discarding undecodable pub/sub message");
                continue;
            }
        };

        broker.dispatch(BrokerMessage { channel, payload });
    }

    tracing::error!(
        dropped = broker.dropped_events(),
        "pub/sub consumer stream ended; SSE fanout is down"
    );
}

/// Publish an entity payload to a pub/sub topic. Best-effort: the write
/// path logs failures instead of surfacing them to the client.
pub async fn publish(
    conn: &ConnectionManager,
    channel: &str,
    payload: String,
) -> Result<(), redis::RedisError> {
    let mut conn = conn.clone();
    let mut cmd = redis::cmd("PUBLISH");
    cmd.arg(channel).arg(payload);
    let publish = cmd.query_async::<i64>(&mut conn);

    match tokio::time::timeout(PUBLISH_TIMEOUT, publish).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => Err(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "publish timed out",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::POST_ADDED;

    fn msg(n: u64) -> BrokerMessage {
        BrokerMessage {
            channel: POST_ADDED.to_string(),
            payload: format!("{{\"id\":{n}}}"),
        }
    }

    #[tokio::test]
    async fn every_subscriber_receives_every_event() {
        let broker = Broker::new();
        let mut first = broker.subscribe();
        let mut second = broker.subscribe();

        broker.dispatch(msg(1));
        broker.dispatch(msg(2));

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.recv().await, Some(msg(1)));
            assert_eq!(sub.recv().await, Some(msg(2)));
        }
    }

    #[tokio::test]
    async fn dropping_a_subscription_deregisters_it() {
        let broker = Broker::new();
        let first = broker.subscribe();
        let second = broker.subscribe();
        assert_eq!(broker.subscriber_count(), 2);

        drop(first);
        assert_eq!(broker.subscriber_count(), 1);

        drop(second);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest_events_and_counts_them() {
        let broker = Broker::new();
        let mut sub = broker.subscribe();

        let overflow = 10;
        for n in 0..(SUBSCRIBER_QUEUE_CAPACITY as u64 + overflow) {
            broker.dispatch(msg(n));
        }

        // The first message delivered is the oldest still retained.
        let first = sub.recv().await.expect("broker alive");
        assert_eq!(first, msg(overflow));
        assert_eq!(broker.dropped_events(), overflow);
    }

    #[tokio::test]
    async fn dispatch_without_subscribers_is_a_no_op() {
        let broker = Broker::new();
        broker.dispatch(msg(1));
        assert_eq!(broker.dropped_events(), 0);
    }
}
