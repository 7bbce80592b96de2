// Cross-process notification pipeline: registry of live WebSocket
// connections, the delivery gateway, and the router that turns bus events
// into per-connection pushes.

pub mod gateway;
pub mod registry;
pub mod router;

use std::time::Duration;

use redis::aio::ConnectionManager;

use crate::events::{DomainEvent, NotificationEnvelope};

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(3);

/// Wrap a domain event in the bus envelope and publish it. Best-effort:
/// write paths log failures, they never surface them to the client.
pub async fn publish(
    conn: &ConnectionManager,
    bus_name: &str,
    event: &DomainEvent,
) -> anyhow::Result<()> {
    let envelope = NotificationEnvelope::new(event, bus_name)?;
    let payload = serde_json::to_string(&envelope)?;

    let mut conn = conn.clone();
    let mut cmd = redis::cmd("PUBLISH");
    cmd.arg(bus_name).arg(payload);
    let publish = cmd.query_async::<i64>(&mut conn);

    tokio::time::timeout(PUBLISH_TIMEOUT, publish)
        .await
        .map_err(|_| anyhow::anyhow!("notification publish timed out"))??;

    Ok(())
}
