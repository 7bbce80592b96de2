// Post-to-connection delivery. Sockets accepted by this process get their
// payloads through an in-memory sender; connection ids registered by a
// sibling process are forwarded to its gateway endpoint when one is
// configured. Either way a dead connection is a routine failure the caller
// logs and moves past.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

const SEND_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("connection is gone")]
    Gone,
    #[error("connection send queue closed")]
    Closed,
    #[error("send timed out")]
    Timeout,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub struct Gateway {
    local: Mutex<HashMap<String, mpsc::Sender<String>>>,
    webhook: Option<String>,
    http: reqwest::Client,
}

impl Gateway {
    pub fn new(webhook_dsn: Option<String>) -> Self {
        Self {
            local: Mutex::new(HashMap::new()),
            webhook: webhook_dsn,
            http: reqwest::Client::new(),
        }
    }

    /// Bind a locally-held socket's outbound queue to its connection id.
    pub async fn attach(&self, connection_id: &str, tx: mpsc::Sender<String>) {
        self.local
            .lock()
            .await
            .insert(connection_id.to_string(), tx);
    }

    pub async fn detach(&self, connection_id: &str) {
        self.local.lock().await.remove(connection_id);
    }

    pub async fn local_connections(&self) -> usize {
        self.local.lock().await.len()
    }

    /// Push one payload to one connection. The sender is cloned out of the
    /// map so the lock is never held across a send.
    pub async fn post_to_connection(
        &self,
        connection_id: &str,
        payload: &str,
    ) -> Result<(), GatewayError> {
        let sender = self.local.lock().await.get(connection_id).cloned();

        if let Some(tx) = sender {
            return match tokio::time::timeout(SEND_TIMEOUT, tx.send(payload.to_string())).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(GatewayError::Closed),
                Err(_) => Err(GatewayError::Timeout),
            };
        }

        let Some(webhook) = &self.webhook else {
            return Err(GatewayError::Gone);
        };

        let url = format!("{}/connections/{}", webhook.trim_end_matches('/'), connection_id);
        self.http
            .post(url)
            .timeout(SEND_TIMEOUT)
            .header("content-type", "application/json")
            .body(payload.to_string())
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attach_send_detach_lifecycle() {
        let gateway = Gateway::new(None);
        let (tx, mut rx) = mpsc::channel(4);

        gateway.attach("conn-1", tx).await;
        assert_eq!(gateway.local_connections().await, 1);

        gateway
            .post_to_connection("conn-1", r#"{"event_type":"PostAdded"}"#)
            .await
            .expect("local delivery");
        assert_eq!(rx.recv().await.unwrap(), r#"{"event_type":"PostAdded"}"#);

        gateway.detach("conn-1").await;
        assert_eq!(gateway.local_connections().await, 0);
    }

    #[tokio::test]
    async fn unknown_connection_without_webhook_is_gone() {
        let gateway = Gateway::new(None);
        let err = gateway
            .post_to_connection("missing", "payload")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Gone));
    }

    #[tokio::test]
    async fn closed_receiver_reports_closed() {
        let gateway = Gateway::new(None);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        gateway.attach("conn-2", tx).await;
        let err = gateway
            .post_to_connection("conn-2", "payload")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Closed));
    }
}
