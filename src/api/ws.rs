// WebSocket endpoint for push notifications. Identity comes from the
// session cookie pair verified by the authenticator middleware; there is
// no header-based identity escape hatch.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Extension, State, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::AppState;
use super::error::ApiError;
use crate::middleware::CurrentUser;

/// Payloads buffered per socket before the router sees backpressure.
const OUTBOUND_QUEUE: usize = 64;

pub async fn upgrade(
    State(app): State<AppState>,
    Extension(principal): Extension<CurrentUser>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user = principal.require()?.clone();

    Ok(ws.on_upgrade(move |socket| handle_socket(app, socket, user.user_id)))
}

/// Connection lifecycle: register in the fleet-wide table and the local
/// gateway, pump frames both ways, then tear both registrations down on
/// any exit path.
async fn handle_socket(app: AppState, mut socket: WebSocket, user_id: i64) {
    let connection_id = Uuid::new_v4().to_string();

    if let Err(err) = app.registry.register(&connection_id, user_id).await {
        tracing::error!(connection_id, user_id, error = %err, "connection registration failed");
        return;
    }

    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
    app.gateway.attach(&connection_id, tx).await;
    let local_connections = app.gateway.local_connections().await;
    tracing::info!(
        connection_id,
        user_id,
        local_connections,
        "websocket connected"
    );

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(payload) => {
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // this stream is push-only; inbound frames are ignored
                Some(Err(_)) => break,
            },
        }
    }

    app.gateway.detach(&connection_id).await;
    if let Err(err) = app.registry.unregister(&connection_id).await {
        tracing::warn!(connection_id, error = %err, "connection deregistration failed");
    }
    tracing::info!(connection_id, user_id, "websocket disconnected");
}
