//! WebSocket endpoint for real-time open notifications.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::client_ip::ClientIp;
use super::handlers::AppState;
use crate::notify::{Notifier, Subscription};

/// Upgrade to a WebSocket and stream open events until the client leaves.
pub async fn observe(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
) -> Response {
    let notifier = state.notifier.clone();
    ws.on_upgrade(move |socket| forward_events(socket, notifier, ip))
}

async fn forward_events(socket: WebSocket, notifier: Notifier, ip: Option<String>) {
    let Subscription { id, mut receiver } = notifier.register().await;
    info!(
        observer_id = id,
        client_ip = ip.as_deref().unwrap_or("unknown"),
        "observer_connected"
    );

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = receiver.recv() => {
                let Some(event) = event else {
                    // Dropped from the registry for lagging behind.
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };

                let payload = match serde_json::to_string(&event) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(observer_id = id, error = %e, "observer_event_serialize_failed");
                        continue;
                    }
                };

                if let Err(e) = sink.send(Message::Text(payload)).await {
                    warn!(observer_id = id, error = %e, "observer_send_failed");
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    // Clients have nothing to say; pings are answered by axum.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(observer_id = id, error = %e, "observer_receive_error");
                        break;
                    }
                }
            }
        }
    }

    notifier.unregister(id).await;
    info!(observer_id = id, "observer_disconnected");
}
