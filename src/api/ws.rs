use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info};

use super::AppState;
use crate::broadcast::{BroadcastHub, Subscription};

/// Upgrades to a WebSocket that receives every broadcast reading.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let hub = state.service.hub().clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Forward broadcasts to `socket` until either side goes away.
///
/// Inbound frames carry no meaning and are discarded; the read side only
/// exists to notice the client closing.
async fn handle_socket(socket: WebSocket, hub: BroadcastHub) {
    let Subscription { id, mut receiver } = hub.subscribe().await;
    info!(subscriber = %id, "WebSocket client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut forward = tokio::spawn(async move {
        while let Some(text) = receiver.recv().await {
            if ws_tx.send(Message::Text((&*text).into())).await.is_err() {
                break;
            }
        }
    });

    let mut drain = tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut forward => {
            debug!(subscriber = %id, "WebSocket send failed");
            drain.abort();
        }
        _ = &mut drain => forward.abort(),
    }

    hub.unsubscribe(id).await;
    info!(subscriber = %id, "WebSocket client disconnected");
}
