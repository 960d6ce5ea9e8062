use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};

use crate::state::AppState;
use crate::subscriber::LocationSubscriber;

pub async fn public_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state, None))
}

pub async fn order_handler(
    ws: WebSocketUpgrade,
    Path(order_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state, Some(order_id)))
}

/// One subscriber per socket: the current view goes out immediately, then
/// every reconciled change until the client hangs up.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, order_id: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    let subscriber = LocationSubscriber::subscribe(&state.store, order_id.clone());
    let mut views = WatchStream::new(subscriber.watch());

    state.metrics.location_subscribers.inc();
    info!(order_id = ?order_id, "location subscriber connected");

    let send_task = tokio::spawn(async move {
        while let Some(view) = views.next().await {
            let json = match serde_json::to_string(&view) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize tracked view for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    subscriber.close().await;
    state.metrics.location_subscribers.dec();
    info!("location subscriber disconnected");
}
