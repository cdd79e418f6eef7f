//! WebSocket bridge over the event fanout.
//!
//! Each connection subscribes to the wildcard topic and receives every
//! event as one JSON text frame. Ping/pong keepalive tears down dead
//! connections; a client that stops draining simply starts losing events
//! per the fanout's non-blocking drop policy.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::debug;

use crate::errors::{OrcError, OrcResult};
use crate::event::WILDCARD_TOPIC;
use crate::fanout::Subscription;
use crate::pipeline::EventPipeline;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Router exposing the event stream at `/ws`.
pub fn router(pipeline: Arc<EventPipeline>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}

/// Bind and serve until the listener fails or the process stops.
pub async fn serve(pipeline: Arc<EventPipeline>, addr: &str) -> OrcResult<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| OrcError::wrap(e, format!("Failed to bind {addr}")))?;
    axum::serve(listener, router(pipeline))
        .await
        .map_err(|e| OrcError::wrap(e, "Event bridge server failed"))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(pipeline): State<Arc<EventPipeline>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, pipeline))
}

async fn handle_socket(socket: WebSocket, pipeline: Arc<EventPipeline>) {
    let subscription = pipeline.subscribe(WILDCARD_TOPIC);
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, subscription).await;
}

/// Core socket loop: event forwarding, client receiving, and periodic
/// ping/pong health checking in a single select. No Pong within
/// [`PONG_TIMEOUT`] after a Ping means the connection is dead.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut subscription: Subscription,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            event = subscription.recv() => {
                match event {
                    Some(event) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                debug!(error = %e, "failed to serialize event for socket");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    // Fanout closed: the orchestrator is shutting down.
                    None => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Clients have nothing to say to us; ignore.
                    }
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
