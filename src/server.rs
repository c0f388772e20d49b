//! WebSocket endpoint for live subscribers
//!
//! ## Endpoints
//!
//! - `GET /health` - store and registry sizes
//! - `WS /ws` - lookups by device id plus live snapshot pushes

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt, future};
use serde::Serialize;
use tracing::{error, info};

use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::storage::SnapshotStore;
use crate::subscription::SubscriptionHandler;

/// Shared state passed to all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SnapshotStore>,
    pub broadcaster: Broadcaster,
    pub subscriptions: SubscriptionHandler,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        broadcaster: Broadcaster,
        subscriptions: SubscriptionHandler,
    ) -> Self {
        Self {
            store,
            broadcaster,
            subscriptions,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub devices: usize,
    pub subscribers: usize,
}

pub fn router(config: &ServerConfig, state: AppState) -> Router {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the subscriber server
///
/// Binds `config.bind_addr`, serves in a background task and returns the
/// bound address.
pub async fn spawn_server(config: &ServerConfig, state: AppState) -> anyhow::Result<SocketAddr> {
    let app = router(config, state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("subscriber server listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("subscriber server error: {e}");
        }
    });

    Ok(addr)
}

async fn health(State(state): State<AppState>) -> Response {
    match state.store.len().await {
        Ok(devices) => Json(HealthResponse {
            status: "ok",
            devices,
            subscribers: state.broadcaster.subscriber_count(),
        })
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// WebSocket upgrade handler
///
/// GET /ws
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();

    let sink = sender.with(|text: String| future::ok::<_, axum::Error>(Message::Text(text)));

    // Text frames become requests; binary frames are accepted if they hold UTF-8.
    // A close frame ends the stream. Pings are answered by axum.
    let stream = receiver
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => String::from_utf8(bytes).ok().map(Ok),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        });

    state
        .subscriptions
        .run(Box::pin(sink), Box::pin(stream))
        .await;
}
