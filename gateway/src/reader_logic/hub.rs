//! Downstream fan-out: JSON event frames over WebSocket, plus the
//! operator-facing HTTP control surface (start/stop/status/health/manage).

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::reader_logic::alert::Notifier;
use crate::reader_logic::engine::ReaderEngine;
use crate::reader_logic::error::ReaderError;

/// One frame on the broadcast channel: an event name plus its payload.
#[derive(Debug, Serialize)]
pub struct EventFrame {
    pub event: String,
    pub payload: Value,
}

/// Fire-and-forget broadcast hub. Publishing with no subscribers is fine;
/// slow subscribers lag and skip, they never block the publisher.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<Arc<EventFrame>>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: &str, payload: Value) {
        let frame = Arc::new(EventFrame {
            event: event.to_string(),
            payload,
        });
        // Err means no subscribers right now, which is not a failure.
        let _ = self.tx.send(frame);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EventFrame>> {
        self.tx.subscribe()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReaderEngine>,
    pub hub: EventHub,
    pub notifier: Arc<dyn Notifier>,
}

/// Serves the WebSocket feed and the control routes until shutdown.
pub async fn run(port: u16, state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/reader/start", post(start_reader))
        .route("/api/reader/stop", post(stop_reader))
        .route("/api/reader/status", get(reader_status))
        .route("/api/reader/health", get(reader_health))
        .route("/api/reader/manage", post(manage_reader))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    log::info!("Downstream server listening on {addr}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            log::error!("Failed to bind downstream port {port}: {e}");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
        })
        .await
    {
        log::error!("Downstream server error: {e}");
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    use futures_util::StreamExt;

    let mut events = state.hub.subscribe();
    log::info!("WebSocket subscriber connected");

    loop {
        tokio::select! {
            msg = socket.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            frame = events.recv() => {
                match frame {
                    Ok(frame) => {
                        let Ok(text) = serde_json::to_string(frame.as_ref()) else { continue };
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    // Subscriber fell behind; drop the lost frames and go on.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("WebSocket subscriber lagged, {skipped} frames dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    log::info!("WebSocket subscriber disconnected");
}

async fn start_reader(State(state): State<AppState>) -> impl IntoResponse {
    log::info!("Start requested over HTTP");
    match state.engine.start().await {
        Ok(()) => {
            notify_detached(&state, "RFID reader started manually");
            ok_response("reader started")
        }
        Err(e) => error_response(e),
    }
}

async fn stop_reader(State(state): State<AppState>) -> impl IntoResponse {
    log::info!("Stop requested over HTTP");
    match state.engine.stop().await {
        Ok(()) => {
            notify_detached(&state, "RFID reader stopped manually");
            ok_response("reader stopped")
        }
        Err(e) => error_response(e),
    }
}

async fn reader_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.engine.status().await;
    (StatusCode::OK, Json(json!(status)))
}

async fn reader_health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.engine.status().await;
    if status.is_connected {
        (
            StatusCode::OK,
            Json(json!({ "status": "Healthy", "timestamp": Utc::now().to_rfc3339() })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "Unhealthy", "timestamp": Utc::now().to_rfc3339() })),
        )
    }
}

/// Stop-if-running then start; a convenience restart for operators.
async fn manage_reader(State(state): State<AppState>) -> impl IntoResponse {
    log::info!("Manage (restart) requested over HTTP");
    if state.engine.status().await.is_connected {
        if let Err(e) = state.engine.stop().await {
            return error_response(e);
        }
    }
    match state.engine.start().await {
        Ok(()) => ok_response("reader restarted"),
        Err(e) => error_response(e),
    }
}

fn notify_detached(state: &AppState, message: &str) {
    let notifier = Arc::clone(&state.notifier);
    let message = message.to_string();
    tokio::spawn(async move {
        if let Err(e) = notifier.send_alert(&message).await {
            log::warn!("Alert send failed: {e}");
        }
    });
}

fn ok_response(message: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "message": message, "timestamp": Utc::now().to_rfc3339() })),
    )
}

fn error_response(e: ReaderError) -> (StatusCode, Json<Value>) {
    let code = match e {
        ReaderError::IllegalState(_) => StatusCode::BAD_REQUEST,
        ReaderError::Hardware(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        code,
        Json(json!({ "error": e.to_string(), "timestamp": Utc::now().to_rfc3339() })),
    )
}
