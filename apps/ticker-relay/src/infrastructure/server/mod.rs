//! Downstream WebSocket Server
//!
//! Accepts client connections and bridges them to a [`Gateway`].
//!
//! # Endpoints
//!
//! - `GET /tickers` - WebSocket, auto-routed crypto and equities
//! - `GET /crypto` - WebSocket, crypto only
//!
//! Each connection gets a UUID session id and a bounded outbound queue. A
//! writer task serializes [`ServerEvent`]s to text frames; the read loop
//! decodes client frames into commands and dispatches them.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::{Router, routing::get};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::gateway::{Gateway, GatewayNamespace};
use crate::domain::protocol::{ClientCommand, ProtocolError, ServerEvent};

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the relay server.
#[derive(Debug)]
pub struct ServerState {
    tickers: Arc<Gateway>,
    crypto: Arc<Gateway>,
    session_queue: usize,
    cancel: CancellationToken,
}

impl ServerState {
    /// Create server state.
    #[must_use]
    pub const fn new(
        tickers: Arc<Gateway>,
        crypto: Arc<Gateway>,
        session_queue: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tickers,
            crypto,
            session_queue,
            cancel,
        }
    }

    fn gateway(&self, namespace: GatewayNamespace) -> Arc<Gateway> {
        match namespace {
            GatewayNamespace::Tickers => Arc::clone(&self.tickers),
            GatewayNamespace::Crypto => Arc::clone(&self.crypto),
        }
    }
}

// =============================================================================
// Relay Server
// =============================================================================

/// Downstream WebSocket server.
pub struct RelayServer {
    port: u16,
    state: Arc<ServerState>,
    cancel: CancellationToken,
}

impl RelayServer {
    /// Create a new relay server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<ServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Build the router.
    #[must_use]
    pub fn router(state: Arc<ServerState>) -> Router {
        Router::new()
            .route(GatewayNamespace::Tickers.path(), get(tickers_handler))
            .route(GatewayNamespace::Crypto.path(), get(crypto_handler))
            .with_state(state)
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ServerFailed` on a fatal server error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr().ok();
        tracing::info!(addr = ?local, "Relay server listening");

        axum::serve(listener, Self::router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Relay server stopped");
        Ok(())
    }
}

// =============================================================================
// WebSocket Handlers
// =============================================================================

async fn tickers_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    upgrade(ws, &state, GatewayNamespace::Tickers)
}

async fn crypto_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    upgrade(ws, &state, GatewayNamespace::Crypto)
}

fn upgrade(
    ws: WebSocketUpgrade,
    state: &ServerState,
    namespace: GatewayNamespace,
) -> impl IntoResponse + use<> {
    let gateway = state.gateway(namespace);
    let queue = state.session_queue;
    let cancel = state.cancel.child_token();
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, queue, cancel))
}

/// Drive one client connection until it closes or the server stops.
async fn handle_socket(
    socket: WebSocket,
    gateway: Arc<Gateway>,
    queue: usize,
    cancel: CancellationToken,
) {
    let session_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(queue);

    gateway.on_connect(session_id.clone(), tx);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let writer_session = session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event.encode() {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(session_id = %writer_session, error = %e, "Failed to encode event");
                }
            }
        }
        let _ = ws_sender.close().await;
    });

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = ws_receiver.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => match ClientCommand::decode(text.as_str()) {
                Ok(command) => gateway.dispatch(&session_id, command),
                Err(e) => {
                    tracing::debug!(session_id = %session_id, error = %e, "Rejected client frame");
                    gateway.reject(&session_id, e.to_string());
                }
            },
            Some(Ok(Message::Binary(_))) => {
                gateway.reject(&session_id, ProtocolError::UnsupportedFrame("binary").to_string());
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Err(e)) => {
                tracing::debug!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    gateway.on_disconnect(&session_id);
    writer.abort();
}

// =============================================================================
// Errors
// =============================================================================

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
