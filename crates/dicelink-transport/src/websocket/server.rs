//! Reverse-mode WebSocket connector: the bridge listens, the gateway dials
//! in.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        ConnectInfo, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use dicelink_core::{TransportError, TransportResult};
use dicelink_engine::{Connection, Connector};

/// Listens on a local address and waits for the gateway to connect in.
///
/// Each `connect` call binds the listener, accepts exactly one authorized
/// gateway and resolves with its connection. While that session lives, a
/// second gateway is answered with `409 Conflict`; once the session ends the
/// listener shuts down so the next cycle can rebind.
pub struct WsServerConnector {
    addr: String,
    path: String,
    access_token: Option<String>,
    bound: Mutex<Option<SocketAddr>>,
}

impl WsServerConnector {
    pub fn new(
        addr: impl Into<String>,
        path: impl Into<String>,
        access_token: Option<String>,
    ) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            addr: addr.into(),
            path,
            access_token,
            bound: Mutex::new(None),
        }
    }

    /// The address of the current listener, once bound. Useful when the
    /// configured port is `0`.
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }
}

struct ServerState {
    access_token: Option<String>,
    /// Taken by the first authorized gateway; `None` means one is serving.
    slot: Mutex<Option<oneshot::Sender<Connection>>>,
    /// Fires when the session (or the whole cycle) is over.
    shutdown: CancellationToken,
}

#[async_trait]
impl Connector for WsServerConnector {
    async fn connect(&self, cancel: CancellationToken) -> TransportResult<Connection> {
        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                url: self.addr.clone(),
                reason: format!("bind failed: {e}"),
            })?;
        let actual_addr = listener.local_addr()?;
        *self.bound.lock() = Some(actual_addr);

        let (ready_tx, ready_rx) = oneshot::channel();
        let shutdown = CancellationToken::new();
        let state = Arc::new(ServerState {
            access_token: self.access_token.clone(),
            slot: Mutex::new(Some(ready_tx)),
            shutdown: shutdown.clone(),
        });

        let router = Router::new()
            .route(&self.path, get(ws_handler))
            .with_state(Arc::clone(&state));

        info!(addr = %actual_addr, path = %self.path, "listening for gateway");
        tokio::spawn(async move {
            let server = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown.cancelled_owned());
            if let Err(e) = server.await {
                warn!(error = %e, "listener error");
            }
        });

        // Propagate cycle cancellation into the listener's shutdown.
        {
            let shutdown = state.shutdown.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                shutdown.cancel();
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            connection = ready_rx => connection.map_err(|_| TransportError::ConnectionFailed {
                url: self.addr.clone(),
                reason: "listener ended before a gateway connected".into(),
            }),
        }
    }
}

/// Checks the gateway's credentials against the configured token.
///
/// Accepts `Authorization: Bearer <token>` or an `access_token` query
/// parameter. No configured token means open access.
fn authorized(
    expected: Option<&str>,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    let header_token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    header_token == Some(expected) || query.get("access_token").map(String::as_str) == Some(expected)
}

async fn ws_handler(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    if !authorized(state.access_token.as_deref(), &headers, &query) {
        warn!(remote_addr = %addr, "gateway rejected: bad access token");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    // One gateway per serve cycle.
    let Some(ready_tx) = state.slot.lock().take() else {
        warn!(remote_addr = %addr, "gateway rejected: session already active");
        return StatusCode::CONFLICT.into_response();
    };

    info!(remote_addr = %addr, "gateway connected");
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state, ready_tx))
}

async fn handle_socket(
    socket: WebSocket,
    addr: SocketAddr,
    state: Arc<ServerState>,
    ready_tx: oneshot::Sender<Connection>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
    let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(256);

    if ready_tx
        .send(Connection {
            outbound: out_tx,
            inbound: in_rx,
            remote: addr.to_string(),
        })
        .is_err()
    {
        // The connect call went away before the upgrade finished.
        return;
    }

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = ws_tx.close().await;
                break;
            }
            data = out_rx.recv() => match data {
                Some(data) => {
                    let msg = Message::Text(String::from_utf8_lossy(&data).to_string().into());
                    if let Err(e) = ws_tx.send(msg).await {
                        warn!(remote_addr = %addr, error = %e, "send failed, closing");
                        break;
                    }
                }
                None => {
                    let _ = ws_tx.close().await;
                    break;
                }
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    trace!(remote_addr = %addr, len = text.len(), "inbound text frame");
                    if in_tx.send(text.as_bytes().to_vec()).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    trace!(remote_addr = %addr, len = data.len(), "inbound binary frame");
                    if in_tx.send(data.to_vec()).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws_tx.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    info!(remote_addr = %addr, "gateway closed connection");
                    break;
                }
                Some(Err(e)) => {
                    warn!(remote_addr = %addr, error = %e, "socket error");
                    break;
                }
                None => break,
            },
        }
    }

    // The session is over; stop the listener so the next serve cycle can
    // rebind the port.
    state.shutdown.cancel();
    info!(remote_addr = %addr, "gateway session ended");
}
