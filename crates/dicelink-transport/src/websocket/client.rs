//! Outbound WebSocket connector.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{connect_async, tungstenite};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use dicelink_core::{TransportError, TransportResult};
use dicelink_engine::{Connection, Connector};

/// Dials out to a gateway's WebSocket endpoint.
///
/// One `connect` call performs exactly one dial. When the socket drops, the
/// inbound channel closes and the connector is done; whether to dial again
/// is the connection manager's decision.
pub struct WsClientConnector {
    url: String,
    access_token: Option<String>,
}

impl WsClientConnector {
    pub fn new(url: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            url: url.into(),
            access_token,
        }
    }
}

#[async_trait]
impl Connector for WsClientConnector {
    async fn connect(&self, cancel: CancellationToken) -> TransportResult<Connection> {
        let mut request = self.url.as_str().into_client_request().map_err(|e| {
            TransportError::InvalidConfig(format!("invalid WebSocket url {}: {e}", self.url))
        })?;
        if let Some(token) = &self.access_token {
            let value = format!("Bearer {token}").parse().map_err(|_| {
                TransportError::InvalidConfig("access token is not a valid header value".into())
            })?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        info!(url = %self.url, "dialing gateway");
        let (ws_stream, _response) = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = connect_async(request) => result.map_err(|e| match e {
                tungstenite::Error::Http(response)
                    if response.status() == 401 || response.status() == 403 =>
                {
                    TransportError::Unauthorized {
                        url: self.url.clone(),
                        reason: format!("gateway rejected handshake: {}", response.status()),
                    }
                }
                other => TransportError::ConnectionFailed {
                    url: self.url.clone(),
                    reason: other.to_string(),
                },
            })?,
        };

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(256);

        // Single pump per connection. Exiting the loop drops `in_tx`, which
        // closes the inbound channel and tells the manager the session is
        // over.
        let url = self.url.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = ws_tx.close().await;
                        break;
                    }
                    data = out_rx.recv() => match data {
                        Some(data) => {
                            let msg = tungstenite::Message::Text(
                                String::from_utf8_lossy(&data).to_string().into(),
                            );
                            if let Err(e) = ws_tx.send(msg).await {
                                warn!(url = %url, error = %e, "send failed, closing");
                                break;
                            }
                        }
                        None => {
                            let _ = ws_tx.close().await;
                            break;
                        }
                    },
                    msg = ws_rx.next() => match msg {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            trace!(len = text.len(), "inbound text frame");
                            if in_tx.send(text.as_bytes().to_vec()).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(tungstenite::Message::Binary(data))) => {
                            trace!(len = data.len(), "inbound binary frame");
                            if in_tx.send(data.to_vec()).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(tungstenite::Message::Ping(data))) => {
                            let _ = ws_tx.send(tungstenite::Message::Pong(data)).await;
                        }
                        Some(Ok(tungstenite::Message::Pong(_))) => {}
                        Some(Ok(tungstenite::Message::Close(_)))
                        | Some(Ok(tungstenite::Message::Frame(_))) => {
                            info!(url = %url, "gateway closed connection");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(url = %url, error = %e, "socket error");
                            break;
                        }
                        None => {
                            info!(url = %url, "socket stream ended");
                            break;
                        }
                    },
                }
            }
        });

        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
            remote: self.url.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

    /// Echo server that records the Authorization header of the handshake.
    async fn spawn_echo_server() -> (
        std::net::SocketAddr,
        tokio::sync::oneshot::Receiver<Option<String>>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (auth_tx, auth_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut seen_auth = None;
            let ws = accept_hdr_async(stream, |request: &Request, response: Response| {
                seen_auth = request
                    .headers()
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(response)
            })
            .await
            .unwrap();
            let _ = auth_tx.send(seen_auth);

            let (mut tx, mut rx) = ws.split();
            while let Some(Ok(msg)) = rx.next().await {
                if msg.is_text() && tx.send(msg).await.is_err() {
                    break;
                }
            }
        });

        (addr, auth_rx)
    }

    #[tokio::test]
    async fn dial_sends_bearer_token_and_round_trips() {
        let (addr, auth_rx) = spawn_echo_server().await;
        let connector =
            WsClientConnector::new(format!("ws://{addr}/ws"), Some("s3cret".to_string()));

        let mut connection = connector
            .connect(CancellationToken::new())
            .await
            .expect("dial");
        assert_eq!(auth_rx.await.unwrap().as_deref(), Some("Bearer s3cret"));

        connection
            .outbound
            .send(br#"{"action":"get_login_info"}"#.to_vec())
            .await
            .unwrap();
        let echoed = connection.inbound.recv().await.expect("echo");
        assert_eq!(echoed, br#"{"action":"get_login_info"}"#);
    }

    #[tokio::test]
    async fn refused_dial_is_transient() {
        // Nothing listens here; the dial must fail as retryable.
        let connector = WsClientConnector::new("ws://127.0.0.1:9/ws", None);
        let err = connector
            .connect(CancellationToken::new())
            .await
            .expect_err("refused");
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn cancel_closes_the_session() {
        let (addr, _auth_rx) = spawn_echo_server().await;
        let connector = WsClientConnector::new(format!("ws://{addr}/ws"), None);

        let cancel = CancellationToken::new();
        let mut connection = connector.connect(cancel.clone()).await.expect("dial");

        cancel.cancel();
        // Pump exits and drops the inbound sender.
        let end = tokio::time::timeout(Duration::from_secs(5), connection.inbound.recv())
            .await
            .expect("inbound should close");
        assert!(end.is_none());
    }

    #[test]
    fn bad_url_is_fatal() {
        let connector = WsClientConnector::new("not a url", None);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = runtime
            .block_on(connector.connect(CancellationToken::new()))
            .expect_err("invalid url");
        assert!(err.is_fatal());
    }
}
