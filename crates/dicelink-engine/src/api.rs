//! Outbound command channel with optional correlation.
//!
//! An [`ApiClient`] exists per live connection. `call` issues a correlated
//! request and waits for its echoed response; `send` is fire-and-forget for
//! verbs that need no answer. Both go through the connection's outbound
//! channel, so they fail with `NotConnected` once the socket is gone.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::debug;

use dicelink_core::{ApiError, ApiResult, TransportError};

use crate::correlation::{CorrelationRegistry, EchoToken};

/// Handle for issuing commands over one live connection.
#[derive(Clone)]
pub struct ApiClient {
    outbound: mpsc::Sender<Vec<u8>>,
    registry: Arc<CorrelationRegistry>,
    call_timeout: Duration,
}

impl ApiClient {
    pub fn new(
        outbound: mpsc::Sender<Vec<u8>>,
        registry: Arc<CorrelationRegistry>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            outbound,
            registry,
            call_timeout,
        }
    }

    /// The correlation registry backing this client.
    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    /// Issues a correlated request and waits for the echoed response.
    ///
    /// The waiting slot is registered before the frame is sent, so a
    /// response can never arrive unmatched. On send failure the slot is
    /// removed immediately.
    pub async fn call(&self, action: &str, params: Value) -> ApiResult<Value> {
        let (token, rx) = self.registry.register();
        self.call_with_token(token, rx, action, params).await
    }

    /// Issues a correlated request under a caller-chosen sentinel token.
    /// Used for the fixed bootstrap queries (identity handshake).
    pub async fn call_sentinel(&self, token: EchoToken, action: &str, params: Value) -> ApiResult<Value> {
        let rx = self.registry.register_token(token);
        self.call_with_token(token, rx, action, params).await
    }

    async fn call_with_token(
        &self,
        token: EchoToken,
        rx: tokio::sync::oneshot::Receiver<Value>,
        action: &str,
        params: Value,
    ) -> ApiResult<Value> {
        let request = json!({
            "action": action,
            "params": params,
            "echo": Value::from(token),
        });
        debug!(action = %action, echo = %token, "correlated call");

        let bytes = serde_json::to_vec(&request)?;
        if let Err(e) = self.outbound.send(bytes).await {
            self.registry.remove(token);
            return Err(TransportError::SendFailed(e.to_string()).into());
        }

        let response = self.registry.await_response(token, rx, self.call_timeout).await?;

        // Surface gateway-reported errors as typed failures.
        if let Some(retcode) = response.get("retcode").and_then(Value::as_i64)
            && retcode != 0
        {
            let message = response
                .get("message")
                .or_else(|| response.get("wording"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(ApiError::Retcode { retcode, message });
        }
        Ok(response.get("data").cloned().unwrap_or(response))
    }

    /// Registers a token and sends the request without waiting.
    ///
    /// Returns the token and receiver so a background task can await the
    /// response (the non-blocking `get_group_info_async` pattern). If the
    /// caller never awaits, the sweep purges the slot.
    pub async fn call_detached(
        &self,
        action: &str,
        params: Value,
    ) -> ApiResult<(EchoToken, tokio::sync::oneshot::Receiver<Value>)> {
        let (token, rx) = self.registry.register();
        let request = json!({
            "action": action,
            "params": params,
            "echo": Value::from(token),
        });
        let bytes = serde_json::to_vec(&request)?;
        if let Err(e) = self.outbound.send(bytes).await {
            self.registry.remove(token);
            return Err(TransportError::SendFailed(e.to_string()).into());
        }
        Ok((token, rx))
    }

    /// Fire-and-forget command; no echo, no response expected.
    pub async fn send(&self, action: &str, params: Value) -> ApiResult<()> {
        let request = json!({
            "action": action,
            "params": params,
        });
        debug!(action = %action, "fire-and-forget command");
        let bytes = serde_json::to_vec(&request)?;
        self.outbound
            .send(bytes)
            .await
            .map_err(|e| ApiError::from(TransportError::SendFailed(e.to_string())))
    }

    /// The per-call response timeout.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(buffer: usize) -> (ApiClient, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(buffer);
        let registry = Arc::new(CorrelationRegistry::default());
        (
            ApiClient::new(tx, registry, Duration::from_millis(200)),
            rx,
        )
    }

    #[tokio::test]
    async fn call_round_trip() {
        let (client, mut outbound) = client(8);
        let registry = Arc::clone(client.registry());

        // Feed the response back as soon as the request leaves.
        let feeder = tokio::spawn(async move {
            let raw = outbound.recv().await.unwrap();
            let request: Value = serde_json::from_slice(&raw).unwrap();
            assert_eq!(request["action"], "get_group_info");
            // The echo goes out as a plain JSON integer.
            assert!(request["echo"].is_i64());
            let token = EchoToken::from_wire(&request["echo"]).unwrap();
            registry.resolve(
                token,
                json!({"retcode": 0, "echo": token.0, "data": {"group_name": "dnd table"}}),
            );
        });

        let data = client
            .call("get_group_info", json!({"group_id": 20002}))
            .await
            .unwrap();
        assert_eq!(data["group_name"], "dnd table");
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn call_surfaces_gateway_retcode() {
        let (client, mut outbound) = client(8);
        let registry = Arc::clone(client.registry());

        let feeder = tokio::spawn(async move {
            let raw = outbound.recv().await.unwrap();
            let request: Value = serde_json::from_slice(&raw).unwrap();
            let token = EchoToken::from_wire(&request["echo"]).unwrap();
            registry.resolve(token, json!({"retcode": 100, "message": "no permission"}));
        });

        let err = client.call("set_group_ban", json!({})).await.unwrap_err();
        match err {
            ApiError::Retcode { retcode, message } => {
                assert_eq!(retcode, 100);
                assert_eq!(message, "no permission");
            }
            other => panic!("unexpected error: {other}"),
        }
        feeder.await.unwrap();
    }

    #[tokio::test]
    async fn send_failure_cleans_registry() {
        let (client, outbound) = client(1);
        drop(outbound);

        let err = client.call("send_group_msg", json!({})).await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
        assert!(client.registry().is_empty());
    }

    #[tokio::test]
    async fn fire_and_forget_carries_no_echo() {
        let (client, mut outbound) = client(8);
        client
            .send("send_group_msg", json!({"group_id": 1, "message": "hi"}))
            .await
            .unwrap();

        let raw = outbound.recv().await.unwrap();
        let request: Value = serde_json::from_slice(&raw).unwrap();
        assert!(request.get("echo").is_none());
        assert!(client.registry().is_empty());
    }
}
