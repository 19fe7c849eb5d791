//! Request/response correlation over transports with no call/return
//! semantics.
//!
//! Every correlated request carries an [`EchoToken`] on the wire; the
//! matching response echoes it back. The registry maps outstanding tokens to
//! waiting callers and guarantees each pending request is resolved or timed
//! out exactly once.
//!
//! Caller tokens count up from 1. Negative tokens are reserved sentinels for
//! fixed bootstrap queries (fetching the bot's own identity) rather than
//! arbitrary caller-issued requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use dicelink_core::ApiError;

// =============================================================================
// EchoToken
// =============================================================================

/// Opaque correlation token embedded in a request and echoed in its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EchoToken(pub i64);

impl EchoToken {
    /// Sentinel for the identity-bootstrap query (`get_login_info`).
    pub const LOGIN_INFO: EchoToken = EchoToken(-1);
    /// Sentinel for background group-info refreshes.
    pub const GROUP_INFO: EchoToken = EchoToken(-2);

    /// Extracts a token from a wire `echo` value. Accepts integers and
    /// numeric strings; anything else is foreign and yields `None`.
    pub fn from_wire(value: &Value) -> Option<EchoToken> {
        match value {
            Value::Number(n) => n.as_i64().map(EchoToken),
            Value::String(s) => s.parse::<i64>().ok().map(EchoToken),
            _ => None,
        }
    }
}

impl std::fmt::Display for EchoToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<EchoToken> for Value {
    fn from(token: EchoToken) -> Value {
        Value::from(token.0)
    }
}

// =============================================================================
// CorrelationRegistry
// =============================================================================

/// One outstanding request: the waiting caller's channel and its deadline.
///
/// Owned exclusively by the registry until resolution.
struct PendingRequest {
    tx: oneshot::Sender<Value>,
    deadline: Instant,
}

/// Maps outstanding request tokens to waiting callers.
pub struct CorrelationRegistry {
    pending: Mutex<HashMap<EchoToken, PendingRequest>>,
    next_token: AtomicI64,
    /// Deadline attached to entries that are never explicitly awaited, so
    /// the periodic sweep can purge them.
    default_timeout: Duration,
}

impl CorrelationRegistry {
    /// Creates a registry. `default_timeout` bounds the lifetime of entries
    /// whose callers never await (fire-and-forget correlated requests).
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_token: AtomicI64::new(1),
            default_timeout,
        }
    }

    /// Allocates a fresh token and registers a waiting slot for it.
    ///
    /// The caller embeds the token in the outbound frame and passes the
    /// receiver to [`await_response`](Self::await_response).
    pub fn register(&self) -> (EchoToken, oneshot::Receiver<Value>) {
        let token = EchoToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        let rx = self.register_token(token);
        (token, rx)
    }

    /// Registers a waiting slot for a caller-chosen token (sentinels).
    ///
    /// A colliding registration overwrites the older slot; that is logged as
    /// an anomaly rather than silently losing the newer request's answer.
    pub fn register_token(&self, token: EchoToken) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        let entry = PendingRequest {
            tx,
            deadline: Instant::now() + self.default_timeout,
        };
        if self.pending.lock().insert(token, entry).is_some() {
            warn!(echo = %token, "correlation token collision, older waiter dropped");
        }
        rx
    }

    /// Delivers a response payload to the waiter registered for `token`.
    ///
    /// Returns `true` if a waiter existed. Late or duplicate responses are a
    /// silent no-op apart from a log line.
    pub fn resolve(&self, token: EchoToken, payload: Value) -> bool {
        let entry = self.pending.lock().remove(&token);
        match entry {
            Some(pending) => {
                trace!(echo = %token, "resolved pending request");
                // The receiver may already be dropped (await raced with us);
                // either way the entry is gone, which is what exactly-once
                // requires.
                let _ = pending.tx.send(payload);
                true
            }
            None => {
                debug!(echo = %token, "response for unknown echo (timed out?)");
                false
            }
        }
    }

    /// Blocks the caller until delivery or timeout.
    ///
    /// On timeout the entry is removed so the registry cannot leak it, and
    /// `ApiError::Timeout` is returned. A closed channel means the transport
    /// dropped while waiting.
    pub async fn await_response(
        &self,
        token: EchoToken,
        rx: oneshot::Receiver<Value>,
        timeout: Duration,
    ) -> Result<Value, ApiError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => {
                self.pending.lock().remove(&token);
                Err(ApiError::NotConnected)
            }
            Err(_) => {
                self.pending.lock().remove(&token);
                Err(ApiError::Timeout)
            }
        }
    }

    /// Removes a pending entry without delivering anything. Used when the
    /// request could not even be sent; dropping the sender fails the waiter.
    pub fn remove(&self, token: EchoToken) {
        self.pending.lock().remove(&token);
    }

    /// Purges entries whose deadline elapsed without being awaited.
    /// Returns the number of purged entries.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|token, entry| {
            let keep = entry.deadline > now;
            if !keep {
                debug!(echo = %token, "sweeping expired pending request");
            }
            keep
        });
        before - pending.len()
    }

    /// Spawns the background sweep pass; runs until `cancel` fires.
    pub fn spawn_sweeper(
        self: &std::sync::Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let registry = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = registry.sweep();
                        if purged > 0 {
                            debug!(purged, "correlation sweep");
                        }
                    }
                }
            }
        })
    }

    /// Drops every pending entry, failing all waiters.
    ///
    /// Called on disconnect so no caller hangs on a connection that no
    /// longer exists: dropping the senders closes the receivers, which
    /// surfaces as `ApiError::NotConnected`.
    pub fn fail_all(&self) {
        let mut pending = self.pending.lock();
        let count = pending.len();
        if count > 0 {
            debug!(count, "failing pending requests due to disconnect");
            pending.clear();
        }
    }

    /// Number of currently pending requests.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether no requests are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_delivers_and_removes() {
        let registry = CorrelationRegistry::default();
        let (token, rx) = registry.register();

        assert!(registry.resolve(token, json!({"data": {"user_id": 10001}})));
        assert!(registry.is_empty());

        let payload = registry
            .await_response(token, rx, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(payload["data"]["user_id"], 10001);
    }

    #[tokio::test]
    async fn await_times_out_and_removes_entry() {
        tokio::time::pause();
        let registry = CorrelationRegistry::default();
        let (token, rx) = registry.register();

        let err = registry
            .await_response(token, rx, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Timeout));
        assert!(registry.is_empty());

        // A late response after the timeout is a silent no-op.
        assert!(!registry.resolve(token, json!({})));
    }

    #[tokio::test]
    async fn timeout_storm_leaves_no_entries() {
        tokio::time::pause();
        let registry = std::sync::Arc::new(CorrelationRegistry::default());

        let mut waiters = Vec::new();
        for _ in 0..100 {
            let (token, rx) = registry.register();
            let registry = std::sync::Arc::clone(&registry);
            waiters.push(tokio::spawn(async move {
                registry
                    .await_response(token, rx, Duration::from_millis(50))
                    .await
            }));
        }

        for waiter in waiters {
            assert!(matches!(waiter.await.unwrap(), Err(ApiError::Timeout)));
        }
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn fail_all_unblocks_waiters_with_not_connected() {
        let registry = CorrelationRegistry::default();
        let (token, rx) = registry.register();

        registry.fail_all();
        let err = registry
            .await_response(token, rx, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotConnected));
    }

    #[tokio::test]
    async fn sweep_purges_only_expired() {
        tokio::time::pause();
        let registry = CorrelationRegistry::new(Duration::from_millis(100));
        let (_t1, _rx1) = registry.register();

        tokio::time::advance(Duration::from_millis(60)).await;
        let (_t2, _rx2) = registry.register();

        tokio::time::advance(Duration::from_millis(60)).await;
        // t1 is past its deadline, t2 is not.
        assert_eq!(registry.sweep(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn sentinel_collision_overwrites() {
        let registry = CorrelationRegistry::default();
        let _rx_old = registry.register_token(EchoToken::LOGIN_INFO);
        let rx_new = registry.register_token(EchoToken::LOGIN_INFO);
        assert_eq!(registry.len(), 1);

        registry.resolve(EchoToken::LOGIN_INFO, json!({"ok": true}));
        assert_eq!(rx_new.await.unwrap()["ok"], true);
    }

    #[test]
    fn token_from_wire_accepts_ints_and_numeric_strings() {
        assert_eq!(EchoToken::from_wire(&json!(7)), Some(EchoToken(7)));
        assert_eq!(EchoToken::from_wire(&json!("-1")), Some(EchoToken::LOGIN_INFO));
        assert_eq!(EchoToken::from_wire(&json!({"x": 1})), None);
        assert_eq!(EchoToken::from_wire(&json!("abc")), None);
    }
}
