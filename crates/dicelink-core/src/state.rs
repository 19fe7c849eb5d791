//! Endpoint identity and connection state.
//!
//! An [`Endpoint`] is the long-lived identity of one bot account on one
//! platform. It survives across reconnects; a socket is just the current
//! attempt to serve it. Its [`ConnectionState`] is an explicit state machine:
//! only the connection manager performs transitions, everything else reads.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// =============================================================================
// ConnectionState
// =============================================================================

/// Connection state of one endpoint.
///
/// Exactly one state holds at any time. Legal transitions:
///
/// ```text
/// Disconnected → Connecting
/// Connecting   → Connected | Failed | Disconnected
/// Connected    → Disconnected
/// Failed       → Disconnected   (explicit re-enable only)
/// ```
///
/// `Failed` is sticky: the retry controller never leaves it on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Transport is up and the identity handshake has completed.
    Connected,
    /// Retries exhausted or fatal failure; requires explicit re-enable.
    Failed,
}

impl ConnectionState {
    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Failed)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Connected, Failed)
                | (Failed, Disconnected)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// Mutable status fields of an endpoint, guarded by one lock.
#[derive(Debug, Clone, Default)]
struct EndpointStatus {
    enabled: bool,
    state: ConnectionState,
    /// Platform nickname, filled in once the identity handshake completes.
    nickname: String,
    /// Platform user id (e.g. `QQ:12345`), filled in by the adapter.
    user_id: String,
}

/// Long-lived identity of one bot account on one platform.
///
/// Created at configuration time, destroyed only when the user removes the
/// connection. Shared read-only with the rest of the bot; mutated through the
/// connection manager (`state`), `set_enable` (`enabled`) and the adapter
/// (identity fields).
#[derive(Debug)]
pub struct Endpoint {
    /// Opaque stable identifier.
    pub id: String,
    /// Platform name, e.g. `QQ`.
    pub platform: String,
    /// Protocol type, e.g. `onebot`.
    pub protocol_type: String,
    /// Per-endpoint working directory for persisted state.
    pub work_dir: PathBuf,
    status: RwLock<EndpointStatus>,
}

impl Endpoint {
    /// Creates a disabled, disconnected endpoint.
    pub fn new(
        id: impl Into<String>,
        platform: impl Into<String>,
        protocol_type: impl Into<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            platform: platform.into(),
            protocol_type: protocol_type.into(),
            work_dir: work_dir.into(),
            status: RwLock::new(EndpointStatus::default()),
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.status.read().state
    }

    /// Whether the endpoint is enabled.
    pub fn enabled(&self) -> bool {
        self.status.read().enabled
    }

    /// Sets the enabled flag. Called from `set_enable` only.
    pub fn set_enabled(&self, enabled: bool) {
        self.status.write().enabled = enabled;
    }

    /// Performs a state transition, enforcing the legal transition set.
    ///
    /// Returns `false` (and logs) if the transition is illegal; the state is
    /// left unchanged. Only the connection manager, holding its single-flight
    /// guard, may call this.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut status = self.status.write();
        if status.state == next {
            return true;
        }
        if !status.state.can_transition_to(next) {
            tracing::warn!(
                endpoint = %self.id,
                from = %status.state,
                to = %next,
                "illegal connection state transition ignored"
            );
            return false;
        }
        tracing::debug!(endpoint = %self.id, from = %status.state, to = %next, "state transition");
        status.state = next;
        true
    }

    /// Records the platform identity learned from the handshake.
    pub fn set_identity(&self, user_id: impl Into<String>, nickname: impl Into<String>) {
        let mut status = self.status.write();
        status.user_id = user_id.into();
        status.nickname = nickname.into();
    }

    /// Platform user id, empty until the handshake completes.
    pub fn user_id(&self) -> String {
        self.status.read().user_id.clone()
    }

    /// Platform nickname, empty until the handshake completes.
    pub fn nickname(&self) -> String {
        self.status.read().nickname.clone()
    }

    /// Takes a serializable snapshot for observability persistence.
    pub fn snapshot(&self) -> EndpointSnapshot {
        let status = self.status.read();
        EndpointSnapshot {
            id: self.id.clone(),
            platform: self.platform.clone(),
            protocol_type: self.protocol_type.clone(),
            enabled: status.enabled,
            state: status.state,
            nickname: status.nickname.clone(),
            user_id: status.user_id.clone(),
        }
    }
}

/// Serializable point-in-time view of an endpoint, persisted after every
/// enable/disable and state change so operators can always see status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSnapshot {
    pub id: String,
    pub platform: String,
    #[serde(rename = "protocolType")]
    pub protocol_type: String,
    pub enabled: bool,
    pub state: ConnectionState,
    pub nickname: String,
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// Receiver of endpoint snapshots for observability.
///
/// The runtime persists snapshots to the endpoint's work dir; tests swap in
/// an in-memory sink.
pub trait StatusSink: Send + Sync {
    /// Persists one snapshot. Must not block for long; called on state
    /// changes from the connection manager.
    fn persist(&self, snapshot: &EndpointSnapshot);
}

/// A [`StatusSink`] that only logs.
#[derive(Debug, Default)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn persist(&self, snapshot: &EndpointSnapshot) {
        tracing::debug!(
            endpoint = %snapshot.id,
            state = %snapshot.state,
            enabled = snapshot.enabled,
            "endpoint status"
        );
    }
}
