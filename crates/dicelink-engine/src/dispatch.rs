//! Inbound frame demultiplexing.
//!
//! One decoded frame is either a correlated response, a meta frame
//! (heartbeat/lifecycle), or an event for the bot core. The correlation
//! check always runs before generic routing: a response frame must never be
//! misread as a user message.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use dicelink_core::{
    AdapterResult, ApiResult, BoxedBotCore, NoticeEvent, NormalizedMessage, RequestEvent,
};

use crate::api::ApiClient;
use crate::correlation::{CorrelationRegistry, EchoToken};

// =============================================================================
// Frame model
// =============================================================================

/// Category of one inbound frame, as produced by a platform translator.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Liveness-only traffic; never surfaces to the bot core.
    Meta(MetaFrame),
    /// A chat message.
    Message(NormalizedMessage),
    /// A notice (membership change, recall, poke).
    Notice(NoticeEvent),
    /// A request awaiting approval.
    Request(RequestEvent),
    /// Recognized but deliberately dropped (platform noise).
    Ignored,
}

/// Meta frame subtypes.
#[derive(Debug, Clone)]
pub enum MetaFrame {
    /// Periodic gateway heartbeat.
    Heartbeat,
    /// Gateway lifecycle announcement (connect/enable/disable).
    Lifecycle { sub_type: String },
}

// =============================================================================
// PlatformDriver
// =============================================================================

/// Identity learned from the minimal handshake after connecting.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    /// Platform-prefixed user id of the bot account.
    pub user_id: String,
    /// Display name of the bot account.
    pub nickname: String,
}

/// Per-platform protocol logic the generic engine is parameterized over.
///
/// The engine owns connection lifecycle, retries and correlation; the driver
/// owns the wire format.
#[async_trait::async_trait]
pub trait PlatformDriver: Send + Sync {
    /// Translates one decoded (non-response) frame into its category.
    fn translate(&self, frame: &Value) -> AdapterResult<Frame>;

    /// Performs the identity handshake (e.g. `get_login_info`) over the
    /// freshly established connection. Runs concurrently with the read loop
    /// so the correlated response can arrive.
    async fn identify(&self, api: &ApiClient) -> ApiResult<BotIdentity>;
}

// =============================================================================
// EventDispatcher
// =============================================================================

/// Demultiplexes inbound frames by category.
pub struct EventDispatcher {
    driver: Arc<dyn PlatformDriver>,
    registry: Arc<CorrelationRegistry>,
    bot_core: BoxedBotCore,
    last_heartbeat: Mutex<Option<Instant>>,
}

impl EventDispatcher {
    pub fn new(
        driver: Arc<dyn PlatformDriver>,
        registry: Arc<CorrelationRegistry>,
        bot_core: BoxedBotCore,
    ) -> Self {
        Self {
            driver,
            registry,
            bot_core,
            last_heartbeat: Mutex::new(None),
        }
    }

    /// When the last heartbeat arrived, if any.
    pub fn last_heartbeat(&self) -> Option<Instant> {
        *self.last_heartbeat.lock()
    }

    /// Routes one raw inbound payload.
    ///
    /// A malformed frame is logged and discarded; it never affects
    /// connection state.
    pub async fn dispatch(&self, raw: &[u8]) {
        let value: Value = match serde_json::from_slice(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, len = raw.len(), "discarding unparseable frame");
                return;
            }
        };

        // Correlated responses first. Any frame carrying an echo is an
        // answer to something we sent, sentinel bootstrap queries included.
        if let Some(echo) = value.get("echo") {
            match EchoToken::from_wire(echo) {
                Some(token) => {
                    self.registry.resolve(token, value);
                }
                None => warn!(?echo, "response with foreign echo token dropped"),
            }
            return;
        }

        match self.driver.translate(&value) {
            Ok(Frame::Meta(MetaFrame::Heartbeat)) => {
                trace!("heartbeat");
                *self.last_heartbeat.lock() = Some(Instant::now());
            }
            Ok(Frame::Meta(MetaFrame::Lifecycle { sub_type })) => {
                debug!(sub_type = %sub_type, "lifecycle meta frame");
            }
            Ok(Frame::Message(message)) => {
                self.bot_core.on_message(message).await;
            }
            Ok(Frame::Notice(notice)) => {
                self.bot_core.on_notice(notice).await;
            }
            Ok(Frame::Request(request)) => {
                self.bot_core.on_request(request).await;
            }
            Ok(Frame::Ignored) => {}
            Err(e) => {
                warn!(error = %e, "discarding untranslatable frame");
            }
        }
    }
}
