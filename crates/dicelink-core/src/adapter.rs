//! The platform adapter capability trait and the bot-core seam.
//!
//! Every platform is reached through one [`PlatformAdapter`] implementation.
//! The trait is a fixed capability set: the engine and the bot core consume
//! it identically and never special-case a platform. Verbs a platform cannot
//! provide default to log-and-no-op, never to an error.

use std::sync::Arc;

use async_trait::async_trait;

use crate::event::{NoticeEvent, RequestEvent};
use crate::message::NormalizedMessage;

// =============================================================================
// ExitCode
// =============================================================================

/// Result of one `serve` connection cycle.
///
/// The retry controller inspects this to decide whether another attempt is
/// worthwhile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Clean, intentional shutdown. No retry.
    Clean,
    /// Transient failure (dial failed, connection dropped). Retryable.
    Transient,
    /// Fatal failure (credentials rejected). Retrying cannot help.
    Fatal,
}

impl ExitCode {
    /// Numeric code, `0` meaning clean shutdown.
    pub fn code(self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::Transient => 1,
            Self::Fatal => 2,
        }
    }
}

// =============================================================================
// PlatformAdapter
// =============================================================================

/// Fixed verb set every protocol adapter exposes.
///
/// `serve`, `set_enable` and `do_relogin` drive the connection lifecycle;
/// the rest are the command verbs the bot core issues. Sends are
/// fire-and-forget; group management verbs are best-effort.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Runs one connection cycle synchronously: connect, serve until drop or
    /// shutdown, return how it ended.
    async fn serve(&self) -> ExitCode;

    /// Enables or disables the endpoint. Disabling tears down the active
    /// transport and stops any scheduled retries.
    async fn set_enable(&self, enabled: bool);

    /// Forces a fresh connection cycle even if currently connected.
    ///
    /// Returns `false` if a cycle could not be initiated (disabled, or an
    /// attempt is already in flight).
    async fn do_relogin(&self) -> bool;

    /// Sends text to a user. Fire-and-forget.
    async fn send_to_person(&self, user_id: &str, text: &str, flag: &str);

    /// Sends text to a group. Fire-and-forget.
    async fn send_to_group(&self, group_id: &str, text: &str, flag: &str);

    /// Issues a correlated group-info request; the response updates cached
    /// group metadata asynchronously. Never blocks the caller.
    fn get_group_info_async(&self, group_id: &str) {
        let _ = group_id;
        tracing::info!("get_group_info_async not supported on this platform");
    }

    /// Leaves a group. Best-effort.
    async fn quit_group(&self, group_id: &str) {
        let _ = group_id;
        tracing::info!("quit_group not supported on this platform");
    }

    /// Sets the bot's display card in a group. Best-effort.
    async fn set_group_card_name(&self, group_id: &str, name: &str) {
        let _ = (group_id, name);
        tracing::info!("set_group_card_name not supported on this platform");
    }

    /// Mutes a group member for `duration_secs` seconds. Best-effort.
    async fn member_ban(&self, group_id: &str, user_id: &str, duration_secs: i64) {
        let _ = (group_id, user_id, duration_secs);
        tracing::info!("member_ban not supported on this platform");
    }

    /// Removes a member from a group. Best-effort.
    async fn member_kick(&self, group_id: &str, user_id: &str) {
        let _ = (group_id, user_id);
        tracing::info!("member_kick not supported on this platform");
    }

    /// Recalls a previously sent message. Best-effort.
    async fn recall_message(&self, message_id: &str) {
        let _ = message_id;
        tracing::info!("recall_message not supported on this platform");
    }
}

/// Shared adapter reference.
pub type BoxedAdapter = Arc<dyn PlatformAdapter>;

// =============================================================================
// BotCore seam
// =============================================================================

/// Entry point of the rules/command core.
///
/// The engine delivers translated events here and knows nothing about dice
/// expressions, ban scoring or any other consumer logic.
#[async_trait]
pub trait BotCore: Send + Sync {
    /// A chat message arrived.
    async fn on_message(&self, message: NormalizedMessage);

    /// A notice arrived (membership change, recall, ...).
    async fn on_notice(&self, notice: NoticeEvent) {
        let _ = notice;
    }

    /// A request awaiting approval arrived.
    async fn on_request(&self, request: RequestEvent) {
        let _ = request;
    }
}

/// Shared bot-core reference.
pub type BoxedBotCore = Arc<dyn BotCore>;
