//! # dicelink
//!
//! Connection and session engine bridging chat platforms to a dice bot
//! core.
//!
//! ## Overview
//!
//! dicelink keeps one long-lived [`Endpoint`] per configured bot account and
//! drives its whole connection lifecycle: dialing (or listening for) the
//! platform gateway, the identity handshake, bounded reconnection with
//! exponential backoff, request/response correlation over the duplex socket,
//! and routing of inbound events to your bot core.
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌────────────────┐
//! │  Transport   │──▶│ ConnectionManager │──▶│ EventDispatcher│──▶ BotCore
//! │ (ws in/out)  │   │ retry·guard·state │   │ echo? → caller │
//! └──────────────┘   └───────────────────┘   └────────────────┘
//! ```
//!
//! - **dicelink-core**: normalized message/event model, endpoint state
//!   machine, the [`PlatformAdapter`] verb set and the [`BotCore`] seam
//! - **dicelink-engine**: connection manager, retry controller, correlation
//!   registry and dispatcher — generic over transport and protocol
//! - **dicelink-transport**: WebSocket connectors, both directions
//! - **dicelink-onebot**: OneBot v11 driver and adapter
//! - **dicelink-runtime**: configuration, logging, status persistence and
//!   the process serve loop
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dicelink::prelude::*;
//!
//! struct DiceCore;
//!
//! #[async_trait::async_trait]
//! impl BotCore for DiceCore {
//!     async fn on_message(&self, message: NormalizedMessage) {
//!         // roll some dice, answer via the adapter
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigLoader::new().load()?;
//!     logging::init_from_config(&config.logging);
//!
//!     let runtime = DicelinkRuntime::build(&config, std::sync::Arc::new(DiceCore))?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub use dicelink_core as core;
pub use dicelink_engine as engine;
pub use dicelink_onebot as onebot;
pub use dicelink_runtime as runtime;

pub use dicelink_runtime::logging;

/// Commonly used items.
pub mod prelude {
    pub use dicelink_core::{
        BotCore, BoxedAdapter, BoxedBotCore, ConnectionState, Endpoint, ExitCode, MessageType,
        NormalizedMessage, NoticeEvent, PlatformAdapter, RequestEvent, Segment, Sender,
    };
    pub use dicelink_engine::{ConnectionManager, EngineConfig, RetryPolicy};
    pub use dicelink_onebot::{OneBotAdapter, OneBotConfig};
    pub use dicelink_runtime::{ConfigLoader, DicelinkConfig, DicelinkRuntime};
}
