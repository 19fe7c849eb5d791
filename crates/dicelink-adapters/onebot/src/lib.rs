//! # dicelink-onebot
//!
//! OneBot v11 adapter for the dicelink bot bridge.
//!
//! The adapter supplies the two protocol-specific pieces the generic engine
//! needs — a [`PlatformDriver`](dicelink_engine::PlatformDriver) for the
//! wire format and the [`PlatformAdapter`](dicelink_core::PlatformAdapter)
//! verb set — plus configuration for both WebSocket directions (dial out to
//! the gateway, or listen and let it dial in).

pub mod adapter;
pub mod config;
pub mod driver;
pub mod model;

pub use adapter::{GroupInfo, OneBotAdapter};
pub use config::{ConnectionConfig, OneBotConfig, WsClientConfig, WsServerConfig};
pub use driver::OneBotDriver;
