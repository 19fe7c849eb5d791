//! # dicelink-transport
//!
//! Concrete transports for the dicelink bot bridge.
//!
//! Each transport implements [`dicelink_engine::Connector`]: one call
//! establishes one duplex connection and nothing more. Reconnection, backoff
//! and lifecycle belong to the engine's connection manager, never to the
//! transport.
//!
//! Two WebSocket modes are provided, feature-gated:
//!
//! - `ws-client`: dial out to a gateway ([`WsClientConnector`])
//! - `ws-server`: listen and wait for the gateway to dial in
//!   ([`WsServerConnector`], the "reverse" mode)

pub mod websocket;

#[cfg(feature = "ws-client")]
pub use websocket::WsClientConnector;
#[cfg(feature = "ws-server")]
pub use websocket::WsServerConnector;
