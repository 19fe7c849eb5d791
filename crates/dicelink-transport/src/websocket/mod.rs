//! WebSocket connectors, in both directions.

#[cfg(feature = "ws-client")]
mod client;
#[cfg(feature = "ws-client")]
pub use client::WsClientConnector;

#[cfg(feature = "ws-server")]
mod server;
#[cfg(feature = "ws-server")]
pub use server::WsServerConnector;
