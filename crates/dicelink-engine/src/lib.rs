//! # dicelink-engine
//!
//! Platform-independent connection engine: lifecycle, retries, correlation
//! and event routing for one endpoint.
//!
//! The engine is parameterized over two seams: a [`Connector`] that
//! establishes raw duplex connections (client dial-out or reverse-server
//! accept, see `dicelink-transport`) and a [`PlatformDriver`] that owns the
//! wire format (see `dicelink-adapters`). Everything in between — the
//! single-flight connect guard, the bounded backoff loop, echo-token
//! request/response matching and correlation-before-routing dispatch — is
//! generic and lives here.

pub mod api;
pub mod correlation;
pub mod dispatch;
pub mod manager;
pub mod retry;

pub use api::ApiClient;
pub use correlation::{CorrelationRegistry, EchoToken};
pub use dispatch::{BotIdentity, EventDispatcher, Frame, MetaFrame, PlatformDriver};
pub use manager::{Connection, ConnectionManager, Connector, EngineConfig};
pub use retry::{RetryController, RetryOutcome, RetryPolicy, RetryState};
