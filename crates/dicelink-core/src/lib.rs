//! # dicelink-core
//!
//! Stable data shapes for the dicelink bot bridge.
//!
//! This crate defines everything the rest of the system depends on but that
//! is independent of any transport:
//!
//! - the normalized message and event model ([`NormalizedMessage`],
//!   [`NoticeEvent`], [`RequestEvent`])
//! - the endpoint record and its connection state machine ([`Endpoint`],
//!   [`ConnectionState`])
//! - the platform capability trait ([`PlatformAdapter`]) and the bot-core
//!   seam ([`BotCore`])
//! - the error taxonomy shared by the engine, transports and adapters
//!
//! The connection engine itself lives in `dicelink-engine`; concrete
//! transports in `dicelink-transport`; platform adapters under
//! `dicelink-adapters/`.

pub mod adapter;
pub mod error;
pub mod event;
pub mod message;
pub mod state;

pub use adapter::{BotCore, BoxedAdapter, BoxedBotCore, ExitCode, PlatformAdapter};
pub use error::{
    AdapterError, AdapterResult, ApiError, ApiResult, EngineError, TransportError, TransportResult,
};
pub use event::{NoticeEvent, NoticeKind, RequestEvent, RequestKind};
pub use message::{MessageType, NormalizedMessage, Segment, Sender, SenderRole};
pub use state::{
    ConnectionState, Endpoint, EndpointSnapshot, LogStatusSink, StatusSink,
};
