//! # dicelink-runtime
//!
//! Runtime orchestration for the dicelink bot bridge: layered configuration
//! loading, logging setup, endpoint status persistence and the process-level
//! serve loop.
//!
//! ```rust,ignore
//! use dicelink_runtime::{ConfigLoader, DicelinkRuntime, logging};
//!
//! let config = ConfigLoader::new().load()?;
//! logging::init_from_config(&config.logging);
//! let runtime = DicelinkRuntime::build(&config, bot_core)?;
//! runtime.run().await?;
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod status;

pub use config::{ConfigLoader, DicelinkConfig};
pub use error::{ConfigError, ConfigResult, RuntimeError};
pub use runtime::DicelinkRuntime;
pub use status::FileStatusSink;
