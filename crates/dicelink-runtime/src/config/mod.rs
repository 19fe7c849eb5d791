//! Configuration loading and schema.

mod loader;
mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    AdaptersConfig, DicelinkConfig, LogFormat, LogOutput, LoggingConfig, RetryConfig,
};
