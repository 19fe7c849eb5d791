//! Logging setup using `tracing` and `tracing-subscriber`.
//!
//! ```rust,ignore
//! use dicelink_runtime::config::ConfigLoader;
//! use dicelink_runtime::logging;
//!
//! let config = ConfigLoader::new().load()?;
//! logging::init_from_config(&config.logging);
//! ```

use std::ffi::OsStr;
use std::path::Path;

use tracing::warn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LogOutput, LoggingConfig};

/// Initializes logging from a [`LoggingConfig`]. Safe to call more than
/// once; later calls are no-ops.
pub fn init_from_config(config: &LoggingConfig) {
    let _ = try_init_from_config(config);
}

/// Like [`init_from_config`] but surfaces initialization failure.
pub fn try_init_from_config(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = build_filter(config);

    macro_rules! init_with_writer {
        ($writer:expr) => {
            match config.format {
                #[cfg(feature = "json-log")]
                LogFormat::Json => tracing_subscriber::registry()
                    .with(fmt::layer().json().with_writer($writer))
                    .with(filter)
                    .try_init(),
                LogFormat::Compact => tracing_subscriber::registry()
                    .with(fmt::layer().compact().with_writer($writer))
                    .with(filter)
                    .try_init(),
                LogFormat::Full => tracing_subscriber::registry()
                    .with(fmt::layer().with_writer($writer))
                    .with(filter)
                    .try_init(),
                LogFormat::Pretty => tracing_subscriber::registry()
                    .with(fmt::layer().pretty().with_writer($writer))
                    .with(filter)
                    .try_init(),
            }
        };
    }

    match config.output {
        LogOutput::Stdout => init_with_writer!(std::io::stdout),
        LogOutput::Stderr => init_with_writer!(std::io::stderr),
        LogOutput::File => {
            if let Some(path) = &config.file_path {
                let appender = tracing_appender::rolling::never(
                    path.parent().unwrap_or_else(|| Path::new(".")),
                    path.file_name().unwrap_or_else(|| OsStr::new("dicelink.log")),
                );
                init_with_writer!(appender)
            } else {
                warn!("file output requested but no file path configured, falling back to stdout");
                init_with_writer!(std::io::stdout)
            }
        }
    }
}

/// `RUST_LOG` wins; otherwise the configured base level plus per-module
/// overrides.
fn build_filter(config: &LoggingConfig) -> EnvFilter {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    for (module, level) in &config.filters {
        if let Ok(directive) = format!("{module}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}
