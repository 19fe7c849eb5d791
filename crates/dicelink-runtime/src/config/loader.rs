//! Configuration loader using figment.
//!
//! Sources, lowest to highest priority:
//!
//! 1. Built-in defaults
//! 2. Config file (`dicelink.yaml` / `dicelink.toml`, searched in the
//!    current directory and the user config dir, or an explicit path)
//! 3. Environment variables (`DICELINK_*`, `__` as section separator)
//!
//! # Environment Variable Mapping
//!
//! - `DICELINK_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `DICELINK_RETRY__MAX_RETRIES=3` → `retry.max_retries = 3`
//! - `DICELINK_ADAPTERS__ONEBOT__DEFAULT_ACCESS_TOKEN=xxx`
//!   → `adapters.onebot.default_access_token = "xxx"`

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, warn};

use super::schema::DicelinkConfig;
use crate::error::{ConfigError, ConfigResult};

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
    overrides: Figment,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new configuration loader with defaults.
    pub fn new() -> Self {
        Self {
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
            overrides: Figment::new(),
        }
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Sets a specific configuration file to load instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges additional configuration programmatically, above file sources.
    pub fn merge(mut self, config: DicelinkConfig) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(config));
        self
    }

    /// Loads and returns the configuration.
    pub fn load(self) -> ConfigResult<DicelinkConfig> {
        let figment = self.build_figment()?;
        let config: DicelinkConfig = figment
            .extract()
            .map_err(|e| ConfigError::ParseError(format!("failed to extract configuration: {e}")))?;

        debug!(logging_level = %config.logging.level, "configuration loaded");
        Ok(config)
    }

    fn build_figment(self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(DicelinkConfig::default()));

        if let Some(path) = &self.config_file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            info!(path = %path.display(), "loading configuration file");
            figment = Self::merge_config_file(figment, path)?;
        } else {
            figment = self.search_config_files(figment);
        }

        figment = figment.merge(self.overrides);

        if self.load_env {
            figment = figment.merge(
                Env::prefixed("DICELINK_")
                    .split("__")
                    .map(|key| key.as_str().replace("__", ".").into()),
            );
        }

        Ok(figment)
    }

    /// Merges a single config file, dispatching on file extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::ParseError(format!(
                "unsupported or disabled configuration file format: .{ext}"
            ))),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("dicelink"));
        }
        paths
    }

    fn search_config_files(&self, mut figment: Figment) -> Figment {
        #[cfg(feature = "yaml-config")]
        const YAML_NAMES: &[&str] = &["dicelink.yaml", "dicelink.yml", "config.yaml", "config.yml"];
        #[cfg(feature = "toml-config")]
        const TOML_NAMES: &[&str] = &["dicelink.toml", "config.toml"];

        let mut found = false;
        for search_path in self.resolve_search_paths() {
            let mut names: Vec<&str> = Vec::new();
            #[cfg(feature = "yaml-config")]
            names.extend_from_slice(YAML_NAMES);
            #[cfg(feature = "toml-config")]
            names.extend_from_slice(TOML_NAMES);

            for name in names {
                let path = search_path.join(name);
                if path.exists()
                    && let Ok(merged) = Self::merge_config_file(figment.clone(), &path)
                {
                    info!(path = %path.display(), "loading configuration file");
                    figment = merged;
                    found = true;
                    break;
                }
            }
            if found {
                break;
            }
        }

        if !found {
            warn!("no configuration file found, using defaults");
        }
        figment
    }
}
