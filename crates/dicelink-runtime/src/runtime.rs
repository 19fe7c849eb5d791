//! Runtime orchestration: builds endpoints from configuration and runs
//! their serve loops until shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use dicelink_core::{BoxedBotCore, Endpoint, PlatformAdapter};
use dicelink_engine::{ConnectionManager, EngineConfig};
use dicelink_onebot::{OneBotAdapter, OneBotDriver, model::PLATFORM};

use crate::config::DicelinkConfig;
use crate::error::RuntimeError;
use crate::status::FileStatusSink;

/// One configured endpoint and whether it starts enabled.
struct EndpointEntry {
    adapter: Arc<OneBotAdapter>,
    autostart: bool,
}

/// Owns every configured endpoint for the lifetime of the process.
pub struct DicelinkRuntime {
    entries: Vec<EndpointEntry>,
}

impl DicelinkRuntime {
    /// Builds endpoints from configuration. Disabled connections still get
    /// an endpoint (operators can enable them later); they just don't
    /// autostart.
    pub fn build(config: &DicelinkConfig, bot_core: BoxedBotCore) -> Result<Self, RuntimeError> {
        let data_dir = config
            .data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("dicelink")))
            .unwrap_or_else(|| PathBuf::from("."));

        let onebot = &config.adapters.onebot;
        let engine_config = EngineConfig {
            call_timeout: Duration::from_secs(onebot.call_timeout_secs),
            sweep_interval: Duration::from_secs(30),
            retry: config.retry.to_policy(),
        };

        let mut entries = Vec::new();
        for connection in &onebot.connections {
            let work_dir = data_dir.join("endpoints").join(connection.name());
            std::fs::create_dir_all(&work_dir).map_err(|source| RuntimeError::WorkDir {
                path: work_dir.clone(),
                source,
            })?;

            let endpoint = Endpoint::new(connection.name(), PLATFORM, "onebot", &work_dir);
            let connector = connection.connector(onebot.default_access_token.as_deref());
            let manager = ConnectionManager::new(
                endpoint,
                connector,
                Arc::new(OneBotDriver),
                Arc::clone(&bot_core),
                engine_config.clone(),
                Arc::new(FileStatusSink::new(&work_dir)),
            );

            info!(
                endpoint = %connection.name(),
                enabled = connection.is_enabled(),
                "endpoint configured"
            );
            entries.push(EndpointEntry {
                adapter: OneBotAdapter::new(manager),
                autostart: connection.is_enabled(),
            });
        }

        Ok(Self { entries })
    }

    /// The configured adapters, in configuration order.
    pub fn adapters(&self) -> Vec<Arc<OneBotAdapter>> {
        self.entries
            .iter()
            .map(|entry| Arc::clone(&entry.adapter))
            .collect()
    }

    /// Enables autostart endpoints and serves until Ctrl-C.
    pub async fn run(&self) -> std::io::Result<()> {
        for entry in &self.entries {
            if entry.autostart {
                entry.adapter.set_enable(true).await;
            }
        }

        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
        self.shutdown();
        Ok(())
    }

    /// Tears every endpoint down without flipping their enabled flags, so
    /// they come back on next start.
    pub fn shutdown(&self) {
        for entry in &self.entries {
            entry.adapter.manager().stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;
    use async_trait::async_trait;
    use dicelink_core::{BotCore, ConnectionState, NormalizedMessage};

    struct NullCore;

    #[async_trait]
    impl BotCore for NullCore {
        async fn on_message(&self, _message: NormalizedMessage) {}
    }

    #[test]
    fn builds_endpoints_from_config() {
        let dir = std::env::temp_dir().join("dicelink-runtime-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dicelink.yaml");
        std::fs::write(
            &path,
            format!(
                r#"
data_dir: {}
adapters:
  onebot:
    connections:
      - type: ws-client
        name: primary
        enabled: false
        url: ws://127.0.0.1:6700/ws
"#,
                dir.display()
            ),
        )
        .unwrap();

        let config = ConfigLoader::new().file(&path).without_env().load().unwrap();
        let runtime = DicelinkRuntime::build(&config, Arc::new(NullCore)).unwrap();

        let adapters = runtime.adapters();
        assert_eq!(adapters.len(), 1);
        let endpoint = adapters[0].manager().endpoint();
        assert_eq!(endpoint.id, "primary");
        assert_eq!(endpoint.platform, "QQ");
        assert!(!endpoint.enabled());
        assert_eq!(endpoint.state(), ConnectionState::Disconnected);
        assert!(dir.join("endpoints/primary").is_dir());

        std::fs::remove_dir_all(&dir).ok();
    }
}
