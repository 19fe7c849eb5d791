//! Endpoint status persistence.

use std::path::PathBuf;

use dicelink_core::{EndpointSnapshot, StatusSink};
use tracing::{debug, warn};

/// Writes endpoint snapshots to `<work_dir>/status.json`.
///
/// Written on every enable/disable and state change so operators can always
/// see current status, even after a crash.
#[derive(Debug)]
pub struct FileStatusSink {
    path: PathBuf,
}

impl FileStatusSink {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: work_dir.into().join("status.json"),
        }
    }
}

impl StatusSink for FileStatusSink {
    fn persist(&self, snapshot: &EndpointSnapshot) {
        let json = match serde_json::to_vec_pretty(snapshot) {
            Ok(json) => json,
            Err(e) => {
                warn!(endpoint = %snapshot.id, error = %e, "failed to serialize status");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, json) {
            warn!(path = %self.path.display(), error = %e, "failed to persist status");
            return;
        }
        debug!(endpoint = %snapshot.id, state = %snapshot.state, "status persisted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicelink_core::Endpoint;

    #[test]
    fn snapshot_lands_on_disk() {
        let dir = std::env::temp_dir().join("dicelink-status-test");
        std::fs::create_dir_all(&dir).unwrap();

        let endpoint = Endpoint::new("ep-status", "QQ", "onebot", &dir);
        endpoint.set_enabled(true);
        endpoint.set_identity("QQ:10001", "Roller");

        let sink = FileStatusSink::new(&dir);
        sink.persist(&endpoint.snapshot());

        let raw = std::fs::read_to_string(dir.join("status.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["id"], "ep-status");
        assert_eq!(value["enabled"], true);
        assert_eq!(value["userId"], "QQ:10001");
        assert_eq!(value["state"], "disconnected");

        std::fs::remove_dir_all(&dir).ok();
    }
}
