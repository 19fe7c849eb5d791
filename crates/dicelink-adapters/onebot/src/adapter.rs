//! The OneBot implementation of the platform verb set.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use dicelink_core::{EngineError, ExitCode, PlatformAdapter};
use dicelink_engine::{ApiClient, ConnectionManager, EchoToken};

use crate::model;

/// Cached group metadata, refreshed by [`get_group_info_async`].
///
/// [`get_group_info_async`]: PlatformAdapter::get_group_info_async
#[derive(Debug, Clone, Deserialize)]
pub struct GroupInfo {
    pub group_id: i64,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub member_count: i32,
    #[serde(default)]
    pub max_member_count: i32,
}

/// OneBot v11 adapter: lifecycle verbs delegate to the connection manager,
/// command verbs go out over the live API client.
pub struct OneBotAdapter {
    manager: Arc<ConnectionManager>,
    groups: Arc<Mutex<HashMap<i64, GroupInfo>>>,
}

impl OneBotAdapter {
    pub fn new(manager: Arc<ConnectionManager>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            groups: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// The connection manager backing this adapter.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Cached metadata for a group, if a refresh has completed.
    pub fn group_info(&self, group_id: &str) -> Option<GroupInfo> {
        let id = model::extract_id(group_id).ok()?;
        self.groups.lock().get(&id).cloned()
    }

    fn api(&self) -> Option<ApiClient> {
        let api = self.manager.api();
        if api.is_none() {
            warn!(endpoint = %self.manager.endpoint().id, "verb dropped: not connected");
        }
        api
    }

    /// Fire-and-forget command; failures are logged, never surfaced.
    async fn send_command(&self, action: &str, params: Value) {
        let Some(api) = self.api() else { return };
        if let Err(e) = api.send(action, params).await {
            warn!(action = %action, error = %e, "command send failed");
        }
    }
}

fn record_group_info(groups: &Mutex<HashMap<i64, GroupInfo>>, data: Value) {
    match serde_json::from_value::<GroupInfo>(data) {
        Ok(info) => {
            debug!(group_id = info.group_id, group_name = %info.group_name, "group info refreshed");
            groups.lock().insert(info.group_id, info);
        }
        Err(e) => warn!(error = %e, "bad get_group_info response"),
    }
}

#[async_trait]
impl PlatformAdapter for OneBotAdapter {
    async fn serve(&self) -> ExitCode {
        match self.manager.serve().await {
            Ok(code) => code,
            Err(EngineError::AlreadyConnecting) => {
                warn!(endpoint = %self.manager.endpoint().id, "serve refused: attempt already in flight");
                ExitCode::Transient
            }
            Err(EngineError::Disabled) => ExitCode::Clean,
        }
    }

    async fn set_enable(&self, enabled: bool) {
        self.manager.set_enable(enabled);
    }

    async fn do_relogin(&self) -> bool {
        self.manager.do_relogin()
    }

    async fn send_to_person(&self, user_id: &str, text: &str, _flag: &str) {
        let Ok(user_id) = model::extract_id(user_id) else {
            warn!(user_id = %user_id, "send_to_person: malformed user id");
            return;
        };
        self.send_command(
            "send_private_msg",
            json!({"user_id": user_id, "message": model::text_payload(text)}),
        )
        .await;
    }

    async fn send_to_group(&self, group_id: &str, text: &str, _flag: &str) {
        let Ok(group_id) = model::extract_id(group_id) else {
            warn!(group_id = %group_id, "send_to_group: malformed group id");
            return;
        };
        self.send_command(
            "send_group_msg",
            json!({"group_id": group_id, "message": model::text_payload(text)}),
        )
        .await;
    }

    fn get_group_info_async(&self, group_id: &str) {
        let Ok(id) = model::extract_id(group_id) else {
            warn!(group_id = %group_id, "get_group_info_async: malformed group id");
            return;
        };
        let Some(api) = self.api() else { return };
        let groups = Arc::clone(&self.groups);

        // The response comes back on the group-info sentinel token; the
        // caller never waits for it.
        tokio::spawn(async move {
            match api
                .call_sentinel(
                    EchoToken::GROUP_INFO,
                    "get_group_info",
                    json!({"group_id": id, "no_cache": false}),
                )
                .await
            {
                Ok(data) => record_group_info(&groups, data),
                Err(e) => debug!(group_id = id, error = %e, "group info refresh failed"),
            }
        });
    }

    async fn quit_group(&self, group_id: &str) {
        let Ok(group_id) = model::extract_id(group_id) else {
            return;
        };
        self.send_command("set_group_leave", json!({"group_id": group_id}))
            .await;
    }

    async fn set_group_card_name(&self, group_id: &str, name: &str) {
        let Ok(group_id) = model::extract_id(group_id) else {
            return;
        };
        // The card being set is the bot's own.
        let Ok(user_id) = model::extract_id(&self.manager.endpoint().user_id()) else {
            warn!("set_group_card_name: bot identity not known yet");
            return;
        };
        self.send_command(
            "set_group_card",
            json!({"group_id": group_id, "user_id": user_id, "card": name}),
        )
        .await;
    }

    async fn member_ban(&self, group_id: &str, user_id: &str, duration_secs: i64) {
        let (Ok(group_id), Ok(user_id)) =
            (model::extract_id(group_id), model::extract_id(user_id))
        else {
            return;
        };
        self.send_command(
            "set_group_ban",
            json!({"group_id": group_id, "user_id": user_id, "duration": duration_secs}),
        )
        .await;
    }

    async fn member_kick(&self, group_id: &str, user_id: &str) {
        let (Ok(group_id), Ok(user_id)) =
            (model::extract_id(group_id), model::extract_id(user_id))
        else {
            return;
        };
        self.send_command(
            "set_group_kick",
            json!({"group_id": group_id, "user_id": user_id, "reject_add_request": false}),
        )
        .await;
    }

    async fn recall_message(&self, message_id: &str) {
        // Numeric ids go out as numbers; some gateways use string ids.
        let message_id = match message_id.parse::<i64>() {
            Ok(id) => Value::from(id),
            Err(_) => Value::from(message_id),
        };
        self.send_command("delete_msg", json!({"message_id": message_id}))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn group_cache_records_well_formed_responses() {
        let groups = Mutex::new(HashMap::new());

        record_group_info(
            &groups,
            json!({
                "group_id": 20002,
                "group_name": "dnd table",
                "member_count": 7,
                "max_member_count": 200
            }),
        );
        let info = groups.lock().get(&20002).cloned().unwrap();
        assert_eq!(info.group_name, "dnd table");
        assert_eq!(info.member_count, 7);

        // Malformed payloads leave the cache untouched.
        record_group_info(&groups, json!({"group_name": "no id"}));
        assert_eq!(groups.lock().len(), 1);
    }

    #[test]
    fn outgoing_text_payload_shape() {
        let payload = model::text_payload("you rolled 17");
        assert_eq!(
            payload,
            json!([{"type": "text", "data": {"text": "you rolled 17"}}])
        );
    }
}
