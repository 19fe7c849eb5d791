//! OneBot protocol driver: the wire-format seam the engine is
//! parameterized over.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use dicelink_core::{AdapterResult, ApiError, ApiResult};
use dicelink_engine::{ApiClient, BotIdentity, EchoToken, Frame, PlatformDriver};

use crate::model;

/// Stateless OneBot v11 driver.
#[derive(Debug, Default)]
pub struct OneBotDriver;

#[derive(Debug, Deserialize)]
struct LoginInfo {
    user_id: i64,
    #[serde(default)]
    nickname: String,
}

#[async_trait]
impl PlatformDriver for OneBotDriver {
    fn translate(&self, frame: &Value) -> AdapterResult<Frame> {
        model::to_frame(frame)
    }

    async fn identify(&self, api: &ApiClient) -> ApiResult<BotIdentity> {
        let data = api
            .call_sentinel(EchoToken::LOGIN_INFO, "get_login_info", json!({}))
            .await?;
        let info: LoginInfo = serde_json::from_value(data)
            .map_err(|e| ApiError::Serialization(format!("bad get_login_info response: {e}")))?;
        Ok(BotIdentity {
            user_id: model::format_user_id(info.user_id),
            nickname: info.nickname,
        })
    }
}
