//! 全局设置 `settings.json` 的读写。
//!
//! `userAvatarUrl` 是派生字段：读取时根据头像文件是否存在填充，保存时丢弃。
//! 对 `settings.json` 的写入经同一把锁串行化。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{ChatError, ChatResult};
use crate::models::AgentConfig;
use crate::paths::DataPaths;
use crate::store::json_file::{exists, read_json, write_json};
use crate::store::ConversationStore;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcp_server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcp_api_key: Option<String>,
    #[serde(default)]
    pub enable_vcp_tool_injection: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_order: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_avatar_calculated_color: Option<String>,
    /// 仅出现在 `load_settings` 的返回值里。
    #[serde(default)]
    pub user_avatar_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 头像颜色的保存目标。
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AvatarColorTarget {
    User { color: String },
    Agent { id: String, color: String },
}

pub struct SettingsService {
    paths: DataPaths,
    store: Arc<dyn ConversationStore>,
    write_lock: Mutex<()>,
}

impl SettingsService {
    pub fn new(paths: DataPaths, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            paths,
            store,
            write_lock: Mutex::new(()),
        }
    }

    async fn read_raw(&self) -> ChatResult<AppSettings> {
        Ok(read_json(&self.paths.settings_file)
            .await?
            .unwrap_or_default())
    }

    pub async fn load_settings(&self) -> ChatResult<AppSettings> {
        let mut settings = self.read_raw().await?;
        settings.user_avatar_url = if exists(&self.paths.user_avatar_file).await {
            Some(format!(
                "local-path://{}",
                self.paths.user_avatar_file.display()
            ))
        } else {
            None
        };
        Ok(settings)
    }

    pub async fn save_settings(&self, settings: AppSettings) -> ChatResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_settings(settings).await
    }

    /// 调用方需持有 `write_lock`。
    async fn write_settings(&self, mut settings: AppSettings) -> ChatResult<()> {
        settings.user_avatar_url = None;
        let mut value = serde_json::to_value(&settings)
            .map_err(|e| ChatError::json(&self.paths.settings_file, e))?;
        if let Some(map) = value.as_object_mut() {
            map.remove("userAvatarUrl");
        }
        write_json(&self.paths.settings_file, &value).await
    }

    pub async fn save_avatar_color(&self, target: AvatarColorTarget) -> ChatResult<()> {
        match target {
            AvatarColorTarget::User { color } => {
                let _guard = self.write_lock.lock().await;
                let mut settings = self.read_raw().await?;
                info!("保存用户头像颜色 {color}");
                settings.user_avatar_calculated_color = Some(color);
                self.write_settings(settings).await
            }
            AvatarColorTarget::Agent { id, color } => {
                if id.trim().is_empty() {
                    return Err(ChatError::InvalidArgument(
                        "保存头像颜色需要提供 Agent ID".into(),
                    ));
                }
                info!("保存 Agent {id} 头像颜色 {color}");
                self.store
                    .update_agent_config(
                        &id,
                        Box::new(move |config: &mut AgentConfig| {
                            config
                                .extra
                                .insert("avatarCalculatedColor".into(), Value::String(color));
                        }),
                    )
                    .await
                    .map(|_| ())
            }
        }
    }
}
