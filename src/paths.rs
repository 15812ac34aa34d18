//! 数据目录布局。
//!
//! 所有持久化文件都放在同一个根目录下：
//!
//! ```text
//! <root>/settings.json
//! <root>/user_avatar.png
//! <root>/Agents/<agentId>/config.json
//! <root>/AgentGroups/<groupId>/config.json
//! <root>/UserData/<agentId>/topics/<topicId>/history.json
//! <root>/UserData/<agentId>/topics/<topicId>/attachments/
//! <root>/tts_cache/<md5>.mp3
//! <root>/sovits_models.json
//! ```

use std::path::{Path, PathBuf};

use crate::error::{ChatError, ChatResult};

/// 覆盖数据根目录的环境变量。
pub const DATA_DIR_ENV: &str = "VCP_CHAT_DATA_DIR";

#[derive(Clone, Debug)]
pub struct DataPaths {
    pub app_data_root: PathBuf,
    pub agent_dir: PathBuf,
    pub group_dir: PathBuf,
    pub user_data_dir: PathBuf,
    pub settings_file: PathBuf,
    pub user_avatar_file: PathBuf,
    pub tts_cache_dir: PathBuf,
    pub models_cache_file: PathBuf,
}

impl DataPaths {
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            agent_dir: root.join("Agents"),
            group_dir: root.join("AgentGroups"),
            user_data_dir: root.join("UserData"),
            settings_file: root.join("settings.json"),
            user_avatar_file: root.join("user_avatar.png"),
            tts_cache_dir: root.join("tts_cache"),
            models_cache_file: root.join("sovits_models.json"),
            app_data_root: root,
        }
    }

    /// 优先使用 `VCP_CHAT_DATA_DIR`，否则落在系统配置目录下的 `VCPChat/AppData`。
    pub fn resolve() -> ChatResult<Self> {
        if let Some(root) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::from_root(PathBuf::from(root)));
        }
        let mut path = dirs::config_dir().ok_or(ChatError::NoConfigDir)?;
        path.push("VCPChat");
        path.push("AppData");
        Ok(Self::from_root(path))
    }

    pub fn agent_config_file(&self, agent_id: &str) -> ChatResult<PathBuf> {
        Ok(self
            .agent_dir
            .join(checked_id("agentId", agent_id)?)
            .join("config.json"))
    }

    pub fn group_config_file(&self, group_id: &str) -> ChatResult<PathBuf> {
        Ok(self
            .group_dir
            .join(checked_id("groupId", group_id)?)
            .join("config.json"))
    }

    /// 助手与群组的话题都存放在 `UserData/<itemId>/topics` 下。
    pub fn topic_dir(&self, item_id: &str, topic_id: &str) -> ChatResult<PathBuf> {
        Ok(self
            .user_data_dir
            .join(checked_id("itemId", item_id)?)
            .join("topics")
            .join(checked_id("topicId", topic_id)?))
    }

    pub fn history_file(&self, item_id: &str, topic_id: &str) -> ChatResult<PathBuf> {
        Ok(self.topic_dir(item_id, topic_id)?.join("history.json"))
    }

    pub fn attachments_dir(&self, item_id: &str, topic_id: &str) -> ChatResult<PathBuf> {
        Ok(self.topic_dir(item_id, topic_id)?.join("attachments"))
    }

    pub fn root(&self) -> &Path {
        &self.app_data_root
    }
}

/// ID 只能是单个普通路径分量，拼进路径后不能跳出所属目录。
pub fn checked_id<'a>(kind: &str, id: &'a str) -> ChatResult<&'a str> {
    let valid = !id.trim().is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', '\0', ':']);
    if valid {
        Ok(id)
    } else {
        Err(ChatError::InvalidArgument(format!("非法的 {kind}: {id:?}")))
    }
}
