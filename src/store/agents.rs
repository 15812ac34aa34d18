use std::collections::HashMap;

use tokio::fs;
use tracing::warn;

use super::json_file::{ensure_dir, read_json, write_json};
use super::{AgentConfigEdit, JsonFileStore};
use crate::error::{ChatError, ChatResult};
use crate::models::AgentConfig;
use crate::settings::AppSettings;

impl JsonFileStore {
    /// 遍历助手目录，加载每个含 `config.json` 的子目录。
    pub(super) async fn load_agents(&self) -> ChatResult<Vec<AgentConfig>> {
        let dir = &self.paths.agent_dir;
        ensure_dir(dir).await?;

        let mut agents = Vec::new();
        let mut entries = fs::read_dir(dir).await.map_err(|e| ChatError::io(dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ChatError::io(dir, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            let folder = entry.file_name().to_string_lossy().into_owned();
            match self.read_agent_config(&folder).await {
                Ok(config) => agents.push(config),
                Err(ChatError::AgentNotFound(_)) => {}
                Err(err) => warn!("跳过无法解析的助手配置 {folder}: {err}"),
            }
        }

        let settings: AppSettings = read_json(&self.paths.settings_file)
            .await?
            .unwrap_or_default();
        Ok(order_agents(agents, settings.agent_order.as_deref()))
    }

    pub(super) async fn read_agent_config(&self, agent_id: &str) -> ChatResult<AgentConfig> {
        let path = self.paths.agent_config_file(agent_id)?;
        let mut config: AgentConfig = read_json(&path)
            .await?
            .ok_or_else(|| ChatError::AgentNotFound(agent_id.to_string()))?;
        config.id = agent_id.to_string();
        Ok(config)
    }

    pub(super) async fn write_agent_config(&self, config: &AgentConfig) -> ChatResult<()> {
        if config.id.trim().is_empty() {
            return Err(ChatError::InvalidArgument("agentId 未提供".into()));
        }
        write_json(&self.paths.agent_config_file(&config.id)?, config).await
    }

    pub(super) async fn edit_agent_config(
        &self,
        agent_id: &str,
        edit: AgentConfigEdit,
    ) -> ChatResult<AgentConfig> {
        let _guard = self.lock_config(agent_id).await;
        let mut config = self.read_agent_config(agent_id).await?;
        edit(&mut config);
        config.id = agent_id.to_string();
        self.write_agent_config(&config).await?;
        Ok(config)
    }
}

/// `agent_order` 中列出的助手排在前面，其余保持名称顺序追加在后。
fn order_agents(mut agents: Vec<AgentConfig>, agent_order: Option<&[String]>) -> Vec<AgentConfig> {
    agents.sort_by(|a, b| a.name.cmp(&b.name));
    let Some(order) = agent_order else {
        return agents;
    };

    let mut by_id: HashMap<String, AgentConfig> = HashMap::new();
    let mut remaining_ids = Vec::with_capacity(agents.len());
    for agent in agents {
        remaining_ids.push(agent.id.clone());
        by_id.insert(agent.id.clone(), agent);
    }

    let mut ordered = Vec::with_capacity(by_id.len());
    for id in order {
        if let Some(agent) = by_id.remove(id) {
            ordered.push(agent);
        }
    }
    for id in remaining_ids {
        if let Some(agent) = by_id.remove(&id) {
            ordered.push(agent);
        }
    }
    ordered
}
