use serde_json::Value;

use super::json_file::{ensure_dir, read_json, write_json};
use super::JsonFileStore;
use crate::error::{ChatError, ChatResult};
use crate::models::Message;

fn require_topic_id(agent_id: &str, topic_id: &str) -> ChatResult<()> {
    if topic_id.trim().is_empty() {
        return Err(ChatError::InvalidArgument(format!(
            "Agent {agent_id} 的 topicId 未提供"
        )));
    }
    Ok(())
}

impl JsonFileStore {
    pub(super) async fn read_history(&self, agent_id: &str, topic_id: &str) -> ChatResult<Vec<Message>> {
        require_topic_id(agent_id, topic_id)?;
        ensure_dir(&self.paths.topic_dir(agent_id, topic_id)?).await?;
        Ok(read_json(&self.paths.history_file(agent_id, topic_id)?)
            .await?
            .unwrap_or_default())
    }

    /// 调用方需持有该话题的历史锁。
    pub(super) async fn write_history(
        &self,
        agent_id: &str,
        topic_id: &str,
        messages: &[Message],
    ) -> ChatResult<()> {
        require_topic_id(agent_id, topic_id)?;
        write_json(&self.paths.history_file(agent_id, topic_id)?, messages).await
    }

    pub(super) async fn upsert_history_message(
        &self,
        agent_id: &str,
        topic_id: &str,
        message: Message,
    ) -> ChatResult<Vec<Message>> {
        let _guard = self.lock_history(agent_id, topic_id).await;
        let mut history = self.read_history(agent_id, topic_id).await?;
        match history.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => history.push(message),
        }
        self.write_history(agent_id, topic_id, &history).await?;
        Ok(history)
    }

    pub(super) async fn find_message_content(
        &self,
        item_id: &str,
        topic_id: &str,
        message_id: &str,
    ) -> ChatResult<Value> {
        require_topic_id(item_id, topic_id)?;
        let path = self.paths.history_file(item_id, topic_id)?;
        let history: Vec<Message> = read_json(&path)
            .await?
            .ok_or_else(|| ChatError::InvalidArgument("聊天历史文件不存在".into()))?;
        history
            .into_iter()
            .find(|m| m.id == message_id)
            .map(|m| m.content)
            .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))
    }
}
