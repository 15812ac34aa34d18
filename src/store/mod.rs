//! # 会话存储
//!
//! 助手配置、话题列表与聊天历史的持久化都经过 [`ConversationStore`]。
//! 目前唯一的实现 [`JsonFileStore`] 把每个文档作为整份 JSON 文件读写；
//! 调用方只依赖 trait，日后换成嵌入式数据库时无需改动上层。
//!
//! 同一 `(agentId, topicId)` 的历史写入、同一助手配置的读改写都通过
//! [`KeyedLocks`] 串行化，并发保存不会交错覆盖。

mod agents;
mod history;
pub mod json_file;
mod topics;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::ChatResult;
use crate::models::{AgentConfig, Message, Topic};
use crate::paths::DataPaths;

/// 新建话题的返回值。
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTopic {
    pub topic_id: String,
    pub topic_name: String,
    pub topics: Vec<Topic>,
}

/// 话题的归属：单个助手或助手群组。
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    Agent,
    Group,
}

/// 在配置锁内对助手配置做的修改。
pub type AgentConfigEdit = Box<dyn FnOnce(&mut AgentConfig) + Send>;

/// 会话持久化接口。
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 所有助手配置，按设置中的 `agentOrder` 排序，未列出的按名称排在后面。
    async fn list_agents(&self) -> ChatResult<Vec<AgentConfig>>;

    async fn get_agent_config(&self, agent_id: &str) -> ChatResult<AgentConfig>;

    async fn save_agent_config(&self, config: &AgentConfig) -> ChatResult<()>;

    /// 持有该助手的配置锁完成读取、修改、写回，返回写回后的配置。
    async fn update_agent_config(
        &self,
        agent_id: &str,
        edit: AgentConfigEdit,
    ) -> ChatResult<AgentConfig>;

    /// 读取历史；文件不存在时返回空列表，并创建所在目录。
    async fn get_history(&self, agent_id: &str, topic_id: &str) -> ChatResult<Vec<Message>>;

    /// 覆盖整个历史文档。
    async fn save_history(
        &self,
        agent_id: &str,
        topic_id: &str,
        messages: &[Message],
    ) -> ChatResult<()>;

    /// 追加一条消息；若已有同 ID 的消息则原位替换。返回更新后的历史。
    async fn upsert_message(
        &self,
        agent_id: &str,
        topic_id: &str,
        message: Message,
    ) -> ChatResult<Vec<Message>>;

    async fn get_message_content(
        &self,
        item_id: &str,
        kind: ItemKind,
        topic_id: &str,
        message_id: &str,
    ) -> ChatResult<Value>;

    /// 话题列表，永不为空。
    async fn get_topics(&self, agent_id: &str) -> ChatResult<Vec<Topic>>;

    async fn create_topic(&self, agent_id: &str, name: Option<&str>) -> ChatResult<CreatedTopic>;

    async fn delete_topic(&self, agent_id: &str, topic_id: &str) -> ChatResult<Vec<Topic>>;

    async fn reorder_topics(&self, agent_id: &str, ordered_ids: &[String]) -> ChatResult<Vec<Topic>>;

    async fn reorder_group_topics(
        &self,
        group_id: &str,
        ordered_ids: &[String],
    ) -> ChatResult<Vec<Topic>>;

    async fn rename_topic(
        &self,
        agent_id: &str,
        topic_id: &str,
        new_title: &str,
    ) -> ChatResult<Vec<Topic>>;

    /// 不区分大小写地在助手或群组所有话题的消息中搜索，返回命中的话题 ID（不重复）。
    async fn search_topics_by_content(
        &self,
        item_id: &str,
        kind: ItemKind,
        search_term: &str,
    ) -> ChatResult<Vec<String>>;
}

/// 按字符串键分配的异步互斥锁。
///
/// 最后一个持有者释放后，对应的表项随即移除。
#[derive(Default)]
pub struct KeyedLocks(DashMap<String, Arc<Mutex<()>>>);

impl KeyedLocks {
    pub async fn lock(&self, key: String) -> KeyedGuard<'_> {
        let mutex = self.0.entry(key.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.len()
    }
}

pub struct KeyedGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // 表里那份引用之外再无人持有或等待时才移除
        self.locks
            .0
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// 基于 JSON 文件的会话存储。
pub struct JsonFileStore {
    paths: DataPaths,
    history_locks: KeyedLocks,
    config_locks: KeyedLocks,
}

impl JsonFileStore {
    pub fn new(paths: DataPaths) -> Self {
        Self {
            paths,
            history_locks: KeyedLocks::default(),
            config_locks: KeyedLocks::default(),
        }
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    async fn lock_history(&self, item_id: &str, topic_id: &str) -> KeyedGuard<'_> {
        self.history_locks
            .lock(format!("{item_id}\u{0}{topic_id}"))
            .await
    }

    async fn lock_config(&self, key: &str) -> KeyedGuard<'_> {
        self.config_locks.lock(key.to_string()).await
    }
}

#[async_trait]
impl ConversationStore for JsonFileStore {
    async fn list_agents(&self) -> ChatResult<Vec<AgentConfig>> {
        self.load_agents().await
    }

    async fn get_agent_config(&self, agent_id: &str) -> ChatResult<AgentConfig> {
        self.read_agent_config(agent_id).await
    }

    async fn save_agent_config(&self, config: &AgentConfig) -> ChatResult<()> {
        let _guard = self.lock_config(&config.id).await;
        self.write_agent_config(config).await
    }

    async fn update_agent_config(
        &self,
        agent_id: &str,
        edit: AgentConfigEdit,
    ) -> ChatResult<AgentConfig> {
        self.edit_agent_config(agent_id, edit).await
    }

    async fn get_history(&self, agent_id: &str, topic_id: &str) -> ChatResult<Vec<Message>> {
        self.read_history(agent_id, topic_id).await
    }

    async fn save_history(
        &self,
        agent_id: &str,
        topic_id: &str,
        messages: &[Message],
    ) -> ChatResult<()> {
        let _guard = self.lock_history(agent_id, topic_id).await;
        self.write_history(agent_id, topic_id, messages).await
    }

    async fn upsert_message(
        &self,
        agent_id: &str,
        topic_id: &str,
        message: Message,
    ) -> ChatResult<Vec<Message>> {
        self.upsert_history_message(agent_id, topic_id, message)
            .await
    }

    async fn get_message_content(
        &self,
        item_id: &str,
        _kind: ItemKind,
        topic_id: &str,
        message_id: &str,
    ) -> ChatResult<Value> {
        self.find_message_content(item_id, topic_id, message_id)
            .await
    }

    async fn get_topics(&self, agent_id: &str) -> ChatResult<Vec<Topic>> {
        self.topics_or_default(agent_id).await
    }

    async fn create_topic(&self, agent_id: &str, name: Option<&str>) -> ChatResult<CreatedTopic> {
        self.add_topic(agent_id, name).await
    }

    async fn delete_topic(&self, agent_id: &str, topic_id: &str) -> ChatResult<Vec<Topic>> {
        self.remove_topic(agent_id, topic_id).await
    }

    async fn reorder_topics(&self, agent_id: &str, ordered_ids: &[String]) -> ChatResult<Vec<Topic>> {
        self.reorder_agent_topics(agent_id, ordered_ids).await
    }

    async fn reorder_group_topics(
        &self,
        group_id: &str,
        ordered_ids: &[String],
    ) -> ChatResult<Vec<Topic>> {
        self.reorder_group_topic_list(group_id, ordered_ids).await
    }

    async fn rename_topic(
        &self,
        agent_id: &str,
        topic_id: &str,
        new_title: &str,
    ) -> ChatResult<Vec<Topic>> {
        self.set_topic_title(agent_id, topic_id, new_title).await
    }

    async fn search_topics_by_content(
        &self,
        item_id: &str,
        kind: ItemKind,
        search_term: &str,
    ) -> ChatResult<Vec<String>> {
        self.search_histories(item_id, kind, search_term).await
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn released_keys_are_pruned() {
        let locks = KeyedLocks::default();
        for i in 0..100 {
            let _guard = locks.lock(format!("A1\u{0}topic_{i}")).await;
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn waiter_keeps_entry_until_it_finishes() {
        let locks = Arc::new(KeyedLocks::default());
        let first = locks.lock("A1".into()).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("A1".into()).await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }
}
