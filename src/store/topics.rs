use std::collections::HashMap;

use tracing::{info, warn};

use super::json_file::{read_json, remove_dir_if_exists, write_json};
use super::{CreatedTopic, ItemKind, JsonFileStore};
use crate::error::{ChatError, ChatResult};
use crate::models::{now_millis, Message, Topic};

type GroupConfig = serde_json::Map<String, serde_json::Value>;

/// 把 `ordered_ids` 中提到的话题按给定顺序排到前面，其余保持原相对顺序追加在后。
/// 未知 ID 与重复 ID 被忽略，因此任何话题都不会因为请求不完整而丢失。
pub fn apply_topic_order(topics: Vec<Topic>, ordered_ids: &[String]) -> Vec<Topic> {
    let mut slots: Vec<Option<Topic>> = topics.into_iter().map(Some).collect();
    let index: HashMap<String, usize> = slots
        .iter()
        .enumerate()
        .filter_map(|(i, t)| t.as_ref().map(|t| (t.id.clone(), i)))
        .collect();

    let mut ordered = Vec::with_capacity(slots.len());
    for id in ordered_ids {
        if let Some(topic) = index.get(id).and_then(|&i| slots[i].take()) {
            ordered.push(topic);
        }
    }
    ordered.extend(slots.into_iter().flatten());
    ordered
}

/// 生成 `topic_<毫秒>` 形式的 ID；与现有话题冲突时顺延。
fn next_topic_id(topics: &[Topic]) -> String {
    let mut stamp = now_millis();
    loop {
        let id = format!("topic_{stamp}");
        if !topics.iter().any(|t| t.id == id) {
            return id;
        }
        stamp += 1;
    }
}

impl JsonFileStore {
    pub(super) async fn topics_or_default(&self, agent_id: &str) -> ChatResult<Vec<Topic>> {
        let _guard = self.lock_config(agent_id).await;
        let mut config = self.read_agent_config(agent_id).await?;
        if !config.topics.is_empty() {
            return Ok(config.topics);
        }

        info!("Agent {agent_id} 没有话题，补建默认话题");
        config.topics = vec![Topic::default_topic()];
        self.write_agent_config(&config).await?;
        Ok(config.topics)
    }

    pub(super) async fn add_topic(&self, agent_id: &str, name: Option<&str>) -> ChatResult<CreatedTopic> {
        let _guard = self.lock_config(agent_id).await;
        let mut config = self.read_agent_config(agent_id).await?;

        let topic_id = next_topic_id(&config.topics);
        let topic_name = match name.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("新话题 {}", config.topics.len() + 1),
        };
        config.topics.push(Topic::new(topic_id.clone(), topic_name.clone()));
        self.write_agent_config(&config).await?;
        self.reset_history(agent_id, &topic_id).await?;

        info!("Agent {agent_id} 新建话题 {topic_id}");
        Ok(CreatedTopic {
            topic_id,
            topic_name,
            topics: config.topics,
        })
    }

    pub(super) async fn remove_topic(&self, agent_id: &str, topic_id: &str) -> ChatResult<Vec<Topic>> {
        let _guard = self.lock_config(agent_id).await;
        let mut config = self.read_agent_config(agent_id).await?;
        if config.topics.is_empty() {
            return Err(ChatError::NoTopics(agent_id.to_string()));
        }

        let before = config.topics.len();
        config.topics.retain(|t| t.id != topic_id);
        if config.topics.len() == before {
            return Err(ChatError::TopicNotFound {
                agent_id: agent_id.to_string(),
                topic_id: topic_id.to_string(),
            });
        }

        let recreated_default = config.topics.is_empty();
        if recreated_default {
            config.topics.push(Topic::default_topic());
        }
        self.write_agent_config(&config).await?;

        // 配置先落盘，目录删除失败只记录警告。
        {
            let _history = self.lock_history(agent_id, topic_id).await;
            let removed = match self.paths.topic_dir(agent_id, topic_id) {
                Ok(dir) => remove_dir_if_exists(&dir).await,
                Err(err) => Err(err),
            };
            if let Err(err) = removed {
                warn!("删除话题 {topic_id} 的目录失败: {err}");
            }
        }
        // 放在删目录之后：被删的恰好是 "default" 时，新的空历史不能被连带删掉。
        if recreated_default {
            self.reset_history(agent_id, &config.topics[0].id).await?;
        }

        info!("Agent {agent_id} 删除话题 {topic_id}");
        Ok(config.topics)
    }

    pub(super) async fn reorder_agent_topics(
        &self,
        agent_id: &str,
        ordered_ids: &[String],
    ) -> ChatResult<Vec<Topic>> {
        let _guard = self.lock_config(agent_id).await;
        let mut config = self.read_agent_config(agent_id).await?;
        config.topics = apply_topic_order(std::mem::take(&mut config.topics), ordered_ids);
        self.write_agent_config(&config).await?;
        Ok(config.topics)
    }

    /// 群组配置没有固定结构，这里只改写其中的 `topics` 字段。
    pub(super) async fn reorder_group_topic_list(
        &self,
        group_id: &str,
        ordered_ids: &[String],
    ) -> ChatResult<Vec<Topic>> {
        let _guard = self.lock_config(&format!("group:{group_id}")).await;
        let mut config = self.read_group_config(group_id).await?;
        let path = self.paths.group_config_file(group_id)?;

        let topics = apply_topic_order(group_topics(&mut config, &path)?, ordered_ids);
        config.insert(
            "topics".into(),
            serde_json::to_value(&topics).map_err(|e| ChatError::json(&path, e))?,
        );
        write_json(&path, &config).await?;
        Ok(topics)
    }

    async fn read_group_config(&self, group_id: &str) -> ChatResult<GroupConfig> {
        let path = self.paths.group_config_file(group_id)?;
        read_json(&path)
            .await?
            .ok_or_else(|| ChatError::GroupNotFound(group_id.to_string()))
    }

    pub(super) async fn set_topic_title(
        &self,
        agent_id: &str,
        topic_id: &str,
        new_title: &str,
    ) -> ChatResult<Vec<Topic>> {
        if topic_id.trim().is_empty() || new_title.trim().is_empty() {
            return Err(ChatError::InvalidArgument(
                "保存话题标题失败: topicId 或 newTitle 未提供。".into(),
            ));
        }
        let _guard = self.lock_config(agent_id).await;
        let mut config = self.read_agent_config(agent_id).await?;
        if config.topics.is_empty() {
            return Err(ChatError::NoTopics(agent_id.to_string()));
        }
        let topic = config
            .topics
            .iter_mut()
            .find(|t| t.id == topic_id)
            .ok_or_else(|| ChatError::TopicNotFound {
                agent_id: agent_id.to_string(),
                topic_id: topic_id.to_string(),
            })?;
        topic.name = new_title.to_string();
        self.write_agent_config(&config).await?;
        Ok(config.topics)
    }

    pub(super) async fn search_histories(
        &self,
        item_id: &str,
        kind: ItemKind,
        search_term: &str,
    ) -> ChatResult<Vec<String>> {
        if search_term.trim().is_empty() {
            return Err(ChatError::InvalidArgument(
                "Invalid arguments for topic content search.".into(),
            ));
        }
        let needle = search_term.to_lowercase();
        let topics = match kind {
            ItemKind::Agent => self.read_agent_config(item_id).await?.topics,
            ItemKind::Group => {
                let mut config = self.read_group_config(item_id).await?;
                group_topics(&mut config, &self.paths.group_config_file(item_id)?)?
            }
        };

        let mut matched: Vec<String> = Vec::new();
        for topic in &topics {
            if matched.contains(&topic.id) {
                continue;
            }
            let path = match self.paths.history_file(item_id, &topic.id) {
                Ok(path) => path,
                Err(err) => {
                    warn!("跳过话题 {}: {err}", topic.id);
                    continue;
                }
            };
            let history: Vec<Message> = match read_json(&path).await {
                Ok(Some(history)) => history,
                Ok(None) => continue,
                Err(err) => {
                    warn!("读取话题 {} 的历史失败: {err}", topic.id);
                    continue;
                }
            };
            if history_contains(&history, &needle) {
                matched.push(topic.id.clone());
            }
        }
        Ok(matched)
    }

    /// 写入一个空历史文档。
    async fn reset_history(&self, agent_id: &str, topic_id: &str) -> ChatResult<()> {
        let _history = self.lock_history(agent_id, topic_id).await;
        self.write_history(agent_id, topic_id, &[]).await
    }
}

/// 取出群组配置里的 `topics`；缺失时为空列表。
fn group_topics(config: &mut GroupConfig, path: &std::path::Path) -> ChatResult<Vec<Topic>> {
    match config.remove("topics") {
        Some(value) => serde_json::from_value(value).map_err(|e| ChatError::json(path, e)),
        None => Ok(Vec::new()),
    }
}

/// `needle` 需已转为小写。遇到第一条命中即返回。
fn history_contains(history: &[Message], needle: &str) -> bool {
    history
        .iter()
        .filter_map(Message::text)
        .any(|text| text.to_lowercase().contains(needle))
}
