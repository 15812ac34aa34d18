//! # 数据模型模块
//!
//! 该模块定义了聊天后端使用的核心数据结构：助手（Agent）配置、话题、
//! 聊天消息、发往网关的模型参数，以及推送给前端的流式事件。
//!
//! 所有结构都配合 `serde` 以 camelCase 与磁盘 JSON 文档及前端保持一致。
//! 前端可能写入本模块不认识的字段，因此助手配置和消息都保留 `extra`，
//! 整文档重写时不会丢失这些字段。

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 默认话题的固定 ID。
pub const DEFAULT_TOPIC_ID: &str = "default";
/// 默认话题的显示名称。
pub const DEFAULT_TOPIC_NAME: &str = "主要对话";
/// 系统提示词中会被替换为助手名称的占位符。
pub const AGENT_NAME_PLACEHOLDER: &str = "{{AgentName}}";

/// 当前时间（毫秒时间戳）。
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 代表一个具体的对话话题。
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    /// 话题 ID，在所属助手内唯一。
    pub id: String,
    /// 话题标题。
    pub name: String,
    /// 创建时间（毫秒时间戳）。
    #[serde(default)]
    pub created_at: i64,
}

impl Topic {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created_at: now_millis(),
        }
    }

    /// 助手没有任何话题时自动补上的 "主要对话"。
    pub fn default_topic() -> Self {
        Self::new(DEFAULT_TOPIC_ID, DEFAULT_TOPIC_NAME)
    }
}

/// 消息发送者角色。
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 代表对话中的一条消息。
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    /// 消息正文。通常是字符串，多模态消息可能是数组。
    pub content: Value,
    #[serde(default)]
    pub timestamp: i64,
    /// 前端附带的其他字段（name、avatarUrl、attachments 等）。
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: Value::String(content.into()),
            timestamp: now_millis(),
            extra: Map::new(),
        }
    }

    /// 生成一条用户消息，ID 形如 `user_msg_<毫秒>`。
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(format!("user_msg_{}", now_millis()), Role::User, content)
    }

    /// 正文为纯文本时返回文本。
    pub fn text(&self) -> Option<&str> {
        self.content.as_str()
    }
}

/// 助手配置文档 `<agents>/<id>/config.json`。
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// 助手 ID 来自存储目录名，不写回配置文件。
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub topics: Vec<Topic>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentConfig {
    /// 替换 `{{AgentName}}` 后的系统提示词。
    pub fn rendered_system_prompt(&self) -> String {
        self.system_prompt
            .replace(AGENT_NAME_PLACEHOLDER, &self.name)
    }
}

/// 返回给前端的助手信息，目录名作为 `id` 一并输出。
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct AgentEntry {
    pub id: String,
    #[serde(flatten)]
    pub config: AgentConfig,
}

impl From<AgentConfig> for AgentEntry {
    fn from(config: AgentConfig) -> Self {
        Self {
            id: config.id.clone(),
            config,
        }
    }
}

/// 发往网关的单条消息，只携带角色与正文。
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    pub role: Role,
    pub content: Value,
}

impl From<&Message> for OutboundMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// 请求体中展开的模型参数。
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ModelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    /// 前端传入的其他模型字段，原样并入请求体。
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModelConfig {
    /// 按助手配置生成流式请求参数。
    pub fn from_agent(agent: &AgentConfig) -> Self {
        Self {
            model: (!agent.model.is_empty()).then(|| agent.model.clone()),
            temperature: agent.temperature,
            max_tokens: agent.max_output_tokens,
            top_p: agent.top_p,
            top_k: agent.top_k,
            stream: true,
            extra: Map::new(),
        }
    }
}

/// 推送给前端的流式事件，序列化为 `{type, messageId, context?, chunk?, error?}`。
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    Data {
        message_id: String,
        chunk: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
    End {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
    Error {
        message_id: String,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
}

impl StreamEvent {
    pub fn message_id(&self) -> &str {
        match self {
            StreamEvent::Data { message_id, .. }
            | StreamEvent::End { message_id, .. }
            | StreamEvent::Error { message_id, .. } => message_id,
        }
    }

    pub fn context(&self) -> Option<&Value> {
        match self {
            StreamEvent::Data { context, .. }
            | StreamEvent::End { context, .. }
            | StreamEvent::Error { context, .. } => context.as_ref(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Data { .. })
    }
}

/// 从网关分块中取出增量文本。
///
/// 兼容 OpenAI 风格的 `choices[0].delta.content`，以及直接携带
/// `content` / `text` 的简化分块。取不到时返回 `None`。
pub fn chunk_text(chunk: &Value) -> Option<&str> {
    chunk
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .or_else(|| chunk.pointer("/delta/content").and_then(Value::as_str))
        .or_else(|| chunk.get("content").and_then(Value::as_str))
        .or_else(|| chunk.get("text").and_then(Value::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stream_event_serializes_with_type_tag() {
        let event = StreamEvent::Data {
            message_id: "m1".into(),
            chunk: json!({"text": "He"}),
            context: Some(json!({"agentId": "A1", "topicId": "T1"})),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "data",
                "messageId": "m1",
                "chunk": {"text": "He"},
                "context": {"agentId": "A1", "topicId": "T1"}
            })
        );

        let end = serde_json::to_value(StreamEvent::End {
            message_id: "m1".into(),
            context: None,
        })
        .unwrap();
        assert_eq!(end, json!({"type": "end", "messageId": "m1"}));
    }

    #[test]
    fn agent_config_keeps_unknown_fields() {
        let raw = json!({
            "name": "Nova",
            "systemPrompt": "你是{{AgentName}}。",
            "model": "gemini-pro",
            "avatarCalculatedColor": "#abcdef",
            "topics": [{"id": "default", "name": "主要对话", "createdAt": 1}]
        });
        let config: AgentConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.rendered_system_prompt(), "你是Nova。");
        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back["avatarCalculatedColor"], "#abcdef");
        assert!(back.get("id").is_none());

        let entry = AgentEntry::from(AgentConfig {
            id: "A1".into(),
            ..config
        });
        let listed = serde_json::to_value(&entry).unwrap();
        assert_eq!(listed["id"], "A1");
        assert_eq!(listed["name"], "Nova");
    }

    #[test]
    fn chunk_text_reads_common_shapes() {
        assert_eq!(
            chunk_text(&json!({"choices": [{"delta": {"content": "hi"}}]})),
            Some("hi")
        );
        assert_eq!(chunk_text(&json!({"text": "llo"})), Some("llo"));
        assert_eq!(chunk_text(&json!({"usage": {}})), None);
    }

    #[test]
    fn model_config_from_agent_maps_max_output_tokens() {
        let agent = AgentConfig {
            model: "m".into(),
            temperature: Some(0.7),
            max_output_tokens: Some(2000),
            ..Default::default()
        };
        let config = ModelConfig::from_agent(&agent);
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(
            value,
            json!({"model": "m", "temperature": 0.7, "max_tokens": 2000, "stream": true})
        );
    }
}
