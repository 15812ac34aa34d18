//! 错误类型。

use std::path::PathBuf;

use thiserror::Error;

/// 聊天后端操作的结果类型。
pub type ChatResult<T> = Result<T, ChatError>;

/// 聊天后端可能出现的错误。
///
/// 配置类错误（助手或话题缺失）直接以可读消息拒绝调用；
/// 传输类错误在流式阶段转为 `error` 事件，不经由这里抛给调用方。
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Agent {0} 的配置文件不存在。")]
    AgentNotFound(String),

    #[error("Group {0} 的配置文件不存在。")]
    GroupNotFound(String),

    #[error("Agent {agent_id} 中未找到 ID 为 {topic_id} 的话题。")]
    TopicNotFound { agent_id: String, topic_id: String },

    #[error("Agent {0} 没有话题列表。")]
    NoTopics(String),

    #[error("在历史记录中未找到消息 {0}")]
    MessageNotFound(String),

    #[error("无效的参数: {0}")]
    InvalidArgument(String),

    #[error("读写 {path} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("解析 {path} 失败: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("网络请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("VCP Request Failed: {status} {body}")]
    Gateway { status: u16, body: String },

    #[error("提取 {path} 的文本失败: {message}")]
    Extract { path: PathBuf, message: String },

    #[error("TTS 服务错误: {0}")]
    Tts(String),

    #[error("无法获取配置目录")]
    NoConfigDir,
}

impl ChatError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ChatError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        ChatError::Json {
            path: path.into(),
            source,
        }
    }
}
