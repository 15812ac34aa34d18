//! 前端聊天视图对流式事件的处理约定。
//!
//! 每个视图自己持有当前活动的 `messageId`，不同窗口互不影响。
//! 与活动 ID 不符的事件一律忽略；`end` / `error` 之后活动流清空。

use serde::Serialize;
use serde_json::Value;

use crate::models::{chunk_text, now_millis, Message, Role, StreamEvent};

#[derive(Debug, Clone, PartialEq)]
struct ActiveStream {
    message_id: String,
    text: String,
    started: bool,
}

/// 事件处理后视图需要做的更新。
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ViewUpdate {
    /// 不属于当前活动流。
    Ignored,
    /// 第一个分块到达，气泡开始渲染。
    Started { message_id: String, text: String },
    Appended { message_id: String, text: String },
    /// 流正常结束，携带可写回历史的完整消息。
    Completed { message: Message },
    Failed { message_id: String, error: String },
}

#[derive(Debug, Default)]
pub struct ChatView {
    active: Option<ActiveStream>,
}

impl ChatView {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始跟踪一个新的回复；之前的活动流被放弃。
    pub fn track(&mut self, message_id: impl Into<String>) {
        self.active = Some(ActiveStream {
            message_id: message_id.into(),
            text: String::new(),
            started: false,
        });
    }

    pub fn active_message_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.message_id.as_str())
    }

    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// 用户放弃当前回复。网关请求仍会跑完，但后续事件都会被忽略。
    pub fn abandon_stream(&mut self) -> Option<String> {
        self.active.take().map(|a| a.message_id)
    }

    pub fn handle_event(&mut self, event: &StreamEvent) -> ViewUpdate {
        let Some(active) = self
            .active
            .as_mut()
            .filter(|a| a.message_id == event.message_id())
        else {
            return ViewUpdate::Ignored;
        };

        match event {
            StreamEvent::Data { chunk, .. } => {
                let delta = chunk_text(chunk).unwrap_or_default();
                active.text.push_str(delta);
                let message_id = active.message_id.clone();
                if active.started {
                    ViewUpdate::Appended {
                        message_id,
                        text: delta.to_string(),
                    }
                } else {
                    active.started = true;
                    ViewUpdate::Started {
                        message_id,
                        text: delta.to_string(),
                    }
                }
            }
            StreamEvent::End { .. } => {
                let Some(finished) = self.active.take() else {
                    return ViewUpdate::Ignored;
                };
                ViewUpdate::Completed {
                    message: Message {
                        id: finished.message_id,
                        role: Role::Assistant,
                        content: Value::String(finished.text),
                        timestamp: now_millis(),
                        extra: Default::default(),
                    },
                }
            }
            StreamEvent::Error { error, .. } => {
                let message_id = active.message_id.clone();
                self.active = None;
                ViewUpdate::Failed {
                    message_id,
                    error: error.clone(),
                }
            }
        }
    }
}
