//! # 会话编排
//!
//! 一轮对话分两步：[`ChatSession::begin_turn`] 落盘用户消息、拼出发往网关的
//! 消息列表并交给中继；前端收到 `end` 后调用 [`ChatSession::finish_turn`]
//! 把完整的助手消息写回历史。
//!
//! 语音模式走 [`ChatSession::voice_reply`]：一次非流式请求，历史由前端提供，不落盘。

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::attachments::{extract_text, StoredAttachment};
use crate::error::{ChatError, ChatResult};
use crate::models::{now_millis, AgentConfig, Message, ModelConfig, OutboundMessage, Role};
use crate::relay::{EventSink, GatewayRelay, RelayOutcome, RelayRequest};
use crate::settings::{AppSettings, SettingsService};
use crate::store::ConversationStore;

/// 组装发往网关的消息列表。
///
/// 系统提示词替换 `{{AgentName}}` 后作为第一条；为空时不加系统消息。
pub fn compose_messages(agent: &AgentConfig, history: &[Message]) -> Vec<OutboundMessage> {
    let system_prompt = agent.rendered_system_prompt();
    let mut messages = Vec::with_capacity(history.len() + 1);
    if !system_prompt.is_empty() {
        messages.push(OutboundMessage {
            role: Role::System,
            content: Value::String(system_prompt),
        });
    }
    messages.extend(history.iter().map(OutboundMessage::from));
    messages
}

/// 语音模式附加在系统提示词之后的要求。
pub const VOICE_MODE_PROMPT: &str = "当前处于语音模式中，你的回复应当口语化，内容简短直白。由于用户输入同样是语音识别模型构成，注意自主判断、理解其中的同音错别字或者错误语义识别。";

/// 语音模式的消息列表：系统消息总是存在，内容为模板化提示词加上语音要求。
pub fn compose_voice_messages(
    agent: &AgentConfig,
    history: &[OutboundMessage],
) -> Vec<OutboundMessage> {
    let system_prompt = format!(
        "{}\n\n{VOICE_MODE_PROMPT}",
        agent.rendered_system_prompt()
    );
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(OutboundMessage {
        role: Role::System,
        content: Value::String(system_prompt),
    });
    messages.extend(history.iter().cloned());
    messages
}

fn server_url(settings: &AppSettings) -> ChatResult<String> {
    settings
        .vcp_server_url
        .clone()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| ChatError::InvalidArgument("尚未配置 VCP 服务器地址".into()))
}

/// 已发出的一轮对话。
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TurnStarted {
    pub user_message: Message,
    pub assistant_message_id: String,
    pub outcome: RelayOutcome,
}

pub struct ChatSession {
    store: Arc<dyn ConversationStore>,
    settings: Arc<SettingsService>,
    relay: GatewayRelay,
}

impl ChatSession {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        settings: Arc<SettingsService>,
        relay: GatewayRelay,
    ) -> Self {
        Self {
            store,
            settings,
            relay,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// 持久化用户消息并构造中继请求，不发网络请求。
    pub async fn prepare_turn(
        &self,
        agent_id: &str,
        topic_id: &str,
        user_message: Message,
    ) -> ChatResult<RelayRequest> {
        let settings = self.settings.load_settings().await?;
        let endpoint_url = server_url(&settings)?;

        let agent = self.store.get_agent_config(agent_id).await?;
        let history = self
            .store
            .upsert_message(agent_id, topic_id, user_message)
            .await?;
        let history = with_attachment_text(history).await;

        let message_id = format!("assistant_msg_{}", now_millis());
        Ok(RelayRequest {
            endpoint_url,
            api_key: settings.vcp_api_key.unwrap_or_default(),
            messages: compose_messages(&agent, &history),
            model_config: ModelConfig::from_agent(&agent),
            message_id,
            is_group_call: false,
            context: Some(json!({"agentId": agent_id, "topicId": topic_id})),
            enable_tool_injection: settings.enable_vcp_tool_injection,
        })
    }

    /// 发起一轮对话：落盘用户消息后把请求交给中继。
    pub async fn begin_turn(
        &self,
        agent_id: &str,
        topic_id: &str,
        user_message: Message,
        sink: Arc<dyn EventSink>,
    ) -> ChatResult<TurnStarted> {
        let request = self
            .prepare_turn(agent_id, topic_id, user_message.clone())
            .await?;
        let assistant_message_id = request.message_id.clone();
        info!("Agent {agent_id} 话题 {topic_id} 发起回复 {assistant_message_id}");

        let outcome = self.relay.send(request, sink).await;
        Ok(TurnStarted {
            user_message,
            assistant_message_id,
            outcome,
        })
    }

    /// 语音模式的一次问答，返回助手回复的纯文本（网关没有给出内容时为空串）。
    pub async fn voice_reply(
        &self,
        agent_id: &str,
        history: &[OutboundMessage],
    ) -> ChatResult<String> {
        let settings = self.settings.load_settings().await?;
        let endpoint_url = server_url(&settings)?;
        let agent = self.store.get_agent_config(agent_id).await?;

        let mut model_config = ModelConfig::from_agent(&agent);
        model_config.stream = false;
        let request = RelayRequest {
            endpoint_url,
            api_key: settings.vcp_api_key.unwrap_or_default(),
            messages: compose_voice_messages(&agent, history),
            model_config,
            message_id: format!("voice_msg_{}", now_millis()),
            is_group_call: false,
            context: None,
            enable_tool_injection: false,
        };
        info!("Agent {agent_id} 语音模式请求 {}", request.message_id);

        let body = self.relay.complete(&request).await?;
        Ok(body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// 写入最终的助手消息（同 ID 的占位消息会被替换）。
    pub async fn finish_turn(
        &self,
        agent_id: &str,
        topic_id: &str,
        assistant_message: Message,
    ) -> ChatResult<Vec<Message>> {
        if assistant_message.role != Role::Assistant {
            return Err(ChatError::InvalidArgument(
                "finish_turn 只接受助手消息".into(),
            ));
        }
        self.store
            .upsert_message(agent_id, topic_id, assistant_message)
            .await
    }
}

/// 把用户消息附件中的文字追加到正文后面。提取失败的附件只记日志。
async fn with_attachment_text(mut history: Vec<Message>) -> Vec<Message> {
    for message in history.iter_mut().filter(|m| m.role == Role::User) {
        let Some(raw) = message.extra.get("attachments") else {
            continue;
        };
        let Ok(attachments) = serde_json::from_value::<Vec<StoredAttachment>>(raw.clone()) else {
            continue;
        };
        let Some(body) = message.content.as_str() else {
            continue;
        };

        let mut content = body.to_string();
        for attachment in attachments {
            match extract_text(&attachment.internal_path).await {
                Ok(Some(text)) => {
                    content.push_str(&format!("\n\n[附加文件: {}]\n{}", attachment.name, text));
                }
                Ok(None) => {}
                Err(err) => warn!("读取附件 {} 失败: {err}", attachment.name),
            }
        }
        message.content = Value::String(content);
    }
    history
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::AttachmentStore;
    use crate::settings::AppSettings;
    use crate::store::test_support::store_with_agent;

    #[test]
    fn system_prompt_is_templated_first() {
        let agent = AgentConfig {
            name: "Nova".into(),
            system_prompt: "你是{{AgentName}}，{{AgentName}}很友好。".into(),
            ..Default::default()
        };
        let history = vec![Message::new("u1", Role::User, "hi")];
        let messages = compose_messages(&agent, &history);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, json!("你是Nova，Nova很友好。"));
        assert_eq!(messages[1].content, json!("hi"));
    }

    #[test]
    fn empty_system_prompt_adds_nothing() {
        let agent = AgentConfig {
            name: "Nova".into(),
            ..Default::default()
        };
        let messages = compose_messages(&agent, &[Message::new("u1", Role::User, "hi")]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn voice_messages_always_carry_system_prompt() {
        let agent = AgentConfig {
            name: "Nova".into(),
            ..Default::default()
        };
        let history = vec![OutboundMessage {
            role: Role::User,
            content: json!("今天天气"),
        }];
        let messages = compose_voice_messages(&agent, &history);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(
            messages[0].content,
            json!(format!("\n\n{VOICE_MODE_PROMPT}"))
        );

        let agent = AgentConfig {
            system_prompt: "我是{{AgentName}}".into(),
            ..agent
        };
        let messages = compose_voice_messages(&agent, &history);
        assert!(messages[0]
            .content
            .as_str()
            .unwrap()
            .starts_with("我是Nova\n\n当前处于语音模式中"));
        assert_eq!(messages[1].content, json!("今天天气"));
    }

    #[tokio::test]
    async fn voice_reply_needs_existing_agent() {
        let (session, _attachments, _dir) = session().await;
        let err = session.voice_reply("ghost", &[]).await.unwrap_err();
        assert!(matches!(err, ChatError::AgentNotFound(_)));
    }

    async fn session() -> (ChatSession, AttachmentStore, tempfile::TempDir) {
        let (store, dir) = store_with_agent(
            "A1",
            json!({"name": "Nova", "systemPrompt": "我是{{AgentName}}", "model": "m", "temperature": 0.5}),
        )
        .await;
        let paths = store.paths().clone();
        let store: Arc<dyn ConversationStore> = Arc::new(store);
        let settings = Arc::new(SettingsService::new(paths.clone(), store.clone()));
        settings
            .save_settings(AppSettings {
                vcp_server_url: Some("http://127.0.0.1:9/v1/chat/completions".into()),
                vcp_api_key: Some("key".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        (
            ChatSession::new(store, settings, GatewayRelay::default()),
            AttachmentStore::new(paths),
            dir,
        )
    }

    #[tokio::test]
    async fn prepare_turn_persists_user_message_and_builds_request() {
        let (session, _attachments, _dir) = session().await;

        let request = session
            .prepare_turn("A1", "T1", Message::new("u1", Role::User, "你好"))
            .await
            .unwrap();
        assert!(request.message_id.starts_with("assistant_msg_"));
        assert_eq!(request.api_key, "key");
        assert_eq!(request.model_config.model.as_deref(), Some("m"));
        assert!(request.model_config.stream);
        assert_eq!(request.context, Some(json!({"agentId": "A1", "topicId": "T1"})));
        assert_eq!(request.messages[0].content, json!("我是Nova"));
        assert_eq!(request.messages[1].content, json!("你好"));

        let history = session.store().get_history("A1", "T1").await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn attachment_text_is_inlined_without_touching_history() {
        let (session, attachments, _dir) = session().await;
        let stored = attachments
            .handle_text_paste("A1", "T1", "附件正文")
            .await
            .unwrap();
        let mut message = Message::new("u1", Role::User, "看看这个");
        message
            .extra
            .insert("attachments".into(), serde_json::to_value(vec![stored]).unwrap());

        let request = session.prepare_turn("A1", "T1", message).await.unwrap();
        let sent = request.messages[1].content.as_str().unwrap();
        assert!(sent.starts_with("看看这个"));
        assert!(sent.ends_with("附件正文"));

        let history = session.store().get_history("A1", "T1").await.unwrap();
        assert_eq!(history[0].content, json!("看看这个"));
    }

    #[tokio::test]
    async fn finish_turn_replaces_placeholder() {
        let (session, _attachments, _dir) = session().await;
        let store = session.store().clone();
        store
            .upsert_message("A1", "T1", Message::new("a1", Role::Assistant, "思考中"))
            .await
            .unwrap();

        let history = session
            .finish_turn("A1", "T1", Message::new("a1", Role::Assistant, "完整回答"))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, json!("完整回答"));

        assert!(session
            .finish_turn("A1", "T1", Message::new("u9", Role::User, "x"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn missing_server_url_is_rejected_before_persisting() {
        let (store, _dir) = store_with_agent("A1", json!({"name": "Nova"})).await;
        let paths = store.paths().clone();
        let store: Arc<dyn ConversationStore> = Arc::new(store);
        let settings = Arc::new(SettingsService::new(paths, store.clone()));
        let session = ChatSession::new(store.clone(), settings, GatewayRelay::default());

        let err = session
            .prepare_turn("A1", "T1", Message::user("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidArgument(_)));
        assert!(store.get_history("A1", "T1").await.unwrap().is_empty());
    }
}
