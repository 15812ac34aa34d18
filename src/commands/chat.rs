use std::sync::Arc;

use serde_json::Value;
use tauri::{State, Window};

use super::{err_str, AppState};
use crate::attachments::{PastedFile, StoredAttachment};
use crate::models::{Message, OutboundMessage};
use crate::relay::{EventSink, RelayOutcome, RelayRequest};
use crate::session::TurnStarted;
use crate::store::ItemKind;

/// 直接把一组消息交给中继。事件通过 `vcp-stream-event` 推回调用窗口。
#[tauri::command]
pub async fn send_to_vcp(
    window: Window,
    state: State<'_, AppState>,
    mut request: RelayRequest,
) -> Result<RelayOutcome, String> {
    // 工具注入开关以设置文件为准
    let settings = state.settings.load_settings().await.map_err(err_str)?;
    request.enable_tool_injection |= settings.enable_vcp_tool_injection;

    let sink: Arc<dyn EventSink> = Arc::new(window);
    Ok(state.relay.send(request, sink).await)
}

/// 落盘用户消息并发起一轮回复。
#[tauri::command]
pub async fn send_message(
    window: Window,
    state: State<'_, AppState>,
    agent_id: String,
    topic_id: String,
    message: Message,
) -> Result<TurnStarted, String> {
    let sink: Arc<dyn EventSink> = Arc::new(window);
    state
        .session
        .begin_turn(&agent_id, &topic_id, message, sink)
        .await
        .map_err(err_str)
}

/// 语音模式的一次问答，直接返回回复文本。
#[tauri::command]
pub async fn send_voice_message(
    state: State<'_, AppState>,
    agent_id: String,
    history: Vec<OutboundMessage>,
) -> Result<String, String> {
    state
        .session
        .voice_reply(&agent_id, &history)
        .await
        .map_err(err_str)
}

#[tauri::command]
pub async fn finish_message(
    state: State<'_, AppState>,
    agent_id: String,
    topic_id: String,
    message: Message,
) -> Result<Vec<Message>, String> {
    state
        .session
        .finish_turn(&agent_id, &topic_id, message)
        .await
        .map_err(err_str)
}

#[tauri::command]
pub async fn get_chat_history(
    state: State<'_, AppState>,
    agent_id: String,
    topic_id: String,
) -> Result<Vec<Message>, String> {
    state
        .store
        .get_history(&agent_id, &topic_id)
        .await
        .map_err(err_str)
}

#[tauri::command]
pub async fn save_chat_history(
    state: State<'_, AppState>,
    agent_id: String,
    topic_id: String,
    history: Vec<Message>,
) -> Result<(), String> {
    state
        .store
        .save_history(&agent_id, &topic_id, &history)
        .await
        .map_err(err_str)
}

#[tauri::command]
pub async fn get_original_message_content(
    state: State<'_, AppState>,
    item_id: String,
    item_type: Option<ItemKind>,
    topic_id: String,
    message_id: String,
) -> Result<Value, String> {
    state
        .store
        .get_message_content(
            &item_id,
            item_type.unwrap_or_default(),
            &topic_id,
            &message_id,
        )
        .await
        .map_err(err_str)
}

#[tauri::command]
pub async fn handle_file_paste(
    state: State<'_, AppState>,
    agent_id: String,
    topic_id: String,
    file: PastedFile,
) -> Result<StoredAttachment, String> {
    state
        .attachments
        .handle_file_paste(&agent_id, &topic_id, file)
        .await
        .map_err(err_str)
}

#[tauri::command]
pub async fn handle_text_paste_as_file(
    state: State<'_, AppState>,
    agent_id: String,
    topic_id: String,
    text: String,
) -> Result<StoredAttachment, String> {
    state
        .attachments
        .handle_text_paste(&agent_id, &topic_id, &text)
        .await
        .map_err(err_str)
}
