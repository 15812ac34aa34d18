use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;
use tauri::State;

use super::{err_str, AppState};
use crate::tts::SpeakOptions;

/// 桌面端默认连接本机的 SoVITS 服务。
const DEFAULT_TTS_SERVER: &str = "http://127.0.0.1:8000";

#[tauri::command]
pub async fn sovits_get_models(
    state: State<'_, AppState>,
    force_refresh: bool,
    server_url: Option<String>,
) -> Result<Option<Value>, String> {
    let url = server_url.unwrap_or_else(|| DEFAULT_TTS_SERVER.to_string());
    state
        .tts
        .get_models(force_refresh, &url)
        .await
        .map_err(err_str)
}

/// 返回 base64 编码的 mp3；合成失败时为 `None`。
#[tauri::command]
pub async fn sovits_speak(
    state: State<'_, AppState>,
    options: SpeakOptions,
    server_url: Option<String>,
) -> Result<Option<String>, String> {
    let url = server_url.unwrap_or_else(|| DEFAULT_TTS_SERVER.to_string());
    let audio = state.tts.speak(&options, &url).await.map_err(err_str)?;
    Ok(audio.map(|bytes| general_purpose::STANDARD.encode(bytes)))
}
