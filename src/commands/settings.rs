use tauri::State;

use super::{err_str, AppState};
use crate::settings::{AppSettings, AvatarColorTarget};

#[tauri::command]
pub async fn load_settings(state: State<'_, AppState>) -> Result<AppSettings, String> {
    state.settings.load_settings().await.map_err(err_str)
}

#[tauri::command]
pub async fn save_settings(
    state: State<'_, AppState>,
    settings: AppSettings,
) -> Result<(), String> {
    state.settings.save_settings(settings).await.map_err(err_str)
}

#[tauri::command]
pub async fn save_avatar_color(
    state: State<'_, AppState>,
    target: AvatarColorTarget,
) -> Result<(), String> {
    state
        .settings
        .save_avatar_color(target)
        .await
        .map_err(err_str)
}
