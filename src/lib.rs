// src/lib.rs
//! VCP 聊天客户端后端：助手与话题的 JSON 持久化、到 VCP 网关的流式中继，
//! 以及设置、语音合成、附件等配套服务。
//!
//! 桌面外壳（Tauri 窗口与命令）在 `desktop` feature 下编译，其余模块不依赖 Tauri。

pub mod attachments;
pub mod consumer;
pub mod error;
pub mod logging;
pub mod models;
pub mod paths;
pub mod relay;
pub mod session;
pub mod settings;
pub mod store;
pub mod tts;

#[cfg(feature = "desktop")]
pub mod commands;

pub use error::{ChatError, ChatResult};

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use commands::{chat, settings, topics, tts, AppState};
    use tauri::Manager;

    logging::init_tracing();

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            let paths = paths::DataPaths::resolve()?;
            tracing::info!("数据目录: {}", paths.root().display());
            app.manage(AppState::new(paths)?);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            chat::send_to_vcp,
            chat::send_message,
            chat::send_voice_message,
            chat::finish_message,
            chat::get_chat_history,
            chat::save_chat_history,
            chat::get_original_message_content,
            chat::handle_file_paste,
            chat::handle_text_paste_as_file,
            topics::get_agents,
            topics::get_agent_config,
            topics::save_agent_config,
            topics::get_agent_topics,
            topics::create_new_topic,
            topics::delete_topic,
            topics::save_topic_order,
            topics::save_group_topic_order,
            topics::save_agent_topic_title,
            topics::search_topics_by_content,
            settings::load_settings,
            settings::save_settings,
            settings::save_avatar_color,
            tts::sovits_get_models,
            tts::sovits_speak
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
