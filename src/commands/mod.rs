//! 前端通过 `invoke` 调用的 Tauri 命令。
//!
//! 命令只做参数转换，逻辑都在各服务里；错误统一转成字符串交给前端。

pub mod chat;
pub mod settings;
pub mod topics;
pub mod tts;

use std::sync::Arc;

use crate::attachments::AttachmentStore;
use crate::error::ChatResult;
use crate::paths::DataPaths;
use crate::relay::GatewayRelay;
use crate::session::ChatSession;
use crate::settings::SettingsService;
use crate::store::{ConversationStore, JsonFileStore};
use crate::tts::TtsService;

/// 由 Tauri 托管的全局状态。
pub struct AppState {
    pub store: Arc<dyn ConversationStore>,
    pub settings: Arc<SettingsService>,
    pub session: ChatSession,
    pub relay: GatewayRelay,
    pub attachments: AttachmentStore,
    pub tts: TtsService,
}

impl AppState {
    pub fn new(paths: DataPaths) -> ChatResult<Self> {
        let client = reqwest::Client::builder().build()?;
        let store: Arc<dyn ConversationStore> = Arc::new(JsonFileStore::new(paths.clone()));
        let settings = Arc::new(SettingsService::new(paths.clone(), store.clone()));
        let relay = GatewayRelay::new(client.clone());
        Ok(Self {
            session: ChatSession::new(store.clone(), settings.clone(), relay.clone()),
            attachments: AttachmentStore::new(paths.clone()),
            tts: TtsService::new(paths, client),
            store,
            settings,
            relay,
        })
    }
}

pub(crate) fn err_str(err: impl std::fmt::Display) -> String {
    err.to_string()
}
