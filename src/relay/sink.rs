use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::models::StreamEvent;

/// 前端约定的事件通道名。
pub const STREAM_CHANNEL: &str = "vcp-stream-event";

/// 流式事件的投递目标。
///
/// 投递失败（窗口已关闭、接收端已丢弃）只记日志，不影响中继本身。
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: StreamEvent);
}

impl EventSink for UnboundedSender<StreamEvent> {
    fn emit(&self, event: StreamEvent) {
        if self.send(event).is_err() {
            debug!("流式事件接收端已关闭");
        }
    }
}

#[cfg(feature = "desktop")]
impl<R: tauri::Runtime> EventSink for tauri::Window<R> {
    fn emit(&self, event: StreamEvent) {
        use tauri::Emitter;
        if let Err(err) = Emitter::emit(self, STREAM_CHANNEL, &event) {
            debug!("向窗口推送流式事件失败: {err}");
        }
    }
}
