//! 日志初始化。

use tracing_subscriber::EnvFilter;

/// 安装全局 tracing 订阅者，级别取自 `RUST_LOG`，缺省为 `info`。
///
/// 重复调用是安全的：已有订阅者时直接忽略。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
