//! 日志初始化
//!
//! 库本身只通过 `tracing` 宏输出日志；宿主应用可以调用 [`init_tracing`] 安装一个
//! fmt 订阅者。过滤规则优先取 `RUST_LOG`，其次取 `SITE_TRANSLATOR_LOG_LEVEL`。

use tracing_subscriber::EnvFilter;

use crate::env::{core::LogLevel, EnvVar};

/// 安装全局订阅者；已经安装过时返回 false
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// 由 `SITE_TRANSLATOR_LOG_LEVEL` 得到的默认过滤规则
pub fn default_directive() -> String {
    // 无效的级别按 info 处理
    let level = LogLevel::get().unwrap_or_else(|_| "info".to_string());
    format!("site_translator={}", level)
}
