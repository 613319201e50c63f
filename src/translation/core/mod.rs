//! 翻译核心：意图跟踪与语言切换
//!
//! - `intent`: 代数 + 取消令牌，判断异步结果是否过期
//! - `switcher`: 防抖、乐观更新、失败回退

pub mod intent;
pub mod switcher;

pub use intent::{IntentGuard, IntentTracker};
pub use switcher::{LanguageState, LanguageSwitcher};
