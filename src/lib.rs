//! # Site Translator
//!
//! 运行中文档的客户端翻译管道：扫描可翻译文本，去重批量调用外部翻译函数，
//! 多级缓存（内存 + 本地持久化 + 远程预热），并在语言频繁切换时保证旧结果不会覆盖新结果。
//!
//! ## 模块组织
//!
//! - `env` - 类型化的环境变量
//! - `html` - 基于 rcdom 的 DOM 工具
//! - `logging` - 日志订阅者初始化
//! - `translation` - 翻译管道

pub mod env;
pub mod html;
pub mod logging;
pub mod translation;

pub use translation::{
    LanguageSwitcher, Orchestrator, PipelineConfig, TranslationError, TranslationResult,
    TranslationService,
};
