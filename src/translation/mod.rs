//! 翻译模块
//!
//! 在运行中的文档上做客户端翻译：
//! - **config**: 配置与常量
//! - **error**: 错误处理
//! - **storage**: 翻译缓存、本地持久化、远程预热
//! - **client**: 去重、缓存、重试的请求客户端
//! - **pipeline**: 扫描、分类、队列与周期编排
//! - **core**: 意图跟踪与语言切换
//!
//! # 基本用法
//!
//! ```rust,no_run
//! use site_translator::html::html_to_dom;
//! use site_translator::translation::{PipelineConfig, TranslationService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = TranslationService::from_config(PipelineConfig::default())?;
//! let dom = html_to_dom("<h1>Welcome</h1>");
//!
//! let local = tokio::task::LocalSet::new();
//! local
//!     .run_until(async {
//!         let switcher = service.switcher(dom.document.clone());
//!         switcher.switch_to("fr").await
//!     })
//!     .await??;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod service;
pub mod storage;

pub use client::{RequestClient, RetryPolicy, TranslationOutcome, TranslationRequest};
pub use config::{ConfigManager, PipelineConfig};
pub use core::{IntentGuard, IntentTracker, LanguageState, LanguageSwitcher};
pub use error::{TranslationError, TranslationResult};
pub use pipeline::{ContentScanner, CycleReport, DetectedItem, Orchestrator, Phase, ProgressEvent};
pub use service::TranslationService;
pub use storage::{CacheStats, RemoteCacheLoader, TranslationCache};
