//! 翻译处理管道
//!
//! - `filters`: 文本可译性判断
//! - `classify`: 内容分类
//! - `scanner`: 文档扫描与翻译标记
//! - `queue`: 请求队列状态
//! - `orchestrator`: 周期编排

pub mod classify;
pub mod filters;
pub mod orchestrator;
pub mod queue;
pub mod scanner;

pub use classify::{Classification, Classifier, ContentType, Importance, TranslationType, Zone};
pub use filters::TextFilter;
pub use orchestrator::{CycleReport, Orchestrator, Phase, ProgressEvent};
pub use queue::QueueState;
pub use scanner::{
    ContentScanner, DetectedItem, ScannerConfig, Selector, TranslationMark, TranslationMarks,
};
