//! 翻译配置管理模块
//!
//! 提供简化的配置管理，支持环境变量、配置文件和默认值

pub mod manager;

// 重新导出主要类型
pub use manager::{ConfigManager, PipelineConfig};

/// 配置常量
pub mod constants {
    use std::time::Duration;

    // 缓存相关
    pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
    pub const BUCKET_CAPACITY: usize = 1000;
    pub const EVICTION_FRACTION: f64 = 0.2;
    /// 本地持久化使用的键，同时也是缓存格式版本；版本不一致时整体丢弃
    pub const CACHE_FORMAT_VERSION: &str = "site-translator-cache-v3";

    // 远程缓存预热
    pub const WARM_COOLDOWN: Duration = Duration::from_secs(30);
    pub const WARM_LIMIT: usize = 500;

    // 请求客户端
    pub const REQUEST_CACHE_TTL: Duration = Duration::from_secs(30);
    pub const RETRY_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);
    pub const RETRY_MAX_JITTER: Duration = Duration::from_millis(1000);
    pub const TRANSLATE_FUNCTION: &str = "translate";

    // 批次与调度
    pub const BATCH_SIZE: usize = 5;
    pub const SWITCH_DEBOUNCE: Duration = Duration::from_millis(300);
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

    // 默认语言与接口
    pub const DEFAULT_SOURCE_LANG: &str = "en";
    pub const DEFAULT_API_URL: &str = "http://localhost:54321/functions/v1";
    pub const DEFAULT_NAMESPACE: &str = "common";
    pub const DEFAULT_REMOTE_TABLE: &str = "translations";

    // 文本过滤相关
    pub const MIN_TEXT_LENGTH: usize = 3;
    pub const LONG_PARAGRAPH_CHARS: usize = 120;
    pub const CLASSIFICATION_PREFIX_CHARS: usize = 50;
    pub const CLASSIFICATION_CACHE_SIZE: usize = 2048;

    // 可翻译属性
    pub const TRANSLATABLE_ATTRS: &[&str] =
        &["title", "alt", "placeholder", "aria-label", "data-tooltip"];

    // 最近的父元素是这些标签时跳过，且不进入其子树
    pub const SKIP_ELEMENTS: &[&str] = &["script", "style", "meta", "title", "noscript"];

    // 显式排除标记
    pub const OPT_OUT_ATTR: &str = "data-no-translate";
    pub const OPT_OUT_CLASS: &str = "notranslate";
    pub const NAMESPACE_ATTR: &str = "data-i18n-namespace";

    // 分类关键词
    pub const MARKETING_KEYWORDS: &[&str] = &["hero", "cta", "call-to-action", "banner", "signup"];
    pub const FOOTER_KEYWORDS: &[&str] = &["footer", "copyright", "legal"];
    pub const TECHNICAL_TOKENS: &[&str] = &[
        "api", "sdk", "json", "http", "https", "cli", "sql", "url", "oauth", "webhook",
        "endpoint", "token", "config",
    ];
    pub const CULTURAL_TOKENS: &[&str] = &[
        "holiday", "festival", "tradition", "traditional", "culture", "cultural", "heritage",
        "celebration", "family", "community",
    ];

    // 配置文件搜索路径
    pub const CONFIG_PATHS: &[&str] = &[
        "site-translator.toml",
        ".site-translator.toml",
        "site-translator.json",
        "~/.config/site-translator/config.toml",
    ];
}

/// 便利函数
pub fn config_file_exists() -> bool {
    constants::CONFIG_PATHS
        .iter()
        .any(|path| std::path::Path::new(shellexpand::tilde(path).as_ref()).exists())
}

/// 加载配置，失败时回退到默认值
pub fn load_pipeline_config() -> PipelineConfig {
    match ConfigManager::new() {
        Ok(manager) => manager.get_config().clone(),
        Err(e) => {
            tracing::warn!("配置加载失败，使用默认配置: {}", e);
            PipelineConfig::default()
        }
    }
}
