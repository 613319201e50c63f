//! 简化的配置管理器
//!
//! 提供统一的配置接口，支持文件配置、环境变量和默认值

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::constants;
use crate::translation::error::{TranslationError, TranslationResult};

/// 翻译管道配置
///
/// 所有时长以毫秒或秒的整数保存，便于写进 TOML。
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    // 基础配置
    pub source_lang: String,
    pub api_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub translate_function: String,

    // 缓存配置
    pub cache_ttl_secs: u64,
    pub bucket_capacity: usize,
    pub eviction_fraction: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<String>,

    // 远程预热
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    pub remote_table: String,
    pub warm_cooldown_secs: u64,
    pub warm_limit: usize,

    // 请求客户端
    pub request_cache_ttl_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_jitter_ms: u64,

    // 批次与调度
    pub batch_size: usize,
    pub debounce_ms: u64,
    pub sweep_interval_secs: u64,

    // 扫描器
    pub exclusions: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_lang: constants::DEFAULT_SOURCE_LANG.to_string(),
            api_url: constants::DEFAULT_API_URL.to_string(),
            api_key: None,
            translate_function: constants::TRANSLATE_FUNCTION.to_string(),

            cache_ttl_secs: constants::CACHE_TTL.as_secs(),
            bucket_capacity: constants::BUCKET_CAPACITY,
            eviction_fraction: constants::EVICTION_FRACTION,
            store_path: None,

            remote_url: None,
            remote_table: constants::DEFAULT_REMOTE_TABLE.to_string(),
            warm_cooldown_secs: constants::WARM_COOLDOWN.as_secs(),
            warm_limit: constants::WARM_LIMIT,

            request_cache_ttl_secs: constants::REQUEST_CACHE_TTL.as_secs(),
            retry_attempts: constants::RETRY_ATTEMPTS,
            retry_base_delay_ms: constants::RETRY_BASE_DELAY.as_millis() as u64,
            retry_max_jitter_ms: constants::RETRY_MAX_JITTER.as_millis() as u64,

            batch_size: constants::BATCH_SIZE,
            debounce_ms: constants::SWITCH_DEBOUNCE.as_millis() as u64,
            sweep_interval_secs: constants::SWEEP_INTERVAL.as_secs(),

            exclusions: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// 验证配置
    pub fn validate(&self) -> TranslationResult<()> {
        if self.batch_size == 0 {
            return Err(TranslationError::ConfigError("批次大小不能为0".to_string()));
        }

        if self.bucket_capacity == 0 {
            return Err(TranslationError::ConfigError("缓存容量不能为0".to_string()));
        }

        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            return Err(TranslationError::ConfigError(format!(
                "淘汰比例必须在 (0, 1] 之间: {}",
                self.eviction_fraction
            )));
        }

        if self.retry_attempts == 0 {
            return Err(TranslationError::ConfigError("重试次数至少为1".to_string()));
        }

        if self.source_lang.trim().is_empty() {
            return Err(TranslationError::ConfigError("源语言不能为空".to_string()));
        }

        url::Url::parse(&self.api_url).map_err(|e| {
            TranslationError::ConfigError(format!("无效的接口地址 {}: {}", self.api_url, e))
        })?;

        Ok(())
    }

    /// 应用环境变量覆盖
    pub fn apply_env_overrides(&mut self) {
        use crate::env::{cache, translation, EnvVar};

        if let Some(result) = translation::SourceLang::get_set() {
            match result {
                Ok(lang) => self.source_lang = lang,
                Err(e) => tracing::warn!("忽略环境变量: {}", e),
            }
        }

        if let Some(result) = translation::ApiUrl::get_set() {
            match result {
                Ok(url) => {
                    self.api_url = url;
                    tracing::info!("环境变量覆盖 API URL: {}", self.api_url);
                }
                Err(e) => tracing::warn!("忽略环境变量: {}", e),
            }
        }

        if let Some(Ok(key)) = translation::ApiKey::get_set() {
            self.api_key = Some(key);
        }

        if let Some(result) = translation::BatchSize::get_set() {
            match result {
                Ok(size) => self.batch_size = size,
                Err(e) => tracing::warn!("忽略环境变量: {}", e),
            }
        }

        if let Some(Ok(attempts)) = translation::RetryAttempts::get_set() {
            self.retry_attempts = attempts as u32;
        }

        if let Some(Ok(debounce)) = translation::DebounceMs::get_set() {
            self.debounce_ms = debounce.as_millis() as u64;
        }

        if let Some(result) = cache::BucketCapacity::get_set() {
            match result {
                Ok(capacity) => self.bucket_capacity = capacity,
                Err(e) => tracing::warn!("忽略环境变量: {}", e),
            }
        }

        if let Some(Ok(ttl)) = cache::Ttl::get_set() {
            self.cache_ttl_secs = ttl.as_secs();
        }

        if let Some(Ok(path)) = cache::StorePath::get_set() {
            self.store_path = Some(path);
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn warm_cooldown(&self) -> Duration {
        Duration::from_secs(self.warm_cooldown_secs)
    }

    pub fn request_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.request_cache_ttl_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_jitter(&self) -> Duration {
        Duration::from_millis(self.retry_max_jitter_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// 简化的配置管理器
pub struct ConfigManager {
    config: PipelineConfig,
}

impl ConfigManager {
    /// 创建新的配置管理器
    pub fn new() -> TranslationResult<Self> {
        let mut config = Self::load_config()?;
        config.apply_env_overrides();
        config.validate()?;

        Ok(Self { config })
    }

    /// 从指定文件创建，仍然应用环境变量覆盖
    pub fn from_file(path: &str) -> TranslationResult<Self> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;

        Ok(Self { config })
    }

    /// 获取配置
    pub fn get_config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 从搜索路径加载配置
    fn load_config() -> TranslationResult<PipelineConfig> {
        // 首先尝试加载 .env 文件
        Self::load_dotenv();

        for path in constants::CONFIG_PATHS {
            let expanded_path = shellexpand::tilde(path);
            if Path::new(expanded_path.as_ref()).exists() {
                tracing::info!("加载配置文件: {}", expanded_path);
                return Self::load_from_file(&expanded_path);
            }
        }

        tracing::info!("未找到配置文件，使用默认配置");
        Ok(PipelineConfig::default())
    }

    /// 从指定文件加载配置
    fn load_from_file(path: &str) -> TranslationResult<PipelineConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TranslationError::ConfigError(format!("读取配置文件失败: {}", e)))?;

        if path.ends_with(".toml") {
            toml::from_str(&content)
                .map_err(|e| TranslationError::ConfigError(format!("解析TOML配置失败: {}", e)))
        } else {
            serde_json::from_str(&content)
                .map_err(|e| TranslationError::ConfigError(format!("解析JSON配置失败: {}", e)))
        }
    }

    /// 加载 .env 文件
    fn load_dotenv() {
        let env_files = [".env.local", ".env"];

        for env_file in &env_files {
            if Path::new(env_file).exists() && dotenv::from_filename(env_file).is_ok() {
                tracing::info!("已加载环境变量文件: {}", env_file);
                break;
            }
        }
    }

    /// 生成示例配置文件
    pub fn generate_example_config(path: &str) -> TranslationResult<()> {
        let config = PipelineConfig::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| TranslationError::ConfigError(format!("序列化配置失败: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| TranslationError::ConfigError(format!("写入配置文件失败: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.bucket_capacity, 1000);
        assert_eq!(config.cache_ttl(), Duration::from_secs(86400));
        assert_eq!(config.debounce(), Duration::from_millis(300));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: PipelineConfig = toml::from_str(
            r##"
            source_lang = "de"
            batch_size = 8
            exclusions = [".legal", "#cookie-banner"]
            "##,
        )
        .unwrap();
        assert_eq!(config.source_lang, "de");
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.exclusions.len(), 2);
        assert_eq!(config.warm_limit, 500);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.eviction_fraction = 0.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.api_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_config_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site-translator.toml");
        let path = path.to_str().unwrap();

        ConfigManager::generate_example_config(path).unwrap();
        let manager = ConfigManager::from_file(path).unwrap();
        assert_eq!(manager.get_config().translate_function, "translate");
    }
}
