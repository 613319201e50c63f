//! 翻译缓存模块
//!
//! 两级缓存：内存中按目标语言分桶，每次成功写入后同步镜像到本地持久化存储。
//! 条目以 `(原文.trim(), 目标语言)` 为键，超过 TTL 的条目在读取时惰性删除，
//! 桶满时按命中次数淘汰最低的一部分。

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::persist::LocalStore;
use crate::translation::config::constants;
use crate::translation::error::{TranslationError, TranslationResult};

// ============================================================================
// 核心类型
// ============================================================================

/// 缓存条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub original: String,
    pub translated: String,
    pub target_language: String,
    pub timestamp: DateTime<Utc>,
    pub hit_count: u64,
}

/// 缓存配置
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub bucket_capacity: usize,
    pub eviction_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: constants::CACHE_TTL,
            bucket_capacity: constants::BUCKET_CAPACITY,
            eviction_fraction: constants::EVICTION_FRACTION,
        }
    }
}

impl From<&crate::translation::config::PipelineConfig> for CacheConfig {
    fn from(config: &crate::translation::config::PipelineConfig) -> Self {
        Self {
            ttl: config.cache_ttl(),
            bucket_capacity: config.bucket_capacity,
            eviction_fraction: config.eviction_fraction,
        }
    }
}

/// 缓存统计信息（由计数器即时计算，不单独保存）
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub last_fetch_per_language: HashMap<String, DateTime<Utc>>,
}

/// 持久化格式
#[derive(Debug, Serialize, Deserialize)]
struct PersistedCache {
    version: String,
    saved_at: DateTime<Utc>,
    entries: Vec<CacheEntry>,
}

/// 翻译缓存
///
/// 单线程共享：通过 `Rc<TranslationCache>` 传给扫描器、编排器和远程预热器。
pub struct TranslationCache {
    buckets: RefCell<HashMap<String, HashMap<String, CacheEntry>>>,
    hits: Cell<u64>,
    misses: Cell<u64>,
    evictions: Cell<u64>,
    last_fetch: RefCell<HashMap<String, DateTime<Utc>>>,
    store: Option<Rc<dyn LocalStore>>,
    config: CacheConfig,
}

// ============================================================================
// 实现
// ============================================================================

impl CacheEntry {
    /// 创建新的缓存条目
    pub fn new(original: &str, translated: &str, target_language: &str) -> Self {
        Self {
            original: original.trim().to_string(),
            translated: translated.to_string(),
            target_language: target_language.to_string(),
            timestamp: Utc::now(),
            hit_count: 0,
        }
    }

    /// 检查条目是否过期
    pub fn is_expired(&self, ttl: Duration) -> bool {
        match (Utc::now() - self.timestamp).to_std() {
            Ok(age) => age > ttl,
            // 时间戳在未来，视为未过期
            Err(_) => false,
        }
    }
}

impl TranslationCache {
    /// 创建纯内存缓存
    pub fn new(config: CacheConfig) -> Self {
        Self {
            buckets: RefCell::new(HashMap::new()),
            hits: Cell::new(0),
            misses: Cell::new(0),
            evictions: Cell::new(0),
            last_fetch: RefCell::new(HashMap::new()),
            store: None,
            config,
        }
    }

    /// 创建带本地持久化的缓存，并立即从存储加载
    pub fn with_store(config: CacheConfig, store: Rc<dyn LocalStore>) -> Self {
        let mut cache = Self::new(config);
        cache.store = Some(store);
        let loaded = cache.load_from_store();
        tracing::info!("从本地存储加载了 {} 条翻译缓存", loaded);
        cache
    }

    /// 查询译文
    ///
    /// 命中时增加条目和全局的命中计数；过期条目被删除并计为未命中。
    pub fn get(&self, original: &str, target_language: &str) -> Option<String> {
        let key = original.trim();
        let mut buckets = self.buckets.borrow_mut();

        let Some(bucket) = buckets.get_mut(target_language) else {
            self.record_miss();
            return None;
        };

        let expired = match bucket.get_mut(key) {
            Some(entry) if !entry.is_expired(self.config.ttl) => {
                entry.hit_count += 1;
                self.hits.set(self.hits.get() + 1);
                metrics::counter!("translation_cache_hits").increment(1);
                return Some(entry.translated.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            bucket.remove(key);
            tracing::debug!("缓存条目已过期并删除: [{}] {}", target_language, key);
        }

        self.record_miss();
        None
    }

    /// 写入译文，随后同步持久化整个缓存
    pub fn put(&self, original: &str, translated: &str, target_language: &str) {
        let key = original.trim();
        if key.is_empty() {
            return;
        }

        {
            let mut buckets = self.buckets.borrow_mut();
            let bucket = buckets.entry(target_language.to_string()).or_default();

            if !bucket.contains_key(key) && bucket.len() >= self.config.bucket_capacity {
                let evicted = Self::evict_least_hit(bucket, self.config.eviction_fraction);
                self.evictions.set(self.evictions.get() + evicted as u64);
                metrics::counter!("translation_cache_evictions").increment(evicted as u64);
                tracing::debug!(
                    "语言桶 {} 已满，按命中次数淘汰 {} 条",
                    target_language,
                    evicted
                );
            }

            let mut entry = CacheEntry::new(key, translated, target_language);
            // 覆盖写入刷新译文和时间戳，命中次数只在淘汰时清零
            if let Some(existing) = bucket.get(key) {
                entry.hit_count = existing.hit_count;
            }
            bucket.insert(key.to_string(), entry);
        }

        self.persist();
    }

    /// 是否存在未过期的条目（不影响统计）
    pub fn contains(&self, original: &str, target_language: &str) -> bool {
        self.buckets
            .borrow()
            .get(target_language)
            .and_then(|bucket| bucket.get(original.trim()))
            .map_or(false, |entry| !entry.is_expired(self.config.ttl))
    }

    /// 合并外部条目，已存在的本地条目不会被覆盖
    ///
    /// 返回实际插入的数量；有插入时持久化一次。
    pub fn merge_entries(&self, entries: Vec<CacheEntry>) -> usize {
        let mut inserted = 0;

        {
            let mut buckets = self.buckets.borrow_mut();
            for mut entry in entries {
                entry.original = entry.original.trim().to_string();
                if entry.original.is_empty() || entry.is_expired(self.config.ttl) {
                    continue;
                }

                let bucket = buckets.entry(entry.target_language.clone()).or_default();
                if bucket.contains_key(&entry.original) {
                    continue;
                }

                if bucket.len() >= self.config.bucket_capacity {
                    let evicted = Self::evict_least_hit(bucket, self.config.eviction_fraction);
                    self.evictions.set(self.evictions.get() + evicted as u64);
                }

                bucket.insert(entry.original.clone(), entry);
                inserted += 1;
            }
        }

        if inserted > 0 {
            self.persist();
        }

        inserted
    }

    /// 清空缓存和统计，并删除本地持久化数据
    pub fn clear(&self) {
        self.buckets.borrow_mut().clear();
        self.hits.set(0);
        self.misses.set(0);
        self.evictions.set(0);
        self.last_fetch.borrow_mut().clear();

        if let Some(store) = &self.store {
            if let Err(e) = store.remove(constants::CACHE_FORMAT_VERSION) {
                tracing::warn!("清除本地缓存失败: {}", e);
            }
        }
    }

    /// 记录某语言最近一次远程拉取时间
    pub fn record_fetch(&self, target_language: &str) {
        self.last_fetch
            .borrow_mut()
            .insert(target_language.to_string(), Utc::now());
    }

    /// 获取统计信息
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.get();
        let misses = self.misses.get();
        let total = hits + misses;

        CacheStats {
            size: self.size(),
            hits,
            misses,
            evictions: self.evictions.get(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            last_fetch_per_language: self.last_fetch.borrow().clone(),
        }
    }

    /// 所有语言桶的条目总数
    pub fn size(&self) -> usize {
        self.buckets.borrow().values().map(HashMap::len).sum()
    }

    /// 单个语言桶的条目数
    pub fn bucket_len(&self, target_language: &str) -> usize {
        self.buckets
            .borrow()
            .get(target_language)
            .map_or(0, HashMap::len)
    }

    /// 读取条目快照（不影响统计）
    pub fn entry(&self, original: &str, target_language: &str) -> Option<CacheEntry> {
        self.buckets
            .borrow()
            .get(target_language)
            .and_then(|bucket| bucket.get(original.trim()))
            .cloned()
    }

    /// 淘汰命中次数最低的一部分条目，返回淘汰数量
    fn evict_least_hit(bucket: &mut HashMap<String, CacheEntry>, fraction: f64) -> usize {
        if bucket.is_empty() {
            return 0;
        }

        let count = ((bucket.len() as f64 * fraction).ceil() as usize).clamp(1, bucket.len());

        let mut ranked: Vec<(u64, DateTime<Utc>, String)> = bucket
            .values()
            .map(|entry| (entry.hit_count, entry.timestamp, entry.original.clone()))
            .collect();
        // 命中次数相同时先淘汰更旧的
        ranked.sort();

        for (_, _, key) in ranked.into_iter().take(count) {
            bucket.remove(&key);
        }

        count
    }

    fn record_miss(&self) {
        self.misses.set(self.misses.get() + 1);
        metrics::counter!("translation_cache_misses").increment(1);
    }

    /// 把整个缓存序列化写入本地存储，失败只记录日志
    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };

        if let Err(e) = self.write_snapshot(store.as_ref()) {
            tracing::warn!("持久化翻译缓存失败，继续使用内存缓存: {}", e);
        }
    }

    fn write_snapshot(&self, store: &dyn LocalStore) -> TranslationResult<()> {
        let entries: Vec<CacheEntry> = self
            .buckets
            .borrow()
            .values()
            .flat_map(|bucket| bucket.values().cloned())
            .collect();

        let blob = serde_json::to_string(&PersistedCache {
            version: constants::CACHE_FORMAT_VERSION.to_string(),
            saved_at: Utc::now(),
            entries,
        })?;

        store.save(constants::CACHE_FORMAT_VERSION, &blob)
    }

    /// 从本地存储加载，丢弃过期条目；版本不一致时整体丢弃
    fn load_from_store(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };

        let blob = match store.load(constants::CACHE_FORMAT_VERSION) {
            Ok(Some(blob)) => blob,
            Ok(None) => return 0,
            Err(e) => {
                tracing::warn!("读取本地缓存失败: {}", e);
                return 0;
            }
        };

        let persisted = match Self::decode(&blob) {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::warn!("本地缓存无法使用，已丢弃: {}", e);
                return 0;
            }
        };

        let mut buckets = self.buckets.borrow_mut();
        let mut loaded = 0;
        for entry in persisted.entries {
            if entry.is_expired(self.config.ttl) {
                continue;
            }
            buckets
                .entry(entry.target_language.clone())
                .or_default()
                .insert(entry.original.clone(), entry);
            loaded += 1;
        }

        loaded
    }

    fn decode(blob: &str) -> TranslationResult<PersistedCache> {
        let persisted: PersistedCache = serde_json::from_str(blob)?;
        if persisted.version != constants::CACHE_FORMAT_VERSION {
            return Err(TranslationError::StorageError(format!(
                "缓存格式版本不匹配: {} != {}",
                persisted.version,
                constants::CACHE_FORMAT_VERSION
            )));
        }
        Ok(persisted)
    }
}

impl Default for TranslationCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
