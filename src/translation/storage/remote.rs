//! 远程缓存加载器
//!
//! 从远端持久化存储批量拉取某个目标语言的译文来预热本地缓存，
//! 并把新得到的译文异步写回远端。两者都只是性能优化，失败只记录日志。

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::cache::{CacheEntry, TranslationCache};
use crate::translation::config::constants;
use crate::translation::error::{helpers, TranslationResult};

/// 远端保存的一条译文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTranslation {
    pub original: String,
    pub translated: String,
}

/// 远端持久化存储（最终一致）
pub trait RemoteStore {
    /// 按目标语言列出译文，`order_by_recency` 为真时最新插入的在前
    fn list<'a>(
        &'a self,
        target_language: &'a str,
        limit: usize,
        order_by_recency: bool,
    ) -> LocalBoxFuture<'a, TranslationResult<Vec<RemoteTranslation>>>;

    fn upsert<'a>(
        &'a self,
        original: &'a str,
        translated: &'a str,
        target_language: &'a str,
    ) -> LocalBoxFuture<'a, TranslationResult<()>>;
}

/// 预热结果，仅用于日志和测试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmOutcome {
    /// 冷却期内或已有同语言预热在进行，直接丢弃
    Skipped,
    /// 成功，附带实际合并的条目数
    Merged(usize),
    /// 远端失败
    Failed,
}

/// 远程缓存加载器
pub struct RemoteCacheLoader {
    remote: Rc<dyn RemoteStore>,
    cache: Rc<TranslationCache>,
    cooldown: Duration,
    limit: usize,
    last_completed: RefCell<HashMap<String, Instant>>,
    in_flight: RefCell<HashSet<String>>,
}

impl RemoteCacheLoader {
    pub fn new(remote: Rc<dyn RemoteStore>, cache: Rc<TranslationCache>) -> Self {
        Self::with_limits(remote, cache, constants::WARM_COOLDOWN, constants::WARM_LIMIT)
    }

    pub fn with_limits(
        remote: Rc<dyn RemoteStore>,
        cache: Rc<TranslationCache>,
        cooldown: Duration,
        limit: usize,
    ) -> Self {
        Self {
            remote,
            cache,
            cooldown,
            limit,
            last_completed: RefCell::new(HashMap::new()),
            in_flight: RefCell::new(HashSet::new()),
        }
    }

    /// 预热指定语言
    ///
    /// 上一次同语言预热完成不足冷却时间时直接丢弃，不排队也不重试。
    pub async fn warm(&self, target_language: &str) -> WarmOutcome {
        if !self.try_begin(target_language) {
            tracing::debug!("跳过远程缓存预热: {}", target_language);
            return WarmOutcome::Skipped;
        }

        let result = self
            .remote
            .list(target_language, self.limit, true)
            .await;

        self.in_flight.borrow_mut().remove(target_language);
        self.last_completed
            .borrow_mut()
            .insert(target_language.to_string(), Instant::now());

        match result {
            Ok(rows) => {
                let entries: Vec<CacheEntry> = rows
                    .into_iter()
                    .take(self.limit)
                    .map(|row| CacheEntry::new(&row.original, &row.translated, target_language))
                    .collect();
                let fetched = entries.len();
                let merged = self.cache.merge_entries(entries);
                self.cache.record_fetch(target_language);
                tracing::info!(
                    "远程缓存预热完成: {} 拉取 {} 条，合并 {} 条",
                    target_language,
                    fetched,
                    merged
                );
                WarmOutcome::Merged(merged)
            }
            Err(e) => {
                helpers::log_error(&e, format_args!("远程缓存预热失败 ({})", target_language));
                WarmOutcome::Failed
            }
        }
    }

    /// 在当前 `LocalSet` 上后台预热，不等待结果
    pub fn warm_detached(self: &Rc<Self>, target_language: &str) {
        let loader = Rc::clone(self);
        let lang = target_language.to_string();
        tokio::task::spawn_local(async move {
            loader.warm(&lang).await;
        });
    }

    /// 在当前 `LocalSet` 上后台把新译文写回远端
    pub fn persist_detached(self: &Rc<Self>, pairs: Vec<(String, String)>, target_language: &str) {
        if pairs.is_empty() {
            return;
        }
        let loader = Rc::clone(self);
        let lang = target_language.to_string();
        tokio::task::spawn_local(async move {
            loader.persist(&pairs, &lang).await;
        });
    }

    /// 逐条写回远端，返回成功数
    pub async fn persist(&self, pairs: &[(String, String)], target_language: &str) -> usize {
        let mut written = 0;
        for (original, translated) in pairs {
            match self.remote.upsert(original, translated, target_language).await {
                Ok(()) => written += 1,
                Err(e) => helpers::log_error(&e, format_args!("写回远端译文失败 ({})", target_language)),
            }
        }
        tracing::debug!("写回远端 {}/{} 条译文 ({})", written, pairs.len(), target_language);
        written
    }

    fn try_begin(&self, target_language: &str) -> bool {
        if self.in_flight.borrow().contains(target_language) {
            return false;
        }

        let cooling = self
            .last_completed
            .borrow()
            .get(target_language)
            .map_or(false, |done| done.elapsed() < self.cooldown);
        if cooling {
            return false;
        }

        self.in_flight.borrow_mut().insert(target_language.to_string());
        true
    }
}

/// PostgREST 风格的 HTTP 远端存储
#[cfg(feature = "http")]
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: url::Url,
    table: String,
    api_key: Option<String>,
}

#[cfg(feature = "http")]
impl HttpRemoteStore {
    pub fn new(base_url: &str, table: &str, api_key: Option<String>) -> TranslationResult<Self> {
        let base_url = url::Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| {
                crate::translation::error::TranslationError::ConfigError(format!(
                    "无效的远端地址 {}: {}",
                    base_url, e
                ))
            })?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            table: table.to_string(),
            api_key,
        })
    }

    fn request(&self, method: reqwest::Method) -> TranslationResult<reqwest::RequestBuilder> {
        let url = self.base_url.join(&self.table).map_err(|e| {
            crate::translation::error::TranslationError::ConfigError(e.to_string())
        })?;
        let mut builder = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key).header("apikey", key);
        }
        Ok(builder)
    }
}

#[cfg(feature = "http")]
#[derive(Serialize)]
struct UpsertRow<'a> {
    original_text: &'a str,
    translated_text: &'a str,
    target_language: &'a str,
}

#[cfg(feature = "http")]
#[derive(Deserialize)]
struct ListRow {
    original_text: String,
    translated_text: String,
}

#[cfg(feature = "http")]
impl RemoteStore for HttpRemoteStore {
    fn list<'a>(
        &'a self,
        target_language: &'a str,
        limit: usize,
        order_by_recency: bool,
    ) -> LocalBoxFuture<'a, TranslationResult<Vec<RemoteTranslation>>> {
        Box::pin(async move {
            let mut query = vec![
                ("select", "original_text,translated_text".to_string()),
                ("target_language", format!("eq.{}", target_language)),
                ("limit", limit.to_string()),
            ];
            if order_by_recency {
                query.push(("order", "created_at.desc".to_string()));
            }

            let rows: Vec<ListRow> = self
                .request(reqwest::Method::GET)?
                .query(&query)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            Ok(rows
                .into_iter()
                .map(|row| RemoteTranslation {
                    original: row.original_text,
                    translated: row.translated_text,
                })
                .collect())
        })
    }

    fn upsert<'a>(
        &'a self,
        original: &'a str,
        translated: &'a str,
        target_language: &'a str,
    ) -> LocalBoxFuture<'a, TranslationResult<()>> {
        Box::pin(async move {
            self.request(reqwest::Method::POST)?
                .header("Prefer", "resolution=merge-duplicates")
                .json(&UpsertRow {
                    original_text: original,
                    translated_text: translated,
                    target_language,
                })
                .send()
                .await?
                .error_for_status()?;
            Ok(())
        })
    }
}
