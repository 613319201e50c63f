//! 翻译服务
//!
//! 由应用的组装入口显式构造，持有缓存、请求客户端、远程预热器和编排器，
//! 再把它们以引用的方式交给扫描、编排和语言切换使用。

use std::rc::Rc;

use markup5ever_rcdom::Handle;

use crate::translation::client::{FunctionInvoker, RequestClient};
use crate::translation::config::PipelineConfig;
use crate::translation::core::LanguageSwitcher;
use crate::translation::error::TranslationResult;
use crate::translation::pipeline::Orchestrator;
use crate::translation::storage::{
    open_local_store, CacheConfig, CacheStats, RemoteCacheLoader, RemoteStore, TranslationCache,
};

/// 翻译服务
pub struct TranslationService {
    config: PipelineConfig,
    cache: Rc<TranslationCache>,
    client: Rc<RequestClient>,
    loader: Option<Rc<RemoteCacheLoader>>,
    orchestrator: Rc<Orchestrator>,
}

impl TranslationService {
    /// 用给定的后端组装服务
    ///
    /// 本地存储按 `store_path` 打开；打开失败时退化为纯内存缓存。
    pub fn new(
        config: PipelineConfig,
        invoker: Rc<dyn FunctionInvoker>,
        remote: Option<Rc<dyn RemoteStore>>,
    ) -> TranslationResult<Self> {
        config.validate()?;

        let cache_config = CacheConfig::from(&config);
        let cache = match open_local_store(config.store_path.as_deref()) {
            Ok(store) => TranslationCache::with_store(cache_config, store),
            Err(e) => {
                tracing::warn!("本地缓存存储不可用，仅使用内存缓存: {}", e);
                TranslationCache::new(cache_config)
            }
        };
        let cache = Rc::new(cache);

        let client = Rc::new(RequestClient::new(invoker, &config));
        let loader = remote.map(|remote| {
            Rc::new(RemoteCacheLoader::with_limits(
                remote,
                Rc::clone(&cache),
                config.warm_cooldown(),
                config.warm_limit,
            ))
        });

        let mut orchestrator = Orchestrator::new(&config, Rc::clone(&cache), Rc::clone(&client));
        if let Some(loader) = &loader {
            orchestrator = orchestrator.with_remote(Rc::clone(loader));
        }

        tracing::info!(
            "翻译服务就绪: 源语言 {}，批次 {}，远程缓存 {}",
            config.source_lang,
            config.batch_size,
            if loader.is_some() { "启用" } else { "未启用" }
        );

        Ok(Self {
            config,
            cache,
            client,
            loader,
            orchestrator: Rc::new(orchestrator),
        })
    }

    /// 按配置使用 HTTP 后端
    #[cfg(feature = "http")]
    pub fn from_config(config: PipelineConfig) -> TranslationResult<Self> {
        use crate::translation::client::HttpInvoker;
        use crate::translation::storage::HttpRemoteStore;

        let invoker: Rc<dyn FunctionInvoker> = Rc::new(HttpInvoker::from_config(&config)?);
        let remote: Option<Rc<dyn RemoteStore>> = match &config.remote_url {
            Some(url) => Some(Rc::new(HttpRemoteStore::new(
                url,
                &config.remote_table,
                config.api_key.clone(),
            )?)),
            None => None,
        };

        Self::new(config, invoker, remote)
    }

    /// 为某个文档创建语言切换协调器
    pub fn switcher(&self, root: Handle) -> Rc<LanguageSwitcher> {
        LanguageSwitcher::new(Rc::clone(&self.orchestrator), root, &self.config)
    }

    /// 在当前 `LocalSet` 上后台预热目标语言
    pub fn prefetch(&self, target_lang: &str) {
        if let Some(loader) = &self.loader {
            loader.warm_detached(target_lang);
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Rc<TranslationCache> {
        &self.cache
    }

    pub fn client(&self) -> &Rc<RequestClient> {
        &self.client
    }

    pub fn orchestrator(&self) -> &Rc<Orchestrator> {
        &self.orchestrator
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
