//! 缓存系统集成测试
//!
//! 容量淘汰、TTL、本地持久化和远程预热

use std::rc::Rc;
use std::time::Duration;

use tokio::task::LocalSet;

use site_translator::html::html_to_dom;
use site_translator::translation::config::constants;
use site_translator::translation::storage::{
    CacheConfig, FileStore, LocalStore, MemoryStore, RedbStore, RemoteCacheLoader, TranslationCache, WarmOutcome,
};

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use common::{body_html, fixtures, service_with, settle_background, test_config, StubInvoker, StubRemote};

fn small_cache(capacity: usize) -> TranslationCache {
    TranslationCache::new(CacheConfig {
        bucket_capacity: capacity,
        ..CacheConfig::default()
    })
}

#[test]
fn test_overflow_evicts_lowest_hit_fifth() {
    let cache = small_cache(10);
    for i in 0..10 {
        cache.put(&format!("text {}", i), &format!("texte {}", i), "fr");
    }
    // 除 text 0、text 1 外都被读过
    for i in 2..10 {
        for _ in 0..=i {
            cache.get(&format!("text {}", i), "fr");
        }
    }

    cache.put("text 10", "texte 10", "fr");

    assert!(cache.bucket_len("fr") <= 10);
    assert!(!cache.contains("text 0", "fr"));
    assert!(!cache.contains("text 1", "fr"));
    for i in 2..=10 {
        assert!(cache.contains(&format!("text {}", i), "fr"), "text {} should survive", i);
    }
    assert_eq!(cache.stats().evictions, 2);
}

#[test]
fn test_eviction_is_per_language() {
    let cache = small_cache(5);
    for i in 0..5 {
        cache.put(&format!("item {}", i), "de", "de");
    }
    for i in 0..6 {
        cache.put(&format!("item {}", i), "fr", "fr");
    }

    assert_eq!(cache.bucket_len("de"), 5);
    assert!(cache.bucket_len("fr") <= 5);
}

#[test]
fn test_aged_entry_is_a_miss_and_removed() {
    let cache = TranslationCache::new(CacheConfig {
        ttl: Duration::from_millis(5),
        ..CacheConfig::default()
    });
    cache.put("Welcome", "Bienvenue", "fr");
    std::thread::sleep(Duration::from_millis(20));

    assert_eq!(cache.get("Welcome", "fr"), None);
    assert_eq!(cache.size(), 0);
    assert_eq!(cache.stats().misses, 1);
}

#[test]
fn test_keys_are_trimmed_and_hits_counted() {
    let cache = TranslationCache::default();
    cache.put("  Welcome \n", "Bienvenue", "fr");

    assert_eq!(cache.get("Welcome", "fr").as_deref(), Some("Bienvenue"));
    assert_eq!(cache.get(" Welcome", "fr").as_deref(), Some("Bienvenue"));
    assert_eq!(cache.get("Welcome", "de"), None);

    assert_eq!(cache.entry("Welcome", "fr").unwrap().hit_count, 2);
    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses), (2, 1));
    assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
}

#[test]
fn test_cache_survives_restart_with_redb() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.redb");

    {
        let store: Rc<dyn LocalStore> = Rc::new(RedbStore::open(&path).unwrap());
        let cache = TranslationCache::with_store(CacheConfig::default(), store);
        cache.put("Welcome", "Bienvenue", "fr");
        cache.put("Sign Up", "S'inscrire", "fr");
    }

    let store: Rc<dyn LocalStore> = Rc::new(RedbStore::open(&path).unwrap());
    let cache = TranslationCache::with_store(CacheConfig::default(), store);
    assert_eq!(cache.size(), 2);
    assert_eq!(cache.get("Sign Up", "fr").as_deref(), Some("S'inscrire"));
}

#[test]
fn test_cache_survives_restart_with_files() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store: Rc<dyn LocalStore> = Rc::new(FileStore::new(dir.path()).unwrap());
        TranslationCache::with_store(CacheConfig::default(), store).put("Welcome", "Willkommen", "de");
    }

    let store: Rc<dyn LocalStore> = Rc::new(FileStore::new(dir.path()).unwrap());
    let cache = TranslationCache::with_store(CacheConfig::default(), store);
    assert_eq!(cache.get("Welcome", "de").as_deref(), Some("Willkommen"));
}

#[test]
fn test_foreign_format_version_is_discarded() {
    let store = Rc::new(MemoryStore::new());
    store
        .save(
            constants::CACHE_FORMAT_VERSION,
            r#"{"version":"site-translator-cache-v1","saved_at":"2024-01-01T00:00:00Z","entries":[]}"#,
        )
        .unwrap();

    let cache = TranslationCache::with_store(CacheConfig::default(), store.clone());
    assert_eq!(cache.size(), 0);
}

#[test]
fn test_clear_removes_persisted_blob() {
    let store = Rc::new(MemoryStore::new());
    let cache = TranslationCache::with_store(CacheConfig::default(), store.clone());
    cache.put("Welcome", "Bienvenue", "fr");
    assert!(store.contains(constants::CACHE_FORMAT_VERSION));

    cache.clear();
    assert_eq!(cache.size(), 0);
    assert!(!store.contains(constants::CACHE_FORMAT_VERSION));
}

#[tokio::test(start_paused = true)]
async fn test_warm_is_rate_limited_per_language() {
    let remote = StubRemote::new()
        .with("fr", &[("Welcome", "Bienvenue")])
        .with("de", &[("Welcome", "Willkommen")]);
    let cache = Rc::new(TranslationCache::default());
    let loader = RemoteCacheLoader::new(remote.clone(), Rc::clone(&cache));

    assert_eq!(loader.warm("fr").await, WarmOutcome::Merged(1));
    assert_eq!(loader.warm("fr").await, WarmOutcome::Skipped);
    assert_eq!(loader.warm("de").await, WarmOutcome::Merged(1));
    assert_eq!(remote.list_calls.get(), 2);

    tokio::time::advance(constants::WARM_COOLDOWN + Duration::from_secs(1)).await;
    assert_eq!(loader.warm("fr").await, WarmOutcome::Merged(0));
    assert_eq!(remote.list_calls.get(), 3);
    assert!(cache.stats().last_fetch_per_language.contains_key("fr"));
}

#[tokio::test(start_paused = true)]
async fn test_warm_never_overwrites_local_entries() {
    let remote = StubRemote::new().with("fr", &[("Welcome", "Salut"), ("Sign Up", "S'inscrire")]);
    let cache = Rc::new(TranslationCache::default());
    cache.put("Welcome", "Bienvenue", "fr");

    let loader = RemoteCacheLoader::new(remote, Rc::clone(&cache));
    assert_eq!(loader.warm("fr").await, WarmOutcome::Merged(1));
    assert_eq!(cache.get("Welcome", "fr").as_deref(), Some("Bienvenue"));
    assert_eq!(cache.get("Sign Up", "fr").as_deref(), Some("S'inscrire"));
}

#[tokio::test(start_paused = true)]
async fn test_warmed_cache_serves_cycle_and_new_pairs_go_upstream() {
    let invoker = StubInvoker::new().with("fr", &[("Sign Up", "S'inscrire")]);
    let remote = StubRemote::new().with("fr", &[("Welcome", "Bienvenue")]);
    let service = service_with(test_config(), &invoker, Some(&remote));
    let dom = html_to_dom(fixtures::WELCOME);

    LocalSet::new()
        .run_until(async {
            let report = service
                .orchestrator()
                .translate_document(&dom.document, "fr")
                .await
                .unwrap();
            settle_background().await;

            assert_eq!(report.cache_hits, 1);
            assert_eq!(report.translated, 1);
            assert_eq!(invoker.calls.get(), 1);
            assert_eq!(body_html(&dom), "<body><h1>Bienvenue</h1><button>S'inscrire</button></body>");

            let upserts = remote.upserts.borrow();
            assert_eq!(
                upserts.as_slice(),
                &[("Sign Up".to_string(), "S'inscrire".to_string(), "fr".to_string())]
            );
        })
        .await;
}

#[test]
fn test_service_uses_configured_store_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.store_path = Some(dir.path().join("cache.redb").to_string_lossy().into_owned());
    let invoker = StubInvoker::new();

    {
        let service = service_with(config.clone(), &invoker, None);
        service.cache().put("Welcome", "Bienvenue", "fr");
    }

    let service = service_with(config, &invoker, None);
    assert_eq!(service.stats().size, 1);
}
