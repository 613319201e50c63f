//! 错误处理集成测试
//!
//! 重试耗尽、译文无效、存储故障和远端故障都不应让整个管道崩溃

use std::rc::Rc;

use tokio::task::LocalSet;

use site_translator::html::html_to_dom;
use site_translator::translation::client::{RequestClient, TranslationRequest};
use site_translator::translation::error::{ErrorCategory, ErrorSeverity};
use site_translator::translation::storage::{CacheConfig, LocalStore, TranslationCache};
use site_translator::translation::{TranslationError, TranslationResult};

#[allow(dead_code)]
mod common {
    include!("common/mod.rs");
}

use common::{body_html, fixtures, service, service_with, settle_background, test_config, StubInvoker, StubRemote};

/// 所有操作都失败的本地存储
struct BrokenStore;

impl LocalStore for BrokenStore {
    fn load(&self, _key: &str) -> TranslationResult<Option<String>> {
        Err(TranslationError::StorageError("disk unavailable".into()))
    }

    fn save(&self, _key: &str, _blob: &str) -> TranslationResult<()> {
        Err(TranslationError::StorageError("disk full".into()))
    }

    fn remove(&self, _key: &str) -> TranslationResult<()> {
        Err(TranslationError::StorageError("disk unavailable".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhausted_reports_attempts() {
    let invoker = StubInvoker::new();
    invoker.failing.set(true);
    let client = RequestClient::new(invoker.clone(), &test_config());

    let err = client
        .translate(&TranslationRequest::new("Welcome", "en", "fr"))
        .await
        .unwrap_err();

    match &err {
        TranslationError::RetryExhausted { attempts, last } => {
            assert_eq!(*attempts, 3);
            assert!(matches!(**last, TranslationError::NetworkError(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(invoker.calls.get(), 3);
    assert_eq!(err.category(), ErrorCategory::Network);
    assert_eq!(err.severity(), ErrorSeverity::Error);
}

#[tokio::test]
async fn test_empty_translation_skips_only_that_item() {
    // 字典里没有 "Sign Up"，桩函数返回空译文
    let invoker = StubInvoker::new().with("fr", &[("Welcome", "Bienvenue")]);
    let service = service(&invoker);
    let dom = html_to_dom(fixtures::WELCOME);

    let report = service
        .orchestrator()
        .translate_document(&dom.document, "fr")
        .await
        .unwrap();

    assert_eq!(report.applied, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed_batches, 0);
    assert_eq!(invoker.calls.get(), 2);
    assert_eq!(body_html(&dom), "<body><h1>Bienvenue</h1><button>Sign Up</button></body>");
    assert!(!service.cache().contains("Sign Up", "fr"));
}

#[tokio::test(start_paused = true)]
async fn test_total_provider_failure_leaves_document_untouched() {
    let invoker = StubInvoker::new().with("fr", &[("Welcome", "Bienvenue"), ("Sign Up", "S'inscrire")]);
    invoker.failing.set(true);
    let service = service(&invoker);
    let dom = html_to_dom(fixtures::WELCOME);

    let err = service
        .orchestrator()
        .translate_document(&dom.document, "fr")
        .await
        .unwrap_err();

    assert!(matches!(err, TranslationError::BatchProcessingError(_)));
    assert_eq!(body_html(&dom), "<body><h1>Welcome</h1><button>Sign Up</button></body>");
    assert!(!service.orchestrator().is_busy());

    // 服务恢复后同一文档可以正常翻译
    invoker.failing.set(false);
    let report = service
        .orchestrator()
        .translate_document(&dom.document, "fr")
        .await
        .unwrap();
    assert_eq!(report.applied, 2);
}

#[test]
fn test_broken_local_store_falls_back_to_memory() {
    let cache = TranslationCache::with_store(CacheConfig::default(), Rc::new(BrokenStore));

    cache.put("Welcome", "Bienvenue", "fr");
    assert_eq!(cache.get("Welcome", "fr").as_deref(), Some("Bienvenue"));

    cache.clear();
    assert_eq!(cache.size(), 0);
}

#[test]
fn test_unusable_store_path_falls_back_to_memory() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();

    let mut config = test_config();
    config.store_path = Some(blocker.join("cache.redb").to_string_lossy().into_owned());
    let invoker = StubInvoker::new();
    let service = service_with(config, &invoker, None);

    service.cache().put("Welcome", "Bienvenue", "fr");
    assert_eq!(service.cache().get("Welcome", "fr").as_deref(), Some("Bienvenue"));
}

#[tokio::test(start_paused = true)]
async fn test_remote_failures_do_not_fail_the_cycle() {
    let invoker = StubInvoker::new().with("fr", &[("Welcome", "Bienvenue"), ("Sign Up", "S'inscrire")]);
    let remote = StubRemote::new();
    remote.failing.set(true);
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

            assert_eq!(report.applied, 2);
            assert!(remote.list_calls.get() >= 1);
            assert!(remote.upserts.borrow().is_empty());
            assert_eq!(service.cache().bucket_len("fr"), 2);
        })
        .await;
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = test_config();
    config.batch_size = 0;
    let invoker = StubInvoker::new();

    let result = site_translator::translation::TranslationService::new(
        config,
        invoker as Rc<dyn site_translator::translation::client::FunctionInvoker>,
        None,
    );
    match result {
        Err(err) => assert_eq!(err.category(), ErrorCategory::Configuration),
        Ok(_) => panic!("batch_size = 0 should be rejected"),
    }
}

#[test]
fn test_error_context_and_classification() {
    let err = TranslationError::StorageError("write failed".into()).with_context("cache.redb");
    assert!(err.to_string().contains("cache.redb"));
    assert_eq!(err.category(), ErrorCategory::Storage);
    assert!(!err.is_retryable());

    assert_eq!(TranslationError::Superseded.severity(), ErrorSeverity::Info);
    assert_eq!(TranslationError::Superseded.category(), ErrorCategory::Stale);
    assert!(TranslationError::RateLimitExceeded.is_retryable());
}
