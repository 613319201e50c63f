//! 翻译周期编排
//!
//! 一个周期：扫描 → 分批 → 查缓存 → 未命中的批量请求 → 写缓存 → 写回文档。
//! 同一时间只运行一个周期，运行中收到的新请求合并为一个待执行周期（后到的覆盖先到的）。

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::LocalBoxFuture;
use markup5ever_rcdom::Handle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::queue::QueueState;
use super::scanner::{ContentScanner, DetectedItem, ScannerConfig, TranslationMark};
use crate::translation::client::{RequestClient, TranslationOutcome};
use crate::translation::config::PipelineConfig;
use crate::translation::core::intent::IntentGuard;
use crate::translation::error::{helpers, TranslationError, TranslationResult};
use crate::translation::storage::{RemoteCacheLoader, TranslationCache};

/// 周期所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Scanning,
    Batching,
    Translating,
    Applying,
    Error,
}

/// 进度事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub processed: usize,
    pub total: usize,
}

/// 一个周期的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub target_lang: String,
    pub detected: usize,
    pub cache_hits: usize,
    /// 新从翻译服务得到的译文条数
    pub translated: usize,
    pub applied: usize,
    pub skipped: usize,
    pub failed_batches: usize,
    /// 因节点已变化而未写回的条数
    pub stale: usize,
    /// 切回源语言时恢复的节点数
    pub restored: usize,
    pub duration: Duration,
}

type Observer = Box<dyn Fn(&ProgressEvent)>;
type Waiter = oneshot::Sender<TranslationResult<CycleReport>>;

struct PendingCycle {
    root: Handle,
    target_lang: String,
    guard: IntentGuard,
    waiters: Vec<Waiter>,
}

/// 已写回的修改，失败时用于撤销
struct AppliedChange {
    item: DetectedItem,
    written: String,
    previous: Option<TranslationMark>,
}

/// 翻译编排器
pub struct Orchestrator {
    scanner: ContentScanner,
    cache: Rc<TranslationCache>,
    client: Rc<RequestClient>,
    loader: Option<Rc<RemoteCacheLoader>>,
    source_lang: String,
    batch_size: usize,
    observers: RefCell<Vec<Observer>>,
    phase: Cell<Phase>,
    busy: Cell<bool>,
    pending: RefCell<Option<PendingCycle>>,
}

impl Orchestrator {
    pub fn new(config: &PipelineConfig, cache: Rc<TranslationCache>, client: Rc<RequestClient>) -> Self {
        Self {
            scanner: ContentScanner::new(ScannerConfig::from(config)),
            cache,
            client,
            loader: None,
            source_lang: config.source_lang.clone(),
            batch_size: config.batch_size.max(1),
            observers: RefCell::new(Vec::new()),
            phase: Cell::new(Phase::Idle),
            busy: Cell::new(false),
            pending: RefCell::new(None),
        }
    }

    /// 启用远程缓存预热与上游持久化
    ///
    /// 上游写入通过 `spawn_local` 派发，需要在 `LocalSet` 中运行。
    pub fn with_remote(mut self, loader: Rc<RemoteCacheLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// 注册进度监听
    pub fn on_progress<F>(&self, observer: F)
    where
        F: Fn(&ProgressEvent) + 'static,
    {
        self.observers.borrow_mut().push(Box::new(observer));
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    pub fn source_lang(&self) -> &str {
        &self.source_lang
    }

    pub fn scanner(&self) -> &ContentScanner {
        &self.scanner
    }

    pub fn cache(&self) -> &Rc<TranslationCache> {
        &self.cache
    }

    /// 不受意图约束地翻译一次
    pub async fn translate_document(&self, root: &Handle, target_lang: &str) -> TranslationResult<CycleReport> {
        self.run(root, target_lang, IntentGuard::detached()).await
    }

    /// 运行一个周期
    ///
    /// 已有周期在运行时，本次请求进入待执行槽位并等待其结果；
    /// 如果等待期间又被更新的请求覆盖，返回 `Superseded`。
    /// 守卫在请求进行中被取消时，未完成的请求转到 `spawn_local` 后台跑完，
    /// 因此可取消的守卫需要在 `LocalSet` 中使用。
    pub async fn run(&self, root: &Handle, target_lang: &str, guard: IntentGuard) -> TranslationResult<CycleReport> {
        if self.busy.get() {
            let (tx, rx) = oneshot::channel();
            self.defer(root, target_lang, guard, tx);
            debug!("已有翻译周期在运行，{} 的请求进入待执行", target_lang);
            return rx.await.unwrap_or(Err(TranslationError::Superseded));
        }

        self.busy.set(true);
        let result = self.run_cycle(root, target_lang, &guard).await;

        loop {
            let next = self.pending.borrow_mut().take();
            let Some(pending) = next else {
                break;
            };
            debug!("执行合并后的待执行周期: {}", pending.target_lang);
            let pending_result = self
                .run_cycle(&pending.root, &pending.target_lang, &pending.guard)
                .await;
            for waiter in pending.waiters {
                let _ = waiter.send(pending_result.clone());
            }
        }

        self.busy.set(false);
        result
    }

    fn defer(&self, root: &Handle, target_lang: &str, guard: IntentGuard, waiter: Waiter) {
        let mut pending = self.pending.borrow_mut();
        let mut waiters = Vec::new();

        if let Some(previous) = pending.take() {
            if previous.target_lang == target_lang && Rc::ptr_eq(&previous.root, root) {
                waiters = previous.waiters;
            } else {
                for waiter in previous.waiters {
                    let _ = waiter.send(Err(TranslationError::Superseded));
                }
            }
        }
        waiters.push(waiter);

        *pending = Some(PendingCycle {
            root: root.clone(),
            target_lang: target_lang.to_string(),
            guard,
            waiters,
        });
    }

    async fn run_cycle(&self, root: &Handle, target_lang: &str, guard: &IntentGuard) -> TranslationResult<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport {
            target_lang: target_lang.to_string(),
            ..CycleReport::default()
        };

        if !guard.should_continue() {
            return Err(TranslationError::Superseded);
        }

        if target_lang == self.source_lang {
            report.restored = self.scanner.marks().restore_originals();
            report.duration = started.elapsed();
            info!("切换回源语言 {}，恢复 {} 个节点", target_lang, report.restored);
            self.emit(Phase::Idle, report.restored, report.restored);
            return Ok(report);
        }

        self.emit(Phase::Scanning, 0, 0);
        if let Some(loader) = &self.loader {
            loader.warm(target_lang).await;
            if !guard.should_continue() {
                return self.discard(report, Vec::new());
            }
        }

        let items = self.scanner.scan_for_language(root, target_lang);
        report.detected = items.len();
        let total = items.len();

        let mut queue = QueueState::new();
        let mut applied: Vec<AppliedChange> = Vec::new();
        let mut processed = 0;

        for batch in items.chunks(self.batch_size) {
            self.emit(Phase::Batching, processed, total);

            let mut misses: Vec<(&DetectedItem, String)> = Vec::new();
            for item in batch {
                if let Some(translated) = self.cache.get(&item.text, target_lang) {
                    report.cache_hits += 1;
                    self.apply_item(item, &translated, target_lang, &mut applied, &mut report);
                    continue;
                }
                let request = item.to_request(&self.source_lang, target_lang);
                let key = request.identity_key();
                if let Some(translated) = queue.completed(&key).map(str::to_string) {
                    self.apply_item(item, &translated, target_lang, &mut applied, &mut report);
                    continue;
                }
                queue.enqueue(request);
                misses.push((item, key));
            }

            let requests = queue.take_batch(usize::MAX);
            let mut batch_failed = false;

            if !requests.is_empty() {
                self.emit(Phase::Translating, processed, total);
                debug!("请求翻译 {} 条（{} → {}）", requests.len(), self.source_lang, target_lang);

                let client = Rc::clone(&self.client);
                let owned = requests.clone();
                let mut call: LocalBoxFuture<'static, Vec<TranslationResult<TranslationOutcome>>> =
                    Box::pin(async move { client.translate_batch(&owned).await });

                let finished = tokio::select! {
                    results = &mut call => Some(results),
                    _ = guard.token().cancelled() => None,
                };
                // 取消只是不再等待；请求在后台跑完，结果留在客户端的结果缓存里
                let Some(results) = finished else {
                    tokio::task::spawn_local(call);
                    return self.discard(report, applied);
                };
                if !guard.should_continue() {
                    return self.discard(report, applied);
                }

                let mut new_pairs = Vec::new();
                let mut hard_failures = 0;
                for (request, result) in requests.iter().zip(results) {
                    let key = request.identity_key();
                    match result {
                        Ok(outcome) => {
                            self.cache.put(&request.text, &outcome.translated_text, target_lang);
                            new_pairs.push((request.text.clone(), outcome.translated_text.clone()));
                            queue.complete(&key, outcome.translated_text);
                            report.translated += 1;
                        }
                        Err(e) => {
                            if !matches!(e, TranslationError::ProviderContent(_)) {
                                hard_failures += 1;
                            }
                            helpers::log_error(
                                &e,
                                format_args!("翻译失败，保留原文 '{}'", preview(&request.text)),
                            );
                            queue.fail(&key);
                        }
                    }
                }
                // 只有空译文的批次不算失败，那些文本按未命中处理
                batch_failed = new_pairs.is_empty() && hard_failures > 0;

                if let Some(loader) = self.loader.as_ref().filter(|_| !new_pairs.is_empty()) {
                    loader.persist_detached(new_pairs, target_lang);
                }
            }

            for (item, key) in misses {
                match queue.completed(&key).map(str::to_string) {
                    Some(translated) => {
                        self.apply_item(item, &translated, target_lang, &mut applied, &mut report)
                    }
                    None => report.skipped += 1,
                }
            }

            processed += batch.len();
            if batch_failed {
                report.failed_batches += 1;
                self.emit(Phase::Error, processed, total);
            } else {
                self.emit(Phase::Applying, processed, total);
            }
        }

        report.duration = started.elapsed();

        if report.failed_batches > 0 && report.applied == 0 {
            warn!(
                "翻译到 {} 失败：{} 个批次请求失败，没有任何文本可写回",
                target_lang, report.failed_batches
            );
            self.emit(Phase::Error, processed, total);
            return Err(TranslationError::BatchProcessingError(format!(
                "翻译到 {} 的 {} 个批次失败，没有写回任何文本",
                target_lang, report.failed_batches
            )));
        }

        info!(
            "翻译周期完成 [{}]: 检测 {}，缓存命中 {}，新翻译 {}，写回 {}，跳过 {}，耗时 {:?}",
            target_lang,
            report.detected,
            report.cache_hits,
            report.translated,
            report.applied,
            report.skipped,
            report.duration
        );
        self.emit(Phase::Idle, processed, total);
        Ok(report)
    }

    fn apply_item(
        &self,
        item: &DetectedItem,
        translated: &str,
        target_lang: &str,
        applied: &mut Vec<AppliedChange>,
        report: &mut CycleReport,
    ) {
        let Some(node) = item.node() else {
            report.stale += 1;
            return;
        };
        let attribute = item.attribute.as_deref();
        let previous = self.scanner.marks().lookup(&node, attribute);

        match item.apply(translated) {
            Some(written) => {
                self.scanner
                    .marks()
                    .mark(&node, attribute, &item.captured, target_lang, &written);
                report.applied += 1;
                applied.push(AppliedChange {
                    item: item.clone(),
                    written,
                    previous,
                });
            }
            None => report.stale += 1,
        }
    }

    fn revert(&self, applied: Vec<AppliedChange>) -> usize {
        let mut reverted = 0;
        for change in applied.into_iter().rev() {
            if !change.item.revert(&change.written) {
                continue;
            }
            if let Some(node) = change.item.node() {
                self.scanner
                    .marks()
                    .reinstate(&node, change.item.attribute.as_deref(), change.previous);
            }
            reverted += 1;
        }
        reverted
    }

    /// 周期被取代：撤销本周期已写回的修改，交给更新的周期处理
    fn discard(&self, report: CycleReport, applied: Vec<AppliedChange>) -> TranslationResult<CycleReport> {
        let reverted = self.revert(applied);
        debug!(
            "翻译到 {} 的周期已被取代，丢弃结果并撤销 {} 处修改",
            report.target_lang, reverted
        );
        self.emit(Phase::Idle, 0, report.detected);
        Err(TranslationError::Superseded)
    }

    fn emit(&self, phase: Phase, processed: usize, total: usize) {
        self.phase.set(phase);
        let event = ProgressEvent {
            phase,
            processed,
            total,
        };
        for observer in self.observers.borrow().iter() {
            observer(&event);
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::{find_nodes, html_to_dom, serialize_node};
    use crate::translation::client::{FunctionInvoker, RetryPolicy};
    use futures::future::LocalBoxFuture;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    struct DictInvoker {
        dict: HashMap<&'static str, &'static str>,
        calls: Cell<usize>,
        fail_all: Cell<bool>,
        on_call: RefCell<Option<Box<dyn Fn(&str)>>>,
    }

    impl FunctionInvoker for DictInvoker {
        fn invoke<'a>(&'a self, _endpoint: &'a str, body: &'a Value) -> LocalBoxFuture<'a, TranslationResult<Value>> {
            Box::pin(async move {
                self.calls.set(self.calls.get() + 1);
                let text = body["text"].as_str().unwrap_or_default();
                if let Some(hook) = self.on_call.borrow().as_ref() {
                    hook(text);
                }
                if self.fail_all.get() {
                    return Err(TranslationError::InvalidInput("rejected".into()));
                }
                match self.dict.get(text) {
                    Some(translated) => Ok(json!({ "translatedText": translated })),
                    None => Ok(json!({ "translatedText": "" })),
                }
            })
        }
    }

    fn setup(pairs: &[(&'static str, &'static str)]) -> (Orchestrator, Rc<DictInvoker>) {
        let invoker = Rc::new(DictInvoker {
            dict: pairs.iter().copied().collect(),
            calls: Cell::new(0),
            fail_all: Cell::new(false),
            on_call: RefCell::new(None),
        });
        let config = PipelineConfig::default();
        let client = RequestClient::new(invoker.clone(), &config).with_retry_policy(RetryPolicy::none());
        let cache = Rc::new(TranslationCache::default());
        (Orchestrator::new(&config, cache, Rc::new(client)), invoker)
    }

    #[tokio::test]
    async fn test_batches_and_progress() {
        let (orchestrator, invoker) = setup(&[
            ("Item one", "Article un"),
            ("Item two", "Article deux"),
            ("Item three", "Article trois"),
            ("Item four", "Article quatre"),
            ("Item five", "Article cinq"),
            ("Item six", "Article six"),
        ]);
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        orchestrator.on_progress(move |event| sink.borrow_mut().push(*event));

        let dom = html_to_dom(
            "<ul><li>Item one</li><li>Item two</li><li>Item three</li><li>Item four</li><li>Item five</li><li>Item six</li></ul>",
        );
        let report = orchestrator.translate_document(&dom.document, "fr").await.unwrap();

        assert_eq!(report.detected, 6);
        assert_eq!(report.translated, 6);
        assert_eq!(report.applied, 6);
        assert_eq!(invoker.calls.get(), 6);

        let applying: Vec<(usize, usize)> = events
            .borrow()
            .iter()
            .filter(|e| e.phase == Phase::Applying)
            .map(|e| (e.processed, e.total))
            .collect();
        assert_eq!(applying, vec![(5, 6), (6, 6)]);
        assert_eq!(orchestrator.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_duplicate_texts_share_request() {
        let (orchestrator, invoker) = setup(&[("Read more", "Lire la suite")]);
        let dom = html_to_dom("<p>Read more</p><p>Read more</p><p>Read more</p>");

        let report = orchestrator.translate_document(&dom.document, "fr").await.unwrap();
        assert_eq!(report.applied, 3);
        assert_eq!(invoker.calls.get(), 1);
    }

    #[tokio::test]
    async fn test_provider_content_failure_leaves_original() {
        let (orchestrator, _invoker) = setup(&[("Welcome", "Bienvenue")]);
        let dom = html_to_dom("<h1>Welcome</h1><p>Untranslatable words</p>");

        let report = orchestrator.translate_document(&dom.document, "fr").await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.skipped, 1);

        let p = find_nodes(&dom.document, &["html", "body", "p"]).remove(0);
        assert_eq!(serialize_node(&p), "<p>Untranslatable words</p>");
    }

    #[tokio::test]
    async fn test_cache_hits_survive_empty_translations() {
        let (orchestrator, _invoker) = setup(&[]);
        orchestrator.cache().put("Welcome", "Bienvenue", "fr");
        orchestrator.cache().put("Sign Up", "S'inscrire", "fr");

        let dom = html_to_dom("<h1>Welcome</h1><button>Sign Up</button><p>Acme Widgets</p>");
        let report = orchestrator.translate_document(&dom.document, "fr").await.unwrap();

        assert_eq!(report.applied, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed_batches, 0);
        let body = find_nodes(&dom.document, &["html", "body"]).remove(0);
        assert_eq!(
            serialize_node(&body),
            "<body><h1>Bienvenue</h1><button>S'inscrire</button><p>Acme Widgets</p></body>"
        );
        assert_eq!(orchestrator.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_cache_hits_survive_provider_failure() {
        let (orchestrator, invoker) = setup(&[("Welcome", "Bienvenue")]);
        orchestrator.cache().put("Welcome", "Bienvenue", "fr");
        invoker.fail_all.set(true);

        let dom = html_to_dom("<h1>Welcome</h1><p>Something else</p>");
        let report = orchestrator.translate_document(&dom.document, "fr").await.unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.failed_batches, 1);
        let h1 = find_nodes(&dom.document, &["html", "body", "h1"]).remove(0);
        assert_eq!(serialize_node(&h1), "<h1>Bienvenue</h1>");
    }

    #[tokio::test]
    async fn test_nothing_applied_fails_cycle() {
        let (orchestrator, invoker) = setup(&[("Welcome", "Bienvenue")]);
        invoker.fail_all.set(true);

        let dom = html_to_dom("<h1>Welcome</h1><p>Something else</p>");
        let result = orchestrator.translate_document(&dom.document, "fr").await;
        assert!(matches!(result, Err(TranslationError::BatchProcessingError(_))));

        let h1 = find_nodes(&dom.document, &["html", "body", "h1"]).remove(0);
        assert_eq!(serialize_node(&h1), "<h1>Welcome</h1>");
        assert!(orchestrator.scanner().marks().is_empty());
        assert_eq!(orchestrator.phase(), Phase::Error);
    }

    #[tokio::test]
    async fn test_superseded_cycle_reverts_applied_batches() {
        let (orchestrator, invoker) = setup(&[
            ("Item one", "Article un"),
            ("Item two", "Article deux"),
            ("Item three", "Article trois"),
            ("Item four", "Article quatre"),
            ("Item five", "Article cinq"),
            ("Item six", "Article six"),
        ]);
        let html = "<ul><li>Item one</li><li>Item two</li><li>Item three</li><li>Item four</li><li>Item five</li><li>Item six</li></ul>";
        let dom = html_to_dom(html);
        let list = find_nodes(&dom.document, &["html", "body", "ul"]).remove(0);
        let original = serialize_node(&list);

        // 第二批请求进行中时出现新的切换
        let tracker = Rc::new(crate::translation::core::intent::IntentTracker::new());
        let guard = tracker.advance();
        let newer = Rc::clone(&tracker);
        *invoker.on_call.borrow_mut() = Some(Box::new(move |text: &str| {
            if text == "Item six" {
                newer.advance();
            }
        }));

        let result = orchestrator.run(&dom.document, "fr", guard).await;
        assert!(matches!(result, Err(TranslationError::Superseded)));
        assert_eq!(invoker.calls.get(), 6);
        assert_eq!(serialize_node(&list), original);
        assert!(orchestrator.scanner().marks().is_empty());
        assert!(!orchestrator.is_busy());
    }

    #[tokio::test]
    async fn test_switch_between_languages_and_back() {
        let (orchestrator, invoker) = setup(&[("Welcome", "Bienvenue")]);
        orchestrator.cache().put("Welcome", "Willkommen", "de");
        let dom = html_to_dom("<h1>Welcome</h1>");
        let h1 = find_nodes(&dom.document, &["html", "body", "h1"]).remove(0);

        orchestrator.translate_document(&dom.document, "fr").await.unwrap();
        assert_eq!(serialize_node(&h1), "<h1>Bienvenue</h1>");

        orchestrator.translate_document(&dom.document, "de").await.unwrap();
        assert_eq!(serialize_node(&h1), "<h1>Willkommen</h1>");

        let report = orchestrator.translate_document(&dom.document, "en").await.unwrap();
        assert_eq!(report.restored, 1);
        assert_eq!(serialize_node(&h1), "<h1>Welcome</h1>");
        assert_eq!(invoker.calls.get(), 1);
    }

    #[tokio::test]
    async fn test_stale_guard_discards_results() {
        let (orchestrator, _invoker) = setup(&[("Welcome", "Bienvenue")]);
        let dom = html_to_dom("<h1>Welcome</h1>");

        let tracker = crate::translation::core::intent::IntentTracker::new();
        let stale = tracker.advance();
        tracker.advance();

        let result = orchestrator.run(&dom.document, "fr", stale).await;
        assert!(matches!(result, Err(TranslationError::Superseded)));
        let h1 = find_nodes(&dom.document, &["html", "body", "h1"]).remove(0);
        assert_eq!(serialize_node(&h1), "<h1>Welcome</h1>");
    }
}
