// 集成测试公共模块
//
// 提供桩翻译函数、桩远端存储、HTML 样例和组装辅助

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use markup5ever_rcdom::{Handle, RcDom};
use serde_json::{json, Value};

use site_translator::html::{find_nodes, serialize_node};
use site_translator::translation::client::FunctionInvoker;
use site_translator::translation::storage::{RemoteStore, RemoteTranslation};
use site_translator::translation::{PipelineConfig, TranslationError, TranslationResult, TranslationService};

/// 样例文档
pub mod fixtures {
    pub const WELCOME: &str = "<h1>Welcome</h1><button>Sign Up</button>";

    pub const LANDING: &str = r#"<!DOCTYPE html>
<html>
<head><title>Landing</title></head>
<body>
  <nav><a href="/">Home page</a><a href="/pricing">Pricing plans</a></nav>
  <section class="hero">
    <h1>Build faster websites</h1>
    <button title="Start your free trial">Get started</button>
  </section>
  <p>Read more</p>
  <p>Read more</p>
  <img src="team.png" alt="Our team at work">
  <footer class="site-footer"><span>All rights reserved</span></footer>
</body>
</html>"#;
}

/// 按 (原文, 目标语言) 查表的桩翻译函数
pub struct StubInvoker {
    dict: RefCell<HashMap<(String, String), String>>,
    pub calls: Cell<usize>,
    pub requested: RefCell<Vec<(String, String)>>,
    pub delay: Cell<Duration>,
    pub failing: Cell<bool>,
}

impl StubInvoker {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            dict: RefCell::new(HashMap::new()),
            calls: Cell::new(0),
            requested: RefCell::new(Vec::new()),
            delay: Cell::new(Duration::ZERO),
            failing: Cell::new(false),
        })
    }

    pub fn with(self: Rc<Self>, lang: &str, pairs: &[(&str, &str)]) -> Rc<Self> {
        {
            let mut dict = self.dict.borrow_mut();
            for (original, translated) in pairs {
                dict.insert((original.to_string(), lang.to_string()), translated.to_string());
            }
        }
        self
    }

    /// 请求过的目标语言（按调用顺序）
    pub fn requested_langs(&self) -> Vec<String> {
        self.requested.borrow().iter().map(|(_, lang)| lang.clone()).collect()
    }
}

impl FunctionInvoker for StubInvoker {
    fn invoke<'a>(&'a self, _endpoint: &'a str, body: &'a Value) -> LocalBoxFuture<'a, TranslationResult<Value>> {
        Box::pin(async move {
            let text = body["text"].as_str().unwrap_or_default().to_string();
            let lang = body["targetLang"].as_str().unwrap_or_default().to_string();
            self.calls.set(self.calls.get() + 1);
            self.requested.borrow_mut().push((text.clone(), lang.clone()));

            let delay = self.delay.get();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.failing.get() {
                return Err(TranslationError::NetworkError("provider unavailable".into()));
            }

            let translated = self.dict.borrow().get(&(text, lang)).cloned().unwrap_or_default();
            Ok(json!({ "translatedText": translated }))
        })
    }
}

/// 内存中的远端存储
pub struct StubRemote {
    rows: RefCell<HashMap<String, Vec<RemoteTranslation>>>,
    pub upserts: RefCell<Vec<(String, String, String)>>,
    pub list_calls: Cell<usize>,
    pub failing: Cell<bool>,
}

impl StubRemote {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            rows: RefCell::new(HashMap::new()),
            upserts: RefCell::new(Vec::new()),
            list_calls: Cell::new(0),
            failing: Cell::new(false),
        })
    }

    pub fn with(self: Rc<Self>, lang: &str, pairs: &[(&str, &str)]) -> Rc<Self> {
        self.rows.borrow_mut().entry(lang.to_string()).or_default().extend(
            pairs.iter().map(|(original, translated)| RemoteTranslation {
                original: original.to_string(),
                translated: translated.to_string(),
            }),
        );
        self
    }
}

impl RemoteStore for StubRemote {
    fn list<'a>(
        &'a self,
        target_language: &'a str,
        limit: usize,
        _order_by_recency: bool,
    ) -> LocalBoxFuture<'a, TranslationResult<Vec<RemoteTranslation>>> {
        Box::pin(async move {
            self.list_calls.set(self.list_calls.get() + 1);
            if self.failing.get() {
                return Err(TranslationError::StorageError("remote down".into()));
            }
            Ok(self
                .rows
                .borrow()
                .get(target_language)
                .map(|rows| rows.iter().take(limit).cloned().collect())
                .unwrap_or_default())
        })
    }

    fn upsert<'a>(
        &'a self,
        original: &'a str,
        translated: &'a str,
        target_language: &'a str,
    ) -> LocalBoxFuture<'a, TranslationResult<()>> {
        Box::pin(async move {
            if self.failing.get() {
                return Err(TranslationError::StorageError("remote down".into()));
            }
            self.upserts.borrow_mut().push((
                original.to_string(),
                translated.to_string(),
                target_language.to_string(),
            ));
            Ok(())
        })
    }
}

/// 测试用配置：重试快速、无抖动
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        retry_base_delay_ms: 10,
        retry_max_jitter_ms: 0,
        ..PipelineConfig::default()
    }
}

pub fn service(invoker: &Rc<StubInvoker>) -> TranslationService {
    service_with(test_config(), invoker, None)
}

pub fn service_with(
    config: PipelineConfig,
    invoker: &Rc<StubInvoker>,
    remote: Option<&Rc<StubRemote>>,
) -> TranslationService {
    let remote = remote.map(|remote| Rc::clone(remote) as Rc<dyn RemoteStore>);
    TranslationService::new(config, Rc::clone(invoker) as Rc<dyn FunctionInvoker>, remote)
        .expect("service should build")
}

pub fn body(dom: &RcDom) -> Handle {
    find_nodes(&dom.document, &["html", "body"]).remove(0)
}

/// `<body>` 的序列化结果
pub fn body_html(dom: &RcDom) -> String {
    serialize_node(&body(dom))
}

/// 让 `spawn_local` 派发的后台任务跑完
pub async fn settle_background() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
