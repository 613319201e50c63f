//! 请求客户端
//!
//! 同一身份的并发请求共享一个进行中的调用，成功结果按短 TTL 缓存，
//! 网络调用经过 [`with_retry`] 做指数退避重试。

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{join_all, LocalBoxFuture, Shared};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::provider::FunctionInvoker;
use super::retry::{with_retry, RetryPolicy};
use crate::translation::config::{constants, PipelineConfig};
use crate::translation::error::{TranslationError, TranslationResult};

/// 单条翻译请求
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>, source_lang: &str, target_lang: &str) -> Self {
        Self {
            text: text.into(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// `text|sourceLang|targetLang|context`
    pub fn identity_key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.text,
            self.source_lang,
            self.target_lang,
            self.context.as_deref().unwrap_or_default()
        )
    }

    /// 发送给翻译函数的请求体
    pub fn to_body(&self) -> Value {
        json!({
            "text": self.text,
            "sourceLang": self.source_lang,
            "targetLang": self.target_lang,
            "context": self.context,
        })
    }
}

/// 单条翻译结果
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationOutcome {
    pub translated_text: String,
    pub confidence: Option<f64>,
    /// 是否来自请求结果缓存
    pub cached: bool,
    pub duration: Duration,
}

/// `invoke` 的选项
#[derive(Debug, Clone, Copy)]
pub struct InvokeOptions {
    pub ttl: Duration,
    pub skip_cache: bool,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            ttl: constants::REQUEST_CACHE_TTL,
            skip_cache: false,
        }
    }
}

/// `invoke` 的返回值
#[derive(Debug, Clone)]
pub struct InvokeResponse {
    pub value: Value,
    pub cached: bool,
    pub duration: Duration,
}

type SharedCall = Shared<LocalBoxFuture<'static, TranslationResult<Value>>>;

/// 等待进行中调用的一方
///
/// 最后一个等待者在调用完成前被丢弃时，调用随之作废，标记也要一并移除，
/// 否则后续相同请求会加入一个永远不会被驱动的调用。
struct InFlightWait {
    key: String,
    call: SharedCall,
    state: Rc<RefCell<ClientState>>,
}

impl Future for InFlightWait {
    type Output = TranslationResult<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.call.poll_unpin(cx)
    }
}

impl Drop for InFlightWait {
    fn drop(&mut self) {
        // 已完成时 strong_count 为 None；2 表示只剩映射表里的那一份
        if self.call.strong_count() != Some(2) {
            return;
        }
        let Ok(mut state) = self.state.try_borrow_mut() else {
            return;
        };
        if state
            .in_flight
            .get(&self.key)
            .is_some_and(|existing| existing.ptr_eq(&self.call))
        {
            state.in_flight.remove(&self.key);
            debug!("进行中的请求已无人等待，移除标记: {}", &self.key[..12.min(self.key.len())]);
        }
    }
}

struct CachedValue {
    value: Value,
    expires_at: Instant,
}

#[derive(Default)]
struct ClientState {
    results: HashMap<String, CachedValue>,
    in_flight: HashMap<String, SharedCall>,
    network_calls: usize,
}

/// 去重、缓存、重试的函数调用客户端
pub struct RequestClient {
    invoker: Rc<dyn FunctionInvoker>,
    retry: RetryPolicy,
    function: String,
    default_ttl: Duration,
    state: Rc<RefCell<ClientState>>,
}

impl RequestClient {
    pub fn new(invoker: Rc<dyn FunctionInvoker>, config: &PipelineConfig) -> Self {
        Self {
            invoker,
            retry: RetryPolicy::from(config),
            function: config.translate_function.clone(),
            default_ttl: config.request_cache_ttl(),
            state: Rc::new(RefCell::new(ClientState::default())),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 调用后端函数
    ///
    /// 命中未过期的结果缓存时不经过任何挂起点直接返回。
    pub async fn invoke(
        &self,
        endpoint: &str,
        body: &Value,
        options: InvokeOptions,
    ) -> TranslationResult<InvokeResponse> {
        let started = Instant::now();
        let key = identity_key(endpoint, body);

        if !options.skip_cache {
            if let Some(value) = self.cached_value(&key) {
                return Ok(InvokeResponse {
                    value,
                    cached: true,
                    duration: started.elapsed(),
                });
            }
        }

        let call = self.join_or_start(key.clone(), endpoint, body, options.ttl);
        let value = InFlightWait {
            key,
            call,
            state: Rc::clone(&self.state),
        }
        .await?;

        Ok(InvokeResponse {
            value,
            cached: false,
            duration: started.elapsed(),
        })
    }

    /// 并发调用多个请求，每个请求各自得到结果
    pub async fn batch_invoke(
        &self,
        calls: &[(String, Value)],
        options: InvokeOptions,
    ) -> Vec<TranslationResult<InvokeResponse>> {
        join_all(
            calls
                .iter()
                .map(|(endpoint, body)| self.invoke(endpoint, body, options)),
        )
        .await
    }

    /// 翻译单条文本
    pub async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> TranslationResult<TranslationOutcome> {
        let body = request.to_body();
        let options = InvokeOptions {
            ttl: self.default_ttl,
            skip_cache: false,
        };
        let response = self.invoke(&self.function, &body, options).await?;
        let (translated_text, confidence) = parse_translation(&response.value)?;

        Ok(TranslationOutcome {
            translated_text,
            confidence,
            cached: response.cached,
            duration: response.duration,
        })
    }

    /// 并发翻译一批文本，单条失败不影响其余
    pub async fn translate_batch(
        &self,
        requests: &[TranslationRequest],
    ) -> Vec<TranslationResult<TranslationOutcome>> {
        join_all(requests.iter().map(|request| self.translate(request))).await
    }

    /// 实际发出的网络调用次数（含重试）
    pub fn network_calls(&self) -> usize {
        self.state.borrow().network_calls
    }

    pub fn in_flight(&self) -> usize {
        self.state.borrow().in_flight.len()
    }

    /// 结果缓存中的条目数（含尚未清理的过期条目）
    pub fn cached_results(&self) -> usize {
        self.state.borrow().results.len()
    }

    pub fn clear_cache(&self) {
        self.state.borrow_mut().results.clear();
    }

    fn cached_value(&self, key: &str) -> Option<Value> {
        let mut state = self.state.borrow_mut();
        match state.results.get(key) {
            Some(cached) if cached.expires_at > Instant::now() => Some(cached.value.clone()),
            Some(_) => {
                state.results.remove(key);
                None
            }
            None => None,
        }
    }

    fn join_or_start(&self, key: String, endpoint: &str, body: &Value, ttl: Duration) -> SharedCall {
        if let Some(existing) = self.state.borrow().in_flight.get(&key) {
            debug!("复用进行中的请求: {}", &key[..12.min(key.len())]);
            return existing.clone();
        }

        let invoker = Rc::clone(&self.invoker);
        let state = Rc::clone(&self.state);
        let retry = self.retry.clone();
        let endpoint = endpoint.to_string();
        let body = body.clone();
        let marker = key.clone();

        let call: LocalBoxFuture<'static, TranslationResult<Value>> = Box::pin(async move {
            let invoker_ref: &dyn FunctionInvoker = &*invoker;
            let state_ref: &RefCell<ClientState> = &state;
            let endpoint_ref: &str = &endpoint;
            let body_ref: &Value = &body;

            let result = with_retry(&retry, endpoint_ref, move || {
                state_ref.borrow_mut().network_calls += 1;
                metrics::counter!("site_translator_provider_calls_total").increment(1);
                invoker_ref.invoke(endpoint_ref, body_ref)
            })
            .await;

            let mut state = state_ref.borrow_mut();
            state.in_flight.remove(&marker);
            match &result {
                Ok(value) => {
                    let now = Instant::now();
                    state.results.retain(|_, cached| cached.expires_at > now);
                    state.results.insert(
                        marker,
                        CachedValue {
                            value: value.clone(),
                            expires_at: now + ttl,
                        },
                    );
                }
                Err(e) => warn!("函数 {} 调用失败: {}", endpoint_ref, e),
            }
            result
        });

        let shared = call.shared();
        self.state
            .borrow_mut()
            .in_flight
            .insert(key, shared.clone());
        shared
    }
}

/// 请求身份：端点 + 规范化 JSON 请求体的 blake3 摘要
pub fn identity_key(endpoint: &str, body: &Value) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(endpoint.as_bytes());
    hasher.update(b"\0");
    // serde_json 默认按键排序，序列化结果是确定的
    hasher.update(body.to_string().as_bytes());
    hasher.finalize().to_hex().to_string()
}

fn parse_translation(value: &Value) -> TranslationResult<(String, Option<f64>)> {
    let translated = value
        .get("translatedText")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();

    if translated.is_empty() {
        return Err(TranslationError::ProviderContent(format!(
            "返回中没有可用的 translatedText: {}",
            value
        )));
    }

    let confidence = value.get("confidence").and_then(Value::as_f64);
    Ok((translated.to_string(), confidence))
}
