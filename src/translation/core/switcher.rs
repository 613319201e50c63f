//! 语言切换协调器
//!
//! `switch_to` 立即更新对外显示的语言，真正的翻译工作防抖后在 `LocalSet` 上执行。
//! 新的切换会取消旧的意图：旧任务若还在防抖就直接退出，若结果晚到则被丢弃。
//! 失败时显示语言回退到最后一次确认的语言，文档保持原样。

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use markup5ever_rcdom::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::intent::{IntentGuard, IntentTracker};
use crate::translation::config::PipelineConfig;
use crate::translation::error::{helpers, TranslationError, TranslationResult};
use crate::translation::pipeline::{CycleReport, Orchestrator};

/// 两阶段语言状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageState {
    /// 乐观显示的语言
    pub displayed: String,
    /// 最后一次成功完成的语言
    pub confirmed: String,
}

pub struct LanguageSwitcher {
    orchestrator: Rc<Orchestrator>,
    root: Handle,
    state: RefCell<LanguageState>,
    intents: IntentTracker,
    debounce: Duration,
    shutdown: CancellationToken,
}

impl LanguageSwitcher {
    pub fn new(orchestrator: Rc<Orchestrator>, root: Handle, config: &PipelineConfig) -> Rc<Self> {
        let source = orchestrator.source_lang().to_string();
        Rc::new(Self {
            orchestrator,
            root,
            state: RefCell::new(LanguageState {
                displayed: source.clone(),
                confirmed: source,
            }),
            intents: IntentTracker::new(),
            debounce: config.debounce(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn displayed(&self) -> String {
        self.state.borrow().displayed.clone()
    }

    pub fn confirmed(&self) -> String {
        self.state.borrow().confirmed.clone()
    }

    pub fn state(&self) -> LanguageState {
        self.state.borrow().clone()
    }

    pub fn orchestrator(&self) -> &Rc<Orchestrator> {
        &self.orchestrator
    }

    /// 切换目标语言
    ///
    /// 返回的任务在被新的切换取代时以 `Superseded` 结束。
    pub fn switch_to(self: &Rc<Self>, language: &str) -> JoinHandle<TranslationResult<CycleReport>> {
        let language = language.trim().to_string();
        self.state.borrow_mut().displayed = language.clone();
        let guard = self.intents.advance();
        debug!("切换语言到 {}（第 {} 代）", language, guard.generation());

        let this = Rc::clone(self);
        tokio::task::spawn_local(async move {
            tokio::select! {
                _ = guard.token().cancelled() => {
                    debug!("语言切换 {} 在防抖期间被取代", language);
                    return Err(TranslationError::Superseded);
                }
                _ = tokio::time::sleep(this.debounce) => {}
            }

            let result = this
                .orchestrator
                .run(&this.root, &language, guard.clone())
                .await;
            this.settle(&language, &guard, result)
        })
    }

    /// DOM 变化后按已确认的语言补翻译新内容
    pub fn notify_mutation(self: &Rc<Self>) -> Option<JoinHandle<TranslationResult<CycleReport>>> {
        let language = self.refresh_target()?;
        let guard = self.intents.current();
        let this = Rc::clone(self);
        Some(tokio::task::spawn_local(async move {
            this.orchestrator.run(&this.root, &language, guard).await
        }))
    }

    /// 按固定间隔重新扫描已确认的语言，直到 [`shutdown`](Self::shutdown)
    pub fn spawn_sweep(self: &Rc<Self>, interval: Duration) -> JoinHandle<()> {
        let this = Rc::clone(self);
        tokio::task::spawn_local(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval 的第一次 tick 立即完成
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(language) = this.refresh_target() else {
                    continue;
                };
                let guard = this.intents.current();
                match this.orchestrator.run(&this.root, &language, guard).await {
                    Ok(report) if report.applied > 0 => {
                        debug!("定期扫描补翻译 {} 处 ({})", report.applied, language)
                    }
                    Ok(_) | Err(TranslationError::Superseded) => {}
                    Err(e) => helpers::log_error(&e, format_args!("定期扫描失败 ({})", language)),
                }
            }
            debug!("定期扫描已停止");
        })
    }

    /// 停止定期扫描并取消当前意图
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.intents.cancel();
    }

    /// 没有进行中的切换且已确认语言不是源语言时，返回需要补翻译的语言
    fn refresh_target(&self) -> Option<String> {
        let state = self.state.borrow();
        if state.displayed != state.confirmed || state.confirmed == self.orchestrator.source_lang() {
            return None;
        }
        Some(state.confirmed.clone())
    }

    fn settle(
        &self,
        language: &str,
        guard: &IntentGuard,
        result: TranslationResult<CycleReport>,
    ) -> TranslationResult<CycleReport> {
        if !guard.is_current() {
            debug!("丢弃已过期的语言切换结果: {}", language);
            return Err(TranslationError::Superseded);
        }

        let mut state = self.state.borrow_mut();
        match &result {
            Ok(report) => {
                state.confirmed = language.to_string();
                info!(
                    "语言切换完成: {}（写回 {}，恢复 {}）",
                    language, report.applied, report.restored
                );
            }
            Err(TranslationError::Superseded) => {}
            Err(e) => {
                warn!(
                    "语言切换到 {} 失败，回退到 {}: {}",
                    language, state.confirmed, e
                );
                state.displayed = state.confirmed.clone();
            }
        }
        result
    }
}
