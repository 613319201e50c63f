//! 最新意图跟踪
//!
//! 每次语言切换推进一代并取消上一代的令牌。异步结果写回前用 [`IntentGuard`]
//! 比对自己的代数，过期的结果直接丢弃。

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tokio_util::sync::CancellationToken;

/// 管理意图代数和当前取消令牌
#[derive(Debug)]
pub struct IntentTracker {
    current_token: RefCell<CancellationToken>,
    generation: Rc<Cell<u64>>,
}

impl Default for IntentTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentTracker {
    pub fn new() -> Self {
        Self {
            current_token: RefCell::new(CancellationToken::new()),
            generation: Rc::new(Cell::new(0)),
        }
    }

    /// 取消当前意图，推进一代，返回新意图的守卫
    pub fn advance(&self) -> IntentGuard {
        let mut token = self.current_token.borrow_mut();
        token.cancel();
        *token = CancellationToken::new();

        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        IntentGuard {
            latest: Rc::clone(&self.generation),
            generation,
            token: token.child_token(),
        }
    }

    /// 当前意图的守卫，不推进代数
    pub fn current(&self) -> IntentGuard {
        IntentGuard {
            latest: Rc::clone(&self.generation),
            generation: self.generation.get(),
            token: self.current_token.borrow().child_token(),
        }
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.get()
    }

    /// 取消当前意图但不推进代数
    pub fn cancel(&self) {
        self.current_token.borrow().cancel();
    }
}

/// 异步任务写回结果前检查的守卫
#[derive(Debug, Clone)]
pub struct IntentGuard {
    latest: Rc<Cell<u64>>,
    generation: u64,
    token: CancellationToken,
}

impl IntentGuard {
    /// 不属于任何跟踪器、永远有效的守卫
    pub fn detached() -> Self {
        Self {
            latest: Rc::new(Cell::new(0)),
            generation: 0,
            token: CancellationToken::new(),
        }
    }

    #[inline]
    pub fn is_current(&self) -> bool {
        self.latest.get() == self.generation
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 未取消且仍是最新意图
    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled() && self.is_current()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_invalidates_previous_guard() {
        let tracker = IntentTracker::new();
        let first = tracker.advance();
        assert!(first.should_continue());

        let second = tracker.advance();
        assert!(first.is_cancelled());
        assert!(!first.is_current());
        assert!(!first.should_continue());
        assert!(second.should_continue());
        assert_eq!(tracker.current_generation(), 2);
    }

    #[test]
    fn test_current_shares_generation() {
        let tracker = IntentTracker::new();
        let guard = tracker.advance();
        let sweep = tracker.current();
        assert_eq!(sweep.generation(), guard.generation());

        tracker.cancel();
        assert!(guard.is_cancelled());
        assert!(sweep.is_cancelled());
        assert!(guard.is_current());
    }

    #[test]
    fn test_detached_guard_never_expires() {
        let guard = IntentGuard::detached();
        assert!(guard.should_continue());
    }
}
