//! 翻译队列状态
//!
//! 待处理请求保持插入顺序，同一身份只出现一次；已完成的身份不会再次入队。

use std::collections::{HashMap, HashSet, VecDeque};

use crate::translation::client::TranslationRequest;

#[derive(Debug, Default)]
pub struct QueueState {
    pending: VecDeque<TranslationRequest>,
    /// 待处理或正在请求中的身份
    queued: HashSet<String>,
    completed: HashMap<String, String>,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队；已完成或已在队列中的身份返回 false
    pub fn enqueue(&mut self, request: TranslationRequest) -> bool {
        let key = request.identity_key();
        if self.completed.contains_key(&key) || self.queued.contains(&key) {
            return false;
        }
        self.queued.insert(key);
        self.pending.push_back(request);
        true
    }

    /// 按顺序取出最多 `limit` 个待处理请求，它们的身份仍视为在队列中直到完成或失败
    pub fn take_batch(&mut self, limit: usize) -> Vec<TranslationRequest> {
        let count = limit.min(self.pending.len());
        self.pending.drain(..count).collect()
    }

    pub fn complete(&mut self, key: &str, translated: impl Into<String>) {
        self.queued.remove(key);
        self.completed.insert(key.to_string(), translated.into());
    }

    /// 失败的身份可以在之后的周期重新入队
    pub fn fail(&mut self, key: &str) {
        self.queued.remove(key);
    }

    pub fn completed(&self, key: &str) -> Option<&str> {
        self.completed.get(key).map(String::as_str)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn completed_len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.queued.is_empty()
    }
}
