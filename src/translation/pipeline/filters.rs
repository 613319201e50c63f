//! 文本过滤器模块
//!
//! 判断一段文本本身是否值得翻译。节点位置相关的排除（脚本、显式标记等）由扫描器负责。

use std::sync::OnceLock;

use regex::Regex;

use crate::translation::config::constants;

/// 文本过滤器
#[derive(Default)]
pub struct TextFilter {
    regex_cache: RegexCache,
}

/// 正则表达式缓存
#[derive(Default)]
struct RegexCache {
    url_regex: OnceLock<Option<Regex>>,
    email_regex: OnceLock<Option<Regex>>,
    constant_regex: OnceLock<Option<Regex>>,
}

impl RegexCache {
    fn matches(cell: &OnceLock<Option<Regex>>, pattern: &str, text: &str) -> bool {
        cell.get_or_init(|| Regex::new(pattern).ok())
            .as_ref()
            .is_some_and(|regex| regex.is_match(text))
    }
}

impl TextFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 判断文本是否需要翻译
    pub fn should_translate(&self, text: &str) -> bool {
        let trimmed = text.trim();

        if trimmed.chars().count() < constants::MIN_TEXT_LENGTH {
            return false;
        }

        // 纯数字或纯标点
        if !trimmed.chars().any(|c| c.is_alphabetic()) {
            return false;
        }

        !(self.is_url(trimmed) || self.is_email(trimmed) || self.is_constant(trimmed))
    }

    fn is_url(&self, text: &str) -> bool {
        if text.starts_with("www.") {
            return !text.contains(char::is_whitespace);
        }
        RegexCache::matches(
            &self.regex_cache.url_regex,
            r"^(?:[a-zA-Z][a-zA-Z0-9+.-]*://|mailto:)\S+$",
            text,
        )
    }

    fn is_email(&self, text: &str) -> bool {
        if !text.contains('@') {
            return false;
        }
        RegexCache::matches(
            &self.regex_cache.email_regex,
            r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$",
            text,
        )
    }

    /// `MAX_RETRIES`、`HTTP_404` 这类常量名
    fn is_constant(&self, text: &str) -> bool {
        RegexCache::matches(
            &self.regex_cache.constant_regex,
            r"^[A-Z0-9]+(?:_[A-Z0-9]+)+$",
            text,
        )
    }
}
