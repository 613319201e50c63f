//! 内容分类
//!
//! 根据标签、祖先上下文和文本内容给每个检测项打上 `{类型, 重要性, 翻译风格}`。
//! 结构相同的节点会反复出现（导航项、按钮），分类结果按组合键缓存。

use std::cell::RefCell;
use std::fmt;
use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::translation::config::constants;

/// 内容类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Heading,
    Button,
    Navigation,
    Paragraph,
    FormControl,
    Attribute,
    Text,
}

impl ContentType {
    /// 由标签名推断内容类型；没有特殊含义的标签返回 None
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Some(Self::Heading),
            "button" => Some(Self::Button),
            "nav" => Some(Self::Navigation),
            "label" | "input" | "textarea" | "select" | "option" => Some(Self::FormControl),
            "p" => Some(Self::Paragraph),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heading => "heading",
            Self::Button => "button",
            Self::Navigation => "navigation",
            Self::Paragraph => "paragraph",
            Self::FormControl => "form",
            Self::Attribute => "attribute",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 重要性，排序时高的在前
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low = 0,
    Medium = 1,
    High = 2,
}

/// 翻译风格
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationType {
    Standard,
    Marketing,
    Technical,
    Cultural,
}

/// 页面区域，由祖先的 class/id 关键词或 `<footer>` 决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Zone {
    #[default]
    Body,
    Hero,
    Footer,
}

impl Zone {
    /// 从单个元素的标签、class、id 推断区域
    pub fn from_element(tag: &str, classes_and_id: &str) -> Option<Self> {
        if tag == "footer" {
            return Some(Self::Footer);
        }
        let lowered = classes_and_id.to_lowercase();
        let has = |keywords: &[&str]| {
            lowered
                .split(|c: char| c.is_whitespace())
                .any(|token| keywords.iter().any(|k| token.contains(k)))
        };
        if has(constants::MARKETING_KEYWORDS) {
            Some(Self::Hero)
        } else if has(constants::FOOTER_KEYWORDS) {
            Some(Self::Footer)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub content_type: ContentType,
    pub importance: Importance,
    pub translation_type: TranslationType,
}

/// 分类所需的节点上下文
#[derive(Debug, Clone)]
pub struct NodeContext {
    /// 最近的元素标签
    pub tag: String,
    /// 最近元素的 class 属性原文
    pub class: String,
    /// 沿祖先链找到的第一个有意义的内容类型
    pub role: Option<ContentType>,
    pub zone: Zone,
    /// 属性文本时的属性名
    pub attribute: Option<String>,
}

/// 带缓存的分类器
pub struct Classifier {
    cache: RefCell<LruCache<String, Classification>>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(constants::CLASSIFICATION_CACHE_SIZE)
    }
}

impl Classifier {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: RefCell::new(LruCache::new(capacity)),
        }
    }

    pub fn classify(&self, ctx: &NodeContext, text: &str) -> Classification {
        let key = cache_key(ctx, text);
        if let Some(hit) = self.cache.borrow_mut().get(&key) {
            return *hit;
        }

        let classification = compute(ctx, text);
        self.cache.borrow_mut().put(key, classification);
        classification
    }

    pub fn cached_len(&self) -> usize {
        self.cache.borrow().len()
    }
}

fn cache_key(ctx: &NodeContext, text: &str) -> String {
    let prefix: String = text
        .trim()
        .chars()
        .take(constants::CLASSIFICATION_PREFIX_CHARS)
        .collect();
    format!(
        "{}|{}|{:?}|{:?}|{}|{}",
        ctx.tag,
        ctx.class,
        ctx.role,
        ctx.zone,
        ctx.attribute.as_deref().unwrap_or_default(),
        prefix
    )
}

fn compute(ctx: &NodeContext, text: &str) -> Classification {
    let role = if ctx.attribute.is_some() && ctx.role.is_none() {
        ContentType::Attribute
    } else {
        ctx.role.unwrap_or(ContentType::Text)
    };

    let (mut importance, mut translation_type) = match role {
        ContentType::Heading | ContentType::Button => (Importance::High, TranslationType::Marketing),
        ContentType::Navigation => (Importance::High, TranslationType::Standard),
        ContentType::Paragraph if text.trim().chars().count() >= constants::LONG_PARAGRAPH_CHARS => {
            (Importance::Medium, TranslationType::Cultural)
        }
        _ => (Importance::Medium, TranslationType::Standard),
    };

    match ctx.zone {
        Zone::Hero => {
            importance = Importance::High;
            translation_type = TranslationType::Marketing;
        }
        Zone::Footer => importance = Importance::Low,
        Zone::Body => {}
    }

    // 内容优先于结构
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    let contains_any = |tokens: &[&str]| words.iter().any(|w| tokens.contains(&w.as_str()));

    if contains_any(constants::TECHNICAL_TOKENS) {
        translation_type = TranslationType::Technical;
    } else if contains_any(constants::CULTURAL_TOKENS) {
        translation_type = TranslationType::Cultural;
    }

    Classification {
        content_type: role,
        importance,
        translation_type,
    }
}
