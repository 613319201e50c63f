//! 内容扫描器
//!
//! 遍历文档，找出需要翻译的文本节点和属性，给出 xpath、命名空间和分类，
//! 按重要性从高到低返回。检测项只持有节点的弱引用，写回前会检查节点是否仍然新鲜。

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use markup5ever_rcdom::{Handle, Node, NodeData};
use tracing::debug;

use super::classify::{Classification, Classifier, ContentType, NodeContext, Zone};
use super::filters::TextFilter;
use crate::html::{get_node_attr, get_node_name, get_parent_node, is_attached, set_node_attr, set_text, text_of};
use crate::translation::client::TranslationRequest;
use crate::translation::config::{constants, PipelineConfig};

/// 一次扫描检测到的可翻译项
#[derive(Debug, Clone)]
pub struct DetectedItem {
    /// 要翻译的源语言文本（已去除首尾空白）
    pub text: String,
    /// 扫描时节点上的原始内容，写回前用来判断节点是否被改动
    pub captured: String,
    pub node: Weak<Node>,
    pub attribute: Option<String>,
    pub context: String,
    pub namespace: String,
    pub xpath: String,
    pub classification: Classification,
}

impl DetectedItem {
    /// 节点仍然存活并挂在文档上时返回句柄
    pub fn node(&self) -> Option<Handle> {
        self.node.upgrade().filter(is_attached)
    }

    /// 节点当前内容是否仍等于扫描时的内容
    pub fn is_fresh(&self) -> bool {
        self.node()
            .and_then(|node| read_value(&node, self.attribute.as_deref()))
            .is_some_and(|current| current == self.captured)
    }

    /// 写入译文，保留原内容首尾的空白；节点已失效或被改动时不做任何事
    pub fn apply(&self, translated: &str) -> Option<String> {
        let node = self.node()?;
        let current = read_value(&node, self.attribute.as_deref())?;
        if current != self.captured {
            debug!("节点内容已变化，跳过写回: {}", self.xpath);
            return None;
        }

        let written = wrap_like(&self.captured, translated);
        write_value(&node, self.attribute.as_deref(), &written).then_some(written)
    }

    /// 撤销 [`apply`](Self::apply) 写入的内容
    pub fn revert(&self, written: &str) -> bool {
        let Some(node) = self.node() else {
            return false;
        };
        match read_value(&node, self.attribute.as_deref()) {
            Some(current) if current == written => {
                write_value(&node, self.attribute.as_deref(), &self.captured)
            }
            _ => false,
        }
    }

    pub fn to_request(&self, source_lang: &str, target_lang: &str) -> TranslationRequest {
        TranslationRequest::new(self.text.clone(), source_lang, target_lang)
            .with_context(self.context.clone())
    }
}

/// 已翻译节点的记录
#[derive(Debug, Clone)]
pub struct TranslationMark {
    node: Weak<Node>,
    attribute: Option<String>,
    /// 源语言原文（第一次翻译前的内容）
    pub original: String,
    /// 当前译文的语言
    pub language: String,
    /// 写入节点的内容
    pub applied: String,
}

type MarkKey = (usize, Option<String>);

fn mark_key(node: &Handle, attribute: Option<&str>) -> MarkKey {
    (Rc::as_ptr(node) as usize, attribute.map(str::to_string))
}

/// 翻译标记登记表
///
/// 记录哪些节点（或属性）已经被写入译文，保证同一内容不会被二次翻译。
/// 记录持有节点的弱引用，节点释放后由 [`prune`](Self::prune) 清理。
#[derive(Debug, Default)]
pub struct TranslationMarks {
    marks: RefCell<HashMap<MarkKey, TranslationMark>>,
}

impl TranslationMarks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一次写入；已有记录时保留最初的原文
    pub fn mark(&self, node: &Handle, attribute: Option<&str>, original: &str, language: &str, applied: &str) {
        let mut marks = self.marks.borrow_mut();
        let entry = marks
            .entry(mark_key(node, attribute))
            .or_insert_with(|| TranslationMark {
                node: Rc::downgrade(node),
                attribute: attribute.map(str::to_string),
                original: original.to_string(),
                language: String::new(),
                applied: String::new(),
            });
        entry.language = language.to_string();
        entry.applied = applied.to_string();
    }

    pub fn lookup(&self, node: &Handle, attribute: Option<&str>) -> Option<TranslationMark> {
        self.marks.borrow().get(&mark_key(node, attribute)).cloned()
    }

    pub fn is_marked(&self, node: &Handle, attribute: Option<&str>) -> bool {
        self.marks.borrow().contains_key(&mark_key(node, attribute))
    }

    pub fn forget(&self, node: &Handle, attribute: Option<&str>) {
        self.marks.borrow_mut().remove(&mark_key(node, attribute));
    }

    /// 把某个节点的记录恢复为 `previous`（None 表示删除）
    pub fn reinstate(&self, node: &Handle, attribute: Option<&str>, previous: Option<TranslationMark>) {
        let key = mark_key(node, attribute);
        let mut marks = self.marks.borrow_mut();
        match previous {
            Some(mark) => {
                marks.insert(key, mark);
            }
            None => {
                marks.remove(&key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.marks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.borrow().is_empty()
    }

    /// 清理节点已释放的记录
    pub fn prune(&self) -> usize {
        let mut marks = self.marks.borrow_mut();
        let before = marks.len();
        marks.retain(|_, mark| mark.node.strong_count() > 0);
        before - marks.len()
    }

    /// 把所有仍显示译文的节点恢复为原文并清空登记表
    pub fn restore_originals(&self) -> usize {
        let marks: Vec<TranslationMark> = self.marks.borrow_mut().drain().map(|(_, m)| m).collect();
        let mut restored = 0;

        for mark in marks {
            let Some(node) = mark.node.upgrade() else {
                continue;
            };
            let attribute = mark.attribute.as_deref();
            if read_value(&node, attribute).as_deref() == Some(mark.applied.as_str())
                && write_value(&node, attribute, &mark.original)
            {
                restored += 1;
            }
        }

        restored
    }
}

/// 排除选择器：`tag`、`.class`、`#id`、`[attr]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Tag(String),
    Class(String),
    Id(String),
    Attr(String),
}

impl Selector {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(class) = raw.strip_prefix('.') {
            (!class.is_empty()).then(|| Self::Class(class.to_string()))
        } else if let Some(id) = raw.strip_prefix('#') {
            (!id.is_empty()).then(|| Self::Id(id.to_string()))
        } else if let Some(attr) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            (!attr.is_empty()).then(|| Self::Attr(attr.to_string()))
        } else if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            Some(Self::Tag(raw.to_ascii_lowercase()))
        } else {
            None
        }
    }

    fn matches(&self, node: &Handle, tag: &str, classes: &[&str]) -> bool {
        match self {
            Self::Tag(name) => name == tag,
            Self::Class(class) => classes.contains(&class.as_str()),
            Self::Id(id) => get_node_attr(node, "id").as_deref() == Some(id.as_str()),
            Self::Attr(attr) => get_node_attr(node, attr).is_some(),
        }
    }
}

/// 扫描器配置
#[derive(Debug, Clone, Default)]
pub struct ScannerConfig {
    pub exclusions: Vec<Selector>,
}

impl ScannerConfig {
    pub fn with_exclusions<S: AsRef<str>>(exclusions: &[S]) -> Self {
        let exclusions = exclusions
            .iter()
            .filter_map(|raw| {
                let selector = Selector::parse(raw.as_ref());
                if selector.is_none() {
                    tracing::warn!("忽略无法识别的排除选择器: {}", raw.as_ref());
                }
                selector
            })
            .collect();
        Self { exclusions }
    }
}

impl From<&PipelineConfig> for ScannerConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self::with_exclusions(&config.exclusions)
    }
}

/// 遍历时向下传递的祖先上下文
#[derive(Debug, Clone)]
struct WalkState {
    path: String,
    tag: String,
    class: String,
    role: Option<ContentType>,
    zone: Zone,
    namespace: String,
}

impl WalkState {
    fn document() -> Self {
        Self {
            path: String::new(),
            tag: String::new(),
            class: String::new(),
            role: None,
            zone: Zone::Body,
            namespace: constants::DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// 内容扫描器
pub struct ContentScanner {
    config: ScannerConfig,
    filter: TextFilter,
    classifier: Classifier,
    marks: TranslationMarks,
}

impl Default for ContentScanner {
    fn default() -> Self {
        Self::new(ScannerConfig::default())
    }
}

impl ContentScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            filter: TextFilter::new(),
            classifier: Classifier::default(),
            marks: TranslationMarks::new(),
        }
    }

    pub fn marks(&self) -> &TranslationMarks {
        &self.marks
    }

    /// 扫描未被翻译过的内容
    pub fn scan(&self, root: &Handle) -> Vec<DetectedItem> {
        self.scan_inner(root, None)
    }

    /// 面向某个目标语言扫描：未翻译的内容，加上已翻译成其它语言的内容（以原文重新翻译）
    pub fn scan_for_language(&self, root: &Handle, target_lang: &str) -> Vec<DetectedItem> {
        self.scan_inner(root, Some(target_lang))
    }

    fn scan_inner(&self, root: &Handle, target: Option<&str>) -> Vec<DetectedItem> {
        let pruned = self.marks.prune();
        if pruned > 0 {
            debug!("清理了 {} 个失效的翻译标记", pruned);
        }

        let Some(state) = self.root_state(root) else {
            debug!("扫描根节点位于排除区域内");
            return Vec::new();
        };

        let mut items = Vec::new();
        if let NodeData::Element { .. } = root.data {
            self.collect_attributes(root, &state, target, &mut items);
        }
        self.walk(root, &state, target, &mut items);

        // 稳定排序，同一重要性内保持文档顺序
        items.sort_by(|a, b| b.classification.importance.cmp(&a.classification.importance));
        debug!("扫描完成，检测到 {} 个可翻译项", items.len());
        items
    }

    /// 从文档根一路计算到扫描根的上下文
    fn root_state(&self, root: &Handle) -> Option<WalkState> {
        let mut chain = Vec::new();
        let mut current = Some(root.clone());
        while let Some(node) = current {
            if let NodeData::Element { .. } = node.data {
                chain.push(node.clone());
            }
            current = get_parent_node(&node);
        }

        let mut state = WalkState::document();
        for node in chain.iter().rev() {
            let tag = get_node_name(node).unwrap_or_default().to_string();
            let path = format!("{}/{}[{}]", state.path, tag, element_index(node, &tag));
            state = self.enter(node, tag, path, &state)?;
        }
        Some(state)
    }

    fn walk(&self, node: &Handle, state: &WalkState, target: Option<&str>, out: &mut Vec<DetectedItem>) {
        let mut tag_counts: HashMap<String, usize> = HashMap::new();
        let mut text_count = 0;

        for child in node.children.borrow().iter() {
            match &child.data {
                NodeData::Element { name, .. } => {
                    let tag = name.local.to_string();
                    let index = {
                        let count = tag_counts.entry(tag.clone()).or_insert(0);
                        *count += 1;
                        *count
                    };
                    let path = format!("{}/{}[{}]", state.path, tag, index);
                    let Some(child_state) = self.enter(child, tag, path, state) else {
                        continue;
                    };
                    self.collect_attributes(child, &child_state, target, out);
                    self.walk(child, &child_state, target, out);
                }
                NodeData::Text { contents } => {
                    text_count += 1;
                    let raw = contents.borrow().to_string();
                    let xpath = format!("{}/text()[{}]", state.path, text_count);
                    self.consider(child, None, raw, xpath, state, target, out);
                }
                _ => {}
            }
        }
    }

    /// 进入一个元素；跳过的标签和排除区域返回 None
    fn enter(&self, node: &Handle, tag: String, path: String, parent: &WalkState) -> Option<WalkState> {
        if constants::SKIP_ELEMENTS.contains(&tag.as_str()) {
            return None;
        }

        let class = get_node_attr(node, "class").unwrap_or_default();
        let classes: Vec<&str> = class.split_whitespace().collect();

        let opted_out = get_node_attr(node, "translate").is_some_and(|v| v.eq_ignore_ascii_case("no"))
            || get_node_attr(node, constants::OPT_OUT_ATTR).is_some()
            || classes.contains(&constants::OPT_OUT_CLASS)
            || self
                .config
                .exclusions
                .iter()
                .any(|selector| selector.matches(node, &tag, &classes));
        if opted_out {
            return None;
        }

        let id = get_node_attr(node, "id").unwrap_or_default();
        let zone = Zone::from_element(&tag, &format!("{} {}", class, id)).unwrap_or(parent.zone);
        let role = ContentType::from_tag(&tag).or(parent.role);
        let namespace = get_node_attr(node, constants::NAMESPACE_ATTR)
            .filter(|ns| !ns.trim().is_empty())
            .unwrap_or_else(|| parent.namespace.clone());

        Some(WalkState {
            path,
            tag,
            class,
            role,
            zone,
            namespace,
        })
    }

    fn collect_attributes(&self, node: &Handle, state: &WalkState, target: Option<&str>, out: &mut Vec<DetectedItem>) {
        for &attr in constants::TRANSLATABLE_ATTRS {
            if let Some(value) = get_node_attr(node, attr) {
                let xpath = format!("{}/@{}", state.path, attr);
                self.consider(node, Some(attr), value, xpath, state, target, out);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn consider(
        &self,
        node: &Handle,
        attribute: Option<&str>,
        raw: String,
        xpath: String,
        state: &WalkState,
        target: Option<&str>,
        out: &mut Vec<DetectedItem>,
    ) {
        let text = match self.marks.lookup(node, attribute) {
            Some(mark) if mark.applied == raw => match target {
                Some(lang) if mark.language != lang => mark.original.trim().to_string(),
                _ => return,
            },
            Some(_) => {
                // 译文被外部改写过，按新内容重新对待
                self.marks.forget(node, attribute);
                if !self.filter.should_translate(&raw) {
                    return;
                }
                raw.trim().to_string()
            }
            None => {
                if !self.filter.should_translate(&raw) {
                    return;
                }
                raw.trim().to_string()
            }
        };

        let ctx = NodeContext {
            tag: state.tag.clone(),
            class: state.class.clone(),
            role: state.role,
            zone: state.zone,
            attribute: attribute.map(str::to_string),
        };
        let classification = self.classifier.classify(&ctx, &text);
        let context = match attribute {
            Some(attr) => attr.to_string(),
            None => classification.content_type.as_str().to_string(),
        };

        out.push(DetectedItem {
            text,
            captured: raw,
            node: Rc::downgrade(node),
            attribute: attribute.map(str::to_string),
            context,
            namespace: state.namespace.clone(),
            xpath,
            classification,
        });
    }
}

/// 元素在同名兄弟中的序号（从 1 开始）
fn element_index(node: &Handle, tag: &str) -> usize {
    let Some(parent) = get_parent_node(node) else {
        return 1;
    };
    let mut index = 0;
    for sibling in parent.children.borrow().iter() {
        if get_node_name(sibling) == Some(tag) {
            index += 1;
        }
        if Rc::ptr_eq(sibling, node) {
            break;
        }
    }
    index.max(1)
}

fn read_value(node: &Handle, attribute: Option<&str>) -> Option<String> {
    match attribute {
        Some(attr) => get_node_attr(node, attr),
        None => text_of(node),
    }
}

fn write_value(node: &Handle, attribute: Option<&str>, value: &str) -> bool {
    match attribute {
        Some(attr) => {
            set_node_attr(node, attr, Some(value.to_string()));
            true
        }
        None => set_text(node, value),
    }
}

/// 用 `captured` 的首尾空白包住译文
fn wrap_like(captured: &str, translated: &str) -> String {
    let leading = &captured[..captured.len() - captured.trim_start().len()];
    let trailing = &captured[captured.trim_end().len()..];
    format!("{}{}{}", leading, translated.trim(), trailing)
}
