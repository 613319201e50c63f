//! HTML 文档处理模块
//!
//! 基于 `markup5ever_rcdom` 的基础 DOM 操作：解析、序列化、属性和文本读写。
//! 翻译管道只通过这里的函数读写文档，从不替换节点本身。

pub mod dom;

pub use dom::{
    element_classes, find_nodes, get_node_attr, get_node_name, get_parent_node, html_to_dom,
    is_attached, serialize_node, set_node_attr, set_text, text_of,
};
