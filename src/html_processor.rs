//! HTML处理模块
//!
//! 提供XHTML/HTML解析、块级叶子节点遍历、文本提取、DOM文本替换和序列化功能。
//! 导入（线性化）与导出（重建）共用同一个遍历函数，两边的节点消费顺序由此保证一致

// 标准库导入
use std::cell::RefCell;
use std::rc::Rc;

// 第三方crate导入
use html5ever::tendril::{StrTendril, TendrilSink};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};

// 本地模块导入
use crate::api_constants::extraction_config::{DEFAULT_IMAGE_TEXT_THRESHOLD, SKIPPED_TAGS};
use crate::api_constants::is_block_tag;
use crate::error::Result;
use crate::translation_error;
use crate::xhtml_tree::{parse_xhtml, serialize_xhtml};

/// 内容文档类型，决定使用的解析器与序列化器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// application/xhtml+xml，使用quick-xml事件流建树
    Xhtml,
    /// text/html，使用html5ever
    Html,
}

impl DocumentKind {
    /// 根据媒体类型（缺失时根据扩展名）判断文档类型
    pub fn detect(media_type: &str, path: &str) -> Self {
        match media_type {
            "text/html" => DocumentKind::Html,
            "application/xhtml+xml" => DocumentKind::Xhtml,
            _ => {
                let lower = path.to_lowercase();
                if lower.ends_with(".html") || lower.ends_with(".htm") {
                    DocumentKind::Html
                } else {
                    DocumentKind::Xhtml
                }
            }
        }
    }
}

/// 叶子节点判定规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafRule {
    /// 含图片的叶子节点，若去空白后文本字符数小于该值，视为纯图片节点
    pub image_text_threshold: usize,
}

impl Default for LeafRule {
    fn default() -> Self {
        Self {
            image_text_threshold: DEFAULT_IMAGE_TEXT_THRESHOLD,
        }
    }
}

impl LeafRule {
    pub fn new(image_text_threshold: usize) -> Self {
        Self {
            image_text_threshold,
        }
    }

    /// 节点是否为可翻译的块级叶子：自身是块级标签，且任意深度的后代中都没有块级标签
    pub fn is_leaf_block(&self, node: &Handle) -> bool {
        element_name(node).is_some_and(is_block_tag) && !has_descendant(node, is_block_tag)
    }

    /// 纯图片节点：包含图片，且伴随文本不足阈值
    pub fn is_image_only(&self, node: &Handle, text: &str) -> bool {
        has_descendant(node, is_image_tag) && text.trim().chars().count() < self.image_text_threshold
    }
}

/// 一个占用序号的叶子节点
#[derive(Debug, Clone)]
pub struct LeafBlock {
    pub node: Handle,
    /// 去除首尾空白后的完整文本
    pub text: String,
}

/// 按深度优先先序遍历文档，对每个占用序号的叶子节点调用visitor
///
/// 空文本叶子与纯图片叶子不会传给visitor；script/style/head整体跳过
pub fn walk_leaf_blocks<F>(dom: &RcDom, rule: &LeafRule, mut visitor: F)
where
    F: FnMut(LeafBlock),
{
    let mut stack: Vec<Handle> = vec![dom.document.clone()];

    while let Some(node) = stack.pop() {
        if let Some(name) = element_name(&node) {
            if SKIPPED_TAGS.contains(&name) {
                continue;
            }
            if rule.is_leaf_block(&node) {
                let text = node_text(&node).trim().to_string();
                if !text.is_empty() && !rule.is_image_only(&node, &text) {
                    visitor(LeafBlock { node, text });
                }
                continue;
            }
        }

        // 逆序压栈，保证先序
        for child in node.children.borrow().iter().rev() {
            stack.push(child.clone());
        }
    }
}

/// 收集文档中所有占用序号的叶子节点
pub fn collect_leaf_blocks(dom: &RcDom, rule: &LeafRule) -> Vec<LeafBlock> {
    let mut blocks = Vec::new();
    walk_leaf_blocks(dom, rule, |block| blocks.push(block));
    blocks
}

/// 节点的完整递归文本（不含script/style）
pub fn node_text(node: &Handle) -> String {
    let mut text = String::new();
    let mut stack = vec![node.clone()];

    while let Some(current) = stack.pop() {
        match current.data {
            NodeData::Text { ref contents } => text.push_str(&contents.borrow()),
            NodeData::Element { ref name, .. }
                if SKIPPED_TAGS.contains(&name.local.as_ref()) =>
            {
                continue
            }
            _ => {}
        }
        for child in current.children.borrow().iter().rev() {
            stack.push(child.clone());
        }
    }

    text
}

/// 替换节点文本：删除所有后代文本节点（保留内联元素），在开头插入新文本
pub fn replace_text(node: &Handle, text: &str) {
    remove_text_descendants(node);

    let new_text = Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from_slice(text)),
    });
    new_text.parent.set(Some(Rc::downgrade(node)));
    node.children.borrow_mut().insert(0, new_text);
}

fn remove_text_descendants(node: &Handle) {
    node.children
        .borrow_mut()
        .retain(|child| !matches!(child.data, NodeData::Text { .. }));
    for child in node.children.borrow().iter() {
        remove_text_descendants(child);
    }
}

/// 删除紧邻图片的纯空白文本节点，返回删除数量
pub fn strip_whitespace_around_images(dom: &RcDom) -> usize {
    let mut removed = 0;
    let mut stack = vec![dom.document.clone()];

    while let Some(node) = stack.pop() {
        {
            let mut children = node.children.borrow_mut();
            let has_image_child = children
                .iter()
                .any(|child| element_name(child).is_some_and(is_image_tag));

            if has_image_child {
                let before = children.len();
                let snapshot: Vec<Handle> = children.clone();
                let kept: Vec<Handle> = snapshot
                    .iter()
                    .enumerate()
                    .filter(|(i, child)| {
                        if !is_whitespace_text(child) {
                            return true;
                        }
                        let prev_is_image = i
                            .checked_sub(1)
                            .and_then(|p| snapshot.get(p))
                            .and_then(element_name)
                            .is_some_and(is_image_tag);
                        let next_is_image = snapshot
                            .get(i + 1)
                            .and_then(element_name)
                            .is_some_and(is_image_tag);
                        !(prev_is_image || next_is_image)
                    })
                    .map(|(_, child)| child.clone())
                    .collect();
                removed += before - kept.len();
                *children = kept;
            }
        }

        for child in node.children.borrow().iter() {
            stack.push(child.clone());
        }
    }

    removed
}

/// 解析内容文档
pub fn parse_document(bytes: &[u8], kind: DocumentKind, document: &str) -> Result<RcDom> {
    match kind {
        DocumentKind::Html => {
            let mut input = bytes;
            html5ever::parse_document(RcDom::default(), Default::default())
                .from_utf8()
                .read_from(&mut input)
                .map_err(|e| translation_error!(html_parse, document, e))
        }
        DocumentKind::Xhtml => parse_xhtml(bytes, document),
    }
}

/// 序列化DOM
pub fn serialize_document(dom: &RcDom, kind: DocumentKind, document: &str) -> Result<Vec<u8>> {
    match kind {
        DocumentKind::Html => {
            let mut buffer = Vec::new();
            let handle = SerializableHandle::from(dom.document.clone());
            html5ever::serialize::serialize(
                &mut buffer,
                &handle,
                html5ever::serialize::SerializeOpts::default(),
            )
            .map_err(|e| translation_error!(html_parse, document, format!("序列化失败: {}", e)))?;
            Ok(buffer)
        }
        DocumentKind::Xhtml => Ok(serialize_xhtml(dom)),
    }
}

fn element_name(node: &Handle) -> Option<&str> {
    match node.data {
        NodeData::Element { ref name, .. } => Some(name.local.as_ref()),
        _ => None,
    }
}

fn is_image_tag(tag: &str) -> bool {
    matches!(tag, "img" | "image")
}

fn is_whitespace_text(node: &Handle) -> bool {
    match node.data {
        NodeData::Text { ref contents } => contents.borrow().trim().is_empty(),
        _ => false,
    }
}

/// 后代中（不含自身）是否存在满足条件的元素
fn has_descendant(node: &Handle, predicate: fn(&str) -> bool) -> bool {
    let mut stack: Vec<Handle> = node.children.borrow().iter().cloned().collect();

    while let Some(current) = stack.pop() {
        if element_name(&current).is_some_and(predicate) {
            return true;
        }
        stack.extend(current.children.borrow().iter().cloned());
    }

    false
}
