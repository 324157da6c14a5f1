//! 文档线性化模块
//!
//! 按阅读顺序遍历内容文档，抽取块级叶子节点文本并分配全局连续序号

use markup5ever_rcdom::RcDom;
use tracing::{debug, info, warn};

use crate::epub_container::EpubArchive;
use crate::error::Result;
use crate::html_processor::{parse_document, walk_leaf_blocks, DocumentKind, LeafRule};
use crate::mapping_store::ContentUnit;
use crate::spine::{ResolvedSpine, SpineDocument};
use crate::translation_error;

/// 跨文档共享的序号计数器，从1开始单调递增
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    next: usize,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// 取下一个序号
    pub fn next_sequence(&mut self) -> usize {
        let sequence = self.next;
        self.next += 1;
        sequence
    }

    /// 已分配的序号数量
    pub fn issued(&self) -> usize {
        self.next - 1
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// 线性化单个已解析文档，追加到units
pub fn linearize_document(
    dom: &RcDom,
    chapter_id: &str,
    rule: &LeafRule,
    counter: &mut SequenceCounter,
    units: &mut Vec<ContentUnit>,
) -> usize {
    let before = units.len();
    walk_leaf_blocks(dom, rule, |block| {
        units.push(ContentUnit::new(
            counter.next_sequence(),
            block.text,
            chapter_id.to_string(),
        ));
    });
    units.len() - before
}

/// 线性化结果
#[derive(Debug, Clone, Default)]
pub struct Linearization {
    pub units: Vec<ContentUnit>,
    /// 成功处理的文档数
    pub documents: usize,
    /// 无法读取或解析而被跳过的文档
    pub skipped: Vec<String>,
}

/// 按阅读顺序线性化整本书
///
/// 单个文档缺失或解析失败时跳过并记录，重建时同一文档也会因同样原因被跳过，序号对齐不受影响
pub fn linearize_archive(
    archive: &EpubArchive,
    spine: &ResolvedSpine,
    rule: &LeafRule,
) -> Linearization {
    let mut counter = SequenceCounter::new();
    let mut result = Linearization::default();

    for document in &spine.documents {
        match parse_spine_document(archive, document) {
            Ok(dom) => {
                let count = linearize_document(
                    &dom,
                    &document.chapter_id,
                    rule,
                    &mut counter,
                    &mut result.units,
                );
                debug!("📄 {} -> {} 段", document.chapter_id, count);
                result.documents += 1;
            }
            Err(e) => {
                warn!("⚠️  跳过文档 {}: {}", document.full_path, e);
                result.skipped.push(document.full_path.clone());
            }
        }
    }

    info!(
        "📝 线性化完成: {} 个文档, {} 段文本",
        result.documents,
        counter.issued()
    );
    result
}

/// 读取并解析spine中的一个文档
pub fn parse_spine_document(archive: &EpubArchive, document: &SpineDocument) -> Result<RcDom> {
    let bytes = archive.read_entry(&document.full_path).ok_or_else(|| {
        translation_error!(
            container,
            archive.path().display(),
            format!("缺少文档 {}", document.full_path)
        )
    })?;
    let kind = DocumentKind::detect(&document.media_type, &document.full_path);
    parse_document(bytes, kind, &document.full_path)
}
