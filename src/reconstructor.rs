//! 重建模块
//!
//! 用与线性化完全相同的阅读顺序和叶子规则重新遍历原EPUB，按序号把译文回填到对应节点。
//! 每个文档只消费属于自己章节ID的那一段连续单元，单个文档出错或段数漂移不会波及后续文档

// 标准库导入
use std::collections::HashMap;

// 第三方crate导入
use tracing::{debug, info, warn};

// 本地模块导入
use crate::epub_container::EpubArchive;
use crate::error::Result;
use crate::html_processor::{
    collect_leaf_blocks, replace_text, serialize_document, strip_whitespace_around_images,
    DocumentKind, LeafRule,
};
use crate::linearizer::parse_spine_document;
use crate::mapping_store::ContentUnit;
use crate::spine::{ResolvedSpine, SpineDocument};

/// 重建统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconstructionReport {
    /// 内容有变化的文档数
    pub documents_changed: usize,
    /// 原样保留的文档数
    pub documents_unchanged: usize,
    /// 处理失败、原样保留的文档
    pub documents_failed: Vec<String>,
    /// 替换的段落数
    pub replaced: usize,
    /// 段数与映射不一致的文档数
    pub drifted: usize,
    /// 未被任何文档消费的单元数
    pub unconsumed: usize,
}

/// 单个文档的回填结果
struct DocumentOutcome {
    bytes: Option<Vec<u8>>,
    leaves: usize,
    replaced: usize,
}

/// 计算所有需要替换的文档内容（ZIP路径 -> 新内容）
///
/// `units` 必须按序号排序
pub fn reconstruct(
    archive: &EpubArchive,
    spine: &ResolvedSpine,
    units: &[ContentUnit],
    rule: &LeafRule,
) -> (HashMap<String, Vec<u8>>, ReconstructionReport) {
    let mut replacements = HashMap::new();
    let mut report = ReconstructionReport::default();
    let mut cursor = 0;

    for (index, document) in spine.documents.iter().enumerate() {
        let run = units[cursor..]
            .iter()
            .take_while(|unit| unit.chapter_id == document.chapter_id)
            .count();
        let next_shares_chapter = spine
            .documents
            .get(index + 1)
            .is_some_and(|next| next.chapter_id == document.chapter_id);
        let slice = &units[cursor..cursor + run];

        match apply_document(archive, document, slice, rule) {
            Ok(outcome) => {
                if outcome.leaves != run {
                    report.drifted += 1;
                    warn!(
                        "⚠️  {} 的段落数({})与映射({})不一致，按章节重新对齐",
                        document.chapter_id, outcome.leaves, run
                    );
                }
                report.replaced += outcome.replaced;
                match outcome.bytes {
                    Some(bytes) => {
                        replacements.insert(document.full_path.clone(), bytes);
                        report.documents_changed += 1;
                    }
                    None => report.documents_unchanged += 1,
                }
                cursor += if next_shares_chapter {
                    outcome.leaves.min(run)
                } else {
                    run
                };
            }
            Err(e) => {
                warn!("⚠️  文档 {} 重建失败，保留原文: {}", document.full_path, e);
                report.documents_failed.push(document.full_path.clone());
                cursor += run;
            }
        }
    }

    report.unconsumed = units.len().saturating_sub(cursor);
    if report.unconsumed > 0 {
        warn!("⚠️  {} 段映射未能对应到任何文档", report.unconsumed);
    }

    info!(
        "🔁 回填完成: 替换 {} 段, 修改 {} 个文档, 失败 {} 个",
        report.replaced,
        report.documents_changed,
        report.documents_failed.len()
    );
    (replacements, report)
}

/// 回填单个文档；没有任何替换时返回 `bytes: None`，原文件原样写回
fn apply_document(
    archive: &EpubArchive,
    document: &SpineDocument,
    units: &[ContentUnit],
    rule: &LeafRule,
) -> Result<DocumentOutcome> {
    let dom = parse_spine_document(archive, document)?;
    let blocks = collect_leaf_blocks(&dom, rule);

    let mut replaced = 0;
    for (block, unit) in blocks.iter().zip(units) {
        let translation = unit.translated_text.trim();
        if !translation.is_empty() && translation != block.text {
            replace_text(&block.node, translation);
            replaced += 1;
        }
    }

    if replaced == 0 {
        return Ok(DocumentOutcome {
            bytes: None,
            leaves: blocks.len(),
            replaced,
        });
    }

    let cleaned = strip_whitespace_around_images(&dom);
    debug!("{}: 替换 {} 段, 清理 {} 个空白节点", document.chapter_id, replaced, cleaned);

    let kind = DocumentKind::detect(&document.media_type, &document.full_path);
    let bytes = serialize_document(&dom, kind, &document.full_path)?;
    Ok(DocumentOutcome {
        bytes: Some(bytes),
        leaves: blocks.len(),
        replaced,
    })
}
