//! 阅读顺序解析模块
//!
//! 从OPF的spine解析出内容文档的权威阅读顺序。每个itemref依次尝试多种定位方式，
//! 单个条目失败只跳过该条目；全部失败时退化为按章节ID字典序推断，并显式标记

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::chapter_id::normalize_chapter_id;
use crate::epub_container::{
    is_document_media_type, resolve_path, ManifestItem, PackageDocument, SpineItemRef,
};

/// 阅读顺序中的一个内容文档
#[derive(Debug, Clone, PartialEq)]
pub struct SpineDocument {
    /// ZIP内完整路径
    pub full_path: String,
    /// 规范化章节ID
    pub chapter_id: String,
    pub media_type: String,
}

/// spine解析结果
#[derive(Debug, Clone, Default)]
pub struct ResolvedSpine {
    pub documents: Vec<SpineDocument>,
    /// 顺序是否为推断得出（spine不可用）
    pub inferred: bool,
}

impl ResolvedSpine {
    /// 按阅读顺序列出章节ID
    pub fn chapter_order(&self) -> Vec<String> {
        self.documents.iter().map(|doc| doc.chapter_id.clone()).collect()
    }

    /// 与已保存的顺序比较是否一致
    pub fn matches(&self, stored_order: &[String]) -> bool {
        self.documents.len() == stored_order.len()
            && self
                .documents
                .iter()
                .zip(stored_order)
                .all(|(doc, stored)| &doc.chapter_id == stored)
    }
}

/// 解析阅读顺序
pub fn resolve_spine(package: &PackageDocument, opf_dir: &str) -> ResolvedSpine {
    let mut documents = Vec::new();
    let mut seen = HashSet::new();

    for (position, itemref) in package.spine.iter().enumerate() {
        let Some(document) = resolve_itemref(package, opf_dir, itemref) else {
            warn!(
                "⚠️  spine第{}项无法定位 (idref={:?}, href={:?})，已跳过",
                position + 1,
                itemref.idref,
                itemref.href
            );
            continue;
        };

        if !is_document_media_type(&document.media_type, &document.full_path) {
            debug!("跳过非内容文档: {} ({})", document.full_path, document.media_type);
            continue;
        }

        if seen.insert(document.full_path.clone()) {
            documents.push(document);
        }
    }

    if !documents.is_empty() {
        return ResolvedSpine {
            documents,
            inferred: false,
        };
    }

    let mut inferred: Vec<SpineDocument> = package
        .manifest
        .iter()
        .filter(|item| item.is_document())
        .filter(|item| seen.insert(item.full_path.clone()))
        .map(to_spine_document)
        .collect();
    inferred.sort_by(|a, b| a.chapter_id.cmp(&b.chapter_id));

    warn!(
        "⚠️  spine为空或全部无法解析，按章节ID字典序推断阅读顺序（{} 个文档）",
        inferred.len()
    );

    ResolvedSpine {
        documents: inferred,
        inferred: true,
    }
}

/// 依次尝试：直接href属性、idref查manifest id、idref当作href查manifest
fn resolve_itemref(
    package: &PackageDocument,
    opf_dir: &str,
    itemref: &SpineItemRef,
) -> Option<SpineDocument> {
    if let Some(href) = itemref.href.as_deref().filter(|h| !h.is_empty()) {
        let full_path = resolve_path(opf_dir, href);
        if let Some(item) = package.item_by_href(&full_path) {
            return Some(to_spine_document(item));
        }
        return Some(SpineDocument {
            chapter_id: normalize_chapter_id(&full_path),
            full_path,
            media_type: String::new(),
        });
    }

    let idref = itemref.idref.as_deref().filter(|id| !id.is_empty())?;
    if let Some(item) = package.item_by_id(idref) {
        return Some(to_spine_document(item));
    }

    package
        .item_by_href(idref)
        .or_else(|| package.item_by_href(&resolve_path(opf_dir, idref)))
        .map(to_spine_document)
}

fn to_spine_document(item: &ManifestItem) -> SpineDocument {
    SpineDocument {
        full_path: item.full_path.clone(),
        chapter_id: normalize_chapter_id(&item.full_path),
        media_type: item.media_type.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, href: &str, media_type: &str) -> ManifestItem {
        ManifestItem {
            id: id.to_string(),
            href: href.to_string(),
            full_path: resolve_path("OEBPS", href),
            media_type: media_type.to_string(),
            properties: None,
        }
    }

    fn itemref(idref: Option<&str>, href: Option<&str>) -> SpineItemRef {
        SpineItemRef {
            idref: idref.map(str::to_string),
            href: href.map(str::to_string),
            linear: true,
        }
    }

    fn package(spine: Vec<SpineItemRef>) -> PackageDocument {
        PackageDocument {
            manifest: vec![
                item("c2", "Text/ch2.xhtml", "application/xhtml+xml"),
                item("c1", "Text/ch1.xhtml", "application/xhtml+xml"),
                item("css", "Styles/s.css", "text/css"),
            ],
            spine,
            ..Default::default()
        }
    }

    #[test]
    fn test_resolves_declared_order() {
        let pkg = package(vec![itemref(Some("c1"), None), itemref(Some("c2"), None)]);
        let spine = resolve_spine(&pkg, "OEBPS");
        assert!(!spine.inferred);
        assert_eq!(spine.chapter_order(), vec!["Text/ch1.xhtml", "Text/ch2.xhtml"]);
        assert_eq!(spine.documents[0].full_path, "OEBPS/Text/ch1.xhtml");
    }

    #[test]
    fn test_fallback_strategies_and_skipping() {
        let pkg = package(vec![
            itemref(None, Some("Text/ch2.xhtml")),
            itemref(Some("missing"), None),
            itemref(Some("Text/ch1.xhtml"), None),
            itemref(Some("css"), None),
            itemref(Some("c2"), None),
        ]);
        let spine = resolve_spine(&pkg, "OEBPS");
        assert!(!spine.inferred);
        assert_eq!(spine.chapter_order(), vec!["Text/ch2.xhtml", "Text/ch1.xhtml"]);
    }

    #[test]
    fn test_empty_spine_is_inferred_lexicographically() {
        let pkg = package(Vec::new());
        let spine = resolve_spine(&pkg, "OEBPS");
        assert!(spine.inferred);
        assert_eq!(spine.chapter_order(), vec!["Text/ch1.xhtml", "Text/ch2.xhtml"]);
    }

    #[test]
    fn test_matches_stored_order() {
        let pkg = package(vec![itemref(Some("c1"), None), itemref(Some("c2"), None)]);
        let spine = resolve_spine(&pkg, "OEBPS");
        let stored = vec!["Text/ch1.xhtml".to_string(), "Text/ch2.xhtml".to_string()];
        assert!(spine.matches(&stored));
        assert!(!spine.matches(&stored[..1]));
    }
}
