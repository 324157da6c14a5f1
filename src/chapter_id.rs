//! 章节ID规范化
//!
//! 将EPUB内部的原始文档路径映射为唯一的规范章节键（`Text/<文件名>`）。
//! 导入与导出都通过同一个函数计算章节ID，导出才能找到导入时看到的同一份文档。

use crate::api_constants::extraction_config::{CANONICAL_FOLDER, CONTAINER_ROOT_PREFIXES};

/// 规范化章节ID
///
/// 规则按优先级：
/// 1. 统一分隔符并剥离一个已知的容器根前缀（`OEBPS/`、`EPUB/`、`OPS/`，不区分大小写）
/// 2. 已经以 `Text/` 开头则原样返回
/// 3. 路径中出现 `text` 目录段时，从该段开始重建
/// 4. 否则合成为 `Text/<文件名>`
///
/// 幂等：对已规范化的键再次调用返回相同结果
pub fn normalize_chapter_id(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let mut path = raw.replace('\\', "/");
    while path.starts_with('/') {
        path.remove(0);
    }

    let lower = path.to_lowercase();
    if let Some(prefix) = CONTAINER_ROOT_PREFIXES
        .iter()
        .find(|prefix| lower.starts_with(*prefix))
    {
        path = path[prefix.len()..].to_string();
    }

    let lower = path.to_lowercase();
    let canonical_prefix = format!("{}/", CANONICAL_FOLDER.to_lowercase());
    if lower.starts_with(&canonical_prefix) {
        return path;
    }

    let marker = format!("/{}", canonical_prefix);
    if let Some(idx) = lower.rfind(&marker) {
        return path[idx + 1..].to_string();
    }

    let filename = path.rsplit('/').next().unwrap_or(&path);
    format!("{}/{}", CANONICAL_FOLDER, filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_container_prefix() {
        assert_eq!(normalize_chapter_id("OEBPS/Text/ch01.xhtml"), "Text/ch01.xhtml");
        assert_eq!(normalize_chapter_id("epub/text/ch01.xhtml"), "text/ch01.xhtml");
        assert_eq!(normalize_chapter_id("OPS/Text/ch01.xhtml"), "Text/ch01.xhtml");
    }

    #[test]
    fn test_already_canonical_is_unchanged() {
        assert_eq!(normalize_chapter_id("Text/ch01.xhtml"), "Text/ch01.xhtml");
    }

    #[test]
    fn test_rebuilds_from_text_segment() {
        assert_eq!(
            normalize_chapter_id("book/content/Text/part1/ch01.xhtml"),
            "Text/part1/ch01.xhtml"
        );
        assert_eq!(normalize_chapter_id("OEBPS\\Text\\ch02.xhtml"), "Text/ch02.xhtml");
    }

    #[test]
    fn test_synthesizes_canonical_key() {
        assert_eq!(normalize_chapter_id("OEBPS/chapter1.xhtml"), "Text/chapter1.xhtml");
        assert_eq!(normalize_chapter_id("xhtml/chapter1.xhtml"), "Text/chapter1.xhtml");
        assert_eq!(normalize_chapter_id("chapter1.xhtml"), "Text/chapter1.xhtml");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "OEBPS/Text/ch01.xhtml",
            "EPUB/xhtml/ch02.xhtml",
            "a/b/TEXT/c.html",
            "/OPS/nav.xhtml",
            "plain.xhtml",
        ];
        for raw in inputs {
            let once = normalize_chapter_id(raw);
            assert_eq!(normalize_chapter_id(&once), once, "输入 {} 不幂等", raw);
        }
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(normalize_chapter_id(""), "");
    }
}
