use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use tracing::warn;

use crate::api_constants::error_messages;
use crate::error::Result;
use crate::translation_error;

/// 初始化日志系统
pub fn init_logging(verbose: bool, quiet: bool) {
    if quiet {
        return;
    }

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// 验证输入EPUB文件
pub fn validate_input_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(translation_error!(input_validation, path.display(), error_messages::NOT_EPUB));
    }

    if !path.is_file() {
        return Err(translation_error!(input_validation, path.display(), "输入路径不是文件"));
    }

    match path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("epub") => {}
        Some(ext) => warn!("⚠️  文件扩展名不是EPUB: {}", ext.to_string_lossy()),
        None => warn!("⚠️  文件没有扩展名: {}", path.display()),
    }

    Ok(())
}

/// 生成导出文件路径: 原文件名加 `_translated` 后缀，与原文件同目录
pub fn generate_output_path(original: &Path, output: Option<&Path>) -> PathBuf {
    if let Some(output_path) = output {
        return output_path.to_path_buf();
    }

    let stem = original.file_stem().unwrap_or_default();
    let output_name = format!("{}_translated.epub", stem.to_string_lossy());

    match original.parent() {
        Some(parent) => parent.join(output_name),
        None => PathBuf::from(output_name),
    }
}

/// 编码为data URI
pub fn to_data_uri(mime_type: &str, data: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        general_purpose::STANDARD.encode(data)
    )
}

/// 读取术语表JSON（`{"原文": "译文"}`）
pub fn load_glossary(path: &Path) -> Result<BTreeMap<String, String>> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| translation_error!(file_op, path.display(), "读取", e))?;
    let glossary: BTreeMap<String, String> = serde_json::from_str(&data)
        .map_err(|e| translation_error!(config, "glossary", format!("{}: {}", path.display(), e)))?;

    Ok(glossary
        .into_iter()
        .filter(|(source, target)| !source.trim().is_empty() && !target.trim().is_empty())
        .collect())
}

/// 截断过长文本用于显示
pub fn truncate_for_display(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}…", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_output_path() {
        let original = Path::new("/books/novel.epub");
        assert_eq!(
            generate_output_path(original, None),
            PathBuf::from("/books/novel_translated.epub")
        );
        assert_eq!(
            generate_output_path(original, Some(Path::new("out.epub"))),
            PathBuf::from("out.epub")
        );
    }

    #[test]
    fn test_data_uri_round_trip() {
        let uri = to_data_uri("image/png", &[1, 2, 3]);
        assert!(uri.starts_with("data:image/png;base64,"));
        let payload = uri.split(',').nth(1).unwrap();
        assert_eq!(general_purpose::STANDARD.decode(payload).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_validate_input_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.epub");
        std::fs::write(&path, b"x").unwrap();
        assert!(validate_input_file(&path).is_ok());
        assert!(validate_input_file(&dir.path().join("missing.epub")).is_err());
        assert!(validate_input_file(dir.path()).is_err());
    }

    #[test]
    fn test_load_glossary_skips_blank_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glossary.json");
        std::fs::write(&path, r#"{"Hogwarts": "霍格沃茨", "": "x", "Muggle": " "}"#).unwrap();

        let glossary = load_glossary(&path).unwrap();
        assert_eq!(glossary.len(), 1);
        assert_eq!(glossary.get("Hogwarts").map(String::as_str), Some("霍格沃茨"));
    }

    #[test]
    fn test_truncate_for_display() {
        assert_eq!(truncate_for_display("短文本", 10), "短文本");
        assert_eq!(truncate_for_display("abcdef", 3), "abc…");
    }
}
