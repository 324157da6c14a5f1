//! 映射健康检查模块
//!
//! 提供翻译进度统计、逐段问题诊断和映射目录扫描

// 标准库导入
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// 第三方crate导入
use tracing::{debug, warn};
use walkdir::WalkDir;

// 本地模块导入
use crate::api_constants::mapping_config;
use crate::error::Result;
use crate::mapping_store::{IntegrityReport, LoadedMapping, MappingStore};
use crate::project::require_mapping;
use crate::translation_error;

/// 译文长度与原文长度之比的上限
const MAX_LENGTH_RATIO: f64 = 3.0;
/// 译文长度与原文长度之比的下限
const MIN_LENGTH_RATIO: f64 = 0.3;

/// 章节进度
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChapterProgress {
    pub total: usize,
    pub translated: usize,
}

/// 映射健康报告
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub project_id: String,
    pub original_file: String,
    pub original_exists: bool,
    pub total: usize,
    pub translated: usize,
    /// 原文为空的段落数
    pub empty_originals: usize,
    pub integrity: IntegrityReport,
    /// 按首次出现顺序排列的章节进度
    pub chapters: Vec<(String, ChapterProgress)>,
}

impl HealthReport {
    /// 翻译进度（0.0 - 100.0）
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.translated as f64 / self.total as f64 * 100.0
    }

    fn from_mapping(mapping: &LoadedMapping) -> Self {
        let mut chapters: Vec<(String, ChapterProgress)> = Vec::new();
        for unit in &mapping.units {
            match chapters.last_mut() {
                Some((chapter, progress)) if *chapter == unit.chapter_id => {
                    progress.total += 1;
                    progress.translated += usize::from(unit.is_translated());
                }
                _ => chapters.push((
                    unit.chapter_id.clone(),
                    ChapterProgress {
                        total: 1,
                        translated: usize::from(unit.is_translated()),
                    },
                )),
            }
        }

        Self {
            project_id: mapping.project.project_id.clone(),
            original_file: mapping.project.original_file.clone(),
            original_exists: Path::new(&mapping.project.original_file).is_file(),
            total: mapping.units.len(),
            translated: mapping.units.iter().filter(|u| u.is_translated()).count(),
            empty_originals: mapping
                .units
                .iter()
                .filter(|u| u.original_text.trim().is_empty())
                .count(),
            integrity: mapping.integrity.clone(),
            chapters,
        }
    }
}

/// 检查映射目录
pub fn check_mapping(mapping_dir: &Path) -> Result<HealthReport> {
    let store = require_mapping(mapping_dir)?;
    let mapping = store.read_content()?;
    let report = HealthReport::from_mapping(&mapping);

    if !report.original_exists {
        warn!("⚠️  原始EPUB不可达: {}", report.original_file);
    }
    Ok(report)
}

/// 单段问题
#[derive(Debug, Clone, PartialEq)]
pub enum LineIssue {
    EmptyTranslation,
    IdenticalToOriginal,
    /// 译文明显过长（长度比）
    TooLong(f64),
    /// 译文明显过短（长度比）
    TooShort(f64),
}

impl LineIssue {
    pub fn describe(&self) -> String {
        match self {
            LineIssue::EmptyTranslation => "未翻译".to_string(),
            LineIssue::IdenticalToOriginal => "译文与原文相同".to_string(),
            LineIssue::TooLong(ratio) => format!("译文过长 (x{:.1})", ratio),
            LineIssue::TooShort(ratio) => format!("译文过短 (x{:.1})", ratio),
        }
    }
}

/// 单段诊断结果
#[derive(Debug, Clone)]
pub struct LineDiagnosis {
    pub sequence: usize,
    pub chapter_id: String,
    pub original_text: String,
    pub translated_text: String,
    pub translated_at: String,
    pub issues: Vec<LineIssue>,
}

/// 诊断单段译文
pub fn diagnose(original: &str, translated: &str) -> Vec<LineIssue> {
    let original = original.trim();
    let translated = translated.trim();

    if translated.is_empty() {
        return vec![LineIssue::EmptyTranslation];
    }
    if translated == original {
        return vec![LineIssue::IdenticalToOriginal];
    }

    let original_len = original.chars().count();
    if original_len == 0 {
        return Vec::new();
    }
    let ratio = translated.chars().count() as f64 / original_len as f64;
    if ratio > MAX_LENGTH_RATIO {
        vec![LineIssue::TooLong(ratio)]
    } else if ratio < MIN_LENGTH_RATIO {
        vec![LineIssue::TooShort(ratio)]
    } else {
        Vec::new()
    }
}

/// 查看序号区间 [start, end] 内的段落
pub fn inspect_range(mapping_dir: &Path, start: usize, end: Option<usize>) -> Result<Vec<LineDiagnosis>> {
    let store = require_mapping(mapping_dir)?;
    let mapping = store.read_content()?;
    let end = end.unwrap_or(usize::MAX);
    if start > end {
        return Err(translation_error!(
            input_validation,
            format!("{}-{}", start, end),
            "起始序号大于结束序号"
        ));
    }

    Ok(mapping
        .units
        .into_iter()
        .filter(|unit| unit.sequence >= start && unit.sequence <= end)
        .map(|unit| LineDiagnosis {
            issues: diagnose(&unit.original_text, &unit.translated_text),
            sequence: unit.sequence,
            chapter_id: unit.chapter_id,
            original_text: unit.original_text,
            translated_text: unit.translated_text,
            translated_at: unit.translated_at,
        })
        .collect())
}

/// 扫描到的映射项目
#[derive(Debug, Clone)]
pub struct ProjectStatus {
    pub mapping_dir: PathBuf,
    pub project_id: String,
    pub total: usize,
    pub translated: usize,
}

impl ProjectStatus {
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.translated as f64 / self.total as f64 * 100.0
    }
}

/// 递归扫描根目录下的所有映射项目，损坏的映射只记录警告
pub fn list_projects(root: &Path) -> Result<Vec<ProjectStatus>> {
    if !root.is_dir() {
        return Err(translation_error!(input_validation, root.display(), "目录不存在"));
    }

    let mut projects = BTreeMap::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() || entry.file_name() != mapping_config::CONTENT_FILE {
            continue;
        }
        let Some(dir) = entry.path().parent() else {
            continue;
        };

        match MappingStore::open(dir).read_content() {
            Ok(mapping) => {
                debug!("📁 发现映射: {}", dir.display());
                projects.insert(
                    dir.to_path_buf(),
                    ProjectStatus {
                        mapping_dir: dir.to_path_buf(),
                        project_id: mapping.project.project_id,
                        total: mapping.units.len(),
                        translated: mapping.units.iter().filter(|u| u.is_translated()).count(),
                    },
                );
            }
            Err(e) => warn!("⚠️  跳过损坏的映射 {}: {}", dir.display(), e),
        }
    }

    Ok(projects.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping_store::{ContentUnit, ProjectInfo};

    fn write_mapping(dir: &Path, units: &[ContentUnit]) -> MappingStore {
        let store = MappingStore::open(dir);
        store
            .write_content(&ProjectInfo::new(&dir.join("missing.epub")), units)
            .unwrap();
        store
    }

    fn units() -> Vec<ContentUnit> {
        let mut units = vec![
            ContentUnit::new(1, "Hello world".into(), "Text/ch1.xhtml".into()),
            ContentUnit::new(2, "Goodbye".into(), "Text/ch1.xhtml".into()),
            ContentUnit::new(3, "A fairly long sentence here".into(), "Text/ch2.xhtml".into()),
        ];
        units[0].translated_text = "你好世界".into();
        units[2].translated_text = "短".into();
        units
    }

    #[test]
    fn test_check_mapping_progress() {
        let dir = tempfile::tempdir().unwrap();
        write_mapping(dir.path(), &units());

        let report = check_mapping(dir.path()).unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.translated, 2);
        assert!(!report.original_exists);
        assert!(report.integrity.is_clean());
        assert!((report.progress() - 66.666).abs() < 0.01);
        assert_eq!(report.chapters.len(), 2);
        assert_eq!(
            report.chapters[0].1,
            ChapterProgress { total: 2, translated: 1 }
        );
    }

    #[test]
    fn test_check_missing_mapping() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_mapping(dir.path()).is_err());
    }

    #[test]
    fn test_diagnose() {
        assert_eq!(diagnose("Hello", ""), vec![LineIssue::EmptyTranslation]);
        assert_eq!(diagnose("Hello", "Hello "), vec![LineIssue::IdenticalToOriginal]);
        assert!(diagnose("Hello world", "你好世界").is_empty());
        assert!(matches!(diagnose("Hi", "这是一段很长很长的译文")[..], [LineIssue::TooLong(_)]));
        assert!(matches!(
            diagnose("A fairly long sentence here", "短")[..],
            [LineIssue::TooShort(_)]
        ));
    }

    #[test]
    fn test_inspect_range() {
        let dir = tempfile::tempdir().unwrap();
        write_mapping(dir.path(), &units());

        let lines = inspect_range(dir.path(), 2, Some(3)).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].sequence, 2);
        assert_eq!(lines[0].issues, vec![LineIssue::EmptyTranslation]);
        assert!(matches!(lines[1].issues[..], [LineIssue::TooShort(_)]));

        assert_eq!(inspect_range(dir.path(), 1, None).unwrap().len(), 3);
        assert!(inspect_range(dir.path(), 3, Some(1)).is_err());
    }

    #[test]
    fn test_list_projects_skips_corrupted() {
        let root = tempfile::tempdir().unwrap();
        let good = root.path().join("book_a");
        std::fs::create_dir_all(&good).unwrap();
        write_mapping(&good, &units());

        let bad = root.path().join("book_b");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join(mapping_config::CONTENT_FILE), "not json").unwrap();

        let projects = list_projects(root.path()).unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].mapping_dir, good);
        assert_eq!(projects[0].translated, 2);
    }
}
