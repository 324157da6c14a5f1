//! 映射存储模块
//!
//! 每个EPUB对应一个独立的映射目录（`<EPUB所在目录>/mapping/<EPUB文件名>/`），包含三张表：
//! - content_mapping.json：项目信息 + 逐段原文/译文
//! - images.json：图片资源（data URI）
//! - format_info.json：元数据、样式、阅读顺序、目录与manifest索引
//!
//! 读取时一律按 `line_number` 重新排序，不依赖磁盘上的键顺序；写入先落临时文件再原子替换

// 标准库导入
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

// 第三方crate导入
use chrono::Local;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// 本地模块导入
use crate::api_constants::extraction_config::DEFAULT_IMAGE_TEXT_THRESHOLD;
use crate::api_constants::mapping_config::{
    CONTENT_FILE, FORMAT_FILE, IMAGES_FILE, MAPPING_ROOT_DIR, UNIT_ID_PREFIX,
};
use crate::error::Result;
use crate::translation_error;

/// 一个可翻译文本单元
#[derive(Debug, Clone, PartialEq)]
pub struct ContentUnit {
    /// 不透明ID（存储键）
    pub id: String,
    /// 从1开始的全局序号，排序的唯一依据
    pub sequence: usize,
    pub original_text: String,
    /// 空字符串表示未翻译
    pub translated_text: String,
    /// 规范化章节ID
    pub chapter_id: String,
    /// 空字符串表示从未翻译
    pub translated_at: String,
}

impl ContentUnit {
    /// 新建未翻译单元
    pub fn new(sequence: usize, original_text: String, chapter_id: String) -> Self {
        Self {
            id: unit_id(sequence),
            sequence,
            original_text,
            translated_text: String::new(),
            chapter_id,
            translated_at: String::new(),
        }
    }

    pub fn is_translated(&self) -> bool {
        !self.translated_text.is_empty()
    }
}

/// 按序号生成单元ID
pub fn unit_id(sequence: usize) -> String {
    format!("{}{:06}", UNIT_ID_PREFIX, sequence)
}

/// 当前时间戳
pub fn now_timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// 项目信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub project_id: String,
    /// 原始EPUB路径，导出时需要可访问
    pub original_file: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ProjectInfo {
    pub fn new(original_file: &Path) -> Self {
        let now = Local::now();
        let timestamp = now.format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
        Self {
            project_id: format!("epub_{}", now.format("%Y%m%d_%H%M%S")),
            original_file: original_file.display().to_string(),
            created_at: timestamp.clone(),
            updated_at: timestamp,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredUnit {
    original_text: String,
    #[serde(default)]
    translated_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    line_number: Option<usize>,
    #[serde(default)]
    chapter_id: String,
    #[serde(default)]
    translated_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentTable {
    project_info: ProjectInfo,
    content_mappings: BTreeMap<String, StoredUnit>,
}

/// 图片资源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub original_path: String,
    /// `data:<mime>;base64,...`
    pub base64_data: String,
    pub mime_type: String,
    pub file_size: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ImageTable {
    image_mappings: BTreeMap<String, ImageAsset>,
}

/// 目录条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocRecord {
    pub title: String,
    pub href: String,
    pub level: usize,
}

/// manifest索引项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub id: String,
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<String>,
}

fn default_image_text_threshold() -> usize {
    DEFAULT_IMAGE_TEXT_THRESHOLD
}

/// 格式与结构信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// 样式表路径 -> 内容（非UTF-8时为data URI）
    #[serde(default)]
    pub css_styles: BTreeMap<String, String>,
    /// 阅读顺序（规范化章节ID）
    #[serde(default)]
    pub spine_order: Vec<String>,
    /// 阅读顺序是否为推断
    #[serde(default)]
    pub spine_inferred: bool,
    #[serde(default)]
    pub toc_structure: Vec<TocRecord>,
    #[serde(default)]
    pub manifest_items: BTreeMap<String, ManifestRecord>,
    /// 导入时使用的纯图片节点阈值，导出时必须沿用
    #[serde(default = "default_image_text_threshold")]
    pub image_text_threshold: usize,
}

impl Default for FormatInfo {
    fn default() -> Self {
        Self {
            metadata: BTreeMap::new(),
            css_styles: BTreeMap::new(),
            spine_order: Vec::new(),
            spine_inferred: false,
            toc_structure: Vec::new(),
            manifest_items: BTreeMap::new(),
            image_text_threshold: DEFAULT_IMAGE_TEXT_THRESHOLD,
        }
    }
}

/// 序号完整性报告
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrityReport {
    pub total: usize,
    /// 1..=max 中缺失的序号
    pub gaps: Vec<usize>,
    /// 出现多次的序号
    pub duplicates: Vec<usize>,
}

impl IntegrityReport {
    /// 根据序号列表计算
    pub fn from_sequences(sequences: &[usize]) -> Self {
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for &sequence in sequences {
            *counts.entry(sequence).or_default() += 1;
        }

        let max = counts.keys().next_back().copied().unwrap_or(0);
        let gaps = (1..=max).filter(|n| !counts.contains_key(n)).collect();
        let duplicates = counts
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(sequence, _)| *sequence)
            .collect();

        Self {
            total: sequences.len(),
            gaps,
            duplicates,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.gaps.is_empty() && self.duplicates.is_empty()
    }
}

/// 一次完整读取的结果
#[derive(Debug, Clone)]
pub struct LoadedMapping {
    pub project: ProjectInfo,
    /// 按序号排序
    pub units: Vec<ContentUnit>,
    pub integrity: IntegrityReport,
}

impl LoadedMapping {
    pub fn originals(&self) -> Vec<String> {
        self.units.iter().map(|u| u.original_text.clone()).collect()
    }

    pub fn translations(&self) -> Vec<String> {
        self.units.iter().map(|u| u.translated_text.clone()).collect()
    }
}

/// 保存结果摘要
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SaveSummary {
    /// 映射表中的单元数
    pub total: usize,
    /// 本次实际变化的单元数
    pub changed: usize,
}

/// 单个EPUB的映射目录
#[derive(Debug, Clone)]
pub struct MappingStore {
    dir: PathBuf,
}

impl MappingStore {
    /// 打开已知的映射目录
    pub fn open<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// 由EPUB路径推导映射目录
    pub fn for_epub<P: AsRef<Path>>(epub_path: P) -> Self {
        let epub_path = epub_path.as_ref();
        let parent = epub_path.parent().unwrap_or_else(|| Path::new(""));
        let stem = epub_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "book".to_string());
        Self::open(parent.join(MAPPING_ROOT_DIR).join(stem))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn content_path(&self) -> PathBuf {
        self.dir.join(CONTENT_FILE)
    }

    pub fn images_path(&self) -> PathBuf {
        self.dir.join(IMAGES_FILE)
    }

    pub fn format_path(&self) -> PathBuf {
        self.dir.join(FORMAT_FILE)
    }

    /// 段落映射表是否存在
    pub fn exists(&self) -> bool {
        self.content_path().is_file()
    }

    /// 写入整张段落映射表
    pub fn write_content(&self, project: &ProjectInfo, units: &[ContentUnit]) -> Result<()> {
        let content_mappings = units
            .iter()
            .map(|unit| {
                (
                    unit.id.clone(),
                    StoredUnit {
                        original_text: unit.original_text.clone(),
                        translated_text: unit.translated_text.clone(),
                        line_number: Some(unit.sequence),
                        chapter_id: unit.chapter_id.clone(),
                        translated_at: unit.translated_at.clone(),
                    },
                )
            })
            .collect();

        let table = ContentTable {
            project_info: project.clone(),
            content_mappings,
        };
        write_json_atomic(&self.content_path(), &table)?;
        debug!("💾 写入段落映射: {} 条", units.len());
        Ok(())
    }

    /// 读取段落映射表，按序号排序并检查完整性
    ///
    /// 缺少序号字段是致命错误；序号缺口或重复只记录警告，按派生顺序继续
    pub fn read_content(&self) -> Result<LoadedMapping> {
        let path = self.content_path();
        let table: ContentTable = read_json(&path)?;

        let mut units = Vec::with_capacity(table.content_mappings.len());
        for (id, stored) in table.content_mappings {
            let sequence = stored.line_number.ok_or_else(|| {
                translation_error!(
                    corrupted,
                    path.display(),
                    format!("条目 {} 缺少 line_number 字段", id)
                )
            })?;
            units.push(ContentUnit {
                id,
                sequence,
                original_text: stored.original_text,
                translated_text: stored.translated_text,
                chapter_id: stored.chapter_id,
                translated_at: stored.translated_at,
            });
        }
        units.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.id.cmp(&b.id)));

        let sequences: Vec<usize> = units.iter().map(|u| u.sequence).collect();
        let integrity = IntegrityReport::from_sequences(&sequences);
        if !integrity.is_clean() {
            warn!(
                "⚠️  序号不连续: 缺失 {} 个，重复 {} 个，按派生顺序继续 ({})",
                integrity.gaps.len(),
                integrity.duplicates.len(),
                path.display()
            );
        }

        Ok(LoadedMapping {
            project: table.project_info,
            units,
            integrity,
        })
    }

    /// 读取（原文列表, 译文列表），严格按序号排序
    pub fn load(&self) -> Result<(Vec<String>, Vec<String>)> {
        let mapping = self.read_content()?;
        Ok((mapping.originals(), mapping.translations()))
    }

    /// 按位置写回译文，不改变序号
    ///
    /// 译文列表比映射短时，多出的单元保持原状；只有内容变化的单元会更新 translated_at
    pub fn save(&self, translations: &[String]) -> Result<SaveSummary> {
        let mut mapping = self.read_content()?;
        if translations.len() != mapping.units.len() {
            warn!(
                "⚠️  译文数量({})与映射条目数量({})不一致，仅按位置写回重叠部分",
                translations.len(),
                mapping.units.len()
            );
        }

        let now = now_timestamp();
        let mut changed = 0;
        for (unit, translation) in mapping.units.iter_mut().zip(translations) {
            if unit.translated_text != *translation {
                unit.translated_text = translation.clone();
                unit.translated_at = if translation.is_empty() {
                    String::new()
                } else {
                    now.clone()
                };
                changed += 1;
            }
        }

        mapping.project.updated_at = now;
        self.write_content(&mapping.project, &mapping.units)?;

        Ok(SaveSummary {
            total: mapping.units.len(),
            changed,
        })
    }

    /// 写入图片表
    pub fn write_images(&self, images: &[ImageAsset]) -> Result<()> {
        let table = ImageTable {
            image_mappings: images
                .iter()
                .map(|image| (image.original_path.clone(), image.clone()))
                .collect(),
        };
        write_json_atomic(&self.images_path(), &table)
    }

    /// 删除图片表，不存在时什么也不做
    pub fn remove_images(&self) -> Result<()> {
        let path = self.images_path();
        if path.is_file() {
            fs::remove_file(&path)
                .map_err(|e| translation_error!(file_op, path.display(), "删除", e))?;
        }
        Ok(())
    }

    /// 读取图片表（不存在时为空）
    pub fn read_images(&self) -> Result<Vec<ImageAsset>> {
        let path = self.images_path();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let table: ImageTable = read_json(&path)?;
        Ok(table.image_mappings.into_values().collect())
    }

    /// 写入格式信息
    pub fn write_format_info(&self, info: &FormatInfo) -> Result<()> {
        write_json_atomic(&self.format_path(), info)
    }

    /// 读取格式信息（不存在时为默认值）
    pub fn read_format_info(&self) -> Result<FormatInfo> {
        let path = self.format_path();
        if !path.is_file() {
            return Ok(FormatInfo::default());
        }
        read_json(&path)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path)
        .map_err(|e| translation_error!(file_op, path.display(), "读取", e))?;
    serde_json::from_str(&data).map_err(|e| translation_error!(corrupted, path.display(), e))
}

/// 写入临时文件后重命名覆盖目标
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .map_err(|e| translation_error!(file_op, dir.display(), "创建目录", e))?;

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| translation_error!(corrupted, path.display(), e))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| translation_error!(file_op, path.display(), "创建临时文件", e))?;
    temp.write_all(json.as_bytes())
        .map_err(|e| translation_error!(file_op, path.display(), "写入", e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| translation_error!(file_op, path.display(), "同步", e))?;
    temp.persist(path)
        .map_err(|e| translation_error!(file_op, path.display(), "替换", e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TranslationError;

    fn units(texts: &[&str]) -> Vec<ContentUnit> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| ContentUnit::new(i + 1, text.to_string(), "Text/ch1.xhtml".to_string()))
            .collect()
    }

    fn store() -> (tempfile::TempDir, MappingStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MappingStore::open(dir.path().join("mapping").join("book"));
        (dir, store)
    }

    #[test]
    fn test_for_epub_directory_layout() {
        let store = MappingStore::for_epub("/books/novel.epub");
        assert_eq!(store.dir(), Path::new("/books/mapping/novel"));
        assert_eq!(store.content_path(), Path::new("/books/mapping/novel/content_mapping.json"));
    }

    #[test]
    fn test_write_and_load_ordered() {
        let (_dir, store) = store();
        let project = ProjectInfo::new(Path::new("book.epub"));
        store.write_content(&project, &units(&["a", "b", "c"])).unwrap();

        let (originals, translations) = store.load().unwrap();
        assert_eq!(originals, vec!["a", "b", "c"]);
        assert_eq!(translations, vec!["", "", ""]);
        assert!(store.exists());
    }

    #[test]
    fn test_load_ignores_key_order() {
        let (_dir, store) = store();
        fs::create_dir_all(store.dir()).unwrap();
        let json = r#"{
            "project_info": {"project_id": "p", "original_file": "b.epub", "created_at": "t", "updated_at": "t"},
            "content_mappings": {
                "zzz": {"original_text": "first", "line_number": 1, "chapter_id": "Text/a.xhtml"},
                "aaa": {"original_text": "third", "line_number": 3, "chapter_id": "Text/a.xhtml"},
                "mmm": {"original_text": "second", "line_number": 2, "chapter_id": "Text/a.xhtml"}
            }
        }"#;
        fs::write(store.content_path(), json).unwrap();

        let (originals, _) = store.load().unwrap();
        assert_eq!(originals, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_missing_sequence_is_fatal() {
        let (_dir, store) = store();
        fs::create_dir_all(store.dir()).unwrap();
        let json = r#"{
            "project_info": {"project_id": "p", "original_file": "b.epub", "created_at": "t", "updated_at": "t"},
            "content_mappings": {
                "line_000001": {"original_text": "first", "line_number": 1},
                "line_000002": {"original_text": "second"}
            }
        }"#;
        fs::write(store.content_path(), json).unwrap();

        match store.load() {
            Err(TranslationError::MappingCorrupted { details, .. }) => {
                assert!(details.contains("line_000002"))
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_gaps_and_duplicates_are_reported() {
        let (_dir, store) = store();
        let project = ProjectInfo::new(Path::new("book.epub"));
        let mut list = units(&["a", "b", "c", "d"]);
        list[2].sequence = 5;
        list[3].sequence = 2;
        list[3].id = "line_dup".to_string();
        store.write_content(&project, &list).unwrap();

        let mapping = store.read_content().unwrap();
        assert_eq!(mapping.integrity.gaps, vec![3, 4]);
        assert_eq!(mapping.integrity.duplicates, vec![2]);
        assert!(!mapping.integrity.is_clean());
        assert_eq!(mapping.originals(), vec!["a", "b", "d", "c"]);
    }

    #[test]
    fn test_save_by_position() {
        let (_dir, store) = store();
        let project = ProjectInfo::new(Path::new("book.epub"));
        store.write_content(&project, &units(&["a", "b", "c"])).unwrap();

        let summary = store
            .save(&["甲".to_string(), String::new(), "丙".to_string()])
            .unwrap();
        assert_eq!(summary, SaveSummary { total: 3, changed: 2 });

        let mapping = store.read_content().unwrap();
        assert_eq!(mapping.translations(), vec!["甲", "", "丙"]);
        assert!(!mapping.units[0].translated_at.is_empty());
        assert!(mapping.units[1].translated_at.is_empty());
        assert_eq!(mapping.units[2].sequence, 3);
        assert_eq!(mapping.project.project_id, project.project_id);
    }

    #[test]
    fn test_save_keeps_timestamp_of_unchanged_units() {
        let (_dir, store) = store();
        let project = ProjectInfo::new(Path::new("book.epub"));
        let mut list = units(&["a", "b"]);
        list[0].translated_text = "甲".to_string();
        list[0].translated_at = "2024-01-01T00:00:00".to_string();
        store.write_content(&project, &list).unwrap();

        // 较短的译文列表不影响末尾单元
        store.save(&["甲".to_string()]).unwrap();
        let mapping = store.read_content().unwrap();
        assert_eq!(mapping.units[0].translated_at, "2024-01-01T00:00:00");
        assert_eq!(mapping.translations(), vec!["甲", ""]);
    }

    #[test]
    fn test_images_and_format_info() {
        let (_dir, store) = store();
        assert!(store.read_images().unwrap().is_empty());
        assert_eq!(store.read_format_info().unwrap(), FormatInfo::default());

        let image = ImageAsset {
            original_path: "OEBPS/Images/a.png".to_string(),
            base64_data: "data:image/png;base64,AAAA".to_string(),
            mime_type: "image/png".to_string(),
            file_size: 3,
        };
        store.write_images(std::slice::from_ref(&image)).unwrap();
        assert_eq!(store.read_images().unwrap(), vec![image]);

        store.remove_images().unwrap();
        assert!(!store.images_path().exists());
        store.remove_images().unwrap();

        let info = FormatInfo {
            spine_order: vec!["Text/ch1.xhtml".to_string()],
            image_text_threshold: 4,
            ..Default::default()
        };
        store.write_format_info(&info).unwrap();
        assert_eq!(store.read_format_info().unwrap(), info);
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let (_dir, store) = store();
        let project = ProjectInfo::new(Path::new("book.epub"));
        store.write_content(&project, &units(&["a"])).unwrap();
        store.write_content(&project, &units(&["a", "b"])).unwrap();

        let names: Vec<String> = fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![CONTENT_FILE.to_string()]);
    }
}
