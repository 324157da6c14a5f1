//! 项目流程模块
//!
//! 串联容器读取、阅读顺序解析、线性化、映射存储、译文继承与重建：
//! - `import_epub`：生成（或合并更新）映射目录
//! - `load_mapping` / `save_translations`：按序号读写译文
//! - `export_epub`：基于原EPUB结构导出译文EPUB
//! - `translate_mapping`：分批翻译未翻译的段落
//! - `edit_translation`：手动修改单段译文

// 标准库导入
use std::path::{Path, PathBuf};

// 第三方crate导入
use tracing::{info, warn};

// 本地模块导入
use crate::api_constants::error_messages;
use crate::config::ExtractionConfig;
use crate::epub_container::EpubArchive;
use crate::error::Result;
use crate::html_processor::LeafRule;
use crate::linearizer::linearize_archive;
use crate::mapping_store::{
    now_timestamp, FormatInfo, ImageAsset, ManifestRecord, MappingStore, ProjectInfo,
    SaveSummary, TocRecord,
};
use crate::merger::CarryOver;
use crate::reconstructor::{reconstruct, ReconstructionReport};
use crate::spine::{resolve_spine, ResolvedSpine};
use crate::translation_error;
use crate::translator::{
    translate_pending, BatchLimits, CancelFlag, ChunkAligner, PipelineReport, TextBackend,
};
use crate::utils::{generate_output_path, to_data_uri, validate_input_file};

/// 导入结果
#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub mapping_dir: PathBuf,
    pub units: usize,
    /// 从旧映射继承的译文数
    pub carried: usize,
    pub documents: usize,
    pub skipped_documents: Vec<String>,
    pub images: usize,
    pub spine_inferred: bool,
    /// 是否为对已有映射的重新导入
    pub reimport: bool,
}

/// 导出结果
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub output_path: PathBuf,
    pub units: usize,
    pub translated: usize,
    pub reconstruction: ReconstructionReport,
}

/// 导入EPUB
///
/// 映射目录已存在时自动继承已确认的译文，并保留项目ID与创建时间
pub fn import_epub(input: &Path, extraction: &ExtractionConfig) -> Result<ImportSummary> {
    validate_input_file(input)?;

    let archive = EpubArchive::open(input)?;
    let spine = resolve_spine(archive.package(), &archive.opf_dir());
    let rule = LeafRule::new(extraction.image_text_threshold);
    let linearization = linearize_archive(&archive, &spine, &rule);
    let mut units = linearization.units;

    let store = MappingStore::for_epub(input);
    let original_file = input.canonicalize().unwrap_or_else(|_| input.to_path_buf());

    let reimport = store.exists();
    let mut carried = 0;
    let project = if reimport {
        let previous = store.read_content()?;
        let carry = CarryOver::from_units(&previous.units);
        carried = carry.apply(&mut units);
        info!(
            "♻️  重新导入: 旧映射 {} 段, 可继承 {} 条译文, 实际继承 {} 段",
            previous.units.len(),
            carry.len(),
            carried
        );
        ProjectInfo {
            original_file: original_file.display().to_string(),
            updated_at: now_timestamp(),
            ..previous.project
        }
    } else {
        ProjectInfo::new(&original_file)
    };

    store.write_content(&project, &units)?;
    store.write_format_info(&build_format_info(&archive, &spine, &rule))?;

    let images = if extraction.include_images {
        let images = collect_images(&archive);
        store.write_images(&images)?;
        images.len()
    } else {
        // 重新导入时不保留上一次的图片表
        store.remove_images()?;
        0
    };

    info!("✅ 导入完成: {} 段 -> {}", units.len(), store.dir().display());
    Ok(ImportSummary {
        mapping_dir: store.dir().to_path_buf(),
        units: units.len(),
        carried,
        documents: linearization.documents,
        skipped_documents: linearization.skipped,
        images,
        spine_inferred: spine.inferred,
        reimport,
    })
}

/// 读取（原文列表, 译文列表）
pub fn load_mapping(mapping_dir: &Path) -> Result<(Vec<String>, Vec<String>)> {
    require_mapping(mapping_dir)?.load()
}

/// 按位置写回译文
pub fn save_translations(mapping_dir: &Path, translations: &[String]) -> Result<SaveSummary> {
    require_mapping(mapping_dir)?.save(translations)
}

/// 导出译文EPUB，原EPUB不会被修改
pub fn export_epub(mapping_dir: &Path, output: Option<&Path>) -> Result<ExportSummary> {
    let store = require_mapping(mapping_dir)?;
    let mapping = store.read_content()?;
    let format = store.read_format_info()?;

    let original = PathBuf::from(&mapping.project.original_file);
    if !original.is_file() {
        return Err(translation_error!(
            input_validation,
            original.display(),
            error_messages::ORIGINAL_MISSING
        ));
    }

    let output_path = generate_output_path(&original, output);
    if same_file(&original, &output_path) {
        return Err(translation_error!(
            input_validation,
            output_path.display(),
            "输出路径不能与原EPUB相同"
        ));
    }

    let archive = EpubArchive::open(&original)?;
    let spine = resolve_spine(archive.package(), &archive.opf_dir());
    if !format.spine_order.is_empty() && !spine.matches(&format.spine_order) {
        warn!("⚠️  当前阅读顺序与导入时记录的不一致，译文可能错位，建议重新导入");
    }
    if spine.inferred {
        warn!("⚠️  阅读顺序为推断结果");
    }

    let rule = LeafRule::new(format.image_text_threshold);
    let (replacements, reconstruction) = reconstruct(&archive, &spine, &mapping.units, &rule);
    archive.write_with_replacements(&output_path, &replacements)?;

    info!("✅ 导出完成: {}", output_path.display());
    Ok(ExportSummary {
        output_path,
        units: mapping.units.len(),
        translated: mapping.units.iter().filter(|u| u.is_translated()).count(),
        reconstruction,
    })
}

/// 修改指定序号的译文
pub fn edit_translation(mapping_dir: &Path, sequence: usize, text: &str) -> Result<()> {
    let store = require_mapping(mapping_dir)?;
    let mapping = store.read_content()?;

    let position = mapping
        .units
        .iter()
        .position(|unit| unit.sequence == sequence)
        .ok_or_else(|| {
            translation_error!(
                input_validation,
                sequence,
                format!("序号超出范围 (共 {} 段)", mapping.units.len())
            )
        })?;

    let mut translations = mapping.translations();
    translations[position] = text.trim().to_string();
    store.save(&translations)?;
    info!("✏️  已更新第 {} 段译文", sequence);
    Ok(())
}

/// 翻译映射中尚未翻译的段落，每批完成后立即保存
pub async fn translate_mapping<B: TextBackend>(
    mapping_dir: &Path,
    aligner: &ChunkAligner<B>,
    limits: BatchLimits,
    repair_passes: usize,
    cancel: &CancelFlag,
) -> Result<PipelineReport> {
    let store = require_mapping(mapping_dir)?;
    let (originals, mut translations) = store.load()?;

    translate_pending(
        aligner,
        &originals,
        &mut translations,
        limits,
        repair_passes,
        cancel,
        |current| store.save(current).map(|_| ()),
    )
    .await
}

/// 打开已存在的映射目录
pub(crate) fn require_mapping(mapping_dir: &Path) -> Result<MappingStore> {
    let store = MappingStore::open(mapping_dir);
    if !store.exists() {
        return Err(translation_error!(
            input_validation,
            mapping_dir.display(),
            error_messages::MAPPING_MISSING
        ));
    }
    Ok(store)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// 汇总元数据、样式、阅读顺序、目录与manifest索引
fn build_format_info(archive: &EpubArchive, spine: &ResolvedSpine, rule: &LeafRule) -> FormatInfo {
    let package = archive.package();

    let css_styles = archive
        .stylesheets()
        .into_iter()
        .filter_map(|item| {
            let bytes = archive.read_entry(&item.full_path)?;
            let content = match std::str::from_utf8(bytes) {
                Ok(text) => text.to_string(),
                Err(_) => to_data_uri(&item.media_type, bytes),
            };
            Some((item.full_path.clone(), content))
        })
        .collect();

    let toc_structure = archive
        .toc()
        .into_iter()
        .map(|entry| TocRecord {
            title: entry.title,
            href: entry.href,
            level: entry.level,
        })
        .collect();

    let manifest_items = package
        .manifest
        .iter()
        .map(|item| {
            (
                item.href.clone(),
                ManifestRecord {
                    id: item.id.clone(),
                    media_type: item.media_type.clone(),
                    properties: item.properties.clone(),
                },
            )
        })
        .collect();

    FormatInfo {
        metadata: package.metadata.clone(),
        css_styles,
        spine_order: spine.chapter_order(),
        spine_inferred: spine.inferred,
        toc_structure,
        manifest_items,
        image_text_threshold: rule.image_text_threshold,
    }
}

fn collect_images(archive: &EpubArchive) -> Vec<ImageAsset> {
    archive
        .images()
        .into_iter()
        .filter_map(|item| {
            let Some(bytes) = archive.read_entry(&item.full_path) else {
                warn!("⚠️  图片缺失: {}", item.full_path);
                return None;
            };
            Some(ImageAsset {
                original_path: item.full_path.clone(),
                base64_data: to_data_uri(&item.media_type, bytes),
                mime_type: item.media_type.clone(),
                file_size: bytes.len(),
            })
        })
        .collect()
}
