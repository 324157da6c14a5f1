//! EPUB容器读写模块
//!
//! 此模块负责：
//! - 读取ZIP容器中的全部条目（保持原始顺序与压缩方式）
//! - 解析 META-INF/container.xml、OPF包文档、NCX与EPUB3导航文档
//! - 以原结构为基础写出新的容器，仅替换指定条目的内容

// 标准库导入
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

// 第三方crate导入
use percent_encoding::percent_decode_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

// 本地模块导入
use crate::error::{Result, TranslationError};
use crate::translation_error;

const CONTAINER_XML_PATH: &str = "META-INF/container.xml";
const MIMETYPE_PATH: &str = "mimetype";
const EPUB_MIMETYPE: &[u8] = b"application/epub+zip";

/// 容器中的一个条目
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// ZIP内完整路径
    pub name: String,
    /// 解压后的内容
    pub data: Vec<u8>,
    /// 原始条目是否未压缩存储
    pub stored: bool,
}

/// OPF manifest中的一项
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestItem {
    pub id: String,
    /// 相对OPF目录的路径（已做百分号解码）
    pub href: String,
    /// ZIP内完整路径
    pub full_path: String,
    pub media_type: String,
    pub properties: Option<String>,
}

impl ManifestItem {
    /// 是否为内容文档（XHTML/HTML）
    pub fn is_document(&self) -> bool {
        is_document_media_type(&self.media_type, &self.href)
    }

    /// 是否为图片
    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    /// 是否为样式表
    pub fn is_stylesheet(&self) -> bool {
        self.media_type == "text/css"
    }

    fn has_property(&self, property: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|props| props.split_ascii_whitespace().any(|p| p == property))
    }
}

/// spine中的一个itemref（原样保留，解析交给SpineResolver）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpineItemRef {
    pub idref: Option<String>,
    /// 非标准的直接文件名属性
    pub href: Option<String>,
    pub linear: bool,
}

/// 扁平化的目录条目
#[derive(Debug, Clone, PartialEq)]
pub struct TocEntry {
    pub title: String,
    pub href: String,
    /// 层级，从1开始
    pub level: usize,
}

/// 解析后的OPF包文档
#[derive(Debug, Clone, Default)]
pub struct PackageDocument {
    /// Dublin Core元数据（同名多值只取第一个）
    pub metadata: BTreeMap<String, String>,
    pub manifest: Vec<ManifestItem>,
    pub spine: Vec<SpineItemRef>,
    /// spine的toc属性（指向NCX的manifest id）
    pub toc_id: Option<String>,
}

impl PackageDocument {
    /// 按id查找manifest项
    pub fn item_by_id(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.id == id)
    }

    /// 按href查找manifest项
    pub fn item_by_href(&self, href: &str) -> Option<&ManifestItem> {
        self.manifest
            .iter()
            .find(|item| item.href == href || item.full_path == href)
    }
}

/// 已打开的EPUB容器
///
/// 打开时一次性读入全部条目，之后的解析与重建都基于内存中的副本，原文件不会被修改
pub struct EpubArchive {
    path: PathBuf,
    entries: Vec<ArchiveEntry>,
    index: HashMap<String, usize>,
    opf_path: String,
    package: PackageDocument,
}

impl EpubArchive {
    /// 打开EPUB文件
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = path.display().to_string();
        let file = fs::File::open(path)
            .map_err(|e| translation_error!(file_op, source, "读取", e))?;

        let mut archive =
            ZipArchive::new(BufReader::new(file)).map_err(|e| zip_error(&source, e))?;

        let mut entries = Vec::with_capacity(archive.len());
        let mut index = HashMap::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).map_err(|e| zip_error(&source, e))?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let stored = file.compression() == CompressionMethod::Stored;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .map_err(|e| translation_error!(container, source, format!("{}: {}", name, e)))?;
            index.insert(name.clone(), entries.len());
            entries.push(ArchiveEntry { name, data, stored });
        }
        debug!("📦 读取容器条目: {} 个", entries.len());

        let container_xml = entries
            .get(*index.get(CONTAINER_XML_PATH).ok_or_else(|| {
                translation_error!(container, source, "缺少 META-INF/container.xml")
            })?)
            .map(|entry| entry.data.clone())
            .unwrap_or_default();
        let opf_path = parse_container_xml(&container_xml)
            .map_err(|details| translation_error!(container, source, details))?;

        let opf_bytes = index
            .get(&opf_path)
            .and_then(|i| entries.get(*i))
            .map(|entry| entry.data.clone())
            .ok_or_else(|| {
                translation_error!(container, source, format!("OPF文件不存在: {}", opf_path))
            })?;
        let opf_text = String::from_utf8_lossy(strip_bom(&opf_bytes)).into_owned();
        let opf_dir = parent_dir(&opf_path);
        let package = parse_opf(&opf_text, &opf_dir)
            .map_err(|details| translation_error!(container, source, details))?;

        Ok(Self {
            path: path.to_path_buf(),
            entries,
            index,
            opf_path,
            package,
        })
    }

    /// 容器文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// OPF文件在ZIP内的路径
    pub fn opf_path(&self) -> &str {
        &self.opf_path
    }

    /// OPF所在目录（href的解析基准）
    pub fn opf_dir(&self) -> String {
        parent_dir(&self.opf_path)
    }

    /// 解析后的包文档
    pub fn package(&self) -> &PackageDocument {
        &self.package
    }

    /// 按原始顺序列出所有条目
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// 读取条目内容，找不到时尝试百分号解码后的路径
    pub fn read_entry(&self, name: &str) -> Option<&[u8]> {
        if let Some(i) = self.index.get(name) {
            return self.entries.get(*i).map(|entry| entry.data.as_slice());
        }
        let decoded = percent_decode_str(name).decode_utf8().ok()?;
        self.index
            .get(decoded.as_ref())
            .and_then(|i| self.entries.get(*i))
            .map(|entry| entry.data.as_slice())
    }

    /// 所有内容文档（manifest顺序）
    pub fn documents(&self) -> Vec<&ManifestItem> {
        self.package.manifest.iter().filter(|item| item.is_document()).collect()
    }

    /// 所有图片（manifest顺序）
    pub fn images(&self) -> Vec<&ManifestItem> {
        self.package.manifest.iter().filter(|item| item.is_image()).collect()
    }

    /// 所有样式表（manifest顺序）
    pub fn stylesheets(&self) -> Vec<&ManifestItem> {
        self.package
            .manifest
            .iter()
            .filter(|item| item.is_stylesheet())
            .collect()
    }

    /// 扁平化目录：优先NCX，其次EPUB3导航文档
    pub fn toc(&self) -> Vec<TocEntry> {
        let ncx_item = self
            .package
            .toc_id
            .as_deref()
            .and_then(|id| self.package.item_by_id(id))
            .or_else(|| {
                self.package
                    .manifest
                    .iter()
                    .find(|item| item.media_type == "application/x-dtbncx+xml")
            });

        if let Some(item) = ncx_item {
            if let Some(bytes) = self.read_entry(&item.full_path) {
                let text = String::from_utf8_lossy(strip_bom(bytes));
                match parse_ncx(&text) {
                    Ok(entries) if !entries.is_empty() => return entries,
                    Ok(_) => {}
                    Err(e) => warn!("⚠️  NCX解析失败 {}: {}", item.full_path, e),
                }
            }
        }

        if let Some(item) = self.package.manifest.iter().find(|item| item.has_property("nav")) {
            if let Some(bytes) = self.read_entry(&item.full_path) {
                let text = String::from_utf8_lossy(strip_bom(bytes));
                match parse_nav(&text) {
                    Ok(entries) => return entries,
                    Err(e) => warn!("⚠️  导航文档解析失败 {}: {}", item.full_path, e),
                }
            }
        }

        Vec::new()
    }

    /// 以原容器为模板写出新容器
    ///
    /// `replacements` 以ZIP内完整路径为键，命中的条目写入新内容，其余条目原样复制。
    /// 先写入同目录下的临时文件再重命名，输出路径上不会出现写了一半的文件
    pub fn write_with_replacements<P: AsRef<Path>>(
        &self,
        output: P,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> Result<()> {
        let output = output.as_ref();
        let target = output.display().to_string();
        let parent = match output.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .map_err(|e| translation_error!(file_op, parent.display(), "创建目录", e))?;

        let temp = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|e| translation_error!(file_op, target, "创建临时文件", e))?;

        {
            let mut zip = ZipWriter::new(temp.as_file());
            let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            let deflated =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

            // mimetype必须是第一个条目且不压缩
            let mimetype = self.read_entry(MIMETYPE_PATH).unwrap_or(EPUB_MIMETYPE);
            zip.start_file(MIMETYPE_PATH, stored)
                .map_err(|e| zip_error(&target, e))?;
            zip.write_all(mimetype)?;

            for entry in self.entries.iter().filter(|e| e.name != MIMETYPE_PATH) {
                let options = if entry.stored { stored } else { deflated };
                let data = replacements
                    .get(&entry.name)
                    .map(|bytes| bytes.as_slice())
                    .unwrap_or(&entry.data);
                zip.start_file(entry.name.as_str(), options)
                    .map_err(|e| zip_error(&target, e))?;
                zip.write_all(data)?;
            }

            zip.finish().map_err(|e| zip_error(&target, e))?;
        }

        temp.persist(output)
            .map_err(|e| translation_error!(file_op, target, "写入", e.error))?;
        debug!("📦 写出容器: {}", target);
        Ok(())
    }
}

/// 判断媒体类型是否为内容文档
pub fn is_document_media_type(media_type: &str, href: &str) -> bool {
    match media_type {
        "application/xhtml+xml" | "text/html" => true,
        "" => {
            let lower = href.to_lowercase();
            lower.ends_with(".xhtml") || lower.ends_with(".html") || lower.ends_with(".htm")
        }
        _ => false,
    }
}

/// 将相对OPF目录的href解析为ZIP内完整路径（去掉片段、百分号解码、折叠 `.`/`..`）
pub fn resolve_path(base_dir: &str, href: &str) -> String {
    let without_fragment = href.split('#').next().unwrap_or(href);
    let decoded = percent_decode_str(without_fragment)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| without_fragment.to_string());

    let joined = if base_dir.is_empty() || decoded.starts_with('/') {
        decoded.trim_start_matches('/').to_string()
    } else {
        format!("{}/{}", base_dir, decoded)
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    parts.join("/")
}

fn parent_dir(path: &str) -> String {
    path.rfind('/').map(|i| path[..i].to_string()).unwrap_or_default()
}

fn zip_error(path: &str, error: zip::result::ZipError) -> TranslationError {
    match TranslationError::from(error) {
        TranslationError::Container { details, .. } => {
            translation_error!(container, path, details)
        }
        TranslationError::FileOperation { operation, source, .. } => {
            translation_error!(file_op, path, operation, source)
        }
        other => other,
    }
}

/// 解析 META-INF/container.xml，返回OPF路径
pub fn parse_container_xml(bytes: &[u8]) -> std::result::Result<String, String> {
    let content = String::from_utf8_lossy(strip_bom(bytes)).into_owned();
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(false);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e))
                if local_name(e.name().as_ref()) == b"rootfile" =>
            {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"full-path" {
                        return Ok(String::from_utf8_lossy(&attr.value).into_owned());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("container.xml解析失败: {}", e)),
            _ => {}
        }
    }

    Err("container.xml中没有rootfile".to_string())
}

/// 解析OPF包文档
pub fn parse_opf(content: &str, opf_dir: &str) -> std::result::Result<PackageDocument, String> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);

    let mut package = PackageDocument::default();
    let mut in_metadata = false;
    let mut current_element: Option<String> = None;
    let mut buf_text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("OPF解析失败: {}", e))?;
        // 自闭合元素没有对应的End事件
        let is_empty = matches!(event, Event::Empty(_));
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                match local {
                    b"metadata" => in_metadata = !is_empty,
                    b"title" | b"creator" | b"language" | b"identifier" | b"publisher"
                    | b"date" | b"description"
                        if in_metadata && !is_empty =>
                    {
                        current_element = Some(String::from_utf8_lossy(local).into_owned());
                        buf_text.clear();
                    }
                    b"spine" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"toc" {
                                package.toc_id =
                                    Some(String::from_utf8_lossy(&attr.value).into_owned());
                            }
                        }
                    }
                    b"item" => {
                        let mut id = String::new();
                        let mut href = String::new();
                        let mut media_type = String::new();
                        let mut properties = None;
                        for attr in e.attributes().flatten() {
                            let value = String::from_utf8_lossy(&attr.value).into_owned();
                            match attr.key.as_ref() {
                                b"id" => id = value,
                                b"href" => href = value,
                                b"media-type" => media_type = value,
                                b"properties" => properties = Some(value),
                                _ => {}
                            }
                        }
                        if !id.is_empty() && !href.is_empty() {
                            let full_path = resolve_path(opf_dir, &href);
                            let href = percent_decode_str(&href)
                                .decode_utf8()
                                .map(|s| s.into_owned())
                                .unwrap_or(href);
                            package.manifest.push(ManifestItem {
                                id,
                                href,
                                full_path,
                                media_type,
                                properties,
                            });
                        }
                    }
                    b"itemref" => {
                        let mut itemref = SpineItemRef {
                            linear: true,
                            ..Default::default()
                        };
                        for attr in e.attributes().flatten() {
                            let value = String::from_utf8_lossy(&attr.value).into_owned();
                            match attr.key.as_ref() {
                                b"idref" => itemref.idref = Some(value),
                                b"href" => itemref.href = Some(value),
                                b"linear" => itemref.linear = value != "no",
                                _ => {}
                            }
                        }
                        package.spine.push(itemref);
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                if current_element.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(e) => {
                if current_element.is_some() {
                    if let Some(resolved) = resolve_entity(&String::from_utf8_lossy(e.as_ref())) {
                        buf_text.push_str(&resolved);
                    }
                }
            }
            Event::End(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if local == b"metadata" {
                    in_metadata = false;
                }
                if let Some(element) = current_element.take() {
                    let value = buf_text.trim().to_string();
                    if !value.is_empty() {
                        package.metadata.entry(element).or_insert(value);
                    }
                    buf_text.clear();
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(package)
}

/// 解析NCX目录并扁平化
pub fn parse_ncx(content: &str) -> std::result::Result<Vec<TocEntry>, String> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);

    // 每个未闭合navPoint在结果中的下标
    let mut open_points: Vec<usize> = Vec::new();
    let mut entries: Vec<TocEntry> = Vec::new();
    let mut in_text = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("NCX解析失败: {}", e))?;
        match event {
            Event::Start(e) => match local_name(e.name().as_ref()) {
                b"navPoint" => {
                    entries.push(TocEntry {
                        title: String::new(),
                        href: String::new(),
                        level: open_points.len() + 1,
                    });
                    open_points.push(entries.len() - 1);
                }
                b"text" => in_text = true,
                _ => {}
            },
            Event::Empty(e) => {
                if local_name(e.name().as_ref()) == b"content" {
                    if let Some(entry) = open_points.last().and_then(|i| entries.get_mut(*i)) {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"src" {
                                entry.href = String::from_utf8_lossy(&attr.value).into_owned();
                            }
                        }
                    }
                }
            }
            Event::Text(e) => {
                if in_text {
                    if let Some(entry) = open_points.last().and_then(|i| entries.get_mut(*i)) {
                        entry.title.push_str(&String::from_utf8_lossy(e.as_ref()));
                    }
                }
            }
            Event::GeneralRef(e) => {
                if in_text {
                    if let Some(entry) = open_points.last().and_then(|i| entries.get_mut(*i)) {
                        if let Some(resolved) = resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                        {
                            entry.title.push_str(&resolved);
                        }
                    }
                }
            }
            Event::End(e) => match local_name(e.name().as_ref()) {
                b"text" => {
                    in_text = false;
                    if let Some(entry) = open_points.last().and_then(|i| entries.get_mut(*i)) {
                        entry.title = entry.title.trim().to_string();
                    }
                }
                b"navPoint" => {
                    open_points.pop();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries
        .into_iter()
        .filter(|entry| !entry.title.is_empty() || !entry.href.is_empty())
        .collect())
}

/// 解析EPUB3导航文档中的toc列表并扁平化
pub fn parse_nav(content: &str) -> std::result::Result<Vec<TocEntry>, String> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);

    let mut entries = Vec::new();
    let mut nav_depth = 0usize;
    let mut in_toc = false;
    let mut ol_depth = 0usize;
    let mut current: Option<TocEntry> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("导航文档解析失败: {}", e))?;
        match event {
            Event::Start(e) => match local_name(e.name().as_ref()) {
                b"nav" => {
                    nav_depth += 1;
                    let is_toc = e.attributes().flatten().any(|attr| {
                        local_name(attr.key.as_ref()) == b"type" && attr.value.as_ref() == b"toc"
                    });
                    if is_toc {
                        in_toc = true;
                    }
                }
                b"ol" if in_toc => ol_depth += 1,
                b"a" if in_toc => {
                    let href = e
                        .attributes()
                        .flatten()
                        .find(|attr| attr.key.as_ref() == b"href")
                        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
                        .unwrap_or_default();
                    current = Some(TocEntry {
                        title: String::new(),
                        href,
                        level: ol_depth.max(1),
                    });
                }
                _ => {}
            },
            Event::Text(e) => {
                if let Some(entry) = current.as_mut() {
                    entry.title.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(e) => {
                if let Some(entry) = current.as_mut() {
                    if let Some(resolved) = resolve_entity(&String::from_utf8_lossy(e.as_ref())) {
                        entry.title.push_str(&resolved);
                    }
                }
            }
            Event::End(e) => match local_name(e.name().as_ref()) {
                b"a" => {
                    if let Some(mut entry) = current.take() {
                        entry.title = entry.title.trim().to_string();
                        entries.push(entry);
                    }
                }
                b"ol" if in_toc => ol_depth = ol_depth.saturating_sub(1),
                b"nav" => {
                    nav_depth = nav_depth.saturating_sub(1);
                    if nav_depth == 0 {
                        in_toc = false;
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}

/// 去掉UTF-8 BOM
pub fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}

/// 取命名空间限定名的本地部分（`dc:title` -> `title`）
fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

/// 解析XML实体引用
pub(crate) fn resolve_entity(entity: &str) -> Option<String> {
    match entity {
        "apos" => return Some("'".to_string()),
        "quot" => return Some("\"".to_string()),
        "lt" => return Some("<".to_string()),
        "gt" => return Some(">".to_string()),
        "amp" => return Some("&".to_string()),
        _ => {}
    }

    let code = if let Some(hex) = entity.strip_prefix("#x") {
        u32::from_str_radix(hex, 16).ok()
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse::<u32>().ok()
    } else {
        None
    };
    code.and_then(char::from_u32).map(|c| c.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    //! 测试用的内存EPUB构造器

    use std::io::Write;
    use std::path::{Path, PathBuf};

    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    /// 一个待写入的测试章节
    pub struct Chapter<'a> {
        pub id: &'a str,
        pub href: &'a str,
        pub body: &'a str,
    }

    pub fn xhtml(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>t</title></head><body>{}</body></html>",
            body
        )
    }

    /// EPUB3风格的章节：带DOCTYPE公共标识、epub前缀声明和head脚本
    pub fn xhtml3(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.1//EN\" \"http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd\">\n<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\"><head><title>t</title><script type=\"text/javascript\">if (a &lt; b &amp;&amp; c) {{ go(); }}</script></head><body epub:type=\"bodymatter\"><section epub:type=\"chapter\">{}</section></body></html>",
            body
        )
    }

    /// 在目录中写出一个最小可用的EPUB，spine按chapters顺序
    pub fn write_epub(dir: &Path, name: &str, chapters: &[Chapter<'_>], with_spine: bool) -> PathBuf {
        write_epub_with(dir, name, chapters, with_spine, xhtml)
    }

    /// 同 [`write_epub`]，章节使用EPUB3模板
    pub fn write_epub3(dir: &Path, name: &str, chapters: &[Chapter<'_>]) -> PathBuf {
        write_epub_with(dir, name, chapters, true, xhtml3)
    }

    fn write_epub_with(
        dir: &Path,
        name: &str,
        chapters: &[Chapter<'_>],
        with_spine: bool,
        render: fn(&str) -> String,
    ) -> PathBuf {
        let path = dir.join(name);
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = ZipWriter::new(file);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();

        zip.start_file("META-INF/container.xml", deflated).unwrap();
        zip.write_all(
            br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
        )
        .unwrap();

        let mut manifest = String::new();
        let mut spine = String::new();
        for chapter in chapters {
            manifest.push_str(&format!(
                "<item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
                chapter.id, chapter.href
            ));
            spine.push_str(&format!("<itemref idref=\"{}\"/>\n", chapter.id));
        }
        manifest.push_str("<item id=\"css\" href=\"Styles/style.css\" media-type=\"text/css\"/>\n");
        manifest.push_str("<item id=\"img\" href=\"Images/pic.png\" media-type=\"image/png\"/>\n");
        manifest.push_str("<item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n");
        if !with_spine {
            spine.clear();
        }

        let opf = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="2.0" unique-identifier="id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Test Book</dc:title>
    <dc:creator>Someone</dc:creator>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
{}  </manifest>
  <spine toc="ncx">
{}  </spine>
</package>"#,
            manifest, spine
        );
        zip.start_file("OEBPS/content.opf", deflated).unwrap();
        zip.write_all(opf.as_bytes()).unwrap();

        zip.start_file("OEBPS/toc.ncx", deflated).unwrap();
        zip.write_all(
            br#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1"><navMap>
<navPoint id="n1" playOrder="1"><navLabel><text>One</text></navLabel><content src="Text/ch1.xhtml"/></navPoint>
</navMap></ncx>"#,
        )
        .unwrap();

        zip.start_file("OEBPS/Styles/style.css", deflated).unwrap();
        zip.write_all(b"p { margin: 0; }").unwrap();

        zip.start_file("OEBPS/Images/pic.png", stored).unwrap();
        zip.write_all(&[0x89, b'P', b'N', b'G', 1, 2, 3]).unwrap();

        for chapter in chapters {
            zip.start_file(format!("OEBPS/{}", chapter.href), deflated).unwrap();
            zip.write_all(render(chapter.body).as_bytes()).unwrap();
        }

        zip.finish().unwrap();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{write_epub, Chapter};
    use super::*;

    #[test]
    fn test_parse_container_xml() {
        let container = br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;
        assert_eq!(parse_container_xml(container).unwrap(), "OEBPS/content.opf");
        assert!(parse_container_xml(b"<container/>").is_err());
    }

    #[test]
    fn test_parse_opf_manifest_and_spine() {
        let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Tom &amp; Jerry</dc:title>
    <dc:creator>Author One</dc:creator>
    <dc:creator>Author Two</dc:creator>
  </metadata>
  <manifest>
    <item id="c1" href="Text/chapter%201.xhtml" media-type="application/xhtml+xml"/>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="c1"/>
    <itemref idref="nav" linear="no"/>
    <itemref href="Text/direct.xhtml"/>
  </spine>
</package>"#;

        let package = parse_opf(opf, "OEBPS").unwrap();
        assert_eq!(package.metadata.get("title").map(String::as_str), Some("Tom & Jerry"));
        assert_eq!(package.metadata.get("creator").map(String::as_str), Some("Author One"));
        assert_eq!(package.manifest.len(), 2);
        assert_eq!(package.manifest[0].href, "Text/chapter 1.xhtml");
        assert_eq!(package.manifest[0].full_path, "OEBPS/Text/chapter 1.xhtml");
        assert_eq!(package.spine.len(), 3);
        assert!(!package.spine[1].linear);
        assert_eq!(package.spine[2].href.as_deref(), Some("Text/direct.xhtml"));
        assert_eq!(package.toc_id.as_deref(), Some("ncx"));
    }

    #[test]
    fn test_parse_opf_self_closing_metadata_element() {
        let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:description/>
    <meta property="dcterms:modified">2020-01-01T00:00:00Z</meta>
    <meta name="cover" content="cover-img"/>
    <dc:title>Real Title</dc:title>
  </metadata>
  <manifest/>
  <spine/>
</package>"#;

        let package = parse_opf(opf, "").unwrap();
        assert_eq!(package.metadata.get("title").map(String::as_str), Some("Real Title"));
        assert!(!package.metadata.contains_key("description"));
        assert_eq!(package.metadata.len(), 1);
    }

    #[test]
    fn test_parse_ncx_title_with_entities() {
        let ncx = r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1"><navMap>
  <navPoint id="p1"><navLabel><text>
    Tom &amp; Jerry &#x2014; Part 1
  </text></navLabel><content src="p1.xhtml"/></navPoint>
</navMap></ncx>"#;

        let toc = parse_ncx(ncx).unwrap();
        assert_eq!(toc[0].title, "Tom & Jerry \u{2014} Part 1");
    }

    #[test]
    fn test_parse_ncx_flattens_levels() {
        let ncx = r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="part1" playOrder="1">
      <navLabel><text>Part I</text></navLabel>
      <content src="part1.xhtml"/>
      <navPoint id="ch1" playOrder="2">
        <navLabel><text>Chapter 1</text></navLabel>
        <content src="ch1.xhtml"/>
      </navPoint>
    </navPoint>
    <navPoint id="part2" playOrder="3">
      <navLabel><text>Part II</text></navLabel>
      <content src="part2.xhtml"/>
    </navPoint>
  </navMap>
</ncx>"#;

        let toc = parse_ncx(ncx).unwrap();
        let flat: Vec<(&str, usize)> = toc.iter().map(|e| (e.title.as_str(), e.level)).collect();
        assert_eq!(flat, vec![("Part I", 1), ("Chapter 1", 2), ("Part II", 1)]);
        assert_eq!(toc[1].href, "ch1.xhtml");
    }

    #[test]
    fn test_parse_nav_document() {
        let nav = r#"<?xml version="1.0" encoding="utf-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body>
  <nav epub:type="toc"><ol>
    <li><a href="a.xhtml">A</a><ol><li><a href="a.xhtml#s1">A.1</a></li></ol></li>
    <li><a href="b.xhtml">B</a></li>
  </ol></nav>
  <nav epub:type="landmarks"><ol><li><a href="cover.xhtml">Cover</a></li></ol></nav>
</body></html>"#;

        let toc = parse_nav(nav).unwrap();
        let flat: Vec<(&str, usize)> = toc.iter().map(|e| (e.title.as_str(), e.level)).collect();
        assert_eq!(flat, vec![("A", 1), ("A.1", 2), ("B", 1)]);
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(resolve_path("OEBPS", "Text/ch1.xhtml"), "OEBPS/Text/ch1.xhtml");
        assert_eq!(resolve_path("OEBPS/Text", "../Images/a.png"), "OEBPS/Images/a.png");
        assert_eq!(resolve_path("", "ch%201.xhtml#frag"), "ch 1.xhtml");
        assert_eq!(resolve_path("OEBPS", "./a.xhtml"), "OEBPS/a.xhtml");
    }

    #[test]
    fn test_open_and_rewrite_archive() {
        let dir = tempfile::tempdir().unwrap();
        let epub = write_epub(
            dir.path(),
            "book.epub",
            &[Chapter { id: "c1", href: "Text/ch1.xhtml", body: "<p>Hello</p>" }],
            true,
        );

        let archive = EpubArchive::open(&epub).unwrap();
        assert_eq!(archive.opf_path(), "OEBPS/content.opf");
        assert_eq!(archive.documents().len(), 1);
        assert_eq!(archive.images().len(), 1);
        assert_eq!(archive.stylesheets().len(), 1);
        assert_eq!(archive.toc().len(), 1);
        assert_eq!(archive.package().metadata.get("title").map(String::as_str), Some("Test Book"));

        let mut replacements = HashMap::new();
        replacements.insert("OEBPS/Text/ch1.xhtml".to_string(), b"<p>Hi</p>".to_vec());
        let output = dir.path().join("out").join("book_zh.epub");
        archive.write_with_replacements(&output, &replacements).unwrap();

        let rewritten = EpubArchive::open(&output).unwrap();
        assert_eq!(rewritten.entries()[0].name, "mimetype");
        assert!(rewritten.entries()[0].stored);
        assert_eq!(rewritten.read_entry("OEBPS/Text/ch1.xhtml").unwrap(), b"<p>Hi</p>");
        assert_eq!(
            rewritten.read_entry("OEBPS/Images/pic.png").unwrap(),
            archive.read_entry("OEBPS/Images/pic.png").unwrap()
        );
        assert_eq!(rewritten.entries().len(), archive.entries().len());
    }

    #[test]
    fn test_open_missing_container_xml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.epub");
        {
            let file = std::fs::File::create(&path).unwrap();
            let mut zip = ZipWriter::new(file);
            zip.start_file("mimetype", SimpleFileOptions::default()).unwrap();
            zip.write_all(b"application/epub+zip").unwrap();
            zip.finish().unwrap();
        }

        match EpubArchive::open(&path) {
            Err(TranslationError::Container { details, .. }) => {
                assert!(details.contains("container.xml"))
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("expected failure"),
        }
    }
}
