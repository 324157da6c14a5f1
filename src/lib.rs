//! EPUB Translation CLI - EPUB逐行映射翻译工具库
//!
//! 这个库提供了EPUB容器读取、阅读顺序解析、段落线性化、映射存储、分块对齐翻译和按原结构重建等核心功能。

pub mod api_constants;
pub mod chapter_id;
pub mod config;
pub mod epub_container;
pub mod error;
pub mod health;
pub mod html_processor;
pub mod linearizer;
pub mod mapping_store;
pub mod merger;
pub mod project;
pub mod reconstructor;
pub mod spine;
pub mod stats;
pub mod translator;
pub mod utils;
pub mod xhtml_tree;
