//! 配置管理模块
//!
//! 提供CLI参数解析、翻译配置与段落抽取配置

// 标准库导入
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

// 第三方crate导入
use clap::{Args, Parser, Subcommand};

// 本地模块导入
use crate::api_constants::extraction_config::DEFAULT_IMAGE_TEXT_THRESHOLD;
use crate::api_constants::{api_config, is_valid_api_url, service_config};
use crate::error::Result;
use crate::translation_error;

/// 翻译配置
///
/// 支持Builder模式进行链式配置。
///
/// # Examples
///
/// ```rust
/// use epub_translation_cli::config::TranslateConfig;
///
/// let config = TranslateConfig::new()
///     .target_language("日本語")
///     .with_api_url("http://localhost:11434/v1")
///     .with_batch_size(10)
///     .with_max_attempts(3);
/// assert_eq!(config.batch_size(), 10);
/// ```
#[derive(Debug, Clone)]
pub struct TranslateConfig {
    /// 目标语言（直接写入提示词）
    target_lang: String,
    /// API基础地址
    api_url: String,
    /// 模型名称
    model: String,
    /// API密钥
    api_key: Option<String>,
    /// 每批最多行数
    batch_size: usize,
    /// 每批原文字符预算
    max_chars: usize,
    /// 单批最大尝试次数
    max_attempts: usize,
    /// 尝试间隔
    retry_delay: Duration,
    /// 增量修复轮数
    repair_passes: usize,
    /// 采样温度
    temperature: f32,
    /// 最大生成token数
    max_tokens: u32,
    /// 请求超时（秒）
    timeout_secs: u64,
    /// 基础提示词
    prompt: String,
    /// 术语表
    glossary: BTreeMap<String, String>,
}

impl TranslateConfig {
    /// 创建具有默认值的配置实例
    pub fn new() -> Self {
        Self {
            target_lang: service_config::DEFAULT_TARGET_LANG.to_string(),
            api_url: api_config::DEFAULT_API_URL.to_string(),
            model: api_config::DEFAULT_MODEL.to_string(),
            api_key: None,
            batch_size: service_config::DEFAULT_BATCH_SIZE,
            max_chars: service_config::DEFAULT_MAX_CHARS,
            max_attempts: service_config::DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(service_config::RETRY_DELAY_MS),
            repair_passes: service_config::DEFAULT_REPAIR_PASSES,
            temperature: service_config::DEFAULT_TEMPERATURE,
            max_tokens: service_config::DEFAULT_MAX_TOKENS,
            timeout_secs: service_config::REQUEST_TIMEOUT_SECONDS,
            prompt: service_config::DEFAULT_PROMPT.to_string(),
            glossary: BTreeMap::new(),
        }
    }

    pub fn target_lang(&self) -> &str {
        &self.target_lang
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn repair_passes(&self) -> usize {
        self.repair_passes
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn glossary(&self) -> &BTreeMap<String, String> {
        &self.glossary
    }

    /// 设置目标语言
    pub fn target_language(mut self, lang: &str) -> Self {
        self.target_lang = lang.to_string();
        self
    }

    /// 设置API地址
    pub fn with_api_url(mut self, url: &str) -> Self {
        self.api_url = url.to_string();
        self
    }

    /// 设置模型
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// 设置API密钥（空字符串视为未设置）
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    /// 设置每批最多行数
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// 设置每批字符预算
    pub fn with_max_chars(mut self, chars: usize) -> Self {
        self.max_chars = chars;
        self
    }

    /// 设置最大尝试次数
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// 设置尝试间隔
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// 设置修复轮数
    pub fn with_repair_passes(mut self, passes: usize) -> Self {
        self.repair_passes = passes;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_prompt(mut self, prompt: &str) -> Self {
        self.prompt = prompt.to_string();
        self
    }

    pub fn with_glossary(mut self, glossary: BTreeMap<String, String>) -> Self {
        self.glossary = glossary;
        self
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if !is_valid_api_url(&self.api_url) {
            return Err(translation_error!(config, "api_url", format!("无效的API地址: {}", self.api_url)));
        }
        if self.batch_size == 0 {
            return Err(translation_error!(config, "batch_size", "必须大于0"));
        }
        if self.max_chars == 0 {
            return Err(translation_error!(config, "max_chars", "必须大于0"));
        }
        if self.max_attempts == 0 {
            return Err(translation_error!(config, "max_attempts", "必须大于0"));
        }
        if self.target_lang.trim().is_empty() {
            return Err(translation_error!(config, "target_lang", "不能为空"));
        }
        Ok(())
    }
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 段落抽取配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionConfig {
    /// 纯图片节点判定阈值
    pub image_text_threshold: usize,
    /// 是否保存图片表
    pub include_images: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            image_text_threshold: DEFAULT_IMAGE_TEXT_THRESHOLD,
            include_images: true,
        }
    }
}

/// CLI参数结构
#[derive(Parser)]
#[command(author, version, about = "EPUB逐行映射翻译工具 - 拆分段落、分块对齐翻译并按原结构回填", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// 详细输出模式
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// 静默模式 (仅输出错误)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// 子命令
#[derive(Subcommand)]
pub enum Command {
    /// 导入EPUB，生成（或合并更新）映射目录
    Import {
        /// EPUB文件路径
        #[arg(value_name = "EPUB")]
        input: PathBuf,

        /// 不保存图片表
        #[arg(long)]
        no_images: bool,

        /// 纯图片节点判定阈值（伴随文本少于该字符数视为无文本）
        #[arg(long, default_value_t = DEFAULT_IMAGE_TEXT_THRESHOLD)]
        image_text_threshold: usize,
    },

    /// 基于原EPUB结构导出译文EPUB
    Export {
        /// 映射目录
        #[arg(value_name = "MAPPING_DIR")]
        mapping: PathBuf,

        /// 输出文件路径 (默认为原文件名加 _translated)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// 翻译映射中尚未翻译的段落
    Translate(TranslateArgs),

    /// 检查映射的序号完整性与翻译进度
    Check {
        #[arg(value_name = "MAPPING_DIR")]
        mapping: PathBuf,
    },

    /// 查看指定序号范围的原文与译文
    Inspect {
        #[arg(value_name = "MAPPING_DIR")]
        mapping: PathBuf,

        /// 起始序号
        #[arg(long)]
        start: usize,

        /// 结束序号（含，默认到末尾）
        #[arg(long)]
        end: Option<usize>,
    },

    /// 手动修改一段译文
    Edit {
        #[arg(value_name = "MAPPING_DIR")]
        mapping: PathBuf,

        /// 序号
        #[arg(long)]
        line: usize,

        /// 新译文（空字符串表示清除）
        #[arg(long)]
        text: String,
    },

    /// 列出映射根目录下所有项目的进度
    Status {
        /// 映射根目录
        #[arg(value_name = "DIR", default_value = "mapping")]
        root: PathBuf,
    },
}

/// translate子命令参数
#[derive(Args)]
pub struct TranslateArgs {
    /// 映射目录
    #[arg(value_name = "MAPPING_DIR")]
    pub mapping: PathBuf,

    /// 目标语言
    #[arg(short, long, default_value = service_config::DEFAULT_TARGET_LANG)]
    pub lang: String,

    /// 翻译API基础地址
    #[arg(short, long)]
    pub api: Option<String>,

    /// 使用本地API
    #[arg(long)]
    pub local_api: bool,

    /// 模型名称
    #[arg(short, long, default_value = api_config::DEFAULT_MODEL)]
    pub model: String,

    /// API密钥
    #[arg(long, env = api_config::API_KEY_ENV, hide_env_values = true)]
    pub api_key: Option<String>,

    /// 每批最多行数
    #[arg(long, default_value_t = service_config::DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// 每批原文字符预算
    #[arg(long, default_value_t = service_config::DEFAULT_MAX_CHARS)]
    pub max_chars: usize,

    /// 单批最大尝试次数
    #[arg(long, default_value_t = service_config::DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: usize,

    /// 尝试间隔（毫秒）
    #[arg(long, default_value_t = service_config::RETRY_DELAY_MS)]
    pub retry_delay_ms: u64,

    /// 增量修复轮数
    #[arg(long, default_value_t = service_config::DEFAULT_REPAIR_PASSES)]
    pub repair_passes: usize,

    /// 术语表JSON文件（{"原文": "译文"}）
    #[arg(long, value_name = "FILE")]
    pub glossary: Option<PathBuf>,

    /// 自定义基础提示词
    #[arg(long)]
    pub prompt: Option<String>,
}

impl TranslateArgs {
    /// 转换为翻译配置（术语表由调用方加载）
    pub fn to_config(&self, glossary: BTreeMap<String, String>) -> TranslateConfig {
        let api_url = crate::api_constants::get_api_url(self.local_api, self.api.as_deref());
        let mut config = TranslateConfig::new()
            .target_language(&self.lang)
            .with_api_url(api_url)
            .with_model(&self.model)
            .with_api_key(self.api_key.clone())
            .with_batch_size(self.batch_size)
            .with_max_chars(self.max_chars)
            .with_max_attempts(self.max_attempts)
            .with_retry_delay(Duration::from_millis(self.retry_delay_ms))
            .with_repair_passes(self.repair_passes)
            .with_glossary(glossary);
        if let Some(prompt) = &self.prompt {
            config = config.with_prompt(prompt);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TranslateConfig::default();
        assert_eq!(config.batch_size(), 25);
        assert_eq!(config.max_attempts(), 5);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.repair_passes(), 2);
        assert!(config.api_key().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        assert!(TranslateConfig::new().with_api_url("ftp://x").validate().is_err());
        assert!(TranslateConfig::new().with_batch_size(0).validate().is_err());
        assert!(TranslateConfig::new().with_max_attempts(0).validate().is_err());
        assert!(TranslateConfig::new().target_language(" ").validate().is_err());
    }

    #[test]
    fn test_blank_api_key_is_ignored() {
        let config = TranslateConfig::new().with_api_key(Some("  ".to_string()));
        assert!(config.api_key().is_none());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["epub-translation-cli", "-v", "import", "book.epub", "--no-images"]);
        assert!(cli.verbose);
        match cli.command {
            Command::Import { input, no_images, image_text_threshold } => {
                assert_eq!(input, PathBuf::from("book.epub"));
                assert!(no_images);
                assert_eq!(image_text_threshold, DEFAULT_IMAGE_TEXT_THRESHOLD);
            }
            _ => panic!("Wrong command"),
        }

        let cli = Cli::parse_from([
            "epub-translation-cli",
            "translate",
            "mapping/book",
            "--local-api",
            "--batch-size",
            "10",
            "--api-key",
            "sk-test",
        ]);
        match cli.command {
            Command::Translate(args) => {
                let config = args.to_config(BTreeMap::new());
                assert_eq!(config.api_url(), api_config::LOCAL_API_URL);
                assert_eq!(config.batch_size(), 10);
                assert_eq!(config.api_key(), Some("sk-test"));
            }
            _ => panic!("Wrong command"),
        }
    }
}
