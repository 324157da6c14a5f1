/// 常量配置
///
/// 该文件定义了映射目录、段落抽取规则以及翻译服务相关的常量，方便统一管理和维护

/// 默认翻译API配置
pub mod api_config {
    /// 默认API基础地址（OpenAI兼容的chat/completions接口）
    pub const DEFAULT_API_URL: &str = "https://api.siliconflow.cn/v1";

    /// 本地开发API地址
    pub const LOCAL_API_URL: &str = "http://localhost:11434/v1";

    /// 默认模型名称
    pub const DEFAULT_MODEL: &str = "deepseek-chat";

    /// API密钥环境变量名
    pub const API_KEY_ENV: &str = "TRANSLATION_API_KEY";
}

/// 翻译服务配置
pub mod service_config {
    /// 默认目标语言
    pub const DEFAULT_TARGET_LANG: &str = "中文";

    /// 默认每批行数
    pub const DEFAULT_BATCH_SIZE: usize = 25;

    /// 每批原文字符预算
    pub const DEFAULT_MAX_CHARS: usize = 1000;

    /// 单批最大尝试次数
    pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

    /// 两次尝试之间的固定延迟（毫秒）
    pub const RETRY_DELAY_MS: u64 = 1000;

    /// 增量修复轮数
    pub const DEFAULT_REPAIR_PASSES: usize = 2;

    /// 请求超时时间（秒）
    pub const REQUEST_TIMEOUT_SECONDS: u64 = 60;

    /// 最大生成token数
    pub const DEFAULT_MAX_TOKENS: u32 = 4000;

    /// 采样温度
    pub const DEFAULT_TEMPERATURE: f32 = 0.3;

    /// 默认翻译提示词
    pub const DEFAULT_PROMPT: &str = "你是专业的文学翻译。请忠实、完整、流畅地翻译下列文本，保持原文语气与细节，只输出译文，不要添加任何解释或说明。";
}

/// 映射目录配置
pub mod mapping_config {
    /// 映射根目录名（位于EPUB同级目录下）
    pub const MAPPING_ROOT_DIR: &str = "mapping";

    /// 段落映射表文件名
    pub const CONTENT_FILE: &str = "content_mapping.json";

    /// 图片映射表文件名
    pub const IMAGES_FILE: &str = "images.json";

    /// 格式信息表文件名
    pub const FORMAT_FILE: &str = "format_info.json";

    /// 段落ID前缀
    pub const UNIT_ID_PREFIX: &str = "line_";
}

/// 段落抽取配置
pub mod extraction_config {
    /// 可翻译的块级标签
    pub const BLOCK_TAGS: &[&str] = &[
        "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "caption", "figcaption",
    ];

    /// 不参与遍历的标签
    pub const SKIPPED_TAGS: &[&str] = &["script", "style", "head"];

    /// 图片容器判定阈值：伴随文本字符数小于该值视为"无文本"
    pub const DEFAULT_IMAGE_TEXT_THRESHOLD: usize = 2;

    /// 规范化章节目录名
    pub const CANONICAL_FOLDER: &str = "Text";

    /// 需要剥离的容器根目录前缀（小写）
    pub const CONTAINER_ROOT_PREFIXES: &[&str] = &["oebps/", "epub/", "ops/"];
}

/// 错误消息常量
pub mod error_messages {
    /// 文件不是EPUB
    pub const NOT_EPUB: &str = "文件不存在或不是EPUB格式";

    /// 映射文件缺失
    pub const MAPPING_MISSING: &str = "缺少content_mapping.json，请先导入EPUB";

    /// 原始EPUB不可达
    pub const ORIGINAL_MISSING: &str = "original_file不存在，无法基于原结构导出EPUB";

    /// API认证错误
    pub const AUTH_ERROR: &str = "API认证失败，请检查API密钥";
}

/// 判断API地址是否有效
pub fn is_valid_api_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// 获取API地址，自定义地址优先，其次本地模式
pub fn get_api_url(local_api: bool, custom_api: Option<&str>) -> &str {
    if let Some(custom) = custom_api {
        if !custom.is_empty() {
            return custom;
        }
    }

    if local_api {
        api_config::LOCAL_API_URL
    } else {
        api_config::DEFAULT_API_URL
    }
}

/// 判断标签是否为可翻译块级标签
pub fn is_block_tag(tag: &str) -> bool {
    extraction_config::BLOCK_TAGS.contains(&tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_selection() {
        assert_eq!(get_api_url(true, None), api_config::LOCAL_API_URL);
        assert_eq!(get_api_url(false, None), api_config::DEFAULT_API_URL);
        assert_eq!(get_api_url(false, Some("http://custom.api")), "http://custom.api");
        assert_eq!(get_api_url(true, Some("")), api_config::LOCAL_API_URL);
    }

    #[test]
    fn test_api_url_validation() {
        assert!(is_valid_api_url("https://example.com"));
        assert!(is_valid_api_url("http://localhost:8080"));
        assert!(!is_valid_api_url("ftp://example.com"));
        assert!(!is_valid_api_url("invalid-url"));
    }

    #[test]
    fn test_block_tags() {
        for tag in ["p", "h1", "h6", "li", "blockquote", "caption", "figcaption"] {
            assert!(is_block_tag(tag), "{} 应为块级标签", tag);
        }
        assert!(!is_block_tag("div"));
        assert!(!is_block_tag("span"));
        assert!(!is_block_tag("img"));
    }
}
