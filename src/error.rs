//! 统一错误处理模块
//!
//! 提供映射、导入导出与翻译流程的统一错误类型定义

// 标准库导入
use std::fmt;

// 第三方crate导入
use anyhow::Error as AnyhowError;

/// 统一错误类型
///
/// 区分数据损坏类错误（容器结构、映射文件）与能力缺失类错误（解析器/编解码器无法处理），
/// 调用方据此决定是提示用户重新导入还是更换输入
#[derive(Debug)]
pub enum TranslationError {
    /// EPUB容器结构错误
    Container {
        /// 容器路径
        path: String,
        /// 具体错误信息
        details: String,
    },

    /// 缺少必需的解析/编解码能力
    MissingCapability {
        /// 能力名称（如压缩算法、文档类型）
        capability: String,
        /// 具体错误信息
        details: String,
    },

    /// HTML/XHTML解析相关错误
    HtmlParse {
        /// 文档路径
        document: String,
        /// 具体错误信息
        details: String,
    },

    /// 映射文件损坏
    MappingCorrupted {
        /// 映射文件路径
        file: String,
        /// 具体错误信息
        details: String,
    },

    /// 文件操作相关错误
    FileOperation {
        /// 文件路径
        path: String,
        /// 操作类型（读取、写入、创建等）
        operation: String,
        /// 底层错误信息
        source: String,
    },

    /// 翻译API不可恢复错误
    TranslationApi {
        /// API响应状态码
        status_code: u16,
        /// 错误消息
        message: String,
        /// API地址
        api_url: String,
    },

    /// 配置相关错误
    Configuration {
        /// 配置项名称
        field: String,
        /// 错误原因
        reason: String,
    },

    /// 输入验证错误
    InputValidation {
        /// 输入值
        input: String,
        /// 验证失败原因
        reason: String,
    },

    /// 内部处理错误（包装anyhow::Error）
    Internal {
        /// 包装的错误
        source: AnyhowError,
    },
}

impl fmt::Display for TranslationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationError::Container { path, details } => {
                write!(f, "EPUB容器错误 [{}]: {}", path, details)
            }
            TranslationError::MissingCapability { capability, details } => {
                write!(f, "缺少处理能力 [{}]: {}", capability, details)
            }
            TranslationError::HtmlParse { document, details } => {
                write!(f, "文档解析失败 [{}]: {}", document, details)
            }
            TranslationError::MappingCorrupted { file, details } => {
                write!(f, "映射数据损坏 [{}]: {}", file, details)
            }
            TranslationError::FileOperation { path, operation, source } => {
                write!(f, "文件{}操作失败 [{}]: {}", operation, path, source)
            }
            TranslationError::TranslationApi { status_code, message, api_url } => {
                write!(f, "翻译API错误 [{}] {}: {}", status_code, api_url, message)
            }
            TranslationError::Configuration { field, reason } => {
                write!(f, "配置错误 [{}]: {}", field, reason)
            }
            TranslationError::InputValidation { input, reason } => {
                write!(f, "输入验证失败 [{}]: {}", input, reason)
            }
            TranslationError::Internal { source } => {
                write!(f, "内部处理错误: {}", source)
            }
        }
    }
}

impl std::error::Error for TranslationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TranslationError::Internal { source } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl TranslationError {
    /// 是否属于能力缺失（而非数据损坏）
    pub fn is_missing_capability(&self) -> bool {
        matches!(self, TranslationError::MissingCapability { .. })
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, TranslationError>;

/// 便捷的错误创建宏
#[macro_export]
macro_rules! translation_error {
    (container, $path:expr, $details:expr) => {
        $crate::error::TranslationError::Container {
            path: $path.to_string(),
            details: $details.to_string(),
        }
    };
    (capability, $cap:expr, $details:expr) => {
        $crate::error::TranslationError::MissingCapability {
            capability: $cap.to_string(),
            details: $details.to_string(),
        }
    };
    (html_parse, $doc:expr, $details:expr) => {
        $crate::error::TranslationError::HtmlParse {
            document: $doc.to_string(),
            details: $details.to_string(),
        }
    };
    (corrupted, $file:expr, $details:expr) => {
        $crate::error::TranslationError::MappingCorrupted {
            file: $file.to_string(),
            details: $details.to_string(),
        }
    };
    (file_op, $path:expr, $op:expr, $source:expr) => {
        $crate::error::TranslationError::FileOperation {
            path: $path.to_string(),
            operation: $op.to_string(),
            source: $source.to_string(),
        }
    };
    (translation_api, $code:expr, $msg:expr, $url:expr) => {
        $crate::error::TranslationError::TranslationApi {
            status_code: $code,
            message: $msg.to_string(),
            api_url: $url.to_string(),
        }
    };
    (config, $field:expr, $reason:expr) => {
        $crate::error::TranslationError::Configuration {
            field: $field.to_string(),
            reason: $reason.to_string(),
        }
    };
    (input_validation, $input:expr, $reason:expr) => {
        $crate::error::TranslationError::InputValidation {
            input: $input.to_string(),
            reason: $reason.to_string(),
        }
    };
}

/// 从anyhow::Error转换
impl From<AnyhowError> for TranslationError {
    fn from(error: AnyhowError) -> Self {
        TranslationError::Internal { source: error }
    }
}

/// 从std::io::Error转换
impl From<std::io::Error> for TranslationError {
    fn from(error: std::io::Error) -> Self {
        TranslationError::FileOperation {
            path: "unknown".to_string(),
            operation: "io".to_string(),
            source: error.to_string(),
        }
    }
}

/// 从serde_json::Error转换
impl From<serde_json::Error> for TranslationError {
    fn from(error: serde_json::Error) -> Self {
        TranslationError::MappingCorrupted {
            file: "unknown".to_string(),
            details: error.to_string(),
        }
    }
}

/// 从zip错误转换：不支持的压缩算法归为能力缺失，其余视为容器损坏
impl From<zip::result::ZipError> for TranslationError {
    fn from(error: zip::result::ZipError) -> Self {
        match error {
            zip::result::ZipError::UnsupportedArchive(details) => {
                TranslationError::MissingCapability {
                    capability: "zip".to_string(),
                    details: details.to_string(),
                }
            }
            zip::result::ZipError::Io(e) => e.into(),
            other => TranslationError::Container {
                path: "unknown".to_string(),
                details: other.to_string(),
            },
        }
    }
}
