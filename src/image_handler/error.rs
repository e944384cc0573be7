//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载图片链路中的所有错误来源，避免字符串拼接式错误处理。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//!
//! 所有错误对当前请求都是终止性的：核心层不重试、不返回“尽力而为”的部分结果，
//! 也不做格式猜测式的回退。

/// 图片处理统一错误类型。
///
/// 该类型会在命令层被转换为 `ImageCommandError`，最终透传给调用方。
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// 头部未声明 PNG / JPEG / GIF 中的任何一种格式。
    #[error("不支持的图片格式：{0}")]
    UnsupportedFormat(String),

    /// 负载不是合法 Base64，或无法按声明格式解码为结构完整的图片。
    #[error("图片数据损坏：{0}")]
    MalformedPayload(String),

    /// 通道数不在当前操作可接受的范围内。
    #[error("不支持的通道布局：{0}")]
    UnsupportedChannelLayout(String),

    /// 缓冲区与目标格式不兼容，或编码器执行失败。
    #[error("编码失败：{0}")]
    EncodingFailure(String),

    #[error("参数错误：{0}")]
    InvalidParameter(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("会话不存在：{0}")]
    SessionNotFound(String),

    #[error("内部错误：{0}")]
    Internal(String),
}

impl ImageError {
    /// 稳定错误码，供调用方按码分支处理。
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat(_) => "E_UNSUPPORTED_FORMAT",
            Self::MalformedPayload(_) => "E_MALFORMED_PAYLOAD",
            Self::UnsupportedChannelLayout(_) => "E_UNSUPPORTED_CHANNEL_LAYOUT",
            Self::EncodingFailure(_) => "E_ENCODING_FAILURE",
            Self::InvalidParameter(_) => "E_INVALID_PARAMETER",
            Self::ResourceLimit(_) => "E_RESOURCE_LIMIT",
            Self::SessionNotFound(_) => "E_SESSION_NOT_FOUND",
            Self::Internal(_) => "E_INTERNAL",
        }
    }

    /// 错误发生的处理阶段（用于日志与前端提示）。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat(_) | Self::MalformedPayload(_) | Self::ResourceLimit(_) => {
                "decode"
            }
            Self::EncodingFailure(_) => "encode",
            Self::UnsupportedChannelLayout(_) => "histogram",
            Self::InvalidParameter(_) => "transform",
            Self::SessionNotFound(_) => "session",
            Self::Internal(_) => "service",
        }
    }
}

impl From<ImageError> for String {
    fn from(error: ImageError) -> Self {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_per_variant() {
        let errors = [
            ImageError::UnsupportedFormat(String::new()),
            ImageError::MalformedPayload(String::new()),
            ImageError::UnsupportedChannelLayout(String::new()),
            ImageError::EncodingFailure(String::new()),
            ImageError::InvalidParameter(String::new()),
            ImageError::ResourceLimit(String::new()),
            ImageError::SessionNotFound(String::new()),
            ImageError::Internal(String::new()),
        ];

        let mut codes: Vec<&str> = errors.iter().map(ImageError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn message_contains_detail() {
        let err = ImageError::UnsupportedFormat("image/bmp".to_string());
        assert!(err.to_string().contains("image/bmp"));
        assert_eq!(err.stage(), "decode");
    }
}
