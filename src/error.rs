//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义进程级统一的 `AppError` 枚举，覆盖启动、配置加载与服务监听阶段，
//! 替代各处分散的 `.map_err(|e| e.to_string())`、`expect()` 等不一致模式。
//!
//! 单次请求内的错误仍由 `ImageCommandError` 以 `{code, stage, message}` 返回，
//! `AppError` 只负责“进程无法继续”一类的错误。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `ImageError` / `std::io::Error` 提供 `From` 转换，无需手动 map。
//! - 实现 `Serialize` 将错误序列化为字符串，便于写入日志或 JSON。

use serde::Serialize;

use crate::image_handler::ImageError;

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 图片服务初始化或配置错误
    #[error("{0}")]
    Image(#[from] ImageError),

    /// 文件系统 / 网络 I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 配置文件缺失或格式错误
    #[error("配置错误: {0}")]
    Config(String),

    /// HTTP 请求无法解析
    #[error("HTTP 协议错误: {0}")]
    Http(String),
}

/// 将错误序列化为人类可读的字符串。
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_plain_string() {
        let error = AppError::Config("缺少 server 字段".to_string());
        let json = serde_json::to_string(&error).expect("serialize failed");
        assert_eq!(json, "\"配置错误: 缺少 server 字段\"");
    }

    #[test]
    fn image_error_converts_transparently() {
        let error: AppError = ImageError::InvalidParameter("jpeg_quality".to_string()).into();
        assert!(error.to_string().contains("jpeg_quality"));
    }
}
