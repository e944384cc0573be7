//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `ImageConfig`，保证运行时行为可观测、可调整、可测试。
//! 字段覆盖解码资源上限、编码质量、直方图并行策略与会话存储四个方面。
//!
//! ## 实现思路
//!
//! - `Default` 提供生产可用的配置。
//! - `#[serde(default)]` 允许配置文件只写需要覆盖的字段。
//! - `validate` 在配置生效前统一校验，非法值直接拒绝而不是静默修正。

use serde::{Deserialize, Serialize};

use super::ImageError;

/// 会话存活时间上限（秒），与 `chrono::Duration` 可表示的秒数范围一致。
pub const MAX_SESSION_TTL_SECS: u64 = (i64::MAX / 1000) as u64;

/// 图片处理配置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Base64 负载解码后允许的最大体积（字节）。
    pub max_payload_bytes: u64,
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// JPEG 重新编码质量（1~100）。
    pub jpeg_quality: u8,
    /// 像素数达到该值时，直方图按行分块并行统计。
    pub parallel_histogram_min_pixels: u64,
    /// 并行统计时每个分块包含的行数。
    pub histogram_rows_per_chunk: usize,
    /// 会话存储最多保留的会话数（LRU 淘汰）。
    pub session_capacity: usize,
    /// 会话图片的存活时间（秒）。
    pub session_ttl_secs: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 50 * 1024 * 1024,
            max_decoded_pixels: 40_000_000,
            jpeg_quality: 90,
            parallel_histogram_min_pixels: 1_000_000,
            histogram_rows_per_chunk: 64,
            session_capacity: 64,
            session_ttl_secs: 3600,
        }
    }
}

impl ImageConfig {
    /// 校验配置取值范围。
    ///
    /// # 示例
    /// ```rust
    /// use image_lab::image_handler::ImageConfig;
    ///
    /// let mut config = ImageConfig::default();
    /// assert!(config.validate().is_ok());
    ///
    /// config.jpeg_quality = 0;
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ImageError> {
        if self.max_payload_bytes < 1024 {
            return Err(ImageError::InvalidParameter(
                "max_payload_bytes 不能小于 1KB".to_string(),
            ));
        }
        if self.max_decoded_pixels == 0 {
            return Err(ImageError::InvalidParameter(
                "max_decoded_pixels 必须大于 0".to_string(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ImageError::InvalidParameter(
                "jpeg_quality 必须在 1~100 之间".to_string(),
            ));
        }
        if self.histogram_rows_per_chunk == 0 {
            return Err(ImageError::InvalidParameter(
                "histogram_rows_per_chunk 必须大于 0".to_string(),
            ));
        }
        if self.session_capacity == 0 {
            return Err(ImageError::InvalidParameter(
                "session_capacity 必须大于 0".to_string(),
            ));
        }
        if !(1..=MAX_SESSION_TTL_SECS).contains(&self.session_ttl_secs) {
            return Err(ImageError::InvalidParameter(format!(
                "session_ttl_secs 必须在 1~{} 之间",
                MAX_SESSION_TTL_SECS
            )));
        }
        Ok(())
    }
}
