//! # 命令层
//!
//! ## 设计思路
//!
//! 命令层仅做入参接收与结果返回，不承载业务逻辑。
//! 每个命令对应一个对外接口，所有实际处理交由 `ImageServiceState`，
//! 保持命令函数薄、稳定、易测试。
//!
//! 错误统一转换为 `ImageCommandError { code, stage, message }`，
//! 状态码映射也在这一层完成，核心层不感知传输协议。

use serde::{Deserialize, Serialize};

use super::session::{DEFAULT_SESSION_ID, SessionInfo};
use super::transform::{DEFAULT_EDGE_THRESHOLD_HIGH, DEFAULT_EDGE_THRESHOLD_LOW};
use super::{HistogramResult, ImageConfig, ImageError, ImageServiceState, Transform};

#[derive(Debug, Clone, Serialize)]
pub struct ImageCommandError {
    pub code: &'static str,
    pub stage: &'static str,
    pub message: String,
    #[serde(skip)]
    pub status: u16,
}

impl ImageCommandError {
    /// 请求本身无法解析（JSON 格式错误、缺少字段等）。
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: "E_BAD_REQUEST",
            stage: "request",
            message: message.into(),
            status: 400,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            code: "E_NOT_FOUND",
            stage: "request",
            message: message.into(),
            status: 404,
        }
    }
}

impl From<ImageError> for ImageCommandError {
    fn from(error: ImageError) -> Self {
        let status = match &error {
            ImageError::UnsupportedFormat(_) => 415,
            ImageError::MalformedPayload(_) | ImageError::InvalidParameter(_) => 400,
            ImageError::UnsupportedChannelLayout(_) | ImageError::EncodingFailure(_) => 422,
            ImageError::ResourceLimit(_) => 413,
            ImageError::SessionNotFound(_) => 404,
            ImageError::Internal(_) => 500,
        };

        Self {
            code: error.code(),
            stage: error.stage(),
            message: error.to_string(),
            status,
        }
    }
}

fn default_threshold_low() -> u32 {
    DEFAULT_EDGE_THRESHOLD_LOW
}

fn default_threshold_high() -> u32 {
    DEFAULT_EDGE_THRESHOLD_HIGH
}

fn session_or_default(session_id: Option<&str>) -> &str {
    session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or(DEFAULT_SESSION_ID)
}

#[derive(Debug, Clone, Deserialize)]
pub struct Base64ImageRequest {
    pub base64_image: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeDetectRequest {
    pub base64_image: String,
    #[serde(default = "default_threshold_low")]
    pub threshold1: u32,
    #[serde(default = "default_threshold_high")]
    pub threshold2: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineRequest {
    pub base64_image: String,
    pub transforms: Vec<Transform>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageResponse {
    pub message: String,
    pub base64_image: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdjustedImageResponse {
    pub message: String,
    pub adjusted_image_base64: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub message: String,
    #[serde(flatten)]
    pub session: SessionInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndSessionResponse {
    pub removed: bool,
}

/// 上传原始图片字节并存入会话。
pub fn upload_image(
    state: &ImageServiceState,
    session_id: Option<&str>,
    bytes: &[u8],
) -> Result<UploadResponse, ImageCommandError> {
    let session = state.upload_bytes(session_or_default(session_id), bytes)?;
    Ok(UploadResponse {
        message: "图片上传成功。".to_string(),
        session,
    })
}

/// 上传 Base64 图片并存入会话。
pub fn upload_base64_image(
    state: &ImageServiceState,
    session_id: Option<&str>,
    request: Base64ImageRequest,
) -> Result<UploadResponse, ImageCommandError> {
    let session = state.upload_encoded(session_or_default(session_id), &request.base64_image)?;
    Ok(UploadResponse {
        message: "图片上传成功。".to_string(),
        session,
    })
}

/// 计算直接传入图片的通道直方图。
pub fn get_histogram(
    state: &ImageServiceState,
    request: Base64ImageRequest,
) -> Result<HistogramResult, ImageCommandError> {
    Ok(state.histogram(&request.base64_image)?)
}

pub fn detect_edges(
    state: &ImageServiceState,
    request: EdgeDetectRequest,
) -> Result<ImageResponse, ImageCommandError> {
    let output = state.transform(
        &request.base64_image,
        vec![Transform::EdgeDetect {
            threshold1: request.threshold1,
            threshold2: request.threshold2,
        }],
    )?;

    Ok(ImageResponse {
        message: "边缘检测滤镜应用成功。".to_string(),
        base64_image: output.to_string(),
    })
}

pub fn apply_grayscale_filter(
    state: &ImageServiceState,
    request: Base64ImageRequest,
) -> Result<ImageResponse, ImageCommandError> {
    let output = state.transform(&request.base64_image, vec![Transform::Grayscale])?;

    Ok(ImageResponse {
        message: "灰度滤镜应用成功。".to_string(),
        base64_image: output.to_string(),
    })
}

/// 按顺序应用请求中的全部变换。
pub fn apply_pipeline(
    state: &ImageServiceState,
    request: PipelineRequest,
) -> Result<ImageResponse, ImageCommandError> {
    let steps = request.transforms.len();
    let output = state.transform(&request.base64_image, request.transforms)?;

    Ok(ImageResponse {
        message: format!("已应用 {} 个变换。", steps),
        base64_image: output.to_string(),
    })
}

/// 调整会话图片的对比度（0~100，50 为原图）。
pub fn adjust_contrast(
    state: &ImageServiceState,
    session_id: Option<&str>,
    contrast_level: f32,
) -> Result<AdjustedImageResponse, ImageCommandError> {
    let output = state.transform_session(
        session_or_default(session_id),
        Transform::Contrast {
            level: contrast_level,
        },
    )?;

    Ok(AdjustedImageResponse {
        message: "对比度调整成功。".to_string(),
        adjusted_image_base64: output.to_string(),
    })
}

/// 调整会话图片的亮度（0~100，50 为原图）。
pub fn adjust_luminance(
    state: &ImageServiceState,
    session_id: Option<&str>,
    luminance_level: f32,
) -> Result<AdjustedImageResponse, ImageCommandError> {
    let output = state.transform_session(
        session_or_default(session_id),
        Transform::Luminance {
            level: luminance_level,
        },
    )?;

    Ok(AdjustedImageResponse {
        message: "亮度调整成功。".to_string(),
        adjusted_image_base64: output.to_string(),
    })
}

pub fn get_session_histogram(
    state: &ImageServiceState,
    session_id: Option<&str>,
) -> Result<HistogramResult, ImageCommandError> {
    Ok(state.session_histogram(session_or_default(session_id))?)
}

pub fn end_session(
    state: &ImageServiceState,
    session_id: Option<&str>,
) -> Result<EndSessionResponse, ImageCommandError> {
    let removed = state.end_session(session_or_default(session_id))?;
    Ok(EndSessionResponse { removed })
}

pub fn get_image_config(state: &ImageServiceState) -> Result<ImageConfig, ImageCommandError> {
    Ok(state.get_config()?)
}

pub fn set_image_config(
    state: &ImageServiceState,
    config: ImageConfig,
) -> Result<ImageConfig, ImageCommandError> {
    state.set_config(config)?;
    Ok(state.get_config()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_follows_error_kind() {
        let cases = [
            (ImageError::UnsupportedFormat(String::new()), 415),
            (ImageError::MalformedPayload(String::new()), 400),
            (ImageError::UnsupportedChannelLayout(String::new()), 422),
            (ImageError::EncodingFailure(String::new()), 422),
            (ImageError::InvalidParameter(String::new()), 400),
            (ImageError::ResourceLimit(String::new()), 413),
            (ImageError::SessionNotFound(String::new()), 404),
            (ImageError::Internal(String::new()), 500),
        ];

        for (error, status) in cases {
            assert_eq!(ImageCommandError::from(error).status, status);
        }
    }

    #[test]
    fn error_serializes_without_status() {
        let error = ImageCommandError::from(ImageError::UnsupportedFormat("image/bmp".to_string()));
        let json = serde_json::to_value(&error).expect("serialize failed");

        assert_eq!(json["code"], "E_UNSUPPORTED_FORMAT");
        assert_eq!(json["stage"], "decode");
        assert!(json.get("status").is_none());
    }

    #[test]
    fn blank_session_falls_back_to_default() {
        assert_eq!(session_or_default(None), DEFAULT_SESSION_ID);
        assert_eq!(session_or_default(Some("  ")), DEFAULT_SESSION_ID);
        assert_eq!(session_or_default(Some("abc")), "abc");
    }

    #[test]
    fn edge_request_defaults_thresholds() {
        let request: EdgeDetectRequest =
            serde_json::from_str(r#"{ "base64_image": "x" }"#).expect("parse failed");
        assert_eq!((request.threshold1, request.threshold2), (30, 100));
    }

    #[test]
    fn contrast_without_upload_reports_missing_session() {
        let state = ImageServiceState::new().expect("service init failed");
        let error = adjust_contrast(&state, None, 60.0).expect_err("should fail without upload");

        assert_eq!(error.code, "E_SESSION_NOT_FOUND");
        assert_eq!(error.status, 404);
    }
}
