//! # 核心编排模块
//!
//! ## 设计思路
//!
//! `ImageHandler` 只负责流程编排与配置管理，不直接与 HTTP 层绑定。
//! 处理链路固定为：
//! 1. 读取配置快照
//! 2. 解码（Base64 文本或上传字节）
//! 3. 只读统计直方图，或按顺序应用变换
//! 4. 按来源格式重新编码
//!
//! ## 实现思路
//!
//! - 配置通过 `Arc<RwLock<ImageConfig>>` 支持运行时调整。
//! - 单次请求内使用“同一配置快照”，避免处理中途配置漂移。
//! - 记录 `decode/process/encode/total` 阶段耗时，便于性能诊断。
//! - 编解码、直方图与变换本身是纯计算，日志统一在这一层输出。

use std::sync::{Arc, RwLock};
use std::time::Instant;

use super::session::{SessionInfo, SessionStore};
use super::{
    DecodedImage, EncodedImage, HistogramResult, ImageConfig, ImageError, TransformPipeline, codec,
    histogram,
};

/// 图片处理器。
///
/// 持有配置状态与会话存储，并编排各子模块实现完整流程。
pub struct ImageHandler {
    pub(super) config: Arc<RwLock<ImageConfig>>,
    pub(super) sessions: SessionStore,
}

impl ImageHandler {
    /// 根据初始配置创建处理器。
    ///
    /// 会话容量与存活时间在此时确定，之后修改配置不会重建会话存储。
    pub fn new(config: ImageConfig) -> Result<Self, ImageError> {
        config.validate()?;
        let sessions = SessionStore::new(config.session_capacity, config.session_ttl_secs)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            sessions,
        })
    }

    /// 获取配置快照。
    ///
    /// 作用：保证单次请求链路使用一致参数。
    pub(super) fn config_snapshot(&self) -> Result<ImageConfig, ImageError> {
        self.config
            .read()
            .map(|cfg| cfg.clone())
            .map_err(|_| ImageError::Internal("配置读取锁已中毒".to_string()))
    }

    /// 校验后整体替换配置，对后续请求生效。
    pub fn set_config(&self, config: ImageConfig) -> Result<(), ImageError> {
        config.validate()?;

        let mut current = self
            .config
            .write()
            .map_err(|_| ImageError::Internal("配置写入锁已中毒".to_string()))?;
        *current = config;

        log::info!(
            "⚙️ 已更新图片配置（max_payload_bytes={}, max_decoded_pixels={}, jpeg_quality={}, parallel_min_pixels={}）",
            current.max_payload_bytes,
            current.max_decoded_pixels,
            current.jpeg_quality,
            current.parallel_histogram_min_pixels
        );
        Ok(())
    }

    pub fn get_config(&self) -> Result<ImageConfig, ImageError> {
        self.config_snapshot()
    }

    /// 解码 Base64 文本并统计直方图。
    pub fn histogram(&self, encoded: &str) -> Result<HistogramResult, ImageError> {
        let config = self.config_snapshot()?;
        let total_start = Instant::now();

        let decode_start = Instant::now();
        let image = codec::decode(&EncodedImage::parse(encoded)?, &config)?;
        let decode_elapsed = decode_start.elapsed();

        let histogram_start = Instant::now();
        let result = Self::histogram_with(&image, &config)?;
        let histogram_elapsed = histogram_start.elapsed();

        log::info!(
            "📊 直方图统计完成 - 尺寸: {}x{} 通道: {} decode={}ms histogram={}ms total={}ms",
            image.width(),
            image.height(),
            image.channels(),
            decode_elapsed.as_millis(),
            histogram_elapsed.as_millis(),
            total_start.elapsed().as_millis()
        );

        Ok(result)
    }

    /// 按像素规模选择顺序或分块并行统计。
    fn histogram_with(image: &DecodedImage, config: &ImageConfig) -> Result<HistogramResult, ImageError> {
        if image.pixel_count() >= config.parallel_histogram_min_pixels {
            histogram::compute_partitioned(image, config.histogram_rows_per_chunk)
        } else {
            histogram::compute(image)
        }
    }

    /// 解码、应用变换并按原格式重新编码。
    pub fn transform(&self, encoded: &str, pipeline: &TransformPipeline) -> Result<EncodedImage, ImageError> {
        let config = self.config_snapshot()?;

        let decode_start = Instant::now();
        let image = codec::decode(&EncodedImage::parse(encoded)?, &config)?;
        let decode_elapsed = decode_start.elapsed();

        self.transform_decoded(image, pipeline, &config, decode_elapsed.as_millis())
    }

    fn transform_decoded(
        &self,
        mut image: DecodedImage,
        pipeline: &TransformPipeline,
        config: &ImageConfig,
        decode_ms: u128,
    ) -> Result<EncodedImage, ImageError> {
        let process_start = Instant::now();
        pipeline.apply(&mut image)?;
        let process_elapsed = process_start.elapsed();

        let encode_start = Instant::now();
        let encoded = codec::encode_as_origin(&image, config)?;
        let encode_elapsed = encode_start.elapsed();

        let steps: Vec<&str> = pipeline.iter().map(|t| t.name()).collect();
        log::info!(
            "🎨 图片变换完成 - 步骤: [{}] 输出: {}x{}x{} decode={}ms process={}ms encode={}ms",
            steps.join(", "),
            image.width(),
            image.height(),
            image.channels(),
            decode_ms,
            process_elapsed.as_millis(),
            encode_elapsed.as_millis()
        );

        Ok(encoded)
    }

    /// 解码上传的原始字节并存入会话。
    pub fn upload_bytes(&self, session_id: &str, bytes: &[u8]) -> Result<SessionInfo, ImageError> {
        let config = self.config_snapshot()?;
        log::info!("📁 开始处理上传图片 - session: {} 大小: {} 字节", session_id, bytes.len());

        let image = codec::decode_bytes(bytes, &config)?;
        self.sessions.put(session_id, image)
    }

    /// 解码 Base64 文本并存入会话。
    pub fn upload_encoded(&self, session_id: &str, encoded: &str) -> Result<SessionInfo, ImageError> {
        let config = self.config_snapshot()?;
        log::info!("📝 开始处理 base64 上传 - session: {}", session_id);

        let image = codec::decode(&EncodedImage::parse(encoded)?, &config)?;
        self.sessions.put(session_id, image)
    }

    /// 对会话图片的副本应用变换；会话中的原图保持不变。
    pub fn transform_session(
        &self,
        session_id: &str,
        pipeline: &TransformPipeline,
    ) -> Result<EncodedImage, ImageError> {
        let config = self.config_snapshot()?;
        let image = self.sessions.get(session_id)?;
        self.transform_decoded(image, pipeline, &config, 0)
    }

    pub fn session_histogram(&self, session_id: &str) -> Result<HistogramResult, ImageError> {
        let config = self.config_snapshot()?;
        let image = self.sessions.get(session_id)?;
        Self::histogram_with(&image, &config)
    }

    pub fn end_session(&self, session_id: &str) -> Result<bool, ImageError> {
        self.sessions.remove(session_id)
    }
}
