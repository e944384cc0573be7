//! # 服务层（可注入状态）
//!
//! ## 设计思路
//!
//! 使用 `ImageServiceState` 作为服务端共享状态，替代进程级全局变量。
//! 好处：
//! 1. 生命周期清晰（由 `main.rs` 统一创建并以 `Arc` 共享）
//! 2. 测试可创建独立实例，减少共享状态副作用
//! 3. 会话按调用方 ID 隔离，互不覆盖
//!
//! ## 实现思路
//!
//! 对外仅暴露少量稳定 API，参数以字符串 / 字节形式进入，内部再交给 `ImageHandler`：
//! - `histogram` / `transform`：图片作为直接参数传入，无状态
//! - `upload_*` / `*_session`：围绕会话存储的有状态调用
//! - `set_config` / `get_config`：运行时配置

use super::session::SessionInfo;
use super::{
    EncodedImage, HistogramResult, ImageConfig, ImageError, ImageHandler, Transform,
    TransformPipeline,
};

/// 图片处理服务状态。
pub struct ImageServiceState {
    handler: ImageHandler,
}

impl ImageServiceState {
    /// 使用默认配置创建服务状态。
    ///
    /// # 示例
    /// ```rust
    /// use image_lab::image_handler::ImageServiceState;
    ///
    /// let service = ImageServiceState::new()?;
    /// # Ok::<(), image_lab::image_handler::ImageError>(())
    /// ```
    pub fn new() -> Result<Self, ImageError> {
        Self::with_config(ImageConfig::default())
    }

    /// 使用自定义配置创建服务状态。
    ///
    /// # 示例
    /// ```rust
    /// use image_lab::image_handler::{ImageConfig, ImageServiceState};
    ///
    /// let config = ImageConfig {
    ///     session_capacity: 8,
    ///     ..ImageConfig::default()
    /// };
    /// let service = ImageServiceState::with_config(config)?;
    /// # Ok::<(), image_lab::image_handler::ImageError>(())
    /// ```
    pub fn with_config(config: ImageConfig) -> Result<Self, ImageError> {
        let handler = ImageHandler::new(config)?;
        Ok(Self { handler })
    }

    pub fn histogram(&self, encoded: &str) -> Result<HistogramResult, ImageError> {
        self.handler.histogram(encoded)
    }

    /// 对直接传入的图片应用一组变换。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use image_lab::image_handler::{ImageServiceState, Transform};
    ///
    /// let service = ImageServiceState::new()?;
    /// let output = service.transform("data:image/png;base64,....", vec![Transform::Grayscale])?;
    /// println!("{}", output);
    /// # Ok::<(), image_lab::image_handler::ImageError>(())
    /// ```
    pub fn transform(&self, encoded: &str, transforms: Vec<Transform>) -> Result<EncodedImage, ImageError> {
        if transforms.is_empty() {
            return Err(ImageError::InvalidParameter("变换列表不能为空".to_string()));
        }
        self.handler
            .transform(encoded, &TransformPipeline::new(transforms))
    }

    pub fn upload_bytes(&self, session_id: &str, bytes: &[u8]) -> Result<SessionInfo, ImageError> {
        self.handler.upload_bytes(session_id, bytes)
    }

    pub fn upload_encoded(&self, session_id: &str, encoded: &str) -> Result<SessionInfo, ImageError> {
        self.handler.upload_encoded(session_id, encoded)
    }

    pub fn transform_session(&self, session_id: &str, transform: Transform) -> Result<EncodedImage, ImageError> {
        self.handler
            .transform_session(session_id, &TransformPipeline::from(transform))
    }

    pub fn session_histogram(&self, session_id: &str) -> Result<HistogramResult, ImageError> {
        self.handler.session_histogram(session_id)
    }

    pub fn end_session(&self, session_id: &str) -> Result<bool, ImageError> {
        self.handler.end_session(session_id)
    }

    pub fn set_config(&self, config: ImageConfig) -> Result<(), ImageError> {
        self.handler.set_config(config)
    }

    pub fn get_config(&self) -> Result<ImageConfig, ImageError> {
        self.handler.get_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_handler::{DecodedImage, ImageFormat, codec};
    use std::sync::Arc;
    use std::thread;

    fn encoded_gray(values: &[u8]) -> String {
        let image = DecodedImage::new(values.len() as u32, 1, 1, values.to_vec()).expect("fixture init failed");
        codec::encode(&image, ImageFormat::Png, &ImageConfig::default())
            .expect("fixture encode failed")
            .to_string()
    }

    #[test]
    fn empty_transform_list_is_rejected() {
        let service = ImageServiceState::new().expect("service init failed");
        let result = service.transform(&encoded_gray(&[1, 2]), Vec::new());
        assert!(matches!(result, Err(ImageError::InvalidParameter(_))));
    }

    #[test]
    fn session_histogram_requires_upload() {
        let service = ImageServiceState::new().expect("service init failed");
        assert!(matches!(
            service.session_histogram("missing"),
            Err(ImageError::SessionNotFound(_))
        ));
    }

    #[test]
    fn service_concurrent_requests_are_independent() {
        let service = Arc::new(ImageServiceState::new().expect("service init failed"));

        let workers = 8;
        let iterations = 50;

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let service = Arc::clone(&service);
            handles.push(thread::spawn(move || {
                let session_id = format!("session-{}", worker_id);
                let value = (worker_id * 20) as u8;
                let encoded = encoded_gray(&[value, value, value]);

                for _ in 0..iterations {
                    service.upload_encoded(&session_id, &encoded).expect("upload should succeed");

                    let HistogramResult::Gray { hist } =
                        service.session_histogram(&session_id).expect("histogram should succeed")
                    else {
                        panic!("gray upload should yield gray histogram");
                    };
                    assert_eq!(hist.count(value), 3);
                }
            }));
        }

        for handle in handles {
            handle.join().expect("worker thread should not panic");
        }
    }

    #[test]
    #[ignore = "long-running soak test"]
    fn service_histogram_long_running_soak() {
        let service = Arc::new(ImageServiceState::new().expect("service init failed"));
        let encoded = Arc::new(encoded_gray(&[7; 64]));

        let workers = 12;
        let iterations = 5_000;

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let service = Arc::clone(&service);
            let encoded = Arc::clone(&encoded);
            handles.push(thread::spawn(move || {
                for _ in 0..iterations {
                    let result = service.histogram(&encoded).expect("histogram should succeed");
                    assert!(!result.is_color());
                }
            }));
        }

        for handle in handles {
            handle.join().expect("worker thread should not panic");
        }
    }
}
