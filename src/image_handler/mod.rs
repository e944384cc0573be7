//! # 图片处理模块（image_handler）
//!
//! ## 设计思路
//!
//! 该模块将“Base64 解析 → 解码校验 → 直方图统计 / 像素变换 → 重新编码 → 接口暴露”
//! 按职责拆分为多个子模块，避免单文件膨胀与耦合。
//!
//! - `commands`：仅做接口入参/出参适配（薄封装）
//! - `service`：承载可注入状态（`ImageServiceState`）
//! - `handler`：编排整条处理流水线
//! - `codec`：负责 Base64 与像素缓冲之间的双向转换及安全校验
//! - `histogram`：负责逐通道 256 桶计数（顺序或分块并行）
//! - `transform`：负责灰度、对比度、亮度、边缘检测
//! - `session`：负责按会话 ID 保存最近上传的图片
//! - `config/error/source`：配置、错误、中间数据模型
//!
//! ## 实现思路
//!
//! 对外仅暴露必要类型与命令函数，内部细节保持 `mod` 私有。
//! HTTP 层通过 `Arc<ImageServiceState>` 注入状态，提升测试隔离与后续扩展能力。
//!
//! ## 新同事快速上手
//!
//! 可以按下面顺序理解调用链：
//!
//! ```text
//! HTTP 请求
//!    ↓
//! server.rs（路由 + 请求解析）
//!    ↓
//! commands.rs（参数适配 + 状态码映射）
//!    ↓
//! service.rs（State 注入、服务入口）
//!    ↓
//! handler.rs（统一编排 + 阶段耗时日志）
//!    ├─ codec.rs（Base64/字节解码 + 体积/像素限制 + 编码）
//!    ├─ histogram.rs（通道直方图）
//!    ├─ transform.rs（像素变换）
//!    └─ session.rs（会话图片存储）
//!    ↓
//! 返回 JSON 或 ImageCommandError
//! ```
//!
//! ## 分层职责建议
//!
//! - 接口变更（路由/参数）优先改 `commands.rs`
//! - 配置与限制变更优先改 `config.rs`
//! - 业务流程顺序变更优先改 `handler.rs`
//! - 单阶段行为优化分别改 `codec/histogram/transform`

pub mod codec;
pub mod commands;
mod config;
mod error;
mod handler;
pub mod histogram;
mod service;
mod session;
mod source;
pub mod transform;

pub use commands::ImageCommandError;
pub use config::ImageConfig;
pub use error::ImageError;
pub use histogram::{Histogram, HistogramResult};
pub use service::ImageServiceState;
pub use session::{DEFAULT_SESSION_ID, SessionInfo, SessionStore};
pub use source::{DecodedImage, EncodedImage, ImageFormat, ImageOrigin, Palette};
pub use transform::{Transform, TransformPipeline};

/// 内部核心编排器，不直接暴露给接口层。
pub(crate) use handler::ImageHandler;
