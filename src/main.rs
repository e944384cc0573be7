//! # 图片处理服务 — 应用入口
//!
//! 本文件仅负责日志初始化、设置加载与服务启动。
//! 业务逻辑分布在各子模块中，详见 `lib.rs` 架构文档。

use std::sync::Arc;

use image_lab::error::AppError;
use image_lab::image_handler::ImageServiceState;
use image_lab::{server, settings::AppSettings};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("setup: begin");
    let settings = AppSettings::from_env().inspect_err(|err| {
        log::error!("setup: 设置加载失败: {err}");
    })?;
    log::info!("setup: settings loaded");

    let state = ImageServiceState::with_config(settings.image).inspect_err(|err| {
        log::error!("setup: 图片服务初始化失败: {err}");
    })?;
    log::info!("setup: image service ready");

    server::run(settings.server, Arc::new(state)).await
}
