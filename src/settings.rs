//! # 应用设置
//!
//! 启动时读取一次：JSON 配置文件（路径由 `IMAGE_LAB_CONFIG` 指定）+ 环境变量覆盖。
//! 文件缺省时全部使用默认值；`IMAGE_LAB_ADDR` 优先级高于文件中的监听地址。

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::image_handler::ImageConfig;

pub const CONFIG_PATH_ENV: &str = "IMAGE_LAB_CONFIG";
pub const BIND_ADDR_ENV: &str = "IMAGE_LAB_ADDR";

/// HTTP 层配置。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// CORS 允许的来源（前端开发服务器地址）
    pub allowed_origin: String,
    /// 单个请求体上限（字节），超出直接返回 413
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            allowed_origin: "http://localhost:5173".to_string(),
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub server: ServerConfig,
    pub image: ImageConfig,
}

impl AppSettings {
    /// 从环境变量指定的位置加载设置。
    pub fn from_env() -> Result<Self, AppError> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let addr = std::env::var(BIND_ADDR_ENV).ok();
        Self::load(path.as_deref(), addr)
    }

    /// 读取配置文件（可选）并应用监听地址覆盖。
    pub fn load(path: Option<&Path>, bind_addr_override: Option<String>) -> Result<Self, AppError> {
        let mut settings = match path {
            Some(path) => Self::read_file(path)?,
            None => Self::default(),
        };

        if let Some(addr) = bind_addr_override.filter(|addr| !addr.trim().is_empty()) {
            settings.server.bind_addr = addr;
        }

        if settings.server.max_body_bytes == 0 {
            return Err(AppError::Config("server.max_body_bytes 必须大于 0".to_string()));
        }
        settings.image.validate()?;

        Ok(settings)
    }

    fn read_file(path: &Path) -> Result<Self, AppError> {
        let content = fs::read_to_string(path)?;
        let settings = serde_json::from_str::<Self>(&content)
            .map_err(|e| AppError::Config(format!("解析设置文件 {} 失败: {}", path.display(), e)))?;

        log::info!("⚙️ 已加载设置文件：{}", path.display());
        Ok(settings)
    }
}
