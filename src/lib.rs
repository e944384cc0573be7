//! # 图片处理服务 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  前端 (浏览器 / 任意 HTTP 客户端)         │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↕ HTTP/1.1 + JSON ({code, stage, message} 错误)
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            后端 (Rust)                           │
//! │                                                          │
//! │  ┌─ server ───── tokio 监听 · 路由 · CORS               │
//! │  │                                                       │
//! │  ├─ settings ─── JSON 配置文件 + 环境变量覆盖            │
//! │  │                                                       │
//! │  ├─ error ────── AppError (进程级统一错误类型)            │
//! │  │                                                       │
//! │  └─ image_handler                                        │
//! │      ├─ codec          Base64 ⇄ 像素缓冲                 │
//! │      ├─ histogram      逐通道 256 桶计数                 │
//! │      ├─ transform      灰度 · 对比度 · 亮度 · 边缘        │
//! │      └─ session        按会话保存最近上传的图片          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError`，启动与服务监听阶段的返回类型 |
//! | [`image_handler`] | 图片编解码、直方图、变换与会话存储 |
//! | [`server`] | HTTP/1.1 请求解析、路由、响应写回 |
//! | [`settings`] | 启动设置的加载与校验 |

pub mod error;
pub mod image_handler;
pub mod server;
pub mod settings;
