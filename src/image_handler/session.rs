//! # 会话图片存储
//!
//! ## 设计思路
//!
//! 部分接口需要引用“该调用方最近上传的图片”。这里用显式的会话存储承载这一需求，
//! 替代进程级全局变量：
//! - 会话 ID 由调用方提供
//! - 上传时创建，再次上传时整体替换，结束会话时移除
//! - 超过存活时间的条目视为不存在
//!
//! ## 实现思路
//!
//! - `RwLock<LruCache<..>>`：读多写少，读路径使用 `peek` 不更新 LRU 顺序，只需读锁。
//! - 读取时克隆缓冲，调用方独占自己的副本，后续变换不会影响存储中的原图。
//! - 容量满时由 LRU 淘汰最久未写入的会话。
//! - 会话 ID 只允许 URL 安全字符，查询参数无需解码即可原样使用。

use std::num::NonZeroUsize;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;

use super::config::MAX_SESSION_TTL_SECS;
use super::{DecodedImage, ImageError};

/// 默认会话 ID（调用方未指定时使用）。
pub const DEFAULT_SESSION_ID: &str = "default";
/// 会话 ID 最大长度（字节）。
pub const MAX_SESSION_ID_LEN: usize = 128;

struct SessionEntry {
    image: DecodedImage,
    uploaded_at: DateTime<Utc>,
}

/// 会话快照信息（不含像素）。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub uploaded_at: DateTime<Utc>,
}

pub struct SessionStore {
    entries: RwLock<LruCache<String, SessionEntry>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(capacity: usize, ttl_secs: u64) -> Result<Self, ImageError> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| ImageError::InvalidParameter("会话容量必须大于 0".to_string()))?;
        if !(1..=MAX_SESSION_TTL_SECS).contains(&ttl_secs) {
            return Err(ImageError::InvalidParameter(format!(
                "会话存活时间必须在 1~{} 秒之间",
                MAX_SESSION_TTL_SECS
            )));
        }
        let ttl = i64::try_from(ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| ImageError::InvalidParameter("会话存活时间过大".to_string()))?;

        Ok(Self {
            entries: RwLock::new(LruCache::new(capacity)),
            ttl,
        })
    }

    /// 只接受 `[A-Za-z0-9._~-]`，长度 1~128。
    fn validate_id(session_id: &str) -> Result<(), ImageError> {
        if session_id.is_empty() {
            return Err(ImageError::InvalidParameter("session_id 不能为空".to_string()));
        }
        if session_id.len() > MAX_SESSION_ID_LEN {
            return Err(ImageError::InvalidParameter(format!(
                "session_id 长度不能超过 {} 字节",
                MAX_SESSION_ID_LEN
            )));
        }
        let url_safe = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~');
        if !session_id.chars().all(url_safe) {
            return Err(ImageError::InvalidParameter(format!(
                "session_id 只能包含字母、数字与 -_.~：{}",
                session_id
            )));
        }
        Ok(())
    }

    fn info_of(session_id: &str, entry: &SessionEntry) -> SessionInfo {
        SessionInfo {
            session_id: session_id.to_string(),
            width: entry.image.width(),
            height: entry.image.height(),
            channels: entry.image.channels(),
            uploaded_at: entry.uploaded_at,
        }
    }

    fn is_expired(&self, entry: &SessionEntry, now: DateTime<Utc>) -> bool {
        now - entry.uploaded_at >= self.ttl
    }

    /// 存入会话图片；同一会话已有图片时整体替换。
    ///
    /// 返回在同一把写锁内生成的会话快照。
    pub fn put(&self, session_id: &str, image: DecodedImage) -> Result<SessionInfo, ImageError> {
        Self::validate_id(session_id)?;
        let now = Utc::now();

        let mut guard = self
            .entries
            .write()
            .map_err(|_| ImageError::Internal("会话存储写入锁已中毒".to_string()))?;

        let expired: Vec<String> = guard
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            guard.pop(id);
            log::info!("⌛ 会话已过期并清理：{}", id);
        }

        let entry = SessionEntry {
            image,
            uploaded_at: now,
        };
        let info = Self::info_of(session_id, &entry);
        let replaced = guard.put(session_id.to_string(), entry).is_some();

        log::info!(
            "📥 会话图片已{} - session: {} 当前会话数: {}",
            if replaced { "替换" } else { "创建" },
            session_id,
            guard.len()
        );

        Ok(info)
    }

    /// 取出会话图片的独立副本。
    pub fn get(&self, session_id: &str) -> Result<DecodedImage, ImageError> {
        Self::validate_id(session_id)?;

        let guard = self
            .entries
            .read()
            .map_err(|_| ImageError::Internal("会话存储读取锁已中毒".to_string()))?;

        match guard.peek(session_id) {
            Some(entry) if !self.is_expired(entry, Utc::now()) => Ok(entry.image.clone()),
            Some(_) => Err(ImageError::SessionNotFound(format!(
                "会话 {} 已过期，请重新上传图片",
                session_id
            ))),
            None => Err(ImageError::SessionNotFound(format!(
                "会话 {} 尚未上传图片",
                session_id
            ))),
        }
    }

    pub fn info(&self, session_id: &str) -> Result<SessionInfo, ImageError> {
        Self::validate_id(session_id)?;

        let guard = self
            .entries
            .read()
            .map_err(|_| ImageError::Internal("会话存储读取锁已中毒".to_string()))?;

        match guard.peek(session_id) {
            Some(entry) if !self.is_expired(entry, Utc::now()) => Ok(Self::info_of(session_id, entry)),
            _ => Err(ImageError::SessionNotFound(format!(
                "会话 {} 不存在或已过期",
                session_id
            ))),
        }
    }

    /// 结束会话；返回是否确实移除了条目。
    pub fn remove(&self, session_id: &str) -> Result<bool, ImageError> {
        Self::validate_id(session_id)?;

        let mut guard = self
            .entries
            .write()
            .map_err(|_| ImageError::Internal("会话存储写入锁已中毒".to_string()))?;
        let removed = guard.pop(session_id).is_some();

        if removed {
            log::info!("🗑️ 会话已结束：{}", session_id);
        }
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize, ImageError> {
        self.entries
            .read()
            .map(|guard| guard.len())
            .map_err(|_| ImageError::Internal("会话存储读取锁已中毒".to_string()))
    }

    pub fn is_empty(&self) -> Result<bool, ImageError> {
        self.len().map(|len| len == 0)
    }
}
