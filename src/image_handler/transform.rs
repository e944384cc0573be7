//! # 像素变换模块
//!
//! ## 设计思路
//!
//! 用封闭的带标签枚举 `Transform` 描述所有可用变换，每个变体就是一条参数记录，
//! 通过 `match` 显式分派，不按字符串名称做运行时反射。
//! `TransformPipeline` 按顺序把多个变换应用到同一个缓冲上。
//!
//! ## 实现思路
//!
//! - 灰度：`0.2989 R + 0.5870 G + 0.1140 B` 截断取整，alpha 丢弃，输出单通道。
//! - 对比度 / 亮度：参数 0~100，除以 50 得到系数（50 为恒等）。
//!   对比度与图像平均亮度混合，亮度与黑色混合；alpha 原样保留。
//! - 边缘检测：先转亮度平面，再交给 `imageproc` 的 Canny 实现，输出单通道。
//!
//! 本模块只做内存计算，不记录日志。

use image::GrayImage;
use serde::{Deserialize, Serialize};

use super::{DecodedImage, ImageError};

pub const DEFAULT_EDGE_THRESHOLD_LOW: u32 = 30;
pub const DEFAULT_EDGE_THRESHOLD_HIGH: u32 = 100;
/// 对比度 / 亮度参数的中性值（系数 1.0）。
pub const NEUTRAL_LEVEL: f32 = 50.0;

fn default_threshold1() -> u32 {
    DEFAULT_EDGE_THRESHOLD_LOW
}

fn default_threshold2() -> u32 {
    DEFAULT_EDGE_THRESHOLD_HIGH
}

/// 可用变换。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    Grayscale,
    Contrast {
        level: f32,
    },
    Luminance {
        level: f32,
    },
    EdgeDetect {
        #[serde(default = "default_threshold1")]
        threshold1: u32,
        #[serde(default = "default_threshold2")]
        threshold2: u32,
    },
}

impl Transform {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Grayscale => "grayscale",
            Self::Contrast { .. } => "contrast",
            Self::Luminance { .. } => "luminance",
            Self::EdgeDetect { .. } => "edge_detect",
        }
    }

    pub fn edge_detect_default() -> Self {
        Self::EdgeDetect {
            threshold1: DEFAULT_EDGE_THRESHOLD_LOW,
            threshold2: DEFAULT_EDGE_THRESHOLD_HIGH,
        }
    }

    /// 在应用前校验参数。
    pub fn validate(&self) -> Result<(), ImageError> {
        match *self {
            Self::Contrast { level } => validate_level("contrast_level", level),
            Self::Luminance { level } => validate_level("luminance_level", level),
            Self::Grayscale | Self::EdgeDetect { .. } => Ok(()),
        }
    }

    /// 原地应用到缓冲；调色板图片先展开为 RGB / RGBA。
    pub fn apply(&self, image: &mut DecodedImage) -> Result<(), ImageError> {
        self.validate()?;
        image.expand_palette()?;

        match *self {
            Self::Grayscale => grayscale(image),
            Self::Contrast { level } => {
                contrast(image, level / NEUTRAL_LEVEL);
                Ok(())
            }
            Self::Luminance { level } => {
                luminance(image, level / NEUTRAL_LEVEL);
                Ok(())
            }
            Self::EdgeDetect {
                threshold1,
                threshold2,
            } => edge_detect(image, threshold1, threshold2),
        }
    }
}

/// 按顺序应用的一组变换。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformPipeline(Vec<Transform>);

impl TransformPipeline {
    pub fn new(transforms: Vec<Transform>) -> Self {
        Self(transforms)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transform> {
        self.0.iter()
    }

    /// 先整体校验，再依次应用；任一步失败即终止。
    pub fn apply(&self, image: &mut DecodedImage) -> Result<(), ImageError> {
        for transform in &self.0 {
            transform.validate()?;
        }
        for transform in &self.0 {
            transform.apply(image)?;
        }
        Ok(())
    }
}

impl From<Transform> for TransformPipeline {
    fn from(transform: Transform) -> Self {
        Self(vec![transform])
    }
}

fn validate_level(name: &str, level: f32) -> Result<(), ImageError> {
    if !level.is_finite() || !(0.0..=100.0).contains(&level) {
        return Err(ImageError::InvalidParameter(format!(
            "{} 必须在 0~100 之间，实际为 {}",
            name, level
        )));
    }
    Ok(())
}

/// 颜色通道数（不含 alpha）。
fn color_channels(channels: u8) -> usize {
    match channels {
        1 | 2 => 1,
        _ => 3,
    }
}

#[inline]
fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// ITU-R 601 亮度（整数权重，四舍五入）。
#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114 + 500) / 1000) as u8
}

/// 提取亮度平面；彩色按权重合成，灰度（含灰度 + alpha）直接取第一通道。
fn luma_plane(image: &DecodedImage) -> Result<Vec<u8>, ImageError> {
    let channels = image.channels() as usize;
    match image.channels() {
        1 => Ok(image.data().to_vec()),
        2 => Ok(image.data().chunks_exact(channels).map(|p| p[0]).collect()),
        3 | 4 => Ok(image
            .data()
            .chunks_exact(channels)
            .map(|p| luma(p[0], p[1], p[2]))
            .collect()),
        other => Err(ImageError::UnsupportedChannelLayout(format!(
            "无法从 {} 通道图像提取亮度",
            other
        ))),
    }
}

fn grayscale(image: &mut DecodedImage) -> Result<(), ImageError> {
    let channels = image.channels() as usize;
    let gray: Vec<u8> = match image.channels() {
        1 => return Ok(()),
        2 => image.data().chunks_exact(channels).map(|p| p[0]).collect(),
        3 | 4 => image
            .data()
            .chunks_exact(channels)
            .map(|p| {
                let value = 0.2989 * p[0] as f32 + 0.5870 * p[1] as f32 + 0.1140 * p[2] as f32;
                value as u8
            })
            .collect(),
        other => {
            return Err(ImageError::UnsupportedChannelLayout(format!(
                "无法对 {} 通道图像灰度化",
                other
            )));
        }
    };

    image.replace_pixels(1, gray)
}

/// 与平均亮度构成的灰色图混合：`mean + factor * (v - mean)`。
fn contrast(image: &mut DecodedImage, factor: f32) {
    let mean = match luma_plane(image) {
        Ok(plane) if !plane.is_empty() => {
            let sum: u64 = plane.iter().map(|&v| v as u64).sum();
            (sum as f64 / plane.len() as f64 + 0.5).floor() as f32
        }
        _ => return,
    };

    let channels = image.channels() as usize;
    let colors = color_channels(image.channels());
    for pixel in image.data_mut().chunks_exact_mut(channels) {
        for value in pixel.iter_mut().take(colors) {
            *value = clamp_to_u8(mean + factor * (*value as f32 - mean));
        }
    }
}

/// 与全黑图混合：`factor * v`。
fn luminance(image: &mut DecodedImage, factor: f32) {
    let channels = image.channels() as usize;
    let colors = color_channels(image.channels());
    for pixel in image.data_mut().chunks_exact_mut(channels) {
        for value in pixel.iter_mut().take(colors) {
            *value = clamp_to_u8(factor * *value as f32);
        }
    }
}

fn edge_detect(image: &mut DecodedImage, threshold1: u32, threshold2: u32) -> Result<(), ImageError> {
    let (low, high) = if threshold1 <= threshold2 {
        (threshold1, threshold2)
    } else {
        (threshold2, threshold1)
    };

    let plane = luma_plane(image)?;
    let gray = GrayImage::from_raw(image.width(), image.height(), plane)
        .ok_or_else(|| ImageError::Internal("亮度平面尺寸不一致".to_string()))?;

    let edges = imageproc::edges::canny(&gray, low as f32, high as f32);
    image.replace_pixels(1, edges.into_raw())
}
