//! # 通道直方图模块
//!
//! ## 设计思路
//!
//! 对已解码缓冲按通道统计 0~255 各强度级别的像素数。
//! 统计只读、与访问顺序无关：每个像素恰好访问一次，各通道计数互相独立。
//!
//! ## 实现思路
//!
//! - 3/4 通道：取前三个通道，alpha 忽略。
//! - 1 通道：单序列统计。
//! - 2 通道（灰度 + alpha）：显式拒绝，返回 `UnsupportedChannelLayout`。
//! - 大图按行区间分块，在 `rayon` 线程池上各自统计局部计数，最后逐元素相加合并。
//!   合并满足交换律与结合律，因此分块结果与顺序结果一致。
//!
//! 对外序列化沿用既有接口命名：通道 0 → `hist_blue`，通道 1 → `hist_green`，
//! 通道 2 → `hist_red`。

use rayon::prelude::*;
use serde::{Serialize, Serializer};

use super::{DecodedImage, ImageError};

pub const BUCKETS: usize = 256;

/// 单通道 256 级计数。
#[derive(Clone, PartialEq, Eq)]
pub struct Histogram(Box<[u64; BUCKETS]>);

impl Histogram {
    pub fn new() -> Self {
        Self(Box::new([0; BUCKETS]))
    }

    #[inline]
    fn increment(&mut self, level: u8) {
        self.0[level as usize] += 1;
    }

    pub fn count(&self, level: u8) -> u64 {
        self.0[level as usize]
    }

    pub fn counts(&self) -> &[u64; BUCKETS] {
        &self.0
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    /// 逐元素相加。
    pub fn merge(&mut self, other: &Histogram) {
        for (left, right) in self.0.iter_mut().zip(other.0.iter()) {
            *left += right;
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 只打印非零桶，256 项全量输出不可读
        f.debug_map()
            .entries(self.0.iter().enumerate().filter(|(_, count)| **count > 0))
            .finish()
    }
}

impl Serialize for Histogram {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.0.iter())
    }
}

/// 直方图结果：彩色三通道或单通道。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HistogramResult {
    Color {
        #[serde(rename = "hist_blue")]
        blue: Histogram,
        #[serde(rename = "hist_green")]
        green: Histogram,
        #[serde(rename = "hist_red")]
        red: Histogram,
    },
    Gray {
        hist: Histogram,
    },
}

impl HistogramResult {
    fn empty_for(channels: u8) -> Result<Self, ImageError> {
        match channels {
            1 => Ok(Self::Gray {
                hist: Histogram::new(),
            }),
            3 | 4 => Ok(Self::Color {
                blue: Histogram::new(),
                green: Histogram::new(),
                red: Histogram::new(),
            }),
            other => Err(ImageError::UnsupportedChannelLayout(format!(
                "直方图只接受 1、3 或 4 通道，实际为 {} 通道",
                other
            ))),
        }
    }

    /// 统计一段紧密排列的像素（长度必须是 `channels` 的整数倍）。
    fn accumulate(&mut self, pixels: &[u8], channels: usize) {
        match self {
            Self::Gray { hist } => {
                for &value in pixels {
                    hist.increment(value);
                }
            }
            Self::Color { blue, green, red } => {
                for pixel in pixels.chunks_exact(channels) {
                    blue.increment(pixel[0]);
                    green.increment(pixel[1]);
                    red.increment(pixel[2]);
                }
            }
        }
    }

    /// 合并另一个同形状的局部结果。
    pub fn merge(mut self, other: &HistogramResult) -> Result<Self, ImageError> {
        match (&mut self, other) {
            (Self::Gray { hist }, Self::Gray { hist: rhs }) => hist.merge(rhs),
            (
                Self::Color { blue, green, red },
                Self::Color {
                    blue: rhs_blue,
                    green: rhs_green,
                    red: rhs_red,
                },
            ) => {
                blue.merge(rhs_blue);
                green.merge(rhs_green);
                red.merge(rhs_red);
            }
            _ => {
                return Err(ImageError::UnsupportedChannelLayout(
                    "无法合并彩色与单通道直方图".to_string(),
                ));
            }
        }
        Ok(self)
    }

    /// 按通道顺序返回各序列。
    pub fn channels(&self) -> Vec<&Histogram> {
        match self {
            Self::Gray { hist } => vec![hist],
            Self::Color { blue, green, red } => vec![blue, green, red],
        }
    }

    pub fn is_color(&self) -> bool {
        matches!(self, Self::Color { .. })
    }
}

/// 顺序统计整幅缓冲。
///
/// # 示例
/// ```rust
/// use image_lab::image_handler::{histogram, DecodedImage, HistogramResult};
///
/// let image = DecodedImage::new(3, 1, 1, vec![10, 10, 250])?;
/// let HistogramResult::Gray { hist } = histogram::compute(&image)? else {
///     unreachable!("单通道缓冲应得到单序列结果");
/// };
/// assert_eq!(hist.count(10), 2);
/// assert_eq!(hist.count(250), 1);
/// # Ok::<(), image_lab::image_handler::ImageError>(())
/// ```
pub fn compute(image: &DecodedImage) -> Result<HistogramResult, ImageError> {
    let mut result = HistogramResult::empty_for(image.channels())?;
    result.accumulate(image.data(), image.channels() as usize);
    Ok(result)
}

/// 按行区间分块并行统计，再合并局部计数。
///
/// 结果与 [`compute`] 完全一致。
pub fn compute_partitioned(
    image: &DecodedImage,
    rows_per_chunk: usize,
) -> Result<HistogramResult, ImageError> {
    if rows_per_chunk == 0 {
        return Err(ImageError::InvalidParameter(
            "rows_per_chunk 必须大于 0".to_string(),
        ));
    }

    let channels = image.channels();
    let empty = HistogramResult::empty_for(channels)?;
    let chunk_len = image.row_stride().saturating_mul(rows_per_chunk).max(1);

    image
        .data()
        .par_chunks(chunk_len)
        .map(|rows| {
            let mut partial = empty.clone();
            partial.accumulate(rows, channels as usize);
            Ok(partial)
        })
        .try_reduce(|| empty.clone(), |left, right| left.merge(&right))
}
