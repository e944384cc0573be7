//! # 数据模型
//!
//! ## 设计思路
//!
//! 将“外部文本表示”和“内存像素缓冲”解耦：
//! - `EncodedImage` 表示带头部的 Base64 文本（如 `data:image/png;base64,....`）
//! - `DecodedImage` 表示已解码、可原地修改的 8 位像素缓冲
//! - `ImageOrigin` 记录缓冲来自哪种格式与原始头部，用于重新编码时保持格式一致
//! - 调色板图片（GIF、索引 PNG）解码为单通道索引平面，调色板随 `ImageOrigin` 保留

use std::fmt;

use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};

use super::ImageError;

/// 支持的图片格式（固定集合）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 3] = [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Gif];

    pub fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
        }
    }

    /// 从头部 token 中识别格式（大小写不敏感的子串匹配）。
    ///
    /// 按 png → jpeg → gif 顺序匹配，首个命中即返回。
    pub fn from_header(header: &str) -> Option<Self> {
        let lowered = header.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| lowered.contains(format.mime()))
    }

    /// 从嗅探得到的 MIME 类型映射格式。
    pub fn from_mime(mime: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.mime().eq_ignore_ascii_case(mime.trim()))
    }

    /// 规范头部：`data:<mime>;base64`。
    pub fn canonical_header(self) -> String {
        format!("data:{};base64", self.mime())
    }

    pub(crate) fn to_image_format(self) -> image::ImageFormat {
        match self {
            Self::Png => image::ImageFormat::Png,
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Gif => image::ImageFormat::Gif,
        }
    }

    /// 该格式可直接写出的通道数。
    pub fn accepts_channels(self, channels: u8) -> bool {
        match self {
            Self::Png | Self::Gif => (1..=4).contains(&channels),
            Self::Jpeg => matches!(channels, 1 | 3),
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
            Self::Gif => "GIF",
        };
        f.write_str(name)
    }
}

/// 头部 + 分隔符 + Base64 负载。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    header: String,
    payload: String,
}

impl EncodedImage {
    pub const DELIMITER: char = ',';

    /// 在第一个分隔符处切分头部与负载。
    ///
    /// 缺少分隔符意味着不存在头部，按 `UnsupportedFormat` 处理。
    ///
    /// # 示例
    /// ```rust
    /// use image_lab::image_handler::{EncodedImage, ImageFormat};
    ///
    /// let encoded = EncodedImage::parse("data:image/png;base64,iVBORw0KGgo=")?;
    /// assert_eq!(encoded.format()?, ImageFormat::Png);
    /// # Ok::<(), image_lab::image_handler::ImageError>(())
    /// ```
    pub fn parse(text: &str) -> Result<Self, ImageError> {
        let (header, payload) = text
            .trim()
            .split_once(Self::DELIMITER)
            .ok_or_else(|| ImageError::UnsupportedFormat("缺少头部与分隔符".to_string()))?;

        Ok(Self {
            header: header.to_string(),
            payload: payload.to_string(),
        })
    }

    pub(crate) fn from_parts(header: String, payload: String) -> Self {
        Self { header, payload }
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn format(&self) -> Result<ImageFormat, ImageError> {
        ImageFormat::from_header(&self.header).ok_or_else(|| {
            ImageError::UnsupportedFormat(format!("头部未声明支持的格式：{}", self.header))
        })
    }
}

impl fmt::Display for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.header, Self::DELIMITER, self.payload)
    }
}

/// 缓冲来源：解码时的格式与原始头部。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOrigin {
    pub format: ImageFormat,
    pub header: String,
    /// 仅调色板图片存在；此时缓冲为单通道索引。
    pub palette: Option<Palette>,
}

/// 调色板：`rgb` 每 3 字节一项，`alpha` 若存在则与项数等长。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    pub rgb: Vec<u8>,
    pub alpha: Option<Vec<u8>>,
}

impl Palette {
    /// 调色板项数。
    pub fn entries(&self) -> usize {
        self.rgb.len() / 3
    }

    /// 展开后的通道数：有透明度为 RGBA，否则为 RGB。
    pub fn expanded_channels(&self) -> u8 {
        if self.alpha.is_some() { 4 } else { 3 }
    }

    /// 第一个完全透明的索引（GIF 只能表达一个透明色）。
    pub fn transparent_index(&self) -> Option<u8> {
        self.alpha
            .as_ref()?
            .iter()
            .position(|&a| a == 0)
            .and_then(|index| u8::try_from(index).ok())
    }

    /// 查表；越界索引视为不透明黑色。
    pub fn rgba(&self, index: u8) -> [u8; 4] {
        let i = index as usize;
        let Some(rgb) = self.rgb.get(i * 3..i * 3 + 3) else {
            return [0, 0, 0, 255];
        };
        let alpha = self
            .alpha
            .as_ref()
            .and_then(|alpha| alpha.get(i).copied())
            .unwrap_or(255);
        [rgb[0], rgb[1], rgb[2], alpha]
    }
}

/// 已解码的像素缓冲（行优先，每通道 8 位）。
///
/// 通道数在创建时确定，之后不可改变；`data_mut` 只暴露切片，长度同样不可变。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
    origin: Option<ImageOrigin>,
}

impl DecodedImage {
    /// 创建缓冲并校验尺寸、通道数与数据长度的一致性。
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self, ImageError> {
        if !(1..=4).contains(&channels) {
            return Err(ImageError::UnsupportedChannelLayout(format!(
                "通道数必须在 1~4 之间，实际为 {}",
                channels
            )));
        }
        if width == 0 || height == 0 {
            return Err(ImageError::MalformedPayload(format!(
                "图片尺寸无效：{}x{}",
                width, height
            )));
        }

        let expected_len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(channels as usize))
            .ok_or_else(|| ImageError::ResourceLimit("图片尺寸导致内存溢出风险".to_string()))?;

        if data.len() != expected_len {
            return Err(ImageError::MalformedPayload(format!(
                "像素数据长度异常：期望 {} 字节，实际 {} 字节",
                expected_len,
                data.len()
            )));
        }

        Ok(Self {
            width,
            height,
            channels,
            data,
            origin: None,
        })
    }

    pub fn with_origin(mut self, origin: ImageOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// 一行的字节数（`width * channels`）。
    pub fn row_stride(&self) -> usize {
        self.width as usize * self.channels as usize
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn origin(&self) -> Option<&ImageOrigin> {
        self.origin.as_ref()
    }

    /// 调色板图片的调色板；普通缓冲返回 `None`。
    pub fn palette(&self) -> Option<&Palette> {
        self.origin.as_ref()?.palette.as_ref()
    }

    /// 将索引平面展开为 RGB / RGBA，并丢弃调色板。
    ///
    /// 非调色板缓冲保持不变。像素变换与非调色板格式的编码都需要先展开。
    pub fn expand_palette(&mut self) -> Result<(), ImageError> {
        let Some(palette) = self.origin.as_mut().and_then(|origin| origin.palette.take()) else {
            return Ok(());
        };
        if self.channels != 1 {
            return Ok(());
        }

        let channels = palette.expanded_channels();
        let mut data = Vec::with_capacity(self.data.len() * channels as usize);
        for &index in &self.data {
            data.extend_from_slice(&palette.rgba(index)[..channels as usize]);
        }
        self.replace_pixels(channels, data)
    }

    /// 以原生模式接管 `DynamicImage`：1/2/3/4 通道保持不变，高位深收窄到 8 位。
    pub(crate) fn from_dynamic(image: DynamicImage) -> Result<Self, ImageError> {
        let (width, height) = (image.width(), image.height());
        let (channels, data) = match image.color().channel_count() {
            1 => (1, image.into_luma8().into_raw()),
            2 => (2, image.into_luma_alpha8().into_raw()),
            3 => (3, image.into_rgb8().into_raw()),
            _ => (4, image.into_rgba8().into_raw()),
        };
        Self::new(width, height, channels, data)
    }

    /// 构造同尺寸、同通道数的 `DynamicImage`（复制像素）。
    pub(crate) fn to_dynamic(&self) -> Result<DynamicImage, ImageError> {
        let (w, h) = (self.width, self.height);
        let data = self.data.clone();
        let invalid = || ImageError::Internal("像素缓冲与尺寸不一致".to_string());

        let image = match self.channels {
            1 => DynamicImage::ImageLuma8(GrayImage::from_raw(w, h, data).ok_or_else(invalid)?),
            2 => DynamicImage::ImageLumaA8(
                GrayAlphaImage::from_raw(w, h, data).ok_or_else(invalid)?,
            ),
            3 => DynamicImage::ImageRgb8(RgbImage::from_raw(w, h, data).ok_or_else(invalid)?),
            4 => DynamicImage::ImageRgba8(RgbaImage::from_raw(w, h, data).ok_or_else(invalid)?),
            other => {
                return Err(ImageError::UnsupportedChannelLayout(format!(
                    "无法表示 {} 通道图像",
                    other
                )));
            }
        };
        Ok(image)
    }

    /// 用新的像素与通道数替换内容，保留尺寸与来源信息。
    ///
    /// 供灰度化、边缘检测等会改变通道数的变换使用。
    pub(crate) fn replace_pixels(&mut self, channels: u8, data: Vec<u8>) -> Result<(), ImageError> {
        let replacement = Self::new(self.width, self.height, channels, data)?;
        self.channels = replacement.channels;
        self.data = replacement.data;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_matching_is_case_insensitive() {
        assert_eq!(ImageFormat::from_header("data:IMAGE/PNG;base64"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_header("data:image/Jpeg;base64"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_header("data:image/gif;base64"), Some(ImageFormat::Gif));
        assert_eq!(ImageFormat::from_header("data:image/bmp;base64"), None);
    }

    #[test]
    fn parse_splits_on_first_delimiter_only() {
        let encoded = EncodedImage::parse("data:image/png;base64,AAA,BBB").expect("parse failed");
        assert_eq!(encoded.header(), "data:image/png;base64");
        assert_eq!(encoded.payload(), "AAA,BBB");
    }

    #[test]
    fn parse_without_delimiter_is_unsupported_format() {
        let result = EncodedImage::parse("iVBORw0KGgo=");
        assert!(matches!(result, Err(ImageError::UnsupportedFormat(_))));
    }

    #[test]
    fn display_restores_original_text() {
        let text = "data:image/gif;base64,R0lGOD==";
        let encoded = EncodedImage::parse(text).expect("parse failed");
        assert_eq!(encoded.to_string(), text);
    }

    #[test]
    fn new_rejects_length_mismatch() {
        let result = DecodedImage::new(2, 2, 3, vec![0; 11]);
        assert!(matches!(result, Err(ImageError::MalformedPayload(_))));
    }

    #[test]
    fn new_rejects_zero_dimensions() {
        let result = DecodedImage::new(0, 4, 1, Vec::new());
        assert!(matches!(result, Err(ImageError::MalformedPayload(_))));
    }

    #[test]
    fn new_rejects_out_of_range_channels() {
        assert!(matches!(
            DecodedImage::new(1, 1, 5, vec![0; 5]),
            Err(ImageError::UnsupportedChannelLayout(_))
        ));
        assert!(matches!(
            DecodedImage::new(1, 1, 0, Vec::new()),
            Err(ImageError::UnsupportedChannelLayout(_))
        ));
    }

    #[test]
    fn dynamic_conversion_keeps_native_channels() {
        for channels in 1..=4u8 {
            let data: Vec<u8> = (0..(3 * 2 * channels as usize)).map(|v| v as u8).collect();
            let decoded = DecodedImage::new(3, 2, channels, data.clone()).expect("new failed");

            let dynamic = decoded.to_dynamic().expect("to_dynamic failed");
            assert_eq!(dynamic.color().channel_count(), channels);

            let back = DecodedImage::from_dynamic(dynamic).expect("from_dynamic failed");
            assert_eq!(back.channels(), channels);
            assert_eq!(back.data(), data.as_slice());
        }
    }

    fn indexed(data: Vec<u8>, palette: Palette) -> DecodedImage {
        let len = data.len() as u32;
        DecodedImage::new(len, 1, 1, data)
            .expect("fixture init failed")
            .with_origin(ImageOrigin {
                format: ImageFormat::Gif,
                header: ImageFormat::Gif.canonical_header(),
                palette: Some(palette),
            })
    }

    #[test]
    fn expand_palette_maps_indices_to_rgb() {
        let mut image = indexed(
            vec![1, 0, 7],
            Palette {
                rgb: vec![255, 0, 0, 0, 0, 255],
                alpha: None,
            },
        );
        image.expand_palette().expect("expand failed");

        assert_eq!(image.channels(), 3);
        assert_eq!(image.data(), &[0, 0, 255, 255, 0, 0, 0, 0, 0]);
        assert!(image.palette().is_none());
        assert_eq!(image.origin().map(|o| o.format), Some(ImageFormat::Gif));
    }

    #[test]
    fn expand_palette_keeps_transparency_as_rgba() {
        let palette = Palette {
            rgb: vec![10, 20, 30, 40, 50, 60],
            alpha: Some(vec![255, 0]),
        };
        assert_eq!(palette.transparent_index(), Some(1));

        let mut image = indexed(vec![0, 1], palette);
        image.expand_palette().expect("expand failed");

        assert_eq!(image.channels(), 4);
        assert_eq!(image.data(), &[10, 20, 30, 255, 40, 50, 60, 0]);
    }

    #[test]
    fn expand_palette_ignores_plain_buffers() {
        let mut image = DecodedImage::new(2, 1, 1, vec![3, 4]).expect("fixture init failed");
        image.expand_palette().expect("expand failed");
        assert_eq!(image.channels(), 1);
        assert_eq!(image.data(), &[3, 4]);
    }

    #[test]
    fn jpeg_rejects_alpha_layouts() {
        assert!(ImageFormat::Jpeg.accepts_channels(1));
        assert!(ImageFormat::Jpeg.accepts_channels(3));
        assert!(!ImageFormat::Jpeg.accepts_channels(2));
        assert!(!ImageFormat::Jpeg.accepts_channels(4));
        assert!(ImageFormat::Png.accepts_channels(4));
    }
}
