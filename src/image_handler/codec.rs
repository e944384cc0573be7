//! # 编解码模块
//!
//! ## 设计思路
//!
//! 负责 `EncodedImage ⇄ DecodedImage` 的双向转换，是其余模块唯一依赖的叶子组件。
//! 在完整解码前尽早做体积与像素校验，降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 解码：
//! 1. 识别头部格式（不识别即 `UnsupportedFormat`，不做格式猜测）
//! 2. 按 Base64 上界估算解码体积
//! 3. Base64 解码
//! 4. 按声明格式读取 header 尺寸并校验像素上限
//! 5. 按声明格式完整解码，保留原生通道数；GIF 与索引 PNG 解码为单通道索引并保留调色板
//!
//! 编码：调色板缓冲按索引写回 PNG / GIF，其余情况校验通道兼容性 → 按目标格式写出 → 重新拼接头部。
//!
//! 本模块是纯函数集合，不记录日志。

use std::borrow::Cow;
use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose};
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, Frame, ImageReader};

use super::source::{ImageOrigin, Palette};
use super::{DecodedImage, EncodedImage, ImageConfig, ImageError, ImageFormat};

/// 将带头部的 Base64 文本解码为像素缓冲。
///
/// 返回的缓冲携带 `ImageOrigin`，记录声明格式与原始头部。
///
/// # 错误
/// - `UnsupportedFormat`：头部未声明 PNG / JPEG / GIF
/// - `MalformedPayload`：负载不是合法 Base64，或不是结构完整的该格式图片
/// - `ResourceLimit`：体积或像素超过配置上限
pub fn decode(encoded: &EncodedImage, config: &ImageConfig) -> Result<DecodedImage, ImageError> {
    let format = encoded.format()?;
    let bytes = decode_payload(encoded.payload(), config.max_payload_bytes)?;

    decode_with_format(&bytes, format, encoded.header().to_string(), config)
}

/// 解码上传的原始文件字节。
///
/// 通过文件签名（magic bytes）识别格式，只接受 PNG / JPEG / GIF。
pub fn decode_bytes(bytes: &[u8], config: &ImageConfig) -> Result<DecodedImage, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::MalformedPayload("图片内容为空".to_string()));
    }
    if bytes.len() as u64 > config.max_payload_bytes {
        return Err(ImageError::ResourceLimit(format!(
            "上传体积过大：{:.2} MB（限制：{:.2} MB）",
            bytes.len() as f64 / 1024.0 / 1024.0,
            config.max_payload_bytes as f64 / 1024.0 / 1024.0
        )));
    }

    let format = sniff_format(bytes)?;
    decode_with_format(bytes, format, format.canonical_header(), config)
}

/// 将像素缓冲编码为 `format`，并拼接头部。
///
/// 若缓冲来自同一格式，沿用原始头部；否则使用规范头部 `data:<mime>;base64`。
///
/// 保真说明：
/// - PNG 无损，像素数据可完整往返，但压缩参数不同，编码字节不保证与输入一致。
/// - JPEG 有损，往返后像素与字节都不保证一致。
/// - 调色板缓冲写 PNG / GIF 时保持索引与调色板；写 JPEG 时先展开为 RGB / RGBA。
///
/// # 错误
/// - `EncodingFailure`：通道数与目标格式不兼容（如 4 通道写 JPEG），或编码器失败
pub fn encode(
    image: &DecodedImage,
    format: ImageFormat,
    config: &ImageConfig,
) -> Result<EncodedImage, ImageError> {
    let bytes = match image.palette() {
        Some(palette) if image.channels() == 1 && format != ImageFormat::Jpeg => {
            write_indexed(image, palette, format)?
        }
        Some(_) => {
            let mut expanded = image.clone();
            expanded.expand_palette()?;
            write_native(&expanded, format, config)?
        }
        None => write_native(image, format, config)?,
    };

    let header = match image.origin() {
        Some(origin) if origin.format == format => origin.header.clone(),
        _ => format.canonical_header(),
    };

    Ok(EncodedImage::from_parts(
        header,
        general_purpose::STANDARD.encode(bytes),
    ))
}

/// 使用缓冲自身的来源格式编码；无来源信息时回退为 PNG。
pub fn encode_as_origin(image: &DecodedImage, config: &ImageConfig) -> Result<EncodedImage, ImageError> {
    let format = image
        .origin()
        .map(|origin| origin.format)
        .unwrap_or(ImageFormat::Png);
    encode(image, format, config)
}

fn decode_with_format(
    bytes: &[u8],
    format: ImageFormat,
    header: String,
    config: &ImageConfig,
) -> Result<DecodedImage, ImageError> {
    let (width, height) = inspect_dimensions(bytes, format)?;
    validate_pixel_limits(config, width, height)?;

    let (image, palette) = match format {
        ImageFormat::Gif => decode_indexed_gif(bytes)?,
        ImageFormat::Png => match decode_indexed_png(bytes)? {
            Some(indexed) => indexed,
            None => (decode_native(bytes, format)?, None),
        },
        ImageFormat::Jpeg => (decode_native(bytes, format)?, None),
    };

    Ok(image.with_origin(ImageOrigin {
        format,
        header,
        palette,
    }))
}

fn decode_native(bytes: &[u8], format: ImageFormat) -> Result<DecodedImage, ImageError> {
    let decoded = image::load_from_memory_with_format(bytes, format.to_image_format())
        .map_err(|e| ImageError::MalformedPayload(format!("{} 解码失败：{}", format, e)))?;

    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(ImageError::MalformedPayload("图片尺寸为 0".to_string()));
    }

    DecodedImage::from_dynamic(decoded)
}

/// 读取索引 PNG 的原始索引平面；非索引 PNG 返回 `None`，交给通用解码。
///
/// 1/2/4 位深的索引按 MSB 优先解包为每像素 1 字节。
fn decode_indexed_png(bytes: &[u8]) -> Result<Option<(DecodedImage, Option<Palette>)>, ImageError> {
    let malformed = |e: png::DecodingError| ImageError::MalformedPayload(format!("PNG 解码失败：{}", e));

    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder.read_info().map_err(malformed)?;

    let info = reader.info();
    if info.color_type != png::ColorType::Indexed {
        return Ok(None);
    }
    let depth = info.bit_depth as usize;
    if depth > 8 {
        return Err(ImageError::MalformedPayload(format!("索引 PNG 位深无效：{}", depth)));
    }
    let rgb = info
        .palette
        .as_ref()
        .map(|palette| palette.to_vec())
        .ok_or_else(|| ImageError::MalformedPayload("索引 PNG 缺少 PLTE".to_string()))?;
    let entries = rgb.len() / 3;
    let alpha = info.trns.as_ref().map(|trns| {
        let mut alpha = trns.to_vec();
        alpha.resize(entries.max(alpha.len()), 255);
        alpha
    });

    let mut buf = vec![0; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buf).map_err(malformed)?;
    let (width, height) = (frame.width as usize, frame.height as usize);

    let per_byte = 8 / depth;
    let mask = ((1u16 << depth) - 1) as u8;
    let mut indices = Vec::with_capacity(width * height);
    for row in buf.chunks(frame.line_size.max(1)).take(height) {
        for x in 0..width {
            let byte = row.get(x / per_byte).copied().unwrap_or(0);
            let shift = 8 - depth * (x % per_byte + 1);
            indices.push((byte >> shift) & mask);
        }
    }

    let image = DecodedImage::new(frame.width, frame.height, 1, indices)?;
    Ok(Some((image, Some(Palette { rgb, alpha }))))
}

/// 读取 GIF 第一帧的索引，并合成到逻辑屏幕大小的画布上。
///
/// 画布底色优先取帧的透明索引，其次取背景色索引。
fn decode_indexed_gif(bytes: &[u8]) -> Result<(DecodedImage, Option<Palette>), ImageError> {
    let malformed = |e: gif::DecodingError| ImageError::MalformedPayload(format!("GIF 解码失败：{}", e));

    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::Indexed);
    let mut decoder = options.read_info(Cursor::new(bytes)).map_err(malformed)?;

    let (width, height) = (decoder.width() as usize, decoder.height() as usize);
    let global_palette = decoder.global_palette().map(<[u8]>::to_vec);
    let background = decoder.bg_color();

    let frame = decoder
        .read_next_frame()
        .map_err(malformed)?
        .ok_or_else(|| ImageError::MalformedPayload("GIF 不包含任何帧".to_string()))?;

    let rgb = frame
        .palette
        .clone()
        .or(global_palette)
        .ok_or_else(|| ImageError::MalformedPayload("GIF 缺少调色板".to_string()))?;

    let fill = frame
        .transparent
        .or_else(|| background.and_then(|index| u8::try_from(index).ok()))
        .unwrap_or(0);
    let mut canvas = vec![fill; width * height];

    let (left, top) = (frame.left as usize, frame.top as usize);
    let frame_width = frame.width as usize;
    for (row, line) in frame.buffer.chunks(frame_width.max(1)).enumerate() {
        let y = top + row;
        if y >= height || left >= width {
            continue;
        }
        let visible = line.len().min(width - left);
        let start = y * width + left;
        canvas[start..start + visible].copy_from_slice(&line[..visible]);
    }

    let alpha = frame.transparent.map(|index| {
        let mut alpha = vec![255; rgb.len() / 3];
        if let Some(slot) = alpha.get_mut(index as usize) {
            *slot = 0;
        }
        alpha
    });

    let image = DecodedImage::new(width as u32, height as u32, 1, canvas)?;
    Ok((image, Some(Palette { rgb, alpha })))
}

/// 仅通过图片头信息读取宽高，用于完整解码前的像素限制检查。
fn inspect_dimensions(bytes: &[u8], format: ImageFormat) -> Result<(u32, u32), ImageError> {
    let reader = ImageReader::with_format(Cursor::new(bytes), format.to_image_format());
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| ImageError::MalformedPayload(format!("无法读取 {} 图片尺寸：{}", format, e)))?;

    if width == 0 || height == 0 {
        return Err(ImageError::MalformedPayload(format!(
            "图片尺寸无效：{}x{}",
            width, height
        )));
    }
    Ok((width, height))
}

fn validate_pixel_limits(config: &ImageConfig, width: u32, height: u32) -> Result<(), ImageError> {
    let pixels = (width as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| ImageError::ResourceLimit("图片像素数溢出".to_string()))?;

    if pixels > config.max_decoded_pixels {
        return Err(ImageError::ResourceLimit(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, config.max_decoded_pixels
        )));
    }
    Ok(())
}

fn estimate_base64_decoded_upper_bound_len(base64_data: &str) -> Result<u64, ImageError> {
    let len = base64_data.len() as u64;
    let groups = len
        .checked_add(3)
        .ok_or_else(|| ImageError::ResourceLimit("Base64 输入长度溢出".to_string()))?
        / 4;

    groups
        .checked_mul(3)
        .ok_or_else(|| ImageError::ResourceLimit("Base64 解码体积估算溢出".to_string()))
}

fn decode_payload(payload: &str, max_payload_bytes: u64) -> Result<Vec<u8>, ImageError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(ImageError::MalformedPayload("Base64 负载为空".to_string()));
    }

    let estimated_len = estimate_base64_decoded_upper_bound_len(payload)?;
    if estimated_len > max_payload_bytes {
        return Err(ImageError::ResourceLimit(format!(
            "Base64 预计解码体积过大：{:.2} MB（限制：{:.2} MB）",
            estimated_len as f64 / 1024.0 / 1024.0,
            max_payload_bytes as f64 / 1024.0 / 1024.0
        )));
    }

    general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| ImageError::MalformedPayload(format!("Base64 解码失败：{}", e)))
}

fn sniff_format(bytes: &[u8]) -> Result<ImageFormat, ImageError> {
    let kind = infer::get(bytes)
        .ok_or_else(|| ImageError::UnsupportedFormat("无法识别图片类型".to_string()))?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(ImageError::UnsupportedFormat(format!(
            "文件签名不是图片类型：{}",
            kind.mime_type()
        )));
    }

    ImageFormat::from_mime(kind.mime_type()).ok_or_else(|| {
        ImageError::UnsupportedFormat(format!("仅支持 PNG / JPEG / GIF，实际为 {}", kind.mime_type()))
    })
}

fn write_native(image: &DecodedImage, format: ImageFormat, config: &ImageConfig) -> Result<Vec<u8>, ImageError> {
    if !format.accepts_channels(image.channels()) {
        return Err(ImageError::EncodingFailure(format!(
            "{} 不支持 {} 通道图像",
            format,
            image.channels()
        )));
    }

    let dynamic = image.to_dynamic()?;
    write_bytes(&dynamic, format, config.jpeg_quality)
}

/// 按索引写回调色板图片（8 位索引 PNG 或单帧 GIF）。
fn write_indexed(image: &DecodedImage, palette: &Palette, format: ImageFormat) -> Result<Vec<u8>, ImageError> {
    if palette.entries() == 0 || palette.entries() > 256 {
        return Err(ImageError::EncodingFailure(format!(
            "调色板项数无效：{}",
            palette.entries()
        )));
    }

    let mut bytes = Vec::new();
    match format {
        ImageFormat::Png => {
            let map_err = |e: png::EncodingError| ImageError::EncodingFailure(format!("PNG 编码失败：{}", e));

            let mut encoder = png::Encoder::new(&mut bytes, image.width(), image.height());
            encoder.set_color(png::ColorType::Indexed);
            encoder.set_depth(png::BitDepth::Eight);
            encoder.set_palette(palette.rgb.clone());
            if let Some(alpha) = &palette.alpha {
                encoder.set_trns(alpha.clone());
            }

            let mut writer = encoder.write_header().map_err(map_err)?;
            writer.write_image_data(image.data()).map_err(map_err)?;
            writer.finish().map_err(map_err)?;
        }
        ImageFormat::Gif => {
            let map_err = |e: gif::EncodingError| ImageError::EncodingFailure(format!("GIF 编码失败：{}", e));
            let too_large = || ImageError::EncodingFailure("GIF 尺寸不能超过 65535".to_string());

            let width = u16::try_from(image.width()).map_err(|_| too_large())?;
            let height = u16::try_from(image.height()).map_err(|_| too_large())?;
            let frame = gif::Frame {
                width,
                height,
                transparent: palette.transparent_index(),
                buffer: Cow::Borrowed(image.data()),
                ..gif::Frame::default()
            };

            // 编码器在作用域结束时写出文件尾
            let mut encoder = gif::Encoder::new(&mut bytes, width, height, &palette.rgb).map_err(map_err)?;
            encoder.write_frame(&frame).map_err(map_err)?;
        }
        ImageFormat::Jpeg => {
            return Err(ImageError::EncodingFailure("JPEG 不支持调色板写出".to_string()));
        }
    }

    Ok(bytes)
}

fn write_bytes(image: &DynamicImage, format: ImageFormat, jpeg_quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut bytes = Vec::new();
    let map_err = |e: image::ImageError| ImageError::EncodingFailure(format!("{} 编码失败：{}", format, e));

    match format {
        ImageFormat::Png => {
            image
                .write_with_encoder(PngEncoder::new(&mut bytes))
                .map_err(map_err)?;
        }
        ImageFormat::Jpeg => {
            image
                .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, jpeg_quality))
                .map_err(map_err)?;
        }
        ImageFormat::Gif => {
            // GIF 帧只接受 RGBA，灰度与 RGB 在此展开
            let frame = Frame::new(image.to_rgba8());
            let mut encoder = GifEncoder::new(&mut bytes);
            encoder.encode_frame(frame).map_err(map_err)?;
        }
    }

    Ok(bytes)
}
