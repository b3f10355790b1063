use image::{GenericImageView, ImageFormat};
use img_hash::{HashAlg, HasherConfig, ImageHash};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use tracing::debug;

use crate::error::FingerprintError;

/// 图片的结构化元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub byte_size: u64,
    /// 解码器识别出的容器格式，如 "JPEG"、"PNG"
    pub format: String,
    /// 是否带有非空的 EXIF 拍摄元数据块（只看有没有，不校验内容）
    pub has_capture_metadata: bool,
}

/// 指纹 = 内容哈希 + 结构元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// 原始字节的 SHA-256 (小写 hex)
    pub content_hash: String,
    /// 梯度 pHash (Base64)，对重新压缩不敏感
    pub perceptual_hash: String,
    pub metadata: ImageMetadata,
}

impl Fingerprint {
    /// 两张图 pHash 的汉明距离；任一方无法解析时返回 None
    pub fn perceptual_distance(&self, other: &Fingerprint) -> Option<u32> {
        let lhs = ImageHash::<Box<[u8]>>::from_base64(&self.perceptual_hash).ok()?;
        let rhs = ImageHash::<Box<[u8]>>::from_base64(&other.perceptual_hash).ok()?;
        Some(lhs.dist(&rhs))
    }
}

/// 提取指纹
///
/// 纯函数，无副作用。哈希针对原始字节而不是解码后的像素，
/// 所以同一个文件原样重新上传一定会命中。
pub fn extract(raw_bytes: &[u8]) -> Result<Fingerprint, FingerprintError> {
    let format = image::guess_format(raw_bytes)
        .map_err(|e| FingerprintError::UnreadableImage(e.to_string()))?;

    // 真正解码一遍：只认能解出像素的文件
    let img = image::load_from_memory_with_format(raw_bytes, format)
        .map_err(|e| FingerprintError::UnreadableImage(e.to_string()))?;
    let (width, height) = img.dimensions();

    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .hash_size(8, 8)
        .to_hasher();
    let perceptual_hash = hasher.hash_image(&img).to_base64();

    Ok(Fingerprint {
        content_hash: content_hash(raw_bytes),
        perceptual_hash,
        metadata: ImageMetadata {
            width,
            height,
            byte_size: raw_bytes.len() as u64,
            format: format_name(format).to_string(),
            has_capture_metadata: has_capture_metadata(raw_bytes),
        },
    })
}

/// 原始字节的 SHA-256
pub fn content_hash(raw_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_bytes);
    format!("{:x}", hasher.finalize())
}

/// 只看文件头猜格式，不解码
pub fn sniff_format(raw_bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(raw_bytes).ok().map(format_name)
}

/// EXIF 块存在且至少有一个字段
///
/// 元数据损坏一律当作“没有元数据”，不向上抛错。
pub fn has_capture_metadata(raw_bytes: &[u8]) -> bool {
    let mut cursor = Cursor::new(raw_bytes);
    match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => exif.fields().next().is_some(),
        Err(err) => {
            debug!(error = %err, "no readable capture metadata");
            false
        }
    }
}

fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "JPEG",
        ImageFormat::Png => "PNG",
        ImageFormat::Gif => "GIF",
        ImageFormat::WebP => "WEBP",
        ImageFormat::Tiff => "TIFF",
        ImageFormat::Bmp => "BMP",
        ImageFormat::Ico => "ICO",
        ImageFormat::Tga => "TGA",
        ImageFormat::Pnm => "PNM",
        _ => "UNKNOWN",
    }
}

/// 图片引用里用的扩展名
pub fn extension_for(format: &str) -> &'static str {
    match format {
        "JPEG" => "jpg",
        "PNG" => "png",
        "GIF" => "gif",
        "WEBP" => "webp",
        "TIFF" => "tiff",
        "BMP" => "bmp",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};

    fn encode(width: u32, height: u32, format: ImageOutputFormat) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([90, 120, 200]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img).write_to(&mut out, format).unwrap();
        out
    }

    /// 在 SOI 之后插入一个最小的 APP1/Exif 段（IFD0 只有 Make 一个字段）
    fn with_exif(jpeg: &[u8]) -> Vec<u8> {
        let tiff: [u8; 26] = [
            b'I', b'I', 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00, // 头 + IFD0 偏移
            0x01, 0x00, // 1 个条目
            0x0F, 0x01, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00, b'C', b'a', b'm', 0x00, // Make = "Cam"
            0x00, 0x00, 0x00, 0x00, // 无后续 IFD
        ];
        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(&tiff);
        let len = (payload.len() + 2) as u16;

        let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn png_metadata_is_extracted() {
        let bytes = encode(320, 240, ImageOutputFormat::Png);
        let fp = extract(&bytes).unwrap();
        assert_eq!(fp.metadata.width, 320);
        assert_eq!(fp.metadata.height, 240);
        assert_eq!(fp.metadata.format, "PNG");
        assert_eq!(fp.metadata.byte_size, bytes.len() as u64);
        assert!(!fp.metadata.has_capture_metadata);
        assert_eq!(fp.content_hash.len(), 64);
    }

    #[test]
    fn jpeg_with_exif_block_is_detected() {
        let plain = encode(64, 64, ImageOutputFormat::Jpeg(90));
        let tagged = with_exif(&plain);

        let fp = extract(&tagged).unwrap();
        assert_eq!(fp.metadata.format, "JPEG");
        assert!(fp.metadata.has_capture_metadata);
        assert!(!extract(&plain).unwrap().metadata.has_capture_metadata);
    }

    #[test]
    fn corrupt_exif_counts_as_absent() {
        let plain = encode(64, 64, ImageOutputFormat::Jpeg(90));
        let mut broken = vec![0xFF, 0xD8, 0xFF, 0xE1, 0x00, 0x0C];
        broken.extend_from_slice(b"Exif\0\0XXXX");
        broken.extend_from_slice(&plain[2..]);

        assert!(!has_capture_metadata(&broken));
    }

    #[test]
    fn undecodable_bytes_are_rejected() {
        let err = extract(b"definitely not an image").unwrap_err();
        assert!(matches!(err, FingerprintError::UnreadableImage(_)));

        // 文件头是 PNG 但内容被截断
        let mut truncated = encode(32, 32, ImageOutputFormat::Png);
        truncated.truncate(40);
        assert!(extract(&truncated).is_err());
    }

    #[test]
    fn hash_covers_raw_bytes() {
        let a = encode(32, 32, ImageOutputFormat::Png);
        let mut b = a.clone();
        b.extend_from_slice(b"trailing");

        assert_eq!(content_hash(&a), content_hash(&a.clone()));
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn identical_images_have_zero_perceptual_distance() {
        let bytes = encode(128, 128, ImageOutputFormat::Png);
        let a = extract(&bytes).unwrap();
        let b = extract(&bytes).unwrap();
        assert_eq!(a.perceptual_distance(&b), Some(0));
    }
}
