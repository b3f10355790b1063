#![allow(dead_code)]

use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use return_guard_core::signer::DecisionSigner;
use return_guard_core::store::{MemoryRecordStore, RecordStore, SledRecordStore};
use return_guard_core::{FraudThresholds, ReturnGuard, ReturnRequest};
use std::sync::Arc;

pub const MAX_UPLOAD: usize = 32 * 1024 * 1024;

pub fn memory_guard() -> ReturnGuard {
    guard_with(Arc::new(MemoryRecordStore::new()))
}

pub fn sled_guard() -> ReturnGuard {
    guard_with(Arc::new(SledRecordStore::temporary().unwrap()))
}

pub fn guard_with(store: Arc<dyn RecordStore>) -> ReturnGuard {
    ReturnGuard::new(
        store,
        FraudThresholds::default(),
        Arc::new(DecisionSigner::generate()),
        MAX_UPLOAD,
    )
}

/// 高分辨率“实拍”：带噪点的 JPEG（体积远超 50KB）并注入 EXIF
pub fn camera_photo(seed: u32) -> Vec<u8> {
    with_exif(&noisy_jpeg(1024, 768, seed))
}

/// 和 camera_photo 一样，但没有 EXIF
pub fn stripped_photo(seed: u32) -> Vec<u8> {
    noisy_jpeg(1024, 768, seed)
}

/// 小尺寸纯色 PNG：低分辨率 + 体积过小 + 无元数据
pub fn screenshot_png() -> Vec<u8> {
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(120, 120, Rgb([200, 30, 30])))
        .write_to(&mut out, ImageOutputFormat::Png)
        .unwrap();
    out
}

/// 纯色 JPEG：分辨率够，但体积过小且无元数据
pub fn flat_jpeg() -> Vec<u8> {
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(400, 400, Rgb([30, 160, 90])))
        .write_to(&mut out, ImageOutputFormat::Jpeg(90))
        .unwrap();
    out
}

fn noisy_jpeg(width: u32, height: u32, seed: u32) -> Vec<u8> {
    // xorshift32，保证确定性
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    let img = RgbImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let b = state.to_le_bytes();
        Rgb([b[0], b[1], b[2]])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageOutputFormat::Jpeg(90))
        .unwrap();
    out
}

/// 在 SOI 之后插入最小的 APP1/Exif 段（IFD0 只含 Make）
pub fn with_exif(jpeg: &[u8]) -> Vec<u8> {
    let tiff: [u8; 26] = [
        b'I', b'I', 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00, //
        0x01, 0x00, //
        0x0F, 0x01, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00, b'C', b'a', b'm', 0x00, //
        0x00, 0x00, 0x00, 0x00,
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

pub fn damaged(order_id: &str, category: &str, hours: u32, image: Vec<u8>) -> ReturnRequest {
    ReturnRequest {
        order_id: order_id.to_string(),
        return_reason: "Damaged Product".to_string(),
        product_category: category.to_string(),
        hours_since_delivery: hours,
        image_bytes: image,
    }
}

pub fn other_reason(order_id: &str, reason: &str, hours: u32, image: Vec<u8>) -> ReturnRequest {
    ReturnRequest {
        order_id: order_id.to_string(),
        return_reason: reason.to_string(),
        product_category: "clothing".to_string(),
        hours_since_delivery: hours,
        image_bytes: image,
    }
}
