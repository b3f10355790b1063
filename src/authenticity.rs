use std::collections::BTreeMap;

use crate::config::FraudThresholds;
use crate::fingerprint::Fingerprint;
use crate::record::{AuthenticityDetails, AuthenticityResult, CheckKind};

pub const FLAG_LOW_RESOLUTION: &str = "low resolution";
pub const FLAG_FILE_TOO_SMALL: &str = "file too small";
pub const FLAG_FILE_TOO_LARGE: &str = "file too large";
pub const FLAG_NO_CAPTURE_METADATA: &str = "no capture metadata";
pub const FLAG_DUPLICATE: &str = "CRITICAL: identical to delivery image";
pub const FLAG_PNG_WITHOUT_METADATA: &str = "PNG without metadata";

/// 真实性评分器 (Authenticity Scorer)
///
/// 一组彼此独立的启发式检查，失败即加分，分数之和截断到 [0, 100]。
/// 所有检查无条件执行（不短路），这样解释文本总能拿到完整的 flag 列表。
#[derive(Debug, Clone)]
pub struct AuthenticityScorer {
    thresholds: FraudThresholds,
}

impl AuthenticityScorer {
    pub fn new(thresholds: FraudThresholds) -> Self {
        Self { thresholds }
    }

    /// 对退货图打分
    ///
    /// 重复判定只认交付记录里存的 content_hash，这是唯一的权威来源。
    pub fn score(&self, returned: &Fingerprint, delivered: &Fingerprint) -> AuthenticityResult {
        let t = &self.thresholds;
        let meta = &returned.metadata;
        let is_duplicate = returned.content_hash == delivered.content_hash;

        // (检查项, 是否失败, 分值, flag)，顺序即 flag 的输出顺序
        let outcomes = [
            (
                CheckKind::Resolution,
                meta.width < t.min_resolution_px || meta.height < t.min_resolution_px,
                t.low_resolution_points,
                FLAG_LOW_RESOLUTION,
            ),
            (
                CheckKind::MinFileSize,
                meta.byte_size < t.min_file_bytes,
                t.too_small_points,
                FLAG_FILE_TOO_SMALL,
            ),
            (
                CheckKind::MaxFileSize,
                meta.byte_size > t.max_file_bytes,
                t.too_large_points,
                FLAG_FILE_TOO_LARGE,
            ),
            (
                CheckKind::CaptureMetadata,
                !meta.has_capture_metadata,
                t.missing_metadata_points,
                FLAG_NO_CAPTURE_METADATA,
            ),
            (
                CheckKind::Duplicate,
                is_duplicate,
                t.duplicate_points,
                FLAG_DUPLICATE,
            ),
            (
                CheckKind::FormatMetadata,
                meta.format.eq_ignore_ascii_case("PNG") && !meta.has_capture_metadata,
                t.png_without_metadata_points,
                FLAG_PNG_WITHOUT_METADATA,
            ),
        ];

        let mut checks = BTreeMap::new();
        let mut flags = Vec::new();
        let mut points: u32 = 0;
        for (kind, failed, value, flag) in outcomes {
            checks.insert(kind, !failed);
            if failed {
                points = points.saturating_add(value);
                flags.push(flag.to_string());
            }
        }

        let confidence_score = points.min(100) as u8;

        AuthenticityResult {
            is_suspicious: confidence_score >= t.suspicious_threshold,
            confidence_score,
            checks,
            flags,
            details: AuthenticityDetails {
                resolution: format!("{}x{}", meta.width, meta.height),
                byte_size: meta.byte_size,
                file_size_kb: (meta.byte_size as f64 / 1024.0 * 100.0).round() / 100.0,
                has_capture_metadata: meta.has_capture_metadata,
                is_duplicate,
                format: meta.format.clone(),
                perceptual_distance: returned.perceptual_distance(delivered),
            },
        }
    }
}
