use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;

/// 上传图片的硬上限：在解码之前检查，防止超大文件拖住解码线程
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub key_path: String,
    pub max_upload_bytes: usize,
    pub thresholds: FraudThresholds,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("PORT must be a number")?;

        let max_upload_bytes: usize = match env::var("MAX_UPLOAD_BYTES") {
            Ok(raw) => raw.parse().context("MAX_UPLOAD_BYTES must be a byte count")?,
            Err(_) => DEFAULT_MAX_UPLOAD_BYTES,
        };

        // 阈值集合可以整体替换：THRESHOLDS_PATH 指向一个 JSON 文件，缺省字段取默认值
        let thresholds = match env::var("THRESHOLDS_PATH") {
            Ok(path) => FraudThresholds::from_json_file(&path)?,
            Err(_) => FraudThresholds::default(),
        };
        thresholds.validate()?;
        thresholds.validate_upload_ceiling(max_upload_bytes)?;

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            db_path: env::var("DB_PATH").unwrap_or_else(|_| "data/db/return_guard".to_string()),
            key_path: env::var("KEY_PATH").unwrap_or_else(|_| "return_guard.key".to_string()),
            max_upload_bytes,
            thresholds,
        })
    }
}

/// 启发式阈值 (Heuristic Thresholds)
///
/// 评分器、风险聚合器和决策引擎共用的一组参数。
/// 作为值对象注入到各个组件的构造函数里，测试时可以换一套阈值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FraudThresholds {
    // === 真实性检查 ===
    pub min_resolution_px: u32,
    pub min_file_bytes: u64,
    pub max_file_bytes: u64,
    pub low_resolution_points: u32,
    pub too_small_points: u32,
    pub too_large_points: u32,
    pub missing_metadata_points: u32,
    pub duplicate_points: u32,
    pub png_without_metadata_points: u32,
    /// confidence_score 达到该值即判定为可疑
    pub suspicious_threshold: u8,

    // === 时间与品类 ===
    pub quick_return_hours: u32,
    pub quick_return_points: u32,
    pub food_time_limit_hours: u32,
    pub stale_food_points: u32,

    // === 决策分档 ===
    pub reject_threshold: u8,
    pub review_threshold: u8,
}

impl Default for FraudThresholds {
    fn default() -> Self {
        Self {
            min_resolution_px: 300,
            min_file_bytes: 50 * 1024,
            max_file_bytes: 20 * 1024 * 1024,
            low_resolution_points: 25,
            too_small_points: 20,
            too_large_points: 15,
            missing_metadata_points: 20,
            duplicate_points: 100,
            png_without_metadata_points: 15,
            suspicious_threshold: 60,
            quick_return_hours: 2,
            quick_return_points: 10,
            food_time_limit_hours: 48,
            stale_food_points: 15,
            reject_threshold: 70,
            review_threshold: 40,
        }
    }
}

impl FraudThresholds {
    pub fn from_json_file(path: &str) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read thresholds file {path}"))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid thresholds file {path}"))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.review_threshold < self.reject_threshold,
            "review_threshold ({}) must be below reject_threshold ({})",
            self.review_threshold,
            self.reject_threshold
        );
        anyhow::ensure!(self.reject_threshold <= 100, "reject_threshold must be within 0..=100");
        anyhow::ensure!(
            self.suspicious_threshold <= 100,
            "suspicious_threshold must be within 0..=100"
        );
        anyhow::ensure!(
            self.min_file_bytes < self.max_file_bytes,
            "min_file_bytes must be below max_file_bytes"
        );
        for (name, points) in self.point_values() {
            anyhow::ensure!(points <= 100, "{name} must be within 0..=100, got {points}");
        }
        Ok(())
    }

    /// 上传上限必须高于“文件过大”阈值，否则该项检查永远触发不了
    pub fn validate_upload_ceiling(&self, max_upload_bytes: usize) -> anyhow::Result<()> {
        anyhow::ensure!(
            max_upload_bytes as u64 > self.max_file_bytes,
            "MAX_UPLOAD_BYTES ({max_upload_bytes}) must exceed max_file_bytes ({})",
            self.max_file_bytes
        );
        Ok(())
    }

    fn point_values(&self) -> [(&'static str, u32); 8] {
        [
            ("low_resolution_points", self.low_resolution_points),
            ("too_small_points", self.too_small_points),
            ("too_large_points", self.too_large_points),
            ("missing_metadata_points", self.missing_metadata_points),
            ("duplicate_points", self.duplicate_points),
            ("png_without_metadata_points", self.png_without_metadata_points),
            ("quick_return_points", self.quick_return_points),
            ("stale_food_points", self.stale_food_points),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let t = FraudThresholds::default();
        assert!(t.validate().is_ok());
        assert_eq!(t.min_file_bytes, 51_200);
        assert_eq!(t.food_time_limit_hours, 48);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let t: FraudThresholds = serde_json::from_str(r#"{"reject_threshold": 80}"#).unwrap();
        assert_eq!(t.reject_threshold, 80);
        assert_eq!(t.review_threshold, 40);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn inverted_tiers_are_rejected() {
        let t = FraudThresholds {
            review_threshold: 70,
            reject_threshold: 40,
            ..FraudThresholds::default()
        };
        assert!(t.validate().is_err());
    }

    #[test]
    fn out_of_range_points_are_rejected() {
        let t: FraudThresholds =
            serde_json::from_str(r#"{"quick_return_points": 4294967295}"#).unwrap();
        let err = t.validate().unwrap_err();
        assert!(err.to_string().contains("quick_return_points"));

        let t = FraudThresholds {
            duplicate_points: 101,
            ..FraudThresholds::default()
        };
        assert!(t.validate().is_err());
    }

    #[test]
    fn upload_ceiling_must_exceed_the_too_large_threshold() {
        let t = FraudThresholds::default();
        assert!(t.validate_upload_ceiling(DEFAULT_MAX_UPLOAD_BYTES).is_ok());
        assert!(t.validate_upload_ceiling(10 * 1024 * 1024).is_err());
        assert!(t.validate_upload_ceiling(20 * 1024 * 1024).is_err());
    }
}
