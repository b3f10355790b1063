use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::fingerprint::{Fingerprint, ImageMetadata};

/// 终态决策：每次退货请求同步地落到其中之一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Approved,
    Review,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "Approved",
            Decision::Review => "Review",
            Decision::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// 交付基线 (Delivery Record)
// ==========================================

/// 每个订单一份，确认收货时写入；重复确认会覆盖
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub order_id: String,
    pub product_category: String,
    pub delivery_timestamp: DateTime<Utc>,
    pub image_reference: String,

    // 指纹：SHA-256 是权威比对依据，pHash 只作参考
    pub content_hash: String,
    pub perceptual_hash: String,
    pub metadata: ImageMetadata,
}

impl DeliveryRecord {
    /// 还原成指纹，供评分器和退货图比对
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            content_hash: self.content_hash.clone(),
            perceptual_hash: self.perceptual_hash.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

// ==========================================
// 真实性检查结果 (Authenticity Result)
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Resolution,
    MinFileSize,
    MaxFileSize,
    CaptureMetadata,
    Duplicate,
    FormatMetadata,
}

/// 细节快照，原样展示给人工审核
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticityDetails {
    pub resolution: String,
    pub byte_size: u64,
    pub file_size_kb: f64,
    pub has_capture_metadata: bool,
    pub is_duplicate: bool,
    pub format: String,
    /// 与交付图的 pHash 汉明距离，不计分
    pub perceptual_distance: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticityResult {
    pub is_suspicious: bool,
    /// 0-100，越高越可疑
    pub confidence_score: u8,
    /// true = 检查通过
    pub checks: BTreeMap<CheckKind, bool>,
    pub flags: Vec<String>,
    pub details: AuthenticityDetails,
}

// ==========================================
// 退货记录 (Return Record)
// ==========================================

/// 签名回执：只覆盖自动判定时的字段，人工改判不影响它
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionReceipt {
    pub request_id: String,
    pub order_id: String,
    pub decision: Decision,
    pub fraud_score: Option<u8>,
    pub content_hash: String,
    pub issued_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualOverride {
    pub previous_decision: Decision,
    pub decision: Decision,
    pub notes: String,
    pub overridden_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub decision: Decision,
    #[serde(default)]
    pub notes: String,
    #[serde(default = "Utc::now")]
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnRecord {
    pub request_id: String,
    pub order_id: String,
    pub return_reason: String,
    pub product_category: String,
    pub return_timestamp: DateTime<Utc>,
    pub hours_since_delivery: u32,
    pub image_reference: String,
    pub content_hash: String,

    pub decision: Decision,
    pub explanation: String,
    /// 未走真实性检查时为空
    pub fraud_score: Option<u8>,
    pub authenticity_details: Option<AuthenticityResult>,

    pub receipt: DecisionReceipt,
    /// receipt 的 Ed25519 签名 (hex)
    pub signature: String,

    #[serde(default)]
    pub overrides: Vec<ManualOverride>,
}

impl ReturnRecord {
    /// 人工改判：追加备注并替换 decision，其余字段保持不变
    pub fn apply_override(&mut self, request: &OverrideRequest) {
        self.overrides.push(ManualOverride {
            previous_decision: self.decision,
            decision: request.decision,
            notes: request.notes.clone(),
            overridden_at: request.requested_at,
        });
        self.decision = request.decision;
    }

    pub fn admin_notes(&self) -> Vec<&str> {
        self.overrides
            .iter()
            .map(|o| o.notes.as_str())
            .filter(|n| !n.is_empty())
            .collect()
    }
}
