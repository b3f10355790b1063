use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::FraudThresholds;
use crate::decision::DecisionEngine;
use crate::error::{GuardError, GuardResult};
use crate::fingerprint;
use crate::record::{
    AuthenticityResult, Decision, DecisionReceipt, DeliveryRecord, OverrideRequest, ReturnRecord,
};
use crate::risk::ReturnContext;
use crate::signer::DecisionSigner;
use crate::store::RecordStore;

// ==========================================
// 对外的请求 / 响应结构
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryConfirmation {
    pub order_id: String,
    pub product_category: String,
    pub delivery_timestamp: DateTime<Utc>,
    pub image_reference: String,
}

#[derive(Debug, Clone)]
pub struct ReturnRequest {
    pub order_id: String,
    pub return_reason: String,
    pub product_category: String,
    pub hours_since_delivery: u32,
    pub image_bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnOutcome {
    /// 没有交付记录时不落库，也就没有请求 ID
    pub request_id: Option<String>,
    pub order_id: String,
    pub decision: Decision,
    pub explanation: String,
    pub fraud_score: Option<u8>,
    pub authenticity_details: Option<AuthenticityResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderStatus {
    pub order_id: String,
    pub has_delivery: bool,
    pub has_return: bool,
    pub return_attempts: usize,
    pub delivery_record: Option<DeliveryRecord>,
    /// 最近一次退货记录
    pub return_record: Option<ReturnRecord>,
}

#[derive(Debug, Clone, Copy)]
enum ImageKind {
    Delivery,
    Return,
}

impl ImageKind {
    fn as_str(self) -> &'static str {
        match self {
            ImageKind::Delivery => "delivery",
            ImageKind::Return => "return",
        }
    }
}

/// 退货防欺诈流水线
///
/// 确认收货：指纹提取 -> 写交付基线
/// 申请退货：读交付基线 -> (按需) 指纹提取 -> 评分 -> 聚合 -> 决策 -> 追加退货记录
///
/// 持久化通过 `RecordStore` 注入，规则逻辑只有这一份。
pub struct ReturnGuard {
    store: Arc<dyn RecordStore>,
    engine: DecisionEngine,
    signer: Arc<DecisionSigner>,
    max_upload_bytes: usize,
}

impl ReturnGuard {
    pub fn new(
        store: Arc<dyn RecordStore>,
        thresholds: FraudThresholds,
        signer: Arc<DecisionSigner>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            store,
            engine: DecisionEngine::new(thresholds),
            signer,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub fn signer(&self) -> &DecisionSigner {
        &self.signer
    }

    pub fn thresholds(&self) -> &FraudThresholds {
        self.engine.thresholds()
    }

    /// 确认收货，写入（或覆盖）交付基线
    pub fn confirm_delivery(
        &self,
        order_id: &str,
        product_category: &str,
        image_bytes: &[u8],
    ) -> GuardResult<DeliveryConfirmation> {
        require("order_id", order_id)?;
        require("product_category", product_category)?;
        self.check_upload(image_bytes)?;

        let fp = fingerprint::extract(image_bytes).inspect_err(|err| {
            warn!(order_id, error = %err, "delivery image rejected");
        })?;

        let now = Utc::now();
        let image_reference = image_reference(
            order_id,
            ImageKind::Delivery,
            now,
            &fp.content_hash,
            &fp.metadata.format,
        );
        self.store.put_image(&image_reference, image_bytes)?;

        let record = DeliveryRecord {
            order_id: order_id.to_string(),
            product_category: product_category.to_string(),
            delivery_timestamp: now,
            image_reference: image_reference.clone(),
            content_hash: fp.content_hash,
            perceptual_hash: fp.perceptual_hash,
            metadata: fp.metadata,
        };
        self.store.put_delivery(&record)?;

        info!(
            order_id,
            category = product_category,
            resolution = format!("{}x{}", record.metadata.width, record.metadata.height),
            "delivery baseline stored"
        );

        Ok(DeliveryConfirmation {
            order_id: record.order_id,
            product_category: record.product_category,
            delivery_timestamp: record.delivery_timestamp,
            image_reference,
        })
    }

    /// 处理一次退货申请
    ///
    /// 业务结论（包括拒绝）都作为值返回；只有非法输入和存储故障才是错误。
    pub fn request_return(&self, request: ReturnRequest) -> GuardResult<ReturnOutcome> {
        require("order_id", &request.order_id)?;
        require("return_reason", &request.return_reason)?;
        require("product_category", &request.product_category)?;
        self.check_upload(&request.image_bytes)?;

        let ctx = ReturnContext {
            order_id: request.order_id.clone(),
            return_reason: request.return_reason.clone(),
            product_category: request.product_category.clone(),
            hours_since_delivery: request.hours_since_delivery,
        };

        let delivery = self.store.get_delivery(&request.order_id)?;
        let verdict = self
            .engine
            .evaluate(&ctx, delivery.as_ref(), || {
                fingerprint::extract(&request.image_bytes)
            })
            .inspect_err(|err| {
                warn!(order_id = %request.order_id, error = %err, "return image rejected");
            })?;

        if delivery.is_none() {
            info!(order_id = %request.order_id, "return rejected: no delivery baseline");
            return Ok(ReturnOutcome {
                request_id: None,
                order_id: request.order_id,
                decision: verdict.decision,
                explanation: verdict.explanation,
                fraud_score: None,
                authenticity_details: None,
            });
        }

        // 内容哈希只读字节，不解码；快速通道上的坏图也能留档
        let now = Utc::now();
        let content_hash = fingerprint::content_hash(&request.image_bytes);
        let format = fingerprint::sniff_format(&request.image_bytes).unwrap_or("UNKNOWN");
        let image_reference =
            image_reference(&request.order_id, ImageKind::Return, now, &content_hash, format);

        let request_id = self.store.next_request_id()?;
        let receipt = DecisionReceipt {
            request_id: request_id.clone(),
            order_id: request.order_id.clone(),
            decision: verdict.decision,
            fraud_score: verdict.fraud_score,
            content_hash: content_hash.clone(),
            issued_at: now.timestamp(),
        };
        let signature = self.signer.sign(&receipt)?;

        let record = ReturnRecord {
            request_id: request_id.clone(),
            order_id: request.order_id.clone(),
            return_reason: request.return_reason,
            product_category: request.product_category,
            return_timestamp: now,
            hours_since_delivery: request.hours_since_delivery,
            image_reference,
            content_hash,
            decision: verdict.decision,
            explanation: verdict.explanation.clone(),
            fraud_score: verdict.fraud_score,
            authenticity_details: verdict.authenticity.clone(),
            receipt,
            signature,
            overrides: Vec::new(),
        };

        self.store.append_return(&record, &request.image_bytes)?;

        info!(
            order_id = %record.order_id,
            request_id = %request_id,
            decision = %verdict.decision,
            fraud_score = ?verdict.fraud_score,
            "return decided"
        );

        Ok(ReturnOutcome {
            request_id: Some(request_id),
            order_id: record.order_id,
            decision: verdict.decision,
            explanation: verdict.explanation,
            fraud_score: verdict.fraud_score,
            authenticity_details: verdict.authenticity,
        })
    }

    /// 订单状态的只读投影
    pub fn get_order_status(&self, order_id: &str) -> GuardResult<OrderStatus> {
        let delivery_record = self.store.get_delivery(order_id)?;
        let mut returns = self.store.get_returns(order_id)?;
        let return_attempts = returns.len();

        Ok(OrderStatus {
            order_id: order_id.to_string(),
            has_delivery: delivery_record.is_some(),
            has_return: return_attempts > 0,
            return_attempts,
            delivery_record,
            return_record: returns.pop(),
        })
    }

    pub fn list_returns(&self, order_id: &str) -> GuardResult<Vec<ReturnRecord>> {
        Ok(self.store.get_returns(order_id)?)
    }

    pub fn get_return(&self, request_id: &str) -> GuardResult<ReturnRecord> {
        self.store
            .get_return(request_id)?
            .ok_or_else(|| GuardError::NotFound(format!("return request {request_id}")))
    }

    /// 人工复核队列
    pub fn pending_reviews(&self) -> GuardResult<Vec<ReturnRecord>> {
        Ok(self.store.returns_with_decision(Decision::Review)?)
    }

    /// 管理员改判：追加备注并替换 decision
    pub fn override_return(
        &self,
        request_id: &str,
        request: OverrideRequest,
    ) -> GuardResult<ReturnRecord> {
        let record = self
            .store
            .apply_override(request_id, &request)?
            .ok_or_else(|| GuardError::NotFound(format!("return request {request_id}")))?;

        info!(
            request_id,
            decision = %record.decision,
            "return decision overridden"
        );
        Ok(record)
    }

    /// 校验退货记录上的签名回执
    pub fn verify_receipt(&self, request_id: &str) -> GuardResult<bool> {
        let record = self.get_return(request_id)?;
        if record.receipt.request_id != record.request_id {
            return Ok(false);
        }
        Ok(DecisionSigner::verify(
            &self.signer.public_key(),
            &record.receipt,
            &record.signature,
        )?)
    }

    pub fn get_image(&self, reference: &str) -> GuardResult<Vec<u8>> {
        self.store
            .get_image(reference)?
            .ok_or_else(|| GuardError::NotFound(format!("image {reference}")))
    }

    fn check_upload(&self, image_bytes: &[u8]) -> GuardResult<()> {
        if image_bytes.is_empty() {
            return Err(GuardError::InvalidInput("image is required".to_string()));
        }
        if image_bytes.len() > self.max_upload_bytes {
            warn!(
                size = image_bytes.len(),
                limit = self.max_upload_bytes,
                "upload over size ceiling"
            );
            return Err(GuardError::InvalidInput(format!(
                "image exceeds the {} byte upload limit",
                self.max_upload_bytes
            )));
        }
        Ok(())
    }
}

fn require(field: &str, value: &str) -> GuardResult<()> {
    if value.trim().is_empty() {
        return Err(GuardError::InvalidInput(format!("{field} is required")));
    }
    Ok(())
}

fn image_reference(
    order_id: &str,
    kind: ImageKind,
    at: DateTime<Utc>,
    content_hash: &str,
    format: &str,
) -> String {
    format!(
        "{}/{}_{}_{}.{}",
        order_id,
        kind.as_str(),
        at.format("%Y%m%dT%H%M%S"),
        &content_hash[..content_hash.len().min(8)],
        fingerprint::extension_for(format)
    )
}
