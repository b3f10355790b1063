use crate::authenticity::AuthenticityScorer;
use crate::config::FraudThresholds;
use crate::error::FingerprintError;
use crate::fingerprint::Fingerprint;
use crate::record::{AuthenticityResult, Decision, DeliveryRecord};
use crate::risk::{ReturnContext, RiskAggregator};

/// 引擎的输出：终态决策 + 解释 + （可选的）评分细节
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub decision: Decision,
    pub explanation: String,
    pub fraud_score: Option<u8>,
    pub authenticity: Option<AuthenticityResult>,
}

impl Verdict {
    fn without_scoring(decision: Decision, explanation: String) -> Self {
        Self {
            decision,
            explanation,
            fraud_score: None,
            authenticity: None,
        }
    }
}

/// 决策引擎 (Decision Engine)
///
/// 判定顺序：
/// 1. 没有交付记录 -> Rejected
/// 2. 食品且超过时限 -> Rejected
/// 3. 非“商品损坏”理由 -> Approved（不做真实性检查）
/// 4. 商品损坏 -> 真实性评分 + 风险聚合，按阈值分三档
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    thresholds: FraudThresholds,
    scorer: AuthenticityScorer,
    aggregator: RiskAggregator,
}

impl DecisionEngine {
    pub fn new(thresholds: FraudThresholds) -> Self {
        Self {
            scorer: AuthenticityScorer::new(thresholds.clone()),
            aggregator: RiskAggregator::new(thresholds.clone()),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &FraudThresholds {
        &self.thresholds
    }

    /// 给出终态决策
    ///
    /// `returned` 是惰性的：只有进入第 4 步才会调用，
    /// 前面任何一道闸门命中时退货图都不会被解码。
    pub fn evaluate<F>(
        &self,
        ctx: &ReturnContext,
        delivery: Option<&DeliveryRecord>,
        returned: F,
    ) -> Result<Verdict, FingerprintError>
    where
        F: FnOnce() -> Result<Fingerprint, FingerprintError>,
    {
        let Some(delivery) = delivery else {
            return Ok(Verdict::without_scoring(
                Decision::Rejected,
                "Return request rejected. No delivery confirmation found. \
                 Customers must upload a delivery image upon receiving the product."
                    .to_string(),
            ));
        };

        let limit = self.thresholds.food_time_limit_hours;
        if ctx.is_food() && ctx.hours_since_delivery > limit {
            return Ok(Verdict::without_scoring(
                Decision::Rejected,
                format!(
                    "Return rejected for food product. Return requested {} hours after delivery, \
                     exceeding the {}-hour limit. This policy prevents misuse and ensures food \
                     safety standards.",
                    ctx.hours_since_delivery, limit
                ),
            ));
        }

        if !ctx.is_damage_claim() {
            return Ok(Verdict::without_scoring(
                Decision::Approved,
                format!(
                    "Return approved for reason: {}. No image authenticity check required for \
                     non-damage returns. Proceed with standard return process.",
                    ctx.return_reason.trim()
                ),
            ));
        }

        let fingerprint = returned()?;
        let authenticity = self.scorer.score(&fingerprint, &delivery.fingerprint());
        let fraud_score = self.aggregator.aggregate(&authenticity, ctx);

        let (decision, explanation) = if fraud_score >= self.thresholds.reject_threshold {
            (
                Decision::Rejected,
                format!(
                    "Return rejected due to high fraud risk (score: {fraud_score}/100). \
                     Image authenticity check failed. Issues detected: {}. \
                     Please contact customer support with genuine product images.",
                    issues(&authenticity.flags, usize::MAX)
                ),
            )
        } else if fraud_score >= self.thresholds.review_threshold {
            (
                Decision::Review,
                format!(
                    "Return flagged for manual review (fraud score: {fraud_score}/100). \
                     Some authenticity concerns detected: {}. \
                     A customer service representative will review your case within 24 hours.",
                    issues(&authenticity.flags, 2)
                ),
            )
        } else {
            (
                Decision::Approved,
                format!(
                    "Return approved for damaged product (fraud score: {fraud_score}/100). \
                     Image authenticity verified. Return pickup will be arranged within 24-48 hours."
                ),
            )
        };

        Ok(Verdict {
            decision,
            explanation,
            fraud_score: Some(fraud_score),
            authenticity: Some(authenticity),
        })
    }
}

/// 拒绝/复核必须至少带一条具体原因；图片本身全部通过时，分数只可能来自时间调整
fn issues(flags: &[String], limit: usize) -> String {
    if flags.is_empty() {
        return "return timing outside the expected window".to_string();
    }
    flags
        .iter()
        .take(limit)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticity::{FLAG_DUPLICATE, FLAG_FILE_TOO_SMALL, FLAG_NO_CAPTURE_METADATA};
    use crate::fingerprint::ImageMetadata;
    use chrono::Utc;

    fn fp(hash: &str, width: u32, size: u64, format: &str, exif: bool) -> Fingerprint {
        Fingerprint {
            content_hash: hash.to_string(),
            perceptual_hash: String::new(),
            metadata: ImageMetadata {
                width,
                height: width,
                byte_size: size,
                format: format.to_string(),
                has_capture_metadata: exif,
            },
        }
    }

    fn delivery(category: &str) -> DeliveryRecord {
        let baseline = fp("delivered", 1600, 600 * 1024, "JPEG", true);
        DeliveryRecord {
            order_id: "O1".to_string(),
            product_category: category.to_string(),
            delivery_timestamp: Utc::now(),
            image_reference: "O1/delivery.jpg".to_string(),
            content_hash: baseline.content_hash,
            perceptual_hash: baseline.perceptual_hash,
            metadata: baseline.metadata,
        }
    }

    fn ctx(reason: &str, category: &str, hours: u32) -> ReturnContext {
        ReturnContext {
            order_id: "O1".to_string(),
            return_reason: reason.to_string(),
            product_category: category.to_string(),
            hours_since_delivery: hours,
        }
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(FraudThresholds::default())
    }

    fn unreadable() -> Result<Fingerprint, FingerprintError> {
        Err(FingerprintError::UnreadableImage("should not be decoded".to_string()))
    }

    #[test]
    fn missing_delivery_is_rejected_without_scoring() {
        let verdict = engine()
            .evaluate(&ctx("Damaged Product", "clothing", 5), None, unreadable)
            .unwrap();
        assert_eq!(verdict.decision, Decision::Rejected);
        assert!(verdict.explanation.contains("No delivery confirmation found"));
        assert_eq!(verdict.fraud_score, None);
        assert_eq!(verdict.authenticity, None);
    }

    #[test]
    fn food_gate_is_exclusive_above_the_limit() {
        let d = delivery("food");
        let late = engine()
            .evaluate(&ctx("Damaged Product", "FOOD", 49), Some(&d), unreadable)
            .unwrap();
        assert_eq!(late.decision, Decision::Rejected);
        assert!(late.explanation.contains("48-hour limit"));
        assert_eq!(late.fraud_score, None);

        // 恰好 48 小时不触发闸门，继续走真实性检查
        let on_time = engine().evaluate(&ctx("Damaged Product", "food", 48), Some(&d), || {
            Ok(fp("other", 1600, 600 * 1024, "JPEG", true))
        });
        assert_eq!(on_time.unwrap().decision, Decision::Approved);
    }

    #[test]
    fn non_damage_reason_skips_extraction() {
        let d = delivery("clothing");
        let verdict = engine()
            .evaluate(&ctx("Wrong item", "clothing", 5), Some(&d), unreadable)
            .unwrap();
        assert_eq!(verdict.decision, Decision::Approved);
        assert!(verdict.explanation.contains("Wrong item"));
        assert_eq!(verdict.fraud_score, None);
        assert_eq!(verdict.authenticity, None);
    }

    #[test]
    fn undecodable_damage_photo_is_an_error() {
        let d = delivery("clothing");
        let result = engine().evaluate(&ctx("damaged product", "clothing", 5), Some(&d), unreadable);
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_photo_is_rejected_with_every_flag() {
        let d = delivery("clothing");
        let verdict = engine()
            .evaluate(&ctx("Damaged Product", "clothing", 24), Some(&d), || {
                Ok(d.fingerprint())
            })
            .unwrap();
        assert_eq!(verdict.decision, Decision::Rejected);
        assert_eq!(verdict.fraud_score, Some(100));
        assert!(verdict.explanation.contains(FLAG_DUPLICATE));
        assert!(verdict.explanation.contains("contact customer support"));
    }

    #[test]
    fn middle_band_goes_to_review() {
        // 文件太小 + 无元数据 = 40
        let d = delivery("electronics");
        let verdict = engine()
            .evaluate(&ctx("Damaged Product", "electronics", 24), Some(&d), || {
                Ok(fp("r", 800, 20 * 1024, "JPEG", false))
            })
            .unwrap();
        assert_eq!(verdict.decision, Decision::Review);
        assert_eq!(verdict.fraud_score, Some(40));
        assert!(verdict.explanation.contains(FLAG_FILE_TOO_SMALL));
        assert!(verdict.explanation.contains(FLAG_NO_CAPTURE_METADATA));
        assert!(verdict.explanation.contains("within 24 hours"));
    }

    #[test]
    fn review_lists_at_most_two_flags() {
        // 低分辨率 + 太小 = 45，再加无元数据 = 65
        let d = delivery("electronics");
        let verdict = engine()
            .evaluate(&ctx("Damaged Product", "electronics", 24), Some(&d), || {
                Ok(fp("r", 100, 10 * 1024, "JPEG", false))
            })
            .unwrap();
        assert_eq!(verdict.fraud_score, Some(65));
        assert_eq!(verdict.decision, Decision::Review);
        assert!(!verdict.explanation.contains(FLAG_NO_CAPTURE_METADATA));
        assert_eq!(verdict.authenticity.unwrap().flags.len(), 3);
    }

    #[test]
    fn quick_return_can_push_into_review() {
        // 无元数据 20 + 快速退货 10 = 30 仍然通过
        let d = delivery("electronics");
        let verdict = engine()
            .evaluate(&ctx("Damaged Product", "electronics", 1), Some(&d), || {
                Ok(fp("r", 1600, 600 * 1024, "JPEG", false))
            })
            .unwrap();
        assert_eq!(verdict.fraud_score, Some(30));
        assert_eq!(verdict.decision, Decision::Approved);
        assert!(verdict.explanation.contains("pickup will be arranged"));
    }

    #[test]
    fn tiers_follow_configured_thresholds() {
        let strict = DecisionEngine::new(FraudThresholds {
            review_threshold: 10,
            reject_threshold: 20,
            ..FraudThresholds::default()
        });
        let d = delivery("electronics");
        let verdict = strict
            .evaluate(&ctx("Damaged Product", "electronics", 24), Some(&d), || {
                Ok(fp("r", 1600, 600 * 1024, "JPEG", false))
            })
            .unwrap();
        assert_eq!(verdict.decision, Decision::Rejected);
    }

    #[test]
    fn timing_only_score_still_names_a_reason() {
        let strict = DecisionEngine::new(FraudThresholds {
            review_threshold: 5,
            reject_threshold: 50,
            ..FraudThresholds::default()
        });
        let d = delivery("electronics");
        let verdict = strict
            .evaluate(&ctx("Damaged Product", "electronics", 0), Some(&d), || {
                Ok(fp("r", 1600, 600 * 1024, "JPEG", true))
            })
            .unwrap();
        assert_eq!(verdict.decision, Decision::Review);
        assert!(verdict.explanation.contains("return timing"));
    }
}
