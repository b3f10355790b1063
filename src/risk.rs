use crate::config::FraudThresholds;
use crate::record::AuthenticityResult;

/// 一次退货请求的业务上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnContext {
    pub order_id: String,
    pub return_reason: String,
    pub product_category: String,
    pub hours_since_delivery: u32,
}

impl ReturnContext {
    pub fn is_food(&self) -> bool {
        self.product_category.trim().eq_ignore_ascii_case("food")
    }

    pub fn is_damage_claim(&self) -> bool {
        self.return_reason.trim().eq_ignore_ascii_case("Damaged Product")
    }
}

/// 风险聚合器 (Risk Aggregator)
///
/// fraud_score = 真实性分 + 时间/品类调整，截断到 [0, 100]。
/// 各项调整相互独立、可交换，结果与计算顺序无关。
#[derive(Debug, Clone)]
pub struct RiskAggregator {
    thresholds: FraudThresholds,
}

impl RiskAggregator {
    pub fn new(thresholds: FraudThresholds) -> Self {
        Self { thresholds }
    }

    pub fn aggregate(&self, authenticity: &AuthenticityResult, ctx: &ReturnContext) -> u8 {
        let t = &self.thresholds;
        let mut score = u32::from(authenticity.confidence_score);

        // 签收后极短时间内退货，疑似提前摆拍
        if ctx.hours_since_delivery < t.quick_return_hours {
            score = score.saturating_add(t.quick_return_points);
        }

        // 食品超时：正常情况下已被决策引擎的硬闸门拦下，这里只在闸门被绕过时生效
        if ctx.is_food() && ctx.hours_since_delivery > t.food_time_limit_hours {
            score = score.saturating_add(t.stale_food_points);
        }

        score.min(100) as u8
    }
}
