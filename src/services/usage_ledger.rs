//! 调用用量统计
//!
//! 每次补全调用记一条（步骤名 + 模型 + 用量），并发写入，汇总时只读。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::{Add, AddAssign};
use std::sync::Mutex;
use tracing::info;

/// 一次（或多次累加的）调用用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_seconds: f64,
}

impl UsageRecord {
    pub fn new(requests: u64, input_tokens: u64, output_tokens: u64, duration_seconds: f64) -> Self {
        Self {
            requests,
            input_tokens,
            output_tokens,
            duration_seconds,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl Add for UsageRecord {
    type Output = UsageRecord;

    fn add(self, rhs: UsageRecord) -> UsageRecord {
        UsageRecord {
            requests: self.requests + rhs.requests,
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            duration_seconds: self.duration_seconds + rhs.duration_seconds,
        }
    }
}

impl AddAssign for UsageRecord {
    fn add_assign(&mut self, rhs: UsageRecord) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for UsageRecord {
    fn sum<I: Iterator<Item = UsageRecord>>(iter: I) -> Self {
        iter.fold(UsageRecord::default(), Add::add)
    }
}

/// 每百万 token 的价格（美元）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingTier {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl PricingTier {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    pub fn cost(&self, usage: &UsageRecord) -> f64 {
        usage.input_tokens as f64 / 1_000_000.0 * self.input_per_million
            + usage.output_tokens as f64 / 1_000_000.0 * self.output_per_million
    }
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

/// 按模型计价
///
/// 查找顺序：完全匹配 → 最长前缀匹配（如 `gpt-4o-2024-11-20` 命中 `gpt-4o`）→ 默认模型。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default)]
    pub models: HashMap<String, PricingTier>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let models = HashMap::from([
            ("gpt-4o".to_string(), PricingTier::new(2.5, 10.0)),
            ("gpt-4o-mini".to_string(), PricingTier::new(0.15, 0.6)),
            ("gpt-5".to_string(), PricingTier::new(1.25, 10.0)),
        ]);
        Self {
            default_model: default_model(),
            models,
        }
    }
}

impl PricingTable {
    pub fn tier_for(&self, model: &str) -> PricingTier {
        if let Some(tier) = self.models.get(model) {
            return *tier;
        }
        let by_prefix = self
            .models
            .iter()
            .filter(|(name, _)| model.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, tier)| *tier);

        by_prefix
            .or_else(|| self.models.get(&self.default_model).copied())
            .unwrap_or(PricingTier::new(2.5, 10.0))
    }

    pub fn cost(&self, model: &str, usage: &UsageRecord) -> f64 {
        self.tier_for(model).cost(usage)
    }
}

/// 某个步骤的汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepUsage {
    pub step: String,
    #[serde(flatten)]
    pub usage: UsageRecord,
    pub estimated_cost_usd: f64,
}

/// 用量汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// 按步骤名首次出现的顺序排列
    pub steps: Vec<StepUsage>,
    pub total: UsageRecord,
    pub estimated_cost_usd: f64,
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    step: String,
    model: String,
    record: UsageRecord,
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: Vec<LedgerEntry>,
    total: UsageRecord,
}

/// 用量账本（一次流水线运行一个）
#[derive(Debug, Default)]
pub struct UsageLedger {
    pricing: PricingTable,
    state: Mutex<LedgerState>,
}

impl UsageLedger {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            pricing,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// 追加一条记录
    pub fn add_step(&self, step: &str, model: &str, record: UsageRecord) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.entries.push(LedgerEntry {
            step: step.to_string(),
            model: model.to_string(),
            record,
        });
        state.total += record;
    }

    /// 当前累计用量
    pub fn total(&self) -> UsageRecord {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).total
    }

    pub fn entry_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    /// 按步骤汇总（不修改账本）
    pub fn summary(&self) -> UsageSummary {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut steps: Vec<StepUsage> = Vec::new();
        let mut total_cost = 0.0;
        for entry in &state.entries {
            let cost = self.pricing.cost(&entry.model, &entry.record);
            total_cost += cost;
            match steps.iter_mut().find(|s| s.step == entry.step) {
                Some(step) => {
                    step.usage += entry.record;
                    step.estimated_cost_usd += cost;
                }
                None => steps.push(StepUsage {
                    step: entry.step.clone(),
                    usage: entry.record,
                    estimated_cost_usd: cost,
                }),
            }
        }

        UsageSummary {
            steps,
            total: state.total,
            estimated_cost_usd: total_cost,
        }
    }
}

impl UsageSummary {
    /// 输出到日志
    pub fn log(&self, prefix: &str) {
        info!("{} 💰 用量统计:", prefix);
        for step in &self.steps {
            info!(
                "{}   - {}: {} 次请求, 输入 {} / 输出 {} tokens, {:.1}秒, ${:.4}",
                prefix,
                step.step,
                step.usage.requests,
                step.usage.input_tokens,
                step.usage.output_tokens,
                step.usage.duration_seconds,
                step.estimated_cost_usd
            );
        }
        info!(
            "{}   合计: {} 次请求, {} tokens, ${:.4}",
            prefix,
            self.total.requests,
            self.total.total_tokens(),
            self.estimated_cost_usd
        );
    }
}
