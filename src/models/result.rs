use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::item::{ClassificationTag, Item};
use crate::models::region::Region;
use crate::services::usage_ledger::UsageSummary;

/// 题型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    #[serde(rename = "short answer")]
    ShortAnswer,
    #[serde(rename = "multiple choice")]
    MultipleChoice,
}

/// 题目的分类标注
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationLabel {
    pub topic_id: u32,
    pub subtopic_id: u32,
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub reasoning: String,
}

/// 区域修正的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// 校验通过
    Converged,
    /// 判定错误但未给出修正
    Rejected,
    /// 达到最大迭代次数
    Exhausted,
}

/// 已修正（或未修正）的区域
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionResult {
    pub region: Region,
    /// 未执行修正时为 `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<TerminationReason>,
    pub iterations: u32,
    /// 每次迭代的 PNG 截图（第一张是原始区域）
    #[serde(skip)]
    pub crops: Vec<Arc<Vec<u8>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl RegionResult {
    /// 不做修正，原样保留
    pub fn unrefined(region: Region) -> Self {
        Self {
            region,
            termination: None,
            iterations: 0,
            crops: Vec::new(),
            note: None,
        }
    }
}

/// 题目处理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    Success,
    /// 排版完成但分类标注失败
    PartialSuccess,
    Failed,
}

/// 单道题目的处理结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    pub item: Item,
    pub question_markup: Option<String>,
    pub question_regions: Vec<RegionResult>,
    pub answer_markup: Option<String>,
    pub answer_regions: Vec<RegionResult>,
    pub mark: Option<u32>,
    pub classification: Option<ClassificationLabel>,
    pub status: ItemStatus,
    pub error: Option<String>,
}

impl ItemResult {
    pub fn failed(item: Item, error: impl Into<String>) -> Self {
        Self {
            item,
            question_markup: None,
            question_regions: Vec::new(),
            answer_markup: None,
            answer_regions: Vec::new(),
            mark: None,
            classification: None,
            status: ItemStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ItemStatus::Success
    }
}

/// 流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Preprocessing,
    Classifying,
    Listing,
    Annotating,
    FanningOut,
    Assembling,
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Preprocessing => "预处理",
            Stage::Classifying => "试卷分类",
            Stage::Listing => "题目清单",
            Stage::Annotating => "页码标注",
            Stage::FanningOut => "逐题处理",
            Stage::Assembling => "结果汇总",
            Stage::Done => "完成",
        };
        f.write_str(name)
    }
}

/// 流水线最终状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineStatus {
    Completed,
    AbortedAt { stage: Stage, reason: String },
}

/// 一次运行的完整结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    pub classification_tag: Option<ClassificationTag>,
    pub listing_verified: bool,
    pub items: Vec<ItemResult>,
    pub usage: UsageSummary,
    pub processing_time_seconds: f64,
}

impl PipelineResult {
    pub fn is_completed(&self) -> bool {
        self.status == PipelineStatus::Completed
    }

    /// 统计 (成功, 部分成功, 失败)
    pub fn item_counts(&self) -> (usize, usize, usize) {
        self.items
            .iter()
            .fold((0, 0, 0), |(ok, partial, failed), r| match r.status {
                ItemStatus::Success => (ok + 1, partial, failed),
                ItemStatus::PartialSuccess => (ok, partial + 1, failed),
                ItemStatus::Failed => (ok, partial, failed + 1),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_status_serializes_stage() {
        let status = PipelineStatus::AbortedAt {
            stage: Stage::Annotating,
            reason: "companion failed".to_string(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "aborted_at");
        assert_eq!(json["stage"], "Annotating");
    }

    #[test]
    fn test_stage_order_is_forward() {
        assert!(Stage::Preprocessing < Stage::Classifying);
        assert!(Stage::Annotating < Stage::FanningOut);
        assert!(Stage::Assembling < Stage::Done);
    }
}
