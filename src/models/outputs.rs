//! 各阶段模型返回的 JSON 结构
//!
//! 全部使用 `deny_unknown_fields`：多余或缺失的字段在边界处直接报错，
//! 由调用层按格式错误处理。

use serde::Deserialize;

use crate::models::item::ClassificationTag;
use crate::models::region::Rect;
use crate::models::result::ContentType;

/// 分类结果
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassificationOutput {
    pub exam_type: ClassificationTag,
    pub reasoning: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListedQuestion {
    pub question_index: usize,
    pub question_label: String,
}

/// 题目清单
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListingOutput {
    pub exam_type: ClassificationTag,
    pub total_questions: usize,
    pub questions: Vec<ListedQuestion>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageAnnotation {
    pub question_label: String,
    #[serde(alias = "paper_pages", alias = "solution_pages")]
    pub pages: Vec<u32>,
}

/// 页码标注结果（试卷与答案两个分支共用）
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageAnnotationOutput {
    pub annotations: Vec<PageAnnotation>,
}

/// 模型给出的图片区域
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageBox {
    pub page_number: u32,
    pub bbox: Rect,
    #[serde(default)]
    pub description: Option<String>,
}

/// 题目排版结果
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuestionMarkupOutput {
    pub question_label: String,
    pub question_latex: String,
    #[serde(default)]
    pub question_images: Vec<ImageBox>,
}

/// 答案排版结果
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnswerMarkupOutput {
    pub question_label: String,
    pub answer_latex: String,
    #[serde(default)]
    pub answer_images: Vec<ImageBox>,
    #[serde(default)]
    pub marks: Option<u32>,
}

/// 题目分类标注结果
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ItemLabelOutput {
    pub question_label: String,
    pub topic_id: u32,
    pub subtopic_id: u32,
    pub question_type: ContentType,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub mark: Option<u32>,
    #[serde(default)]
    pub confidence: Option<f64>,
    pub reasoning: String,
}

/// 区域校验结果
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionReviewOutput {
    pub is_correct: bool,
    pub confidence: f64,
    #[serde(default)]
    pub issue_description: Option<String>,
    #[serde(default)]
    pub corrected_bbox: Option<Rect>,
    pub reasoning: String,
}
