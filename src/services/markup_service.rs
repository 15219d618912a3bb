//! 题目 / 答案排版能力（逐题第一阶段）

use std::sync::Arc;
use tracing::warn;

use crate::clients::{ContentPart, FileRef};
use crate::error::LlmError;
use crate::models::item::ItemWithLocations;
use crate::models::outputs::{AnswerMarkupOutput, ImageBox, QuestionMarkupOutput};
use crate::models::region::Region;
use crate::services::llm_service::LlmService;
use crate::services::prompts;

/// 排版结果
#[derive(Debug, Clone, PartialEq)]
pub struct MarkupDraft {
    pub markup: String,
    /// 模型给出的初始区域（未修正）
    pub regions: Vec<Region>,
    /// 仅答案排版会给出分值
    pub mark: Option<u32>,
}

fn to_regions(boxes: Vec<ImageBox>) -> Vec<Region> {
    boxes
        .into_iter()
        .map(|b| Region {
            page: b.page_number,
            rect: b.bbox,
            description: b.description,
        })
        .collect()
}

pub struct MarkupService {
    llm: Arc<LlmService>,
    max_tokens: u32,
}

impl MarkupService {
    pub fn new(llm: Arc<LlmService>, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }

    /// 题目排版（读试卷）
    pub async fn question_markup(
        &self,
        item: &ItemWithLocations,
        primary: &FileRef,
    ) -> Result<MarkupDraft, LlmError> {
        let label = &item.item.label;
        let output: QuestionMarkupOutput = self
            .llm
            .request_json(
                "question_markup",
                &prompts::question_markup_system(label, item.primary_pages.iter().copied()),
                vec![
                    ContentPart::File(primary.clone()),
                    ContentPart::text(format!("Transcribe question {}.", label)),
                ],
                self.max_tokens,
            )
            .await?;

        if output.question_label.trim() != label {
            warn!(
                "⚠️ 题目排版返回的题号 {} 与请求的 {} 不一致",
                output.question_label, label
            );
        }

        Ok(MarkupDraft {
            markup: output.question_latex,
            regions: to_regions(output.question_images),
            mark: None,
        })
    }

    /// 答案排版（读答案）
    pub async fn answer_markup(
        &self,
        item: &ItemWithLocations,
        companion: &FileRef,
    ) -> Result<MarkupDraft, LlmError> {
        let label = &item.item.label;
        let output: AnswerMarkupOutput = self
            .llm
            .request_json(
                "answer_markup",
                &prompts::answer_markup_system(label, item.companion_pages.iter().copied()),
                vec![
                    ContentPart::File(companion.clone()),
                    ContentPart::text(format!("Transcribe the answer of question {}.", label)),
                ],
                self.max_tokens,
            )
            .await?;

        if output.question_label.trim() != label {
            warn!(
                "⚠️ 答案排版返回的题号 {} 与请求的 {} 不一致",
                output.question_label, label
            );
        }

        Ok(MarkupDraft {
            markup: output.answer_latex,
            regions: to_regions(output.answer_images),
            mark: output.marks,
        })
    }
}
