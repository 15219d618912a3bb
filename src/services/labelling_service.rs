//! 题目分类标注能力（逐题第二阶段）

use std::sync::Arc;
use tracing::debug;

use crate::clients::ContentPart;
use crate::error::{AppResult, ValidationError};
use crate::models::item::Item;
use crate::models::outputs::ItemLabelOutput;
use crate::models::result::ClassificationLabel;
use crate::models::taxonomy::Taxonomy;
use crate::services::llm_service::LlmService;
use crate::services::markup_service::MarkupDraft;
use crate::services::prompts;

pub struct LabellingService {
    llm: Arc<LlmService>,
    max_tokens: u32,
}

impl LabellingService {
    pub fn new(llm: Arc<LlmService>, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }

    /// 根据题目和答案排版结果给出知识点、题型、难度和分值
    pub async fn label(
        &self,
        item: &Item,
        question: &MarkupDraft,
        answer: &MarkupDraft,
        taxonomy: &Taxonomy,
    ) -> AppResult<ClassificationLabel> {
        let output: ItemLabelOutput = self
            .llm
            .request_json(
                "labelling",
                &prompts::labelling_system(taxonomy),
                vec![ContentPart::text(prompts::labelling_user(
                    &item.label,
                    &question.markup,
                    &answer.markup,
                    answer.mark,
                ))],
                self.max_tokens,
            )
            .await?;

        Ok(validate(item, output, answer.mark, taxonomy)?)
    }
}

/// 校验标注结果
///
/// 分值缺省时使用答案排版给出的分值。
fn validate(
    item: &Item,
    output: ItemLabelOutput,
    answer_mark: Option<u32>,
    taxonomy: &Taxonomy,
) -> Result<ClassificationLabel, ValidationError> {
    if output.question_label.trim() != item.label {
        return Err(ValidationError::LabelMismatch {
            expected: item.label.clone(),
            returned: output.question_label,
        });
    }
    if !taxonomy.contains(output.topic_id, output.subtopic_id) {
        return Err(ValidationError::UnknownSubtopic {
            topic_id: output.topic_id,
            subtopic_id: output.subtopic_id,
        });
    }
    if let Some(confidence) = output.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(confidence));
        }
    }

    debug!(
        "标注: topic {} / subtopic {} / {:?}",
        output.topic_id, output.subtopic_id, output.question_type
    );

    Ok(ClassificationLabel {
        topic_id: output.topic_id,
        subtopic_id: output.subtopic_id,
        content_type: output.question_type,
        difficulty: output.difficulty,
        mark: output.mark.or(answer_mark),
        confidence: output.confidence,
        reasoning: output.reasoning,
    })
}
