//! 试卷分类能力
//!
//! 从试卷末尾取几页渲染成图片，让模型判断 type1 / type2。

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::clients::ContentPart;
use crate::error::{AppResult, LlmError};
use crate::infrastructure::{PageRenderer, RasterPage};
use crate::models::item::ClassificationTag;
use crate::models::outputs::ClassificationOutput;
use crate::services::llm_service::LlmService;
use crate::services::prompts;

/// 分类结果
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub tag: ClassificationTag,
    pub reasoning: String,
    pub confidence: Option<f64>,
}

/// 选择分类用的页（0 起始，升序）
///
/// 优先取倒数第 2、4、6…页；不足 `count` 页时改为取最后 `count` 页。
pub fn select_sample_pages(total_pages: u32, count: u32) -> Vec<u32> {
    let mut pages: Vec<u32> = (1..=count)
        .filter_map(|k| total_pages.checked_sub(2 * k))
        .collect();

    if (pages.len() as u32) < count {
        pages = (total_pages.saturating_sub(count)..total_pages).collect();
    }

    pages.sort_unstable();
    pages
}

pub struct Classifier {
    llm: Arc<LlmService>,
    max_tokens: u32,
    sample_pages: u32,
}

impl Classifier {
    pub fn new(llm: Arc<LlmService>, max_tokens: u32, sample_pages: u32) -> Self {
        Self {
            llm,
            max_tokens,
            sample_pages,
        }
    }

    /// 渲染分类用的样本页
    pub async fn render_samples(
        &self,
        renderer: &dyn PageRenderer,
        document: &Path,
    ) -> AppResult<Vec<RasterPage>> {
        let total = renderer.page_count(document).await?;
        let selected = select_sample_pages(total, self.sample_pages);
        info!(
            "🖼️ 共 {} 页，分类使用第 {:?} 页",
            total,
            selected.iter().map(|p| p + 1).collect::<Vec<_>>()
        );

        let mut pages = Vec::with_capacity(selected.len());
        for page in selected {
            pages.push(renderer.render_page(document, page).await?);
        }
        Ok(pages)
    }

    pub async fn classify(&self, samples: &[RasterPage]) -> Result<Classification, LlmError> {
        let mut user = vec![ContentPart::text(format!(
            "Here are {} pages from the end of the paper.",
            samples.len()
        ))];
        user.extend(samples.iter().map(|p| ContentPart::Image(Arc::clone(&p.png))));

        let output: ClassificationOutput = self
            .llm
            .request_json("classify", &prompts::classify_system(), user, self.max_tokens)
            .await?;

        info!(
            "✓ 试卷类型: {} (置信度: {})",
            output.exam_type,
            output
                .confidence
                .map(|c| format!("{:.2}", c))
                .unwrap_or_else(|| "-".to_string())
        );

        Ok(Classification {
            tag: output.exam_type,
            reasoning: output.reasoning,
            confidence: output.confidence,
        })
    }
}
