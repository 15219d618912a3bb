//! 区域修正能力
//!
//! 整页只渲染一次；每轮把整页和当前截图一起交给模型校验：
//! - 判定正确 → `Converged`
//! - 判定错误且没有给出新区域 → `Rejected`
//! - 给出新区域 → 换算、截断后从缓存的整页重新裁剪，进入下一轮
//!
//! 达到最大轮数仍未通过为 `Exhausted`。以上结果都不会让题目失败。

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clients::ContentPart;
use crate::error::AppResult;
use crate::infrastructure::{crop, RasterPage};
use crate::models::outputs::RegionReviewOutput;
use crate::models::region::Region;
use crate::models::result::{RegionResult, TerminationReason};
use crate::services::llm_service::LlmService;
use crate::services::prompts;

/// 修正结果
#[derive(Debug, Clone)]
pub struct RefinementOutcome {
    pub region: Region,
    /// 实际发出的校验次数
    pub iterations: u32,
    /// 每轮的截图（PNG），第一张是原始区域
    pub crop_history: Vec<Arc<Vec<u8>>>,
    pub termination: TerminationReason,
    /// 校验调用失败时的错误信息
    pub review_error: Option<String>,
}

impl From<RefinementOutcome> for RegionResult {
    fn from(outcome: RefinementOutcome) -> Self {
        RegionResult {
            region: outcome.region,
            termination: Some(outcome.termination),
            iterations: outcome.iterations,
            crops: outcome.crop_history,
            note: outcome.review_error,
        }
    }
}

pub struct RegionRefiner {
    llm: Arc<LlmService>,
    max_iterations: u32,
    max_tokens: u32,
}

impl RegionRefiner {
    pub fn new(llm: Arc<LlmService>, max_iterations: u32, max_tokens: u32) -> Self {
        Self {
            llm,
            max_iterations,
            max_tokens,
        }
    }

    /// 修正一个区域
    ///
    /// `page` 必须是 `region.page` 对应的整页渲染结果。
    pub async fn refine(&self, region: Region, page: &RasterPage) -> AppResult<RefinementOutcome> {
        let geometry = page.geometry;

        let mut pixels = geometry.to_pixels(&region.rect);
        let mut current = Region {
            rect: geometry.to_points(&pixels),
            ..region
        };
        let mut current_crop = crop(page, pixels).await?;
        let mut history = vec![Arc::clone(&current_crop.png)];

        for iteration in 1..=self.max_iterations {
            let user = vec![
                ContentPart::text(prompts::region_review_user(
                    &current,
                    geometry.width_pt,
                    geometry.height_pt,
                )),
                ContentPart::Image(Arc::clone(&page.png)),
                ContentPart::Image(Arc::clone(&current_crop.png)),
            ];

            let review: RegionReviewOutput = match self
                .llm
                .request_json(
                    "region_review",
                    &prompts::region_review_system(),
                    user,
                    self.max_tokens,
                )
                .await
            {
                Ok(review) => review,
                Err(e) => {
                    warn!("⚠️ 区域校验调用失败，保留当前区域: {}", e);
                    return Ok(RefinementOutcome {
                        region: current,
                        iterations: iteration,
                        crop_history: history,
                        termination: TerminationReason::Exhausted,
                        review_error: Some(e.to_string()),
                    });
                }
            };

            debug!(
                "区域校验 第 {} 轮: is_correct={}, confidence={:.2}",
                iteration, review.is_correct, review.confidence
            );

            if review.is_correct {
                info!("✓ 区域校验通过 (第 {} 轮)", iteration);
                return Ok(RefinementOutcome {
                    region: current,
                    iterations: iteration,
                    crop_history: history,
                    termination: TerminationReason::Converged,
                    review_error: None,
                });
            }

            let Some(corrected) = review.corrected_bbox else {
                warn!(
                    "⚠️ 区域被判定错误但没有给出修正: {}",
                    review.issue_description.as_deref().unwrap_or(&review.reasoning)
                );
                return Ok(RefinementOutcome {
                    region: current,
                    iterations: iteration,
                    crop_history: history,
                    termination: TerminationReason::Rejected,
                    review_error: None,
                });
            };

            pixels = geometry.to_pixels(&corrected);
            current.rect = geometry.to_points(&pixels);
            current_crop = crop(page, pixels).await?;
            history.push(Arc::clone(&current_crop.png));
            debug!(
                "区域修正为 [{:.1}, {:.1}, {:.1}, {:.1}] ({}x{} px)",
                current.rect.x1,
                current.rect.y1,
                current.rect.x2,
                current.rect.y2,
                current_crop.width,
                current_crop.height
            );
        }

        warn!("⚠️ 区域修正达到最大轮数 {}，使用最后一次结果", self.max_iterations);
        Ok(RefinementOutcome {
            region: current,
            iterations: self.max_iterations,
            crop_history: history,
            termination: TerminationReason::Exhausted,
            review_error: None,
        })
    }
}
