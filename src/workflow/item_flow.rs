//! 题目处理流程 - 流程层
//!
//! 核心职责：定义"一道题"的完整处理流程
//!
//! 流程顺序：
//! 1. 题目排版 ∥ 答案排版（同时进行，都成功才继续）
//! 2. 分类标注 ∥ 区域截图与修正（同时进行）
//! 3. 组装 `ItemResult`
//!
//! 任何错误都只影响这一道题，流程本身不返回错误。

use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::clients::FileRef;
use crate::infrastructure::{crop, PageRenderer, RasterPage};
use crate::models::item::ItemWithLocations;
use crate::models::region::Region;
use crate::models::result::{ItemResult, ItemStatus, RegionResult};
use crate::models::taxonomy::Taxonomy;
use crate::services::{LabellingService, MarkupService, RegionRefiner};
use crate::workflow::item_ctx::ItemCtx;

/// 一次运行用到的文档（本地路径 + 已上传的句柄）
#[derive(Debug, Clone)]
pub struct ItemDocuments {
    pub primary_path: PathBuf,
    pub companion_path: PathBuf,
    pub primary: FileRef,
    pub companion: FileRef,
}

/// 题目处理流程
///
/// - 不持有任何跨题目的可变状态
/// - 只依赖业务能力（services）
pub struct ItemFlow {
    markup: MarkupService,
    labelling: LabellingService,
    /// 为 `None` 时只截图，不做区域修正
    refiner: Option<RegionRefiner>,
    renderer: Arc<dyn PageRenderer>,
    taxonomy: Arc<Taxonomy>,
    documents: ItemDocuments,
}

impl ItemFlow {
    pub fn new(
        markup: MarkupService,
        labelling: LabellingService,
        refiner: Option<RegionRefiner>,
        renderer: Arc<dyn PageRenderer>,
        taxonomy: Arc<Taxonomy>,
        documents: ItemDocuments,
    ) -> Self {
        Self {
            markup,
            labelling,
            refiner,
            renderer,
            taxonomy,
            documents,
        }
    }

    pub async fn run(&self, located: &ItemWithLocations, ctx: &ItemCtx) -> ItemResult {
        let item = located.item.clone();
        info!(
            "{} 📝 开始处理 (试卷页 {:?}, 答案页 {:?})",
            ctx, located.primary_pages, located.companion_pages
        );

        // ========== 第一阶段: 题目排版 ∥ 答案排版 ==========
        let (question, answer) = tokio::join!(
            self.markup.question_markup(located, &self.documents.primary),
            self.markup.answer_markup(located, &self.documents.companion),
        );

        let (question, answer) = match (question, answer) {
            (Ok(q), Ok(a)) => (q, a),
            (q, a) => {
                let mut reasons = Vec::new();
                if let Err(e) = q {
                    reasons.push(format!("题目排版失败: {}", e));
                }
                if let Err(e) = a {
                    reasons.push(format!("答案排版失败: {}", e));
                }
                let reason = reasons.join("; ");
                warn!("{} ❌ {}", ctx, reason);
                return ItemResult::failed(item, reason);
            }
        };

        info!(
            "{} ✓ 排版完成 (题目区域 {}, 答案区域 {})",
            ctx,
            question.regions.len(),
            answer.regions.len()
        );

        // ========== 第二阶段: 分类标注 ∥ 区域截图与修正 ==========
        let (label, question_regions, answer_regions) = tokio::join!(
            self.labelling.label(&item, &question, &answer, &self.taxonomy),
            self.extract_regions(&question.regions, &self.documents.primary_path, ctx),
            self.extract_regions(&answer.regions, &self.documents.companion_path, ctx),
        );

        let mut result = ItemResult {
            item,
            question_markup: Some(question.markup),
            question_regions,
            answer_markup: Some(answer.markup),
            answer_regions,
            mark: answer.mark,
            classification: None,
            status: ItemStatus::Success,
            error: None,
        };

        match label {
            Ok(label) => {
                info!(
                    "{} ✅ 完成 (topic {}, subtopic {})",
                    ctx, label.topic_id, label.subtopic_id
                );
                result.mark = label.mark.or(result.mark);
                result.classification = Some(label);
            }
            Err(e) => {
                warn!("{} ⚠️ 分类标注失败，保留排版结果: {}", ctx, e);
                result.status = ItemStatus::PartialSuccess;
                result.error = Some(format!("分类标注失败: {}", e));
            }
        }

        result
    }

    /// 截取并修正一组区域：每页只渲染一次，所有区域同时处理
    ///
    /// 不做修正时每个区域按原坐标截图一次。
    async fn extract_regions(
        &self,
        regions: &[Region],
        document: &Path,
        ctx: &ItemCtx,
    ) -> Vec<RegionResult> {
        if regions.is_empty() {
            return Vec::new();
        }

        let pages: BTreeSet<u32> = regions.iter().map(|r| r.page).collect();
        let rendered = join_all(pages.into_iter().map(|page| async move {
            (page, self.renderer.render_page(document, page).await)
        }))
        .await;

        let mut cache: HashMap<u32, RasterPage> = HashMap::new();
        let mut render_errors: HashMap<u32, String> = HashMap::new();
        for (page, result) in rendered {
            match result {
                Ok(raster) => {
                    cache.insert(page, raster);
                }
                Err(e) => {
                    warn!("{} ⚠️ 第 {} 页渲染失败，区域原样保留: {}", ctx, page, e);
                    render_errors.insert(page, e.to_string());
                }
            }
        }

        let cache = &cache;
        let render_errors = &render_errors;
        join_all(regions.iter().cloned().map(|region| async move {
            let Some(raster) = cache.get(&region.page) else {
                let note = render_errors.get(&region.page).cloned();
                return RegionResult {
                    note,
                    ..RegionResult::unrefined(region)
                };
            };
            let Some(refiner) = &self.refiner else {
                return snapshot(region, raster, ctx).await;
            };
            match refiner.refine(region.clone(), raster).await {
                Ok(outcome) => RegionResult::from(outcome),
                Err(e) => {
                    warn!("{} ⚠️ 区域修正失败，保留原区域: {}", ctx, e);
                    RegionResult {
                        note: Some(e.to_string()),
                        ..RegionResult::unrefined(region)
                    }
                }
            }
        }))
        .await
    }
}

/// 按原坐标截图一次，坐标对齐到像素边界
async fn snapshot(region: Region, raster: &RasterPage, ctx: &ItemCtx) -> RegionResult {
    let pixels = raster.geometry.to_pixels(&region.rect);
    let aligned = Region {
        rect: raster.geometry.to_points(&pixels),
        ..region.clone()
    };
    match crop(raster, pixels).await {
        Ok(image) => RegionResult {
            crops: vec![image.png],
            ..RegionResult::unrefined(aligned)
        },
        Err(e) => {
            warn!("{} ⚠️ 区域截图失败: {}", ctx, e);
            RegionResult {
                note: Some(e.to_string()),
                ..RegionResult::unrefined(region)
            }
        }
    }
}
