//! 单次抽取流水线 - 编排层
//!
//! ## 职责
//!
//! 负责一对文档（试卷 + 答案）的完整处理，是试卷级别的编排器。
//!
//! ## 阶段
//!
//! 1. **预处理**：加页码标记、上传文档、渲染分类样本页、读取分类体系
//! 2. **试卷分类**：得到 `type1` / `type2`
//! 3. **题目清单**：带校验的列题，必要时重问一次
//! 4. **页码标注**：试卷 / 答案两路同时标注
//! 5. **逐题处理**：所有题目同时处理
//! 6. **结果汇总**：组装 `PipelineResult`
//!
//! 阶段只能向前推进。任何阶段级错误都会在该阶段中止，
//! 单道题的失败不会中止流水线。结束后按配置删除已上传的文件。

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::clients::{CompletionService, FileRef, FileStore};
use crate::config::Config;
use crate::error::AppResult;
use crate::infrastructure::{PageMarker, PageRenderer};
use crate::models::item::{ClassificationTag, DocumentPair};
use crate::models::result::{ItemResult, PipelineResult, PipelineStatus, Stage};
use crate::models::taxonomy::ClassificationContext;
use crate::orchestrator::fan_out::fan_out;
use crate::services::{
    Classifier, ItemLister, LabelGrammar, LabellingService, LlmService, MarkupService,
    PageAnnotator, PricingTable, RegionRefiner, RetryPolicy, TaxonomySource, UsageLedger,
};
use crate::workflow::{ItemDocuments, ItemFlow};

/// 流水线依赖的外部能力
#[derive(Clone)]
pub struct Collaborators {
    pub completion: Arc<dyn CompletionService>,
    /// 区域校验使用的补全服务（可与 `completion` 相同）
    pub review_completion: Arc<dyn CompletionService>,
    pub file_store: Arc<dyn FileStore>,
    pub renderer: Arc<dyn PageRenderer>,
    /// 未提供带标记的文档时，用它生成
    pub marker: Arc<dyn PageMarker>,
    pub taxonomy_source: Arc<dyn TaxonomySource>,
}

/// 阶段中止
#[derive(Debug)]
struct StageAbort {
    stage: Stage,
    reason: String,
}

/// 阶段记录器，只允许向前推进
struct StageTracker<'a> {
    exam_id: &'a str,
    current: Stage,
}

impl<'a> StageTracker<'a> {
    fn new(exam_id: &'a str) -> Self {
        info!("[试卷 {}] ▶ {}", exam_id, Stage::Preprocessing);
        Self {
            exam_id,
            current: Stage::Preprocessing,
        }
    }

    fn enter(&mut self, next: Stage) {
        if next <= self.current {
            warn!(
                "[试卷 {}] ⚠️ 忽略阶段回退: {} → {}",
                self.exam_id, self.current, next
            );
            return;
        }
        info!("[试卷 {}] ▶ {}", self.exam_id, next);
        self.current = next;
    }

    fn abort(&self, reason: impl Display) -> StageAbort {
        StageAbort {
            stage: self.current,
            reason: reason.to_string(),
        }
    }
}

/// 一次运行中逐步填充的结果
#[derive(Default)]
struct RunState {
    uploads: Vec<FileRef>,
    tag: Option<ClassificationTag>,
    listing_verified: bool,
    items: Vec<ItemResult>,
}

/// 已上传的文档句柄
struct UploadedDocuments {
    primary: FileRef,
    companion: FileRef,
    primary_marked: FileRef,
    companion_marked: FileRef,
}

/// 抽取流水线
pub struct Pipeline {
    collaborators: Collaborators,
    pricing: PricingTable,
    config: Config,
}

impl Pipeline {
    pub fn new(collaborators: Collaborators, pricing: PricingTable, config: Config) -> Self {
        Self {
            collaborators,
            pricing,
            config,
        }
    }

    /// 处理一对文档
    ///
    /// 总是返回结果：完成时为 `Completed`，否则为 `AbortedAt`。
    /// 两种情况都带有本次运行的用量统计。
    pub async fn run(
        &self,
        exam_id: &str,
        documents: &DocumentPair,
        ctx: ClassificationContext,
    ) -> PipelineResult {
        let started = Instant::now();
        let ledger = Arc::new(UsageLedger::new(self.pricing.clone()));
        let mut state = RunState::default();

        info!(
            "[试卷 {}] 开始处理 (试卷: {}, 答案: {})",
            exam_id,
            documents.primary.display(),
            documents.companion.display()
        );

        let outcome = self
            .execute(exam_id, documents, ctx, &ledger, &mut state)
            .await;

        self.cleanup(exam_id, &state.uploads).await;

        let status = match outcome {
            Ok(()) => PipelineStatus::Completed,
            Err(abort) => {
                warn!(
                    "[试卷 {}] ❌ 在 {} 阶段中止: {}",
                    exam_id, abort.stage, abort.reason
                );
                PipelineStatus::AbortedAt {
                    stage: abort.stage,
                    reason: abort.reason,
                }
            }
        };

        let usage = ledger.summary();
        usage.log(&format!("[试卷 {}]", exam_id));

        PipelineResult {
            status,
            classification_tag: state.tag,
            listing_verified: state.listing_verified,
            items: state.items,
            usage,
            processing_time_seconds: started.elapsed().as_secs_f64(),
        }
    }

    async fn execute(
        &self,
        exam_id: &str,
        documents: &DocumentPair,
        ctx: ClassificationContext,
        ledger: &Arc<UsageLedger>,
        state: &mut RunState,
    ) -> Result<(), StageAbort> {
        let config = &self.config;
        let collaborators = &self.collaborators;
        let retry = RetryPolicy::from_config(config);
        let llm = Arc::new(LlmService::new(
            Arc::clone(&collaborators.completion),
            Arc::clone(ledger),
            retry,
        ));

        let mut stages = StageTracker::new(exam_id);

        // ========== 预处理 ==========
        let uploaded = self
            .upload_documents(exam_id, documents, &mut state.uploads)
            .await
            .map_err(|e| stages.abort(e))?;

        let classifier = Classifier::new(
            Arc::clone(&llm),
            config.classify_max_tokens,
            config.classification_sample_pages,
        );
        let samples = classifier
            .render_samples(collaborators.renderer.as_ref(), &documents.primary)
            .await
            .map_err(|e| stages.abort(e))?;

        let taxonomy = collaborators
            .taxonomy_source
            .fetch(ctx)
            .await
            .map_err(|e| stages.abort(e))?;

        // ========== 试卷分类 ==========
        stages.enter(Stage::Classifying);
        let classification = classifier
            .classify(&samples)
            .await
            .map_err(|e| stages.abort(e))?;
        state.tag = Some(classification.tag);

        // ========== 题目清单 ==========
        stages.enter(Stage::Listing);
        let lister = ItemLister::new(
            Arc::clone(&llm),
            LabelGrammar {
                min_match_ratio: config.listing_min_match_ratio,
            },
            config.listing_max_tokens,
        );
        let listing = lister
            .list(classification.tag, &uploaded.primary)
            .await
            .map_err(|e| stages.abort(e))?;
        state.listing_verified = listing.verified;
        if listing.collection.is_empty() {
            return Err(stages.abort(
                listing
                    .validation_issue
                    .unwrap_or_else(|| "清单为空".to_string()),
            ));
        }

        // ========== 页码标注 ==========
        stages.enter(Stage::Annotating);
        let annotator = PageAnnotator::new(
            Arc::clone(&llm),
            config.annotation_max_tokens,
            config.reannotate_missing,
        );
        let located = annotator
            .annotate(
                &listing.collection,
                &uploaded.primary_marked,
                &uploaded.companion_marked,
            )
            .await
            .map_err(|e| stages.abort(e))?;

        // ========== 逐题处理 ==========
        stages.enter(Stage::FanningOut);
        let refiner = config.refine_regions.then(|| {
            let review_llm = Arc::new(LlmService::new(
                Arc::clone(&collaborators.review_completion),
                Arc::clone(ledger),
                retry,
            ));
            RegionRefiner::new(
                review_llm,
                config.refinement_max_iterations,
                config.review_max_tokens,
            )
        });
        let flow = Arc::new(ItemFlow::new(
            MarkupService::new(Arc::clone(&llm), config.markup_max_tokens),
            LabellingService::new(Arc::clone(&llm), config.labelling_max_tokens),
            refiner,
            Arc::clone(&collaborators.renderer),
            Arc::new(taxonomy),
            ItemDocuments {
                primary_path: documents.primary.clone(),
                companion_path: documents.companion.clone(),
                primary: uploaded.primary,
                companion: uploaded.companion,
            },
        ));
        state.items = fan_out(flow, located, exam_id, config.max_concurrent_items).await;

        // ========== 结果汇总 ==========
        stages.enter(Stage::Assembling);
        let ok = state.items.iter().filter(|r| r.is_success()).count();
        info!(
            "[试卷 {}] ✅ 逐题处理完成: 成功 {}/{}{}",
            exam_id,
            ok,
            state.items.len(),
            if state.listing_verified {
                ""
            } else {
                " (清单未通过校验)"
            }
        );

        stages.enter(Stage::Done);
        Ok(())
    }

    /// 上传文档；成功的句柄立即记入 `uploads`，保证中途失败也能清理
    ///
    /// 没有提供带页码标记的副本时，先在 `<output_dir>/<exam_id>/marked/` 下生成，
    /// 页码标注阶段只使用带标记的副本。
    async fn upload_documents(
        &self,
        exam_id: &str,
        documents: &DocumentPair,
        uploads: &mut Vec<FileRef>,
    ) -> AppResult<UploadedDocuments> {
        let store = &self.collaborators.file_store;
        let marked_dir = Path::new(&self.config.output_dir)
            .join(exam_id)
            .join("marked");

        let (primary_marked_path, companion_marked_path) = tokio::join!(
            self.marked_copy(
                exam_id,
                &documents.primary,
                documents.primary_marked.as_deref(),
                &marked_dir,
            ),
            self.marked_copy(
                exam_id,
                &documents.companion,
                documents.companion_marked.as_deref(),
                &marked_dir,
            ),
        );
        let primary_marked_path = primary_marked_path?;
        let companion_marked_path = companion_marked_path?;

        let (primary, companion, primary_marked, companion_marked) = tokio::join!(
            store.upload(&documents.primary),
            store.upload(&documents.companion),
            store.upload(&primary_marked_path),
            store.upload(&companion_marked_path),
        );
        for result in [&primary, &companion, &primary_marked, &companion_marked] {
            if let Ok(file) = result {
                uploads.push(file.clone());
            }
        }

        info!("[试卷 {}] 📤 已上传 {} 个文件", exam_id, uploads.len());
        Ok(UploadedDocuments {
            primary: primary?,
            companion: companion?,
            primary_marked: primary_marked?,
            companion_marked: companion_marked?,
        })
    }

    /// 已提供的带标记副本直接使用，否则现场生成
    async fn marked_copy(
        &self,
        exam_id: &str,
        document: &Path,
        provided: Option<&Path>,
        marked_dir: &Path,
    ) -> AppResult<PathBuf> {
        if let Some(path) = provided {
            return Ok(path.to_path_buf());
        }
        info!("[试卷 {}] 🔖 为 {} 加页码标记", exam_id, document.display());
        self.collaborators.marker.mark(document, marked_dir).await
    }

    /// 删除已上传的文件，失败只记录日志
    async fn cleanup(&self, exam_id: &str, uploads: &[FileRef]) {
        if !self.config.auto_cleanup_files || uploads.is_empty() {
            return;
        }
        info!("[试卷 {}] 🗑️ 清理 {} 个已上传的文件...", exam_id, uploads.len());
        for file in uploads {
            if let Err(e) = self.collaborators.file_store.delete(file).await {
                warn!("[试卷 {}] ⚠️ 文件 {} 删除失败: {}", exam_id, file, e);
            }
        }
    }
}
