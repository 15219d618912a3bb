//! 批量任务处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责批量任务的处理和资源管理。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：创建补全服务、文件服务、渲染器、页码标记和分类体系来源
//! 2. **批量加载**：扫描并加载所有待处理的任务（`Vec<ExtractionJob>`）
//! 3. **分批处理**：每批最多 `max_concurrent_jobs` 个任务，完成后再开始下一批
//! 4. **结果落盘**：每个任务写入 result.json、截图和 warn.txt
//! 5. **全局统计**：汇总所有任务的处理结果

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::clients::{CompletionService, OpenAiCompletion, OpenAiFileStore};
use crate::config::Config;
use crate::infrastructure::{LopdfPageMarker, PrerenderedPages};
use crate::models::job::ExtractionJob;
use crate::models::loaders::{load_all_job_files, load_pricing_table};
use crate::models::result::PipelineResult;
use crate::orchestrator::pipeline::{Collaborators, Pipeline};
use crate::services::{ArtifactWriter, PricingTable, TomlTaxonomySource};
use crate::utils::logging::{
    log_batch_complete, log_batch_start, log_jobs_loaded, log_startup, print_final_stats,
};

/// 应用主结构
pub struct App {
    config: Config,
    pipeline: Arc<Pipeline>,
    writer: Arc<ArtifactWriter>,
}

/// 处理统计
#[derive(Debug, Default)]
struct ProcessingStats {
    completed: usize,
    aborted: usize,
    items: (usize, usize, usize),
}

impl ProcessingStats {
    fn record(&mut self, result: &PipelineResult) {
        if result.is_completed() {
            self.completed += 1;
        } else {
            self.aborted += 1;
        }
        let (ok, partial, failed) = result.item_counts();
        self.items.0 += ok;
        self.items.1 += partial;
        self.items.2 += failed;
    }
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        config.validate().context("配置校验失败")?;
        log_startup(&config.llm_model_name, config.max_concurrent_jobs);

        let pricing = match &config.pricing_file {
            Some(path) => load_pricing_table(Path::new(path))
                .await
                .with_context(|| format!("无法加载计价表: {}", path))?,
            None => PricingTable::default(),
        };

        let completion: Arc<dyn CompletionService> = Arc::new(OpenAiCompletion::new(&config));
        let review_model = config.effective_review_model();
        let review_completion: Arc<dyn CompletionService> =
            if review_model == config.llm_model_name {
                Arc::clone(&completion)
            } else {
                info!("🔍 区域校验使用模型: {}", review_model);
                Arc::new(OpenAiCompletion::with_model(&config, review_model))
            };

        let collaborators = Collaborators {
            completion,
            review_completion,
            file_store: Arc::new(OpenAiFileStore::new(&config)),
            renderer: Arc::new(PrerenderedPages::new(&config.pages_root)),
            marker: Arc::new(LopdfPageMarker),
            taxonomy_source: Arc::new(TomlTaxonomySource::new(&config.taxonomy_file)),
        };

        Ok(Self {
            pipeline: Arc::new(Pipeline::new(collaborators, pricing, config.clone())),
            writer: Arc::new(ArtifactWriter::new(&config.output_dir)),
            config,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<()> {
        info!("📁 正在扫描待处理的任务...");
        let jobs = load_all_job_files(&self.config.jobs_folder).await?;

        if jobs.is_empty() {
            warn!("⚠️ 没有找到待处理的TOML文件，程序结束");
            return Ok(());
        }

        let batch_size = self.config.max_concurrent_jobs.max(1);
        log_jobs_loaded(jobs.len(), batch_size);

        let stats = self.process_all_jobs(jobs, batch_size).await;

        print_final_stats(
            stats.completed,
            stats.aborted,
            stats.items,
            &self.config.output_dir,
        );
        Ok(())
    }

    async fn process_all_jobs(&self, jobs: Vec<ExtractionJob>, batch_size: usize) -> ProcessingStats {
        let total = jobs.len();
        let total_batches = total.div_ceil(batch_size);
        let mut stats = ProcessingStats::default();

        for (batch_idx, batch) in jobs.chunks(batch_size).enumerate() {
            let batch_start = batch_idx * batch_size;
            log_batch_start(
                batch_idx + 1,
                total_batches,
                batch_start + 1,
                batch_start + batch.len(),
                total,
            );

            let mut handles = Vec::with_capacity(batch.len());
            for job in batch.iter().cloned() {
                let pipeline = Arc::clone(&self.pipeline);
                let writer = Arc::clone(&self.writer);
                let exam_id = job.exam_id.clone();
                let handle = tokio::spawn(async move {
                    let result = pipeline
                        .run(&job.exam_id, &job.documents(), job.context())
                        .await;
                    match writer.write(&job.exam_id, &result).await {
                        Ok(dir) => info!("[试卷 {}] 💾 结果已写入 {}", job.exam_id, dir.display()),
                        Err(e) => error!("[试卷 {}] ❌ 结果写入失败: {}", job.exam_id, e),
                    }
                    result
                });
                handles.push((exam_id, handle));
            }

            let mut completed = 0;
            for (exam_id, handle) in handles {
                match handle.await {
                    Ok(result) => {
                        if result.is_completed() {
                            completed += 1;
                        }
                        stats.record(&result);
                    }
                    Err(e) => {
                        error!("[试卷 {}] 任务执行失败: {}", exam_id, e);
                        stats.aborted += 1;
                    }
                }
            }

            log_batch_complete(batch_idx + 1, completed, batch.len());
        }

        stats
    }
}
