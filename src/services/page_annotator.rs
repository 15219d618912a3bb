//! 页码标注能力
//!
//! 试卷、答案两个分支同时请求，两个都成功才合并；任一失败则整个阶段失败，
//! 错误信息中同时带上两个分支的结果。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use crate::clients::{ContentPart, FileRef};
use crate::error::LlmError;
use crate::models::item::{ItemCollection, ItemWithLocations};
use crate::models::outputs::PageAnnotationOutput;
use crate::services::llm_service::LlmService;
use crate::services::prompts::{self, AnnotationBranch};

/// 标注阶段失败
#[derive(Debug, thiserror::Error)]
#[error("页码标注失败 (试卷: {}, 答案: {})", describe(.primary), describe(.companion))]
pub struct AnnotationFailure {
    pub primary: Option<LlmError>,
    pub companion: Option<LlmError>,
}

fn describe(err: &Option<LlmError>) -> String {
    match err {
        Some(e) => e.to_string(),
        None => "成功".to_string(),
    }
}

type PageMap = HashMap<String, BTreeSet<u32>>;

/// 把两个分支的结果合并到题目上，缺失的题目页码为空
pub fn merge_locations(
    collection: &ItemCollection,
    primary: &PageMap,
    companion: &PageMap,
) -> Vec<ItemWithLocations> {
    let lookup = |map: &PageMap, label: &str, side: &str| match map.get(label) {
        Some(pages) => pages.clone(),
        None => {
            warn!("⚠️ 题目 {} 缺少{}页码，按空处理", label, side);
            BTreeSet::new()
        }
    };

    collection
        .items
        .iter()
        .map(|item| ItemWithLocations {
            item: item.clone(),
            primary_pages: lookup(primary, &item.label, "试卷"),
            companion_pages: lookup(companion, &item.label, "答案"),
        })
        .collect()
}

pub struct PageAnnotator {
    llm: Arc<LlmService>,
    max_tokens: u32,
    reannotate_missing: bool,
}

impl PageAnnotator {
    pub fn new(llm: Arc<LlmService>, max_tokens: u32, reannotate_missing: bool) -> Self {
        Self {
            llm,
            max_tokens,
            reannotate_missing,
        }
    }

    pub async fn annotate(
        &self,
        collection: &ItemCollection,
        primary: &FileRef,
        companion: &FileRef,
    ) -> Result<Vec<ItemWithLocations>, AnnotationFailure> {
        let labels: Vec<&str> = collection.labels().collect();

        let (primary_result, companion_result) = tokio::join!(
            self.annotate_branch(AnnotationBranch::Primary, primary, &labels),
            self.annotate_branch(AnnotationBranch::Companion, companion, &labels),
        );

        let (mut primary_map, mut companion_map) = match (primary_result, companion_result) {
            (Ok(p), Ok(c)) => (p, c),
            (p, c) => {
                return Err(AnnotationFailure {
                    primary: p.err(),
                    companion: c.err(),
                })
            }
        };

        if self.reannotate_missing {
            self.fill_missing(AnnotationBranch::Primary, primary, &labels, &mut primary_map)
                .await;
            self.fill_missing(AnnotationBranch::Companion, companion, &labels, &mut companion_map)
                .await;
        }

        info!(
            "✓ 页码标注完成: 试卷 {} / 答案 {} / 共 {} 题",
            primary_map.len(),
            companion_map.len(),
            labels.len()
        );
        Ok(merge_locations(collection, &primary_map, &companion_map))
    }

    async fn annotate_branch(
        &self,
        branch: AnnotationBranch,
        document: &FileRef,
        labels: &[&str],
    ) -> Result<PageMap, LlmError> {
        let output: PageAnnotationOutput = self
            .llm
            .request_json(
                branch.step(),
                &prompts::annotation_system(branch, labels.iter().copied()),
                vec![
                    ContentPart::File(document.clone()),
                    ContentPart::text("Annotate the page indices for every question."),
                ],
                self.max_tokens,
            )
            .await?;

        let mut map = PageMap::new();
        for annotation in output.annotations {
            map.entry(annotation.question_label.trim().to_string())
                .or_default()
                .extend(annotation.pages);
        }

        let missing = labels.iter().filter(|l| !map.contains_key(**l)).count();
        if missing > 0 {
            warn!(
                "⚠️ [{}] {} 道题缺少页码标注 (共 {} 题)",
                branch.step(),
                missing,
                labels.len()
            );
        }
        Ok(map)
    }

    /// 只针对缺失的题目再问一次，失败不影响已有结果
    async fn fill_missing(
        &self,
        branch: AnnotationBranch,
        document: &FileRef,
        labels: &[&str],
        map: &mut PageMap,
    ) {
        let missing: Vec<&str> = labels
            .iter()
            .copied()
            .filter(|l| !map.contains_key(*l))
            .collect();
        if missing.is_empty() {
            return;
        }

        info!("🔁 [{}] 补充标注 {} 道缺失题目", branch.step(), missing.len());
        match self.annotate_branch(branch, document, &missing).await {
            Ok(extra) => {
                for (label, pages) in extra {
                    if missing.contains(&label.as_str()) {
                        map.entry(label).or_default().extend(pages);
                    }
                }
            }
            Err(e) => warn!("⚠️ [{}] 补充标注失败，保持原结果: {}", branch.step(), e),
        }
    }
}
