use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::AppResult;
use crate::models::loaders::load_taxonomy;
use crate::models::taxonomy::{ClassificationContext, Taxonomy};

/// 分类体系来源
#[async_trait]
pub trait TaxonomySource: Send + Sync {
    async fn fetch(&self, ctx: ClassificationContext) -> AppResult<Taxonomy>;
}

/// 从本地 TOML 文件读取
pub struct TomlTaxonomySource {
    path: PathBuf,
}

impl TomlTaxonomySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TaxonomySource for TomlTaxonomySource {
    async fn fetch(&self, ctx: ClassificationContext) -> AppResult<Taxonomy> {
        let taxonomy = load_taxonomy(&self.path, ctx).await?;
        if taxonomy.is_empty() {
            warn!(
                "⚠️ 科目 {} / 年级 {} 没有可用的知识点",
                ctx.subject_id, ctx.grade_id
            );
        } else {
            info!(
                "📚 科目 {} / 年级 {}: {} 个知识点",
                ctx.subject_id,
                ctx.grade_id,
                taxonomy.entries.len()
            );
        }
        Ok(taxonomy)
    }
}
