use crate::error::{AppError, AppResult};
use crate::models::job::ExtractionJob;
use crate::models::taxonomy::{ClassificationContext, Taxonomy, TaxonomyEntry};
use crate::services::usage_ledger::PricingTable;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 从 TOML 文件加载一个抽取任务
pub async fn load_job_file(toml_file_path: &Path) -> Result<ExtractionJob> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取TOML文件: {}", toml_file_path.display()))?;

    let mut job: ExtractionJob = toml::from_str(&content)
        .with_context(|| format!("无法解析TOML文件: {}", toml_file_path.display()))?;

    // 相对路径以任务文件所在目录为基准
    if let Some(base) = toml_file_path.parent() {
        job.primary = resolve(base, &job.primary);
        job.companion = resolve(base, &job.companion);
        job.primary_marked = job.primary_marked.as_deref().map(|p| resolve(base, p));
        job.companion_marked = job.companion_marked.as_deref().map(|p| resolve(base, p));
    }
    job.file_path = Some(toml_file_path.to_string_lossy().to_string());

    Ok(job)
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// 从文件夹中加载所有任务文件（按文件名排序）
pub async fn load_all_job_files(folder_path: &str) -> Result<Vec<ExtractionJob>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut paths = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut jobs = Vec::new();
    for path in paths {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_job_file(&path).await {
            Ok(job) => {
                tracing::info!("成功加载任务 {}", job.exam_id);
                jobs.push(job);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {:#}", path.display(), e);
            }
        }
    }

    Ok(jobs)
}

#[derive(Debug, Deserialize)]
struct TaxonomyFile {
    #[serde(default)]
    contexts: Vec<TaxonomyContext>,
}

#[derive(Debug, Deserialize)]
struct TaxonomyContext {
    subject_id: u32,
    grade_id: u32,
    #[serde(default)]
    entries: Vec<TaxonomyEntry>,
}

/// 读取分类体系文件中某个上下文的知识点
///
/// 文件中没有该上下文时返回空列表。
pub async fn load_taxonomy(path: &Path, ctx: ClassificationContext) -> AppResult<Taxonomy> {
    let content = read_text(path).await?;
    let file: TaxonomyFile = toml::from_str(&content)
        .map_err(|e| AppError::toml_parse_failed(path.display().to_string(), e))?;

    let entries = file
        .contexts
        .into_iter()
        .filter(|c| c.subject_id == ctx.subject_id && c.grade_id == ctx.grade_id)
        .flat_map(|c| c.entries)
        .collect();

    Ok(Taxonomy::new(entries))
}

/// 读取计价表
pub async fn load_pricing_table(path: &Path) -> AppResult<PricingTable> {
    let content = read_text(path).await?;
    toml::from_str(&content).map_err(|e| AppError::toml_parse_failed(path.display().to_string(), e))
}

async fn read_text(path: &Path) -> AppResult<String> {
    fs::read_to_string(path)
        .await
        .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "exam_extract_loader_{}_{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_load_job_resolves_relative_paths() {
        let dir = temp_dir("job");
        let job_path = dir.join("a.toml");
        std::fs::write(
            &job_path,
            r#"
exam_id = "demo"
primary = "paper.pdf"
companion = "/abs/solution.pdf"
subject_id = 3
grade_id = 10
"#,
        )
        .unwrap();

        let job = load_job_file(&job_path).await.unwrap();
        assert_eq!(job.primary, dir.join("paper.pdf"));
        assert_eq!(job.companion, PathBuf::from("/abs/solution.pdf"));
        assert!(job.primary_marked.is_none());
        assert_eq!(job.context().subject_id, 3);
    }

    #[tokio::test]
    async fn test_load_all_skips_broken_files() {
        let dir = temp_dir("all");
        std::fs::write(
            dir.join("1.toml"),
            "exam_id = \"x\"\nprimary = \"p.pdf\"\ncompanion = \"s.pdf\"\nsubject_id = 1\ngrade_id = 1\n",
        )
        .unwrap();
        std::fs::write(dir.join("2.toml"), "exam_id = ").unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let jobs = load_all_job_files(dir.to_str().unwrap()).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].exam_id, "x");
    }

    #[tokio::test]
    async fn test_load_taxonomy_filters_context() {
        let dir = temp_dir("taxonomy");
        let path = dir.join("taxonomy.toml");
        std::fs::write(
            &path,
            r#"
[[contexts]]
subject_id = 3
grade_id = 10

[[contexts.entries]]
topic_id = 1
topic_name = "Number"
subtopic_id = 101
subtopic_name = "Fractions"

[[contexts]]
subject_id = 4
grade_id = 10

[[contexts.entries]]
topic_id = 9
topic_name = "Mechanics"
subtopic_id = 901
subtopic_name = "Forces"
"#,
        )
        .unwrap();

        let ctx = ClassificationContext {
            subject_id: 3,
            grade_id: 10,
        };
        let taxonomy = load_taxonomy(&path, ctx).await.unwrap();
        assert_eq!(taxonomy.entries.len(), 1);
        assert!(taxonomy.contains(1, 101));
        assert!(!taxonomy.contains(9, 901));
    }
}
