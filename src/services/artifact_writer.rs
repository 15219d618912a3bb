//! 结果写入服务 - 业务能力层
//!
//! 只负责把一次运行的结果落盘，不关心流程：
//! - `result.json`：完整结果
//! - `crops/`：每个区域最终的截图，修正过的区域另存每次迭代的截图
//! - `warn.txt`：未完全成功的题目

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::result::{ItemResult, ItemStatus, PipelineResult, PipelineStatus, RegionResult};

/// 结果写入服务
pub struct ArtifactWriter {
    output_dir: PathBuf,
}

/// 截图文件名前缀：题目序号 + 题号，`10(a)` 和 `10a` 不会互相覆盖
fn crop_stem(item: &ItemResult) -> String {
    format!("{:02}_{}", item.item.index, safe_label(&item.item.label))
}

/// 题号转为可用作文件名的形式：`10(a)` → `10_a`
fn safe_label(label: &str) -> String {
    let mapped: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    mapped
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

impl ArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn exam_dir(&self, exam_id: &str) -> PathBuf {
        self.output_dir.join(exam_id)
    }

    /// 写入一次运行的全部产物，返回输出目录
    pub async fn write(&self, exam_id: &str, result: &PipelineResult) -> AppResult<PathBuf> {
        let dir = self.exam_dir(exam_id);
        let crops_dir = dir.join("crops");
        fs::create_dir_all(&crops_dir)
            .await
            .map_err(|e| AppError::file_write_failed(crops_dir.display().to_string(), e))?;

        let json = serde_json::to_string_pretty(result)
            .map_err(|e| AppError::Other(format!("结果序列化失败: {}", e)))?;
        write_file(&dir.join("result.json"), json.as_bytes()).await?;

        let mut crop_count = 0;
        for item in &result.items {
            let stem = crop_stem(item);
            crop_count += write_crops(&crops_dir, &stem, "q", &item.question_regions).await?;
            crop_count += write_crops(&crops_dir, &stem, "a", &item.answer_regions).await?;
        }

        let warnings = warn_lines(exam_id, result);
        if !warnings.is_empty() {
            write_file(&dir.join("warn.txt"), warnings.join("\n").as_bytes()).await?;
        }

        debug!(
            "已写入 {}: {} 张截图, {} 条警告",
            dir.display(),
            crop_count,
            warnings.len()
        );
        Ok(dir)
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> AppResult<()> {
    fs::write(path, bytes)
        .await
        .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))
}

async fn write_crops(
    dir: &Path,
    stem: &str,
    side: &str,
    regions: &[RegionResult],
) -> AppResult<usize> {
    let mut written = 0;
    for (k, region) in regions.iter().enumerate() {
        let name = format!("{}_{}{}", stem, side, k + 1);
        let Some(last) = region.crops.last() else {
            continue;
        };
        write_file(&dir.join(format!("{}.png", name)), last).await?;
        written += 1;

        // 第 0 张是修正前的截图
        if region.crops.len() > 1 {
            for (i, png) in region.crops.iter().enumerate() {
                write_file(&dir.join(format!("{}_iter{}.png", name, i)), png).await?;
                written += 1;
            }
        }
    }
    Ok(written)
}

fn warn_lines(exam_id: &str, result: &PipelineResult) -> Vec<String> {
    let mut lines = Vec::new();
    if let PipelineStatus::AbortedAt { stage, reason } = &result.status {
        lines.push(format!("试卷 {} | 在 {} 阶段中止 | {}", exam_id, stage, reason));
    }
    if !result.listing_verified && !result.items.is_empty() {
        lines.push(format!("试卷 {} | 题目清单未通过题号校验", exam_id));
    }
    lines.extend(
        result
            .items
            .iter()
            .filter(|r| r.status != ItemStatus::Success)
            .map(|r| item_line(exam_id, r)),
    );
    lines
}

fn item_line(exam_id: &str, r: &ItemResult) -> String {
    format!(
        "试卷 {} | 题目 {} ({}) | {:?} | {}",
        exam_id,
        r.item.index,
        r.item.label,
        r.status,
        r.error.as_deref().unwrap_or("-")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::item::{ClassificationTag, Item};
    use crate::models::region::{Rect, Region};
    use crate::models::result::Stage;
    use crate::services::usage_ledger::UsageSummary;
    use std::sync::Arc;

    #[test]
    fn test_safe_label() {
        assert_eq!(safe_label("10(a)"), "10_a");
        assert_eq!(safe_label("Question 12"), "Question_12");
    }

    fn item(index: usize, label: &str) -> Item {
        Item {
            index,
            label: label.to_string(),
        }
    }

    fn succeeded(index: usize, label: &str) -> ItemResult {
        let mut result = ItemResult::failed(item(index, label), "");
        result.status = ItemStatus::Success;
        result.error = None;
        result
    }

    fn region_with_crops(crops: &[&[u8]]) -> RegionResult {
        let mut region = RegionResult::unrefined(Region {
            page: 0,
            rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            description: None,
        });
        region.crops = crops.iter().map(|c| Arc::new(c.to_vec())).collect();
        region
    }

    fn completed(items: Vec<ItemResult>) -> PipelineResult {
        PipelineResult {
            status: PipelineStatus::Completed,
            classification_tag: Some(ClassificationTag::SeparateBooklet),
            listing_verified: true,
            items,
            usage: UsageSummary::default(),
            processing_time_seconds: 1.0,
        }
    }

    fn temp_root(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("exam_extract_{}_{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_write_outputs() {
        let root = temp_root("artifacts");
        let writer = ArtifactWriter::new(&root);

        // 未修正的区域只有一张截图
        let mut ok = succeeded(1, "1(a)");
        ok.question_regions.push(region_with_crops(&[&[1, 2, 3]]));
        let result = completed(vec![
            ok,
            ItemResult::failed(item(2, "1(b)"), "markup exhausted"),
        ]);

        let dir = writer.write("demo", &result).await.unwrap();
        assert!(dir.join("result.json").exists());
        let crops = dir.join("crops");
        assert_eq!(std::fs::read(crops.join("01_1_a_q1.png")).unwrap(), vec![1, 2, 3]);
        assert!(!crops.join("01_1_a_q1_iter0.png").exists());
        let warn = std::fs::read_to_string(dir.join("warn.txt")).unwrap();
        assert!(warn.contains("1(b)"));
        assert!(!warn.contains("1(a)"));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_refined_region_keeps_every_iteration() {
        let root = temp_root("iterations");
        let writer = ArtifactWriter::new(&root);

        let mut refined = succeeded(1, "3");
        refined
            .answer_regions
            .push(region_with_crops(&[&[0], &[1], &[2]]));

        let dir = writer.write("demo", &completed(vec![refined])).await.unwrap();
        let crops = dir.join("crops");
        assert_eq!(std::fs::read(crops.join("01_3_a1.png")).unwrap(), vec![2]);
        for i in 0..3u8 {
            let path = crops.join(format!("01_3_a1_iter{}.png", i));
            assert_eq!(std::fs::read(path).unwrap(), vec![i]);
        }
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_similar_labels_do_not_collide() {
        let root = temp_root("collide");
        let writer = ArtifactWriter::new(&root);

        let mut first = succeeded(9, "10(a)");
        first.question_regions.push(region_with_crops(&[&[9]]));
        let mut second = succeeded(10, "10a");
        second.question_regions.push(region_with_crops(&[&[10]]));
        assert_ne!(crop_stem(&first), crop_stem(&second));

        let dir = writer
            .write("demo", &completed(vec![first, second]))
            .await
            .unwrap();
        let crops = dir.join("crops");
        assert_eq!(std::fs::read(crops.join("09_10_a_q1.png")).unwrap(), vec![9]);
        assert_eq!(std::fs::read(crops.join("10_10a_q1.png")).unwrap(), vec![10]);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_aborted_run_is_warned() {
        let result = PipelineResult {
            status: PipelineStatus::AbortedAt {
                stage: Stage::Listing,
                reason: "exhausted".into(),
            },
            classification_tag: None,
            listing_verified: false,
            items: Vec::new(),
            usage: UsageSummary::default(),
            processing_time_seconds: 0.0,
        };
        let lines = warn_lines("x", &result);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("题目清单"));
    }
}
