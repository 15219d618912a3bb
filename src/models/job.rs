use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::item::DocumentPair;
use crate::models::taxonomy::ClassificationContext;

/// 一个抽取任务（对应 jobs 目录下的一个 TOML 文件）
///
/// ```toml
/// exam_id = "0580_s23_42"
/// primary = "papers/0580_s23_qp_42.pdf"
/// companion = "papers/0580_s23_ms_42.pdf"
/// subject_id = 3
/// grade_id = 10
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub exam_id: String,
    pub primary: PathBuf,
    pub companion: PathBuf,
    #[serde(default)]
    pub primary_marked: Option<PathBuf>,
    #[serde(default)]
    pub companion_marked: Option<PathBuf>,
    pub subject_id: u32,
    pub grade_id: u32,
    /// 任务文件路径（加载时填充）
    #[serde(skip)]
    pub file_path: Option<String>,
}

impl ExtractionJob {
    pub fn documents(&self) -> DocumentPair {
        DocumentPair {
            primary: self.primary.clone(),
            companion: self.companion.clone(),
            primary_marked: self.primary_marked.clone(),
            companion_marked: self.companion_marked.clone(),
        }
    }

    pub fn context(&self) -> ClassificationContext {
        ClassificationContext {
            subject_id: self.subject_id,
            grade_id: self.grade_id,
        }
    }
}
