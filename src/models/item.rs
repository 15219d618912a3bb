use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use tracing::warn;

/// 试卷分类
///
/// - `type1`：答案写在单独的答题册上，小问 `10(a)` 是独立题目
/// - `type2`：答案直接写在试卷上，`Question N` 是独立题目，小问不拆分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassificationTag {
    #[serde(rename = "type1")]
    SeparateBooklet,
    #[serde(rename = "type2")]
    AnswerOnPaper,
}

impl ClassificationTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationTag::SeparateBooklet => "type1",
            ClassificationTag::AnswerOnPaper => "type2",
        }
    }
}

impl std::fmt::Display for ClassificationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一道题目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// 1 起始序号
    pub index: usize,
    /// 原文中的题号，例如 `10(a)` 或 `Question 3`
    pub label: String,
}

/// 试卷的题目列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemCollection {
    pub classification_tag: ClassificationTag,
    pub total: usize,
    pub items: Vec<Item>,
}

impl ItemCollection {
    /// 由模型返回的标签列表构造
    ///
    /// 重复标签只保留第一次出现的，序号重新编排为 1..n，`total` 始终等于题目数。
    pub fn from_listing(
        classification_tag: ClassificationTag,
        labels: Vec<String>,
        reported_total: Option<usize>,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(labels.len());

        for raw in labels {
            let label = raw.trim().to_string();
            if label.is_empty() {
                continue;
            }
            if !seen.insert(label.clone()) {
                warn!("⚠️ 重复的题目标签已忽略: {}", label);
                continue;
            }
            items.push(Item {
                index: items.len() + 1,
                label,
            });
        }

        if let Some(reported) = reported_total {
            if reported != items.len() {
                warn!(
                    "⚠️ 模型报告题目总数 {} 与实际列出的 {} 不一致，以实际为准",
                    reported,
                    items.len()
                );
            }
        }

        Self {
            classification_tag,
            total: items.len(),
            items,
        }
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|i| i.label.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// 带页码定位的题目（0 起始页码）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemWithLocations {
    pub item: Item,
    pub primary_pages: BTreeSet<u32>,
    pub companion_pages: BTreeSet<u32>,
}

/// 一次运行的输入文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPair {
    /// 试卷
    pub primary: PathBuf,
    /// 答案 / 评分标准
    pub companion: PathBuf,
    /// 带页码标记的试卷（缺省时在预处理阶段生成）
    #[serde(default)]
    pub primary_marked: Option<PathBuf>,
    /// 带页码标记的答案（缺省时在预处理阶段生成）
    #[serde(default)]
    pub companion_marked: Option<PathBuf>,
}

impl DocumentPair {
    pub fn new(primary: impl Into<PathBuf>, companion: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            companion: companion.into(),
            primary_marked: None,
            companion_marked: None,
        }
    }
}
