use serde::{Deserialize, Serialize};

/// 分类上下文（科目 + 年级）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassificationContext {
    pub subject_id: u32,
    pub grade_id: u32,
}

/// 一个可选的知识点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    pub topic_id: u32,
    pub topic_name: String,
    pub subtopic_id: u32,
    pub subtopic_name: String,
}

/// 某个上下文下允许使用的知识点列表
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Taxonomy {
    #[serde(default)]
    pub entries: Vec<TaxonomyEntry>,
}

impl Taxonomy {
    pub fn new(entries: Vec<TaxonomyEntry>) -> Self {
        Self { entries }
    }

    pub fn contains(&self, topic_id: u32, subtopic_id: u32) -> bool {
        self.entries
            .iter()
            .any(|e| e.topic_id == topic_id && e.subtopic_id == subtopic_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 以表格形式列出，供提示词使用
    pub fn to_prompt_table(&self) -> String {
        let mut lines = vec!["topic_id | topic_name | subtopic_id | subtopic_name".to_string()];
        lines.extend(self.entries.iter().map(|e| {
            format!(
                "{} | {} | {} | {}",
                e.topic_id, e.topic_name, e.subtopic_id, e.subtopic_name
            )
        }));
        lines.join("\n")
    }
}
