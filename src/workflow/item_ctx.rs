//! 题目处理上下文
//!
//! 封装"我正在处理哪张卷子的第几题"这一信息

use std::fmt::Display;

/// 题目处理上下文
#[derive(Debug, Clone)]
pub struct ItemCtx {
    /// 试卷ID
    pub exam_id: String,

    /// 题目序号（从1开始）
    pub item_index: usize,

    /// 题目总数（仅用于日志显示）
    pub total: usize,

    /// 题号
    pub label: String,
}

impl ItemCtx {
    pub fn new(
        exam_id: impl Into<String>,
        item_index: usize,
        total: usize,
        label: impl Into<String>,
    ) -> Self {
        Self {
            exam_id: exam_id.into(),
            item_index,
            total,
            label: label.into(),
        }
    }
}

impl Display for ItemCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[试卷 {} | 题目 {}/{} {}]",
            self.exam_id, self.item_index, self.total, self.label
        )
    }
}
