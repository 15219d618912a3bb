//! 流程层（Workflow Layer）
//!
//! 定义单道题目的处理流程，不关心批量和并发。

pub mod item_ctx;
pub mod item_flow;

pub use item_ctx::ItemCtx;
pub use item_flow::{ItemDocuments, ItemFlow};
