//! # Exam Extract
//!
//! 从试卷 + 答案两份文档中抽取题目、题图区域和知识点标注的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 外部能力（Clients / Infrastructure）
//! - `clients/` - 补全服务（async-openai）和文件上传删除（reqwest）
//! - `infrastructure/` - 页面渲染契约和裁剪，`PrerenderedPages` 读取预渲染页面
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `LlmService` - 结构化调用、扩大输出上限重试、记录用量
//! - `Classifier` / `ItemLister` / `PageAnnotator` - 试卷级能力
//! - `MarkupService` / `LabellingService` / `RegionRefiner` - 题目级能力
//! - `UsageLedger` - 用量账本
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一道题"的完整处理流程
//! - `ItemCtx` - 上下文封装（exam_id + 题目序号 + 题号）
//! - `ItemFlow` - 排版 → 标注 ∥ 区域修正
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/pipeline` - 单次抽取流水线，按阶段推进
//! - `orchestrator/fan_out` - 逐题并发
//! - `orchestrator/app` - 批量任务处理器
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{DocumentPair, ExtractionJob, PipelineResult};
pub use orchestrator::{App, Collaborators, Pipeline};
pub use workflow::{ItemCtx, ItemFlow};
