//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和阶段调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `app` - 批量任务处理器
//! - 创建外部能力（补全服务、文件服务、渲染器、分类体系来源）
//! - 批量加载任务（Vec<ExtractionJob>）
//! - 分批运行，写出结果，输出全局统计
//!
//! ### `pipeline` - 单次抽取流水线
//! - 按阶段推进：预处理 → 分类 → 清单 → 标注 → 逐题 → 汇总
//! - 阶段级错误中止运行，题目级错误只影响该题
//! - 持有本次运行的用量账本，结束后清理上传文件
//!
//! ### `fan_out` - 逐题并发
//! - 每道题一个任务，可选信号量限流
//!
//! ## 层次关系
//!
//! ```text
//! app (处理 Vec<ExtractionJob>)
//!     ↓
//! pipeline (处理一对文档)
//!     ↓
//! fan_out → workflow::ItemFlow (处理单道题)
//!     ↓
//! services (能力层：classify / list / annotate / markup / label / refine)
//!     ↓
//! clients + infrastructure (补全服务、文件服务、页面渲染)
//! ```

pub mod app;
pub mod fan_out;
pub mod pipeline;

pub use app::App;
pub use fan_out::fan_out;
pub use pipeline::{Collaborators, Pipeline};
