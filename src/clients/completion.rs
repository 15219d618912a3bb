//! 补全服务契约
//!
//! 编排层只依赖这里定义的最小接口：系统提示 + 混合内容（文本 / 图片 / 已上传文件）
//! + 输出上限 + 是否 JSON 模式，返回内容、用量和结束原因。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::LlmError;

/// 已上传到补全服务的文件句柄
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileRef(pub String);

impl FileRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 用户消息中的一段内容
#[derive(Debug, Clone)]
pub enum ContentPart {
    Text(String),
    /// PNG 编码的图片
    Image(Arc<Vec<u8>>),
    File(FileRef),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text(text.into())
    }
}

/// 一次补全请求
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// 调用所属步骤（日志和用量统计按它分组）
    pub step: String,
    pub system: String,
    pub user: Vec<ContentPart>,
    pub max_output_tokens: u32,
    pub json_mode: bool,
}

/// 结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    Stop,
    /// 达到输出上限被截断
    Length,
    Other,
}

/// 单次调用的 token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// 补全结果
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: Option<String>,
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
    pub model: String,
}

/// 外部多模态补全能力
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// 计费使用的模型标识
    fn model_name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError>;
}
