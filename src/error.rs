use thiserror::Error;

use crate::clients::FinishReason;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// LLM 服务错误
    #[error("LLM错误: {0}")]
    Llm(#[from] LlmError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 页面渲染错误
    #[error("渲染错误: {0}")]
    Render(#[from] RenderError),
    /// 返回结构校验错误
    #[error("校验错误: {0}")]
    Validation(#[from] ValidationError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// LLM 服务错误
///
/// `EmptyContent`、`Truncated`、`MalformedBody` 属于传输/格式类错误，
/// 由调用层扩大输出上限后重试；其余错误直接返回。
#[derive(Debug, Error)]
pub enum LlmError {
    /// API 调用失败
    #[error("LLM API调用失败 (模型: {model}): {source}")]
    ApiCallFailed { model: String, source: BoxError },
    /// 调用超时
    #[error("LLM API调用超时 (模型: {model}, {seconds}秒)")]
    Timeout { model: String, seconds: u64 },
    /// 返回内容为空
    #[error("LLM返回内容为空 (模型: {model}, finish_reason: {finish_reason:?})")]
    EmptyContent {
        model: String,
        finish_reason: FinishReason,
    },
    /// 输出因长度限制被截断
    #[error("LLM输出被截断 (模型: {model}, max_tokens: {max_tokens})")]
    Truncated { model: String, max_tokens: u32 },
    /// JSON 解析失败
    #[error("无法解析LLM返回的JSON (响应: {preview}): {source}")]
    MalformedBody {
        preview: String,
        source: serde_json::Error,
    },
    /// 重试次数耗尽
    #[error("步骤 {step} 重试 {attempts} 次后仍失败: {last}")]
    AttemptsExhausted {
        step: String,
        attempts: u32,
        last: Box<LlmError>,
    },
}

impl LlmError {
    /// 是否属于可通过扩大输出上限重试的传输/格式类错误
    pub fn is_escalatable(&self) -> bool {
        matches!(
            self,
            LlmError::EmptyContent { .. } | LlmError::Truncated { .. } | LlmError::MalformedBody { .. }
        )
    }
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 文件不存在
    #[error("文件不存在: {path}")]
    NotFound { path: String },
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed { path: String, source: BoxError },
    /// 写入文件失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed { path: String, source: BoxError },
    /// 上传文件失败
    #[error("上传文件失败 ({path}): {source}")]
    UploadFailed { path: String, source: BoxError },
    /// 删除远端文件失败
    #[error("删除远端文件失败 ({file_id}): {source}")]
    DeleteFailed { file_id: String, source: BoxError },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed { path: String, source: BoxError },
}

/// 页面渲染错误
#[derive(Debug, Error)]
pub enum RenderError {
    /// 页码超出范围
    #[error("页码 {page} 超出范围 (共 {total} 页)")]
    PageOutOfRange { page: u32, total: u32 },
    /// 文档没有渲染清单
    #[error("找不到文档的渲染清单: {path}")]
    ManifestMissing { path: String },
    /// 图片解码/编码失败
    #[error("图片处理失败: {0}")]
    Image(#[from] image::ImageError),
    /// 页面尺寸无效
    #[error("页面尺寸无效 (页码: {page})")]
    InvalidGeometry { page: u32 },
    /// PDF 读取 / 写入失败
    #[error("PDF处理失败 ({path}): {source}")]
    Pdf {
        path: String,
        source: lopdf::Error,
    },
    /// 后台任务失败
    #[error("渲染任务执行失败: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// 返回结构校验错误
#[derive(Debug, Error)]
pub enum ValidationError {
    /// 分类不在允许的列表中
    #[error("分类 (topic: {topic_id}, subtopic: {subtopic_id}) 不在允许的列表中")]
    UnknownSubtopic { topic_id: u32, subtopic_id: u32 },
    /// 置信度超出范围
    #[error("置信度 {0} 超出范围 [0, 1]")]
    ConfidenceOutOfRange(f64),
    /// 标签与请求不一致
    #[error("返回的题目标签 {returned} 与请求的 {expected} 不一致")]
    LabelMismatch { expected: String, returned: String },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 必填配置缺失
    #[error("配置项 {0} 不能为空")]
    Missing(String),
    /// 配置值无效
    #[error("配置项 {name} 无效: {reason}")]
    Invalid { name: String, reason: String },
}

// ========== 从常见错误类型转换 ==========

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

impl From<image::ImageError> for AppError {
    fn from(err: image::ImageError) -> Self {
        AppError::Render(RenderError::Image(err))
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建 PDF 处理错误
    pub fn pdf_failed(path: impl Into<String>, source: lopdf::Error) -> Self {
        AppError::Render(RenderError::Pdf {
            path: path.into(),
            source,
        })
    }

    /// 创建文件读取错误
    pub fn file_read_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建 TOML 解析错误
    pub fn toml_parse_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::TomlParseFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
