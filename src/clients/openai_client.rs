//! OpenAI 兼容的补全客户端
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartFile,
        ChatCompletionRequestMessageContentPartImage, ChatCompletionRequestMessageContentPartText,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, FileObject, FinishReason as ApiFinishReason, ImageDetail,
        ImageUrl, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clients::completion::{
    Completion, CompletionRequest, CompletionService, ContentPart, FinishReason, TokenUsage,
};
use crate::config::Config;
use crate::error::LlmError;

/// OpenAI 兼容补全客户端
pub struct OpenAiCompletion {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: Option<f32>,
    timeout: Duration,
}

impl OpenAiCompletion {
    /// 使用配置中的默认模型创建客户端
    pub fn new(config: &Config) -> Self {
        Self::with_model(config, config.llm_model_name.clone())
    }

    /// 使用指定模型创建客户端（例如区域校验使用更强的模型）
    pub fn with_model(config: &Config, model_name: impl Into<String>) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: model_name.into(),
            temperature: config.llm_temperature,
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    fn api_error(&self, source: impl std::error::Error + Send + Sync + 'static) -> LlmError {
        LlmError::ApiCallFailed {
            model: self.model_name.clone(),
            source: Box::new(source),
        }
    }

    /// 构建用户消息内容（文本 + 图片 + 文件引用）
    fn build_user_parts(
        parts: &[ContentPart],
    ) -> Result<Vec<ChatCompletionRequestUserMessageContentPart>, serde_json::Error> {
        parts.iter().map(Self::build_part).collect()
    }

    fn build_part(
        part: &ContentPart,
    ) -> Result<ChatCompletionRequestUserMessageContentPart, serde_json::Error> {
        let built = match part {
            ContentPart::Text(text) => ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText { text: text.clone() },
            ),
            ContentPart::Image(png) => ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: format!(
                            "data:image/png;base64,{}",
                            general_purpose::STANDARD.encode(png.as_slice())
                        ),
                        detail: Some(ImageDetail::High),
                    },
                },
            ),
            // FileObject 的字段不公开，只能通过反序列化构造
            ContentPart::File(file) => ChatCompletionRequestUserMessageContentPart::File(
                ChatCompletionRequestMessageContentPartFile {
                    file: serde_json::from_value::<FileObject>(json!({
                        "file_id": file.as_str()
                    }))?,
                },
            ),
        };
        Ok(built)
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        debug!(
            "调用 LLM API，步骤: {}, 模型: {}, max_tokens: {}",
            request.step, self.model_name, request.max_output_tokens
        );
        debug!("系统消息长度: {} 字符", request.system.len());

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(request.system.as_str())
            .build()
            .map_err(|e| self.api_error(e))?;

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(
                Self::build_user_parts(&request.user).map_err(|e| self.api_error(e))?,
            ))
            .build()
            .map_err(|e| self.api_error(e))?;

        let messages = vec![
            ChatCompletionRequestMessage::System(system_msg),
            ChatCompletionRequestMessage::User(user_msg),
        ];

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model_name)
            .messages(messages)
            .max_completion_tokens(request.max_output_tokens);
        if request.json_mode {
            builder.response_format(ResponseFormat::JsonObject);
        }
        if let Some(temperature) = self.temperature {
            builder.temperature(temperature);
        }
        let api_request = builder.build().map_err(|e| self.api_error(e))?;

        // 调用 API（固定的单次超时）
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(api_request))
            .await
            .map_err(|_| LlmError::Timeout {
                model: self.model_name.clone(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| {
                warn!("LLM API 调用失败: {}", e);
                self.api_error(e)
            })?;

        debug!("LLM API 调用成功");

        let usage = response
            .usage
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u64::from(u.prompt_tokens),
                output_tokens: u64::from(u.completion_tokens),
            })
            .unwrap_or_default();

        let choice = response.choices.first();
        let content = choice
            .and_then(|c| c.message.content.clone())
            .map(|c| c.trim().to_string());
        let finish_reason = match choice.and_then(|c| c.finish_reason) {
            Some(ApiFinishReason::Stop) => FinishReason::Stop,
            Some(ApiFinishReason::Length) => FinishReason::Length,
            _ => FinishReason::Other,
        };

        Ok(Completion {
            content,
            usage,
            finish_reason,
            model: response.model,
        })
    }
}
