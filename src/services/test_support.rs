//! 单元测试用的补全服务替身

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::clients::{Completion, CompletionRequest, CompletionService, FinishReason, TokenUsage};
use crate::error::LlmError;

type Reply = Result<Completion, LlmError>;
type Handler = Box<dyn Fn(&CompletionRequest) -> Reply + Send + Sync>;

/// 按步骤名排队回复；队列为空时交给 handler（没有 handler 则返回 API 错误）
pub(crate) struct ScriptedCompletion {
    queues: Mutex<HashMap<String, VecDeque<Reply>>>,
    handler: Option<Handler>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            handler: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_handler(
        handler: impl Fn(&CompletionRequest) -> Reply + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::new()
        }
    }

    pub fn script(&self, step: &str, reply: Reply) {
        self.queues
            .lock()
            .unwrap()
            .entry(step.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn requests(&self, step: &str) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.step == step)
            .cloned()
            .collect()
    }

    pub fn budgets(&self, step: &str) -> Vec<u32> {
        self.requests(step)
            .iter()
            .map(|r| r.max_output_tokens)
            .collect()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    fn model_name(&self) -> &str {
        "gpt-4o"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let queued = self
            .queues
            .lock()
            .unwrap()
            .get_mut(&request.step)
            .and_then(|q| q.pop_front());
        match (queued, &self.handler) {
            (Some(reply), _) => reply,
            (None, Some(handler)) => handler(&request),
            (None, None) => transport_error(),
        }
    }
}

pub(crate) fn reply(content: &str) -> Reply {
    Ok(Completion {
        content: Some(content.to_string()),
        usage: TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
        },
        finish_reason: FinishReason::Stop,
        model: "gpt-4o".to_string(),
    })
}

pub(crate) fn truncated() -> Reply {
    Ok(Completion {
        content: Some("{\"partial\":".to_string()),
        usage: TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
        },
        finish_reason: FinishReason::Length,
        model: "gpt-4o".to_string(),
    })
}

pub(crate) fn empty() -> Reply {
    Ok(Completion {
        content: None,
        usage: TokenUsage::default(),
        finish_reason: FinishReason::Stop,
        model: "gpt-4o".to_string(),
    })
}

pub(crate) fn transport_error() -> Reply {
    Err(LlmError::ApiCallFailed {
        model: "gpt-4o".to_string(),
        source: Box::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        )),
    })
}
