//! LLM 服务 - 业务能力层
//!
//! 只负责"发请求 → 拿到结构化结果"，不关心流程：
//! - 每次调用的用量写入账本
//! - 空响应 / 被截断 / JSON 无法解析时扩大输出上限重试
//! - 网络错误、超时直接返回

use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::clients::{CompletionRequest, CompletionService, ContentPart, FinishReason};
use crate::config::Config;
use crate::error::LlmError;
use crate::services::usage_ledger::{UsageLedger, UsageRecord};
use crate::utils::logging::truncate_text;

/// 传输 / 格式类错误的重试策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// 最大尝试次数（含第一次）
    pub max_attempts: u32,
    /// 每次重试输出上限的放大倍数
    pub growth_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            growth_factor: 1.5,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.transport_max_attempts.max(1),
            growth_factor: config.size_growth_factor,
        }
    }

    /// 下一次尝试的输出上限
    pub fn grow(&self, max_tokens: u32) -> u32 {
        let grown = (f64::from(max_tokens) * self.growth_factor).ceil();
        if grown >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            (grown as u32).max(max_tokens)
        }
    }
}

/// LLM 服务
///
/// 职责：
/// - 调用补全服务并把返回解析为各阶段的结构
/// - 记录用量
/// - 不关心题目、阶段顺序
pub struct LlmService {
    completion: Arc<dyn CompletionService>,
    ledger: Arc<UsageLedger>,
    policy: RetryPolicy,
}

impl LlmService {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        ledger: Arc<UsageLedger>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            completion,
            ledger,
            policy,
        }
    }

    /// 请求 JSON 结果并解析为 `T`
    ///
    /// # 参数
    /// - `step`: 步骤名（用于用量统计和日志）
    /// - `system`: 系统提示词
    /// - `user`: 用户消息（文本 / 图片 / 文件）
    /// - `max_tokens`: 第一次尝试的输出上限
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        step: &str,
        system: &str,
        user: Vec<ContentPart>,
        max_tokens: u32,
    ) -> Result<T, LlmError> {
        let mut budget = max_tokens;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match self.attempt_once(step, system, &user, budget).await {
                Ok(parsed) => return Ok(parsed),
                Err(e) if e.is_escalatable() => e,
                Err(e) => return Err(e),
            };

            if attempt >= self.policy.max_attempts {
                warn!("❌ [{}] 已尝试 {} 次，放弃: {}", step, attempt, error);
                return Err(LlmError::AttemptsExhausted {
                    step: step.to_string(),
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let next = self.policy.grow(budget);
            warn!(
                "⚠️ [{}] 第 {} 次尝试失败（{}），输出上限 {} → {} 后重试",
                step, attempt, error, budget, next
            );
            budget = next;
        }
    }

    async fn attempt_once<T: DeserializeOwned>(
        &self,
        step: &str,
        system: &str,
        user: &[ContentPart],
        max_tokens: u32,
    ) -> Result<T, LlmError> {
        let request = CompletionRequest {
            step: step.to_string(),
            system: system.to_string(),
            user: user.to_vec(),
            max_output_tokens: max_tokens,
            json_mode: true,
        };

        let started = Instant::now();
        let completion = self.completion.complete(request).await?;
        let elapsed = started.elapsed().as_secs_f64();

        let model = if completion.model.is_empty() {
            self.completion.model_name().to_string()
        } else {
            completion.model.clone()
        };
        self.ledger.add_step(
            step,
            &model,
            UsageRecord::new(
                1,
                completion.usage.input_tokens,
                completion.usage.output_tokens,
                elapsed,
            ),
        );

        if completion.finish_reason == FinishReason::Length {
            return Err(LlmError::Truncated {
                model,
                max_tokens,
            });
        }

        let content = match completion.content.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => c,
            _ => {
                return Err(LlmError::EmptyContent {
                    model,
                    finish_reason: completion.finish_reason,
                })
            }
        };

        debug!("[{}] 响应长度: {} 字符", step, content.len());

        serde_json::from_str(strip_code_fence(content)).map_err(|source| LlmError::MalformedBody {
            preview: truncate_text(content, 200),
            source,
        })
    }
}

/// 去掉 ```json ... ``` 包裹
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{empty, reply, transport_error, truncated, ScriptedCompletion};
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct Answer {
        ok: bool,
    }

    fn service(completion: Arc<ScriptedCompletion>) -> (LlmService, Arc<UsageLedger>) {
        let ledger = Arc::new(UsageLedger::default());
        let service = LlmService::new(completion, Arc::clone(&ledger), RetryPolicy::default());
        (service, ledger)
    }

    #[test]
    fn test_grow_rounds_up() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.grow(8000), 12000);
        assert_eq!(policy.grow(1001), 1502);
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"ok\":true}\n```"), "{\"ok\":true}");
        assert_eq!(strip_code_fence("  {\"ok\":true} "), "{\"ok\":true}");
    }

    #[tokio::test]
    async fn test_truncated_then_success_escalates_budget() {
        let completion = Arc::new(ScriptedCompletion::new());
        completion.script("markup", truncated());
        completion.script("markup", reply(r#"{"ok": true}"#));
        let (service, ledger) = service(Arc::clone(&completion));

        let answer: Answer = service
            .request_json("markup", "sys", vec![ContentPart::text("hi")], 8000)
            .await
            .unwrap();

        assert_eq!(answer, Answer { ok: true });
        assert_eq!(completion.budgets("markup"), vec![8000, 12000]);
        assert_eq!(ledger.total().requests, 2);
    }

    #[tokio::test]
    async fn test_malformed_twice_exhausts() {
        let completion = Arc::new(ScriptedCompletion::new());
        completion.script("listing", reply("not json"));
        completion.script("listing", reply(r#"{"ok": true, "extra": 1}"#));
        let (service, _) = service(Arc::clone(&completion));

        let err = service
            .request_json::<Answer>("listing", "sys", vec![], 100)
            .await
            .unwrap_err();

        match err {
            LlmError::AttemptsExhausted { step, attempts, last } => {
                assert_eq!(step, "listing");
                assert_eq!(attempts, 2);
                assert!(matches!(*last, LlmError::MalformedBody { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_content_is_escalatable() {
        let completion = Arc::new(ScriptedCompletion::new());
        completion.script("classify", empty());
        completion.script("classify", reply(r#"{"ok": false}"#));
        let (service, _) = service(Arc::clone(&completion));

        let answer: Answer = service
            .request_json("classify", "sys", vec![], 2000)
            .await
            .unwrap();
        assert!(!answer.ok);
        assert_eq!(completion.budgets("classify"), vec![2000, 3000]);
    }

    #[tokio::test]
    async fn test_transport_error_not_retried() {
        let completion = Arc::new(ScriptedCompletion::new());
        completion.script("classify", transport_error());
        completion.script("classify", reply(r#"{"ok": true}"#));
        let (service, ledger) = service(Arc::clone(&completion));

        let err = service
            .request_json::<Answer>("classify", "sys", vec![], 2000)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ApiCallFailed { .. }));
        assert_eq!(completion.budgets("classify"), vec![2000]);
        assert_eq!(ledger.total().requests, 0);
    }
}
