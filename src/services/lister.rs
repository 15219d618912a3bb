//! 题目清单能力
//!
//! 列出试卷上的全部题目，并按试卷类型校验题号格式；
//! 格式不符时用强调版提示词重问一次，仍不符则标记为未校验后继续。

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clients::{ContentPart, FileRef};
use crate::error::LlmError;
use crate::models::item::{ClassificationTag, ItemCollection};
use crate::models::outputs::ListingOutput;
use crate::services::llm_service::LlmService;
use crate::services::prompts;

static SUBPART_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\d+\([a-z]\)$").expect("Invalid sub-part label regex"));

/// 按试卷类型校验题号
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelGrammar {
    /// type1 中小问标签的最低占比
    pub min_match_ratio: f64,
}

impl Default for LabelGrammar {
    fn default() -> Self {
        Self {
            min_match_ratio: 0.2,
        }
    }
}

impl LabelGrammar {
    pub fn is_subpart_label(label: &str) -> bool {
        SUBPART_LABEL.is_match(label.trim())
    }

    /// 校验通过返回 `Ok(())`，否则返回原因
    pub fn check(&self, tag: ClassificationTag, collection: &ItemCollection) -> Result<(), String> {
        let labels: Vec<&str> = collection.labels().collect();
        if labels.is_empty() {
            return Err("清单为空".to_string());
        }

        let matched: Vec<&str> = labels
            .iter()
            .copied()
            .filter(|l| Self::is_subpart_label(l))
            .collect();
        let sample: Vec<&str> = labels.iter().copied().take(5).collect();

        match tag {
            ClassificationTag::SeparateBooklet => {
                if matched.is_empty() {
                    return Err(format!(
                        "type1 试卷应包含 10(a) 格式的题号，但一个都没有，示例: {:?}",
                        sample
                    ));
                }
                let ratio = matched.len() as f64 / labels.len() as f64;
                if ratio < self.min_match_ratio {
                    return Err(format!(
                        "type1 试卷中只有 {}/{} ({:.1}%) 的题号符合 10(a) 格式，示例: {:?}",
                        matched.len(),
                        labels.len(),
                        ratio * 100.0,
                        sample
                    ));
                }
                Ok(())
            }
            ClassificationTag::AnswerOnPaper => {
                if matched.is_empty() {
                    Ok(())
                } else {
                    Err(format!(
                        "type2 试卷不应拆分小问，但发现 {} 个: {:?}",
                        matched.len(),
                        matched.iter().take(5).collect::<Vec<_>>()
                    ))
                }
            }
        }
    }
}

/// 清单结果
#[derive(Debug, Clone, PartialEq)]
pub struct ListingOutcome {
    pub collection: ItemCollection,
    /// 是否通过题号格式校验
    pub verified: bool,
    /// 内容层面的提问次数（1 或 2，不含传输重试）
    pub content_attempts: u32,
    /// 最后一次校验失败的原因
    pub validation_issue: Option<String>,
}

pub struct ItemLister {
    llm: Arc<LlmService>,
    grammar: LabelGrammar,
    max_tokens: u32,
}

impl ItemLister {
    pub fn new(llm: Arc<LlmService>, grammar: LabelGrammar, max_tokens: u32) -> Self {
        Self {
            llm,
            grammar,
            max_tokens,
        }
    }

    /// 列出题目
    ///
    /// 最多提问两次：第一次用普通提示词，校验失败后用强调版提示词再问一次。
    pub async fn list(
        &self,
        tag: ClassificationTag,
        primary: &FileRef,
    ) -> Result<ListingOutcome, LlmError> {
        let mut last: Option<(ItemCollection, String)> = None;

        for (attempt, emphasize) in [false, true].into_iter().enumerate() {
            let content_attempts = attempt as u32 + 1;
            if emphasize {
                info!("🔁 题号格式不符，使用强调版提示词重新列出");
            }

            let output: ListingOutput = self
                .llm
                .request_json(
                    "listing",
                    &prompts::listing_system(tag, emphasize),
                    vec![
                        ContentPart::File(primary.clone()),
                        ContentPart::text("List every question in this paper."),
                    ],
                    self.max_tokens,
                )
                .await?;

            if output.exam_type != tag {
                warn!(
                    "⚠️ 清单返回的试卷类型 {} 与分类结果 {} 不一致，以分类结果为准",
                    output.exam_type, tag
                );
            }

            let labels = output.questions.into_iter().map(|q| q.question_label).collect();
            let collection =
                ItemCollection::from_listing(tag, labels, Some(output.total_questions));

            match self.grammar.check(tag, &collection) {
                Ok(()) => {
                    info!("✓ 共列出 {} 道题", collection.total);
                    return Ok(ListingOutcome {
                        collection,
                        verified: true,
                        content_attempts,
                        validation_issue: None,
                    });
                }
                Err(issue) => {
                    warn!("⚠️ 题号校验失败 (第 {} 次): {}", content_attempts, issue);
                    last = Some((collection, issue));
                }
            }
        }

        let (collection, issue) = last.unwrap_or_else(|| {
            (
                ItemCollection::from_listing(tag, Vec::new(), None),
                "清单为空".to_string(),
            )
        });
        warn!("⚠️ 重问后仍未通过校验，清单标记为未校验 ({} 道题)", collection.total);

        Ok(ListingOutcome {
            collection,
            verified: false,
            content_attempts: 2,
            validation_issue: Some(issue),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm_service::RetryPolicy;
    use crate::services::test_support::{reply, truncated, ScriptedCompletion};
    use crate::services::usage_ledger::UsageLedger;

    fn listing(tag: &str, labels: &[&str]) -> String {
        let questions: Vec<serde_json::Value> = labels
            .iter()
            .enumerate()
            .map(|(i, l)| serde_json::json!({"question_index": i + 1, "question_label": l}))
            .collect();
        serde_json::json!({
            "exam_type": tag,
            "total_questions": labels.len(),
            "questions": questions,
        })
        .to_string()
    }

    fn lister(completion: Arc<ScriptedCompletion>) -> ItemLister {
        let llm = Arc::new(LlmService::new(
            completion,
            Arc::new(UsageLedger::default()),
            RetryPolicy::default(),
        ));
        ItemLister::new(llm, LabelGrammar::default(), 4000)
    }

    fn collection(tag: ClassificationTag, labels: &[&str]) -> ItemCollection {
        ItemCollection::from_listing(tag, labels.iter().map(|s| s.to_string()).collect(), None)
    }

    #[test]
    fn test_subpart_pattern() {
        assert!(LabelGrammar::is_subpart_label("10(a)"));
        assert!(LabelGrammar::is_subpart_label("3(B)"));
        assert!(!LabelGrammar::is_subpart_label("10(c)(i)"));
        assert!(!LabelGrammar::is_subpart_label("Question 3"));
    }

    #[test]
    fn test_type1_ratio_threshold() {
        let grammar = LabelGrammar::default();
        let tag = ClassificationTag::SeparateBooklet;
        // 1/5 = 20% 恰好达标
        assert!(grammar
            .check(tag, &collection(tag, &["1(a)", "Q2", "Q3", "Q4", "Q5"]))
            .is_ok());
        // 1/6 < 20%
        assert!(grammar
            .check(tag, &collection(tag, &["1(a)", "Q2", "Q3", "Q4", "Q5", "Q6"]))
            .is_err());
        assert!(grammar.check(tag, &collection(tag, &["Question 1"])).is_err());
    }

    #[test]
    fn test_type2_rejects_any_subpart() {
        let grammar = LabelGrammar::default();
        let tag = ClassificationTag::AnswerOnPaper;
        assert!(grammar
            .check(tag, &collection(tag, &["Question 1", "Question 2"]))
            .is_ok());
        assert!(grammar
            .check(tag, &collection(tag, &["Question 1", "2(a)"]))
            .is_err());
    }

    #[test]
    fn test_empty_collection_fails() {
        let grammar = LabelGrammar::default();
        let tag = ClassificationTag::AnswerOnPaper;
        assert!(grammar.check(tag, &collection(tag, &[])).is_err());
    }

    #[tokio::test]
    async fn test_valid_first_time_single_call() {
        let completion = Arc::new(ScriptedCompletion::new());
        completion.script("listing", reply(&listing("type1", &["1(a)", "1(b)", "2(a)"])));
        let outcome = lister(completion.clone())
            .list(ClassificationTag::SeparateBooklet, &FileRef::new("file-1"))
            .await
            .unwrap();

        assert!(outcome.verified);
        assert_eq!(outcome.content_attempts, 1);
        assert_eq!(outcome.collection.total, 3);
        assert_eq!(completion.requests("listing").len(), 1);
    }

    #[tokio::test]
    async fn test_type1_grammar_fails_twice_returns_unverified() {
        let completion = Arc::new(ScriptedCompletion::new());
        let bad = listing("type1", &["Question 1", "Question 2", "Question 3"]);
        completion.script("listing", reply(&bad));
        completion.script("listing", reply(&bad));
        let outcome = lister(completion.clone())
            .list(ClassificationTag::SeparateBooklet, &FileRef::new("file-1"))
            .await
            .unwrap();

        assert!(!outcome.verified);
        assert_eq!(outcome.content_attempts, 2);
        assert_eq!(outcome.collection.total, 3);
        assert!(outcome.validation_issue.is_some());

        let requests = completion.requests("listing");
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].system.contains("CRITICAL REMINDER"));
        assert!(requests[1].system.contains("CRITICAL REMINDER"));
    }

    #[tokio::test]
    async fn test_reask_fixes_listing() {
        let completion = Arc::new(ScriptedCompletion::new());
        completion.script("listing", reply(&listing("type2", &["Question 1", "1(a)"])));
        completion.script("listing", reply(&listing("type2", &["Question 1", "Question 2"])));
        let outcome = lister(completion)
            .list(ClassificationTag::AnswerOnPaper, &FileRef::new("file-1"))
            .await
            .unwrap();

        assert!(outcome.verified);
        assert_eq!(outcome.content_attempts, 2);
    }

    #[tokio::test]
    async fn test_transport_retry_is_not_a_content_attempt() {
        let completion = Arc::new(ScriptedCompletion::new());
        completion.script("listing", truncated());
        completion.script("listing", reply(&listing("type2", &["Question 1"])));
        let outcome = lister(completion.clone())
            .list(ClassificationTag::AnswerOnPaper, &FileRef::new("file-1"))
            .await
            .unwrap();

        assert!(outcome.verified);
        assert_eq!(outcome.content_attempts, 1);
        assert_eq!(completion.budgets("listing"), vec![4000, 6000]);
    }
}
