use async_trait::async_trait;
use exam_extract::clients::{
    Completion, CompletionRequest, CompletionService, ContentPart, FileRef, FileStore,
    FinishReason, TokenUsage,
};
use exam_extract::config::Config;
use exam_extract::error::{AppResult, LlmError};
use exam_extract::infrastructure::{PageMarker, PageRenderer, RasterPage};
use exam_extract::models::{
    ClassificationContext, DocumentPair, ItemStatus, PipelineStatus, Stage, Taxonomy,
    TaxonomyEntry, TerminationReason,
};
use exam_extract::orchestrator::{Collaborators, Pipeline};
use exam_extract::services::{PricingTable, TaxonomySource};
use exam_extract::App;
use image::{DynamicImage, RgbaImage};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

type Reply = Result<Completion, LlmError>;
type Handler = Box<dyn Fn(&CompletionRequest, &str, usize) -> Option<Reply> + Send + Sync>;

/// 按步骤返回固定回复的补全服务
///
/// `overrides` 先于默认回复执行，参数为 (请求, 题号, 该步骤该题号的第几次调用)。
struct MockCompletion {
    labels: Vec<String>,
    tag: &'static str,
    overrides: Handler,
    calls: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockCompletion {
    fn new(labels: &[&str], tag: &'static str) -> Self {
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            tag,
            overrides: Box::new(|_, _, _| None),
            calls: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with_overrides(
        mut self,
        overrides: impl Fn(&CompletionRequest, &str, usize) -> Option<Reply> + Send + Sync + 'static,
    ) -> Self {
        self.overrides = Box::new(overrides);
        self
    }

    fn requests(&self, step: &str) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.step == step)
            .cloned()
            .collect()
    }

    fn default_reply(&self, step: &str, label: &str) -> serde_json::Value {
        match step {
            "classify" => json!({"exam_type": self.tag, "reasoning": "layout", "confidence": 0.9}),
            "listing" => json!({
                "exam_type": self.tag,
                "total_questions": self.labels.len(),
                "questions": self.labels.iter().enumerate()
                    .map(|(i, l)| json!({"question_index": i + 1, "question_label": l}))
                    .collect::<Vec<_>>(),
            }),
            "annotate_primary" => json!({
                "annotations": self.labels.iter()
                    .map(|l| json!({"question_label": l, "paper_pages": [1]}))
                    .collect::<Vec<_>>(),
            }),
            "annotate_companion" => json!({
                "annotations": self.labels.iter()
                    .map(|l| json!({"question_label": l, "solution_pages": [0]}))
                    .collect::<Vec<_>>(),
            }),
            "question_markup" => json!({
                "question_label": label,
                "question_latex": format!("Q {}", label),
                "question_images": [{"page_number": 1, "bbox": [10, 10, 50, 50], "description": "graph"}],
            }),
            "answer_markup" => json!({
                "question_label": label,
                "answer_latex": format!("A {}", label),
                "marks": 2,
            }),
            "labelling" => json!({
                "question_label": label,
                "topic_id": 1,
                "subtopic_id": 11,
                "question_type": "short answer",
                "reasoning": "algebra",
            }),
            "region_review" => json!({"is_correct": true, "confidence": 0.9, "reasoning": "ok"}),
            other => panic!("unexpected step {}", other),
        }
    }
}

fn label_of(request: &CompletionRequest) -> String {
    const PREFIXES: [&str; 3] = [
        "Question label: ",
        "Transcribe the answer of question ",
        "Transcribe question ",
    ];
    for part in &request.user {
        if let ContentPart::Text(text) = part {
            for prefix in PREFIXES {
                if let Some(rest) = text.strip_prefix(prefix) {
                    let line = rest.lines().next().unwrap_or_default();
                    return line.trim_end_matches('.').to_string();
                }
            }
        }
    }
    String::new()
}

fn ok(content: impl Into<String>) -> Reply {
    Ok(Completion {
        content: Some(content.into()),
        usage: TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
        },
        finish_reason: FinishReason::Stop,
        model: "gpt-4o".to_string(),
    })
}

fn truncated() -> Reply {
    Ok(Completion {
        content: Some("{\"question_label\":".to_string()),
        usage: TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
        },
        finish_reason: FinishReason::Length,
        model: "gpt-4o".to_string(),
    })
}

fn timeout() -> Reply {
    Err(LlmError::Timeout {
        model: "gpt-4o".to_string(),
        seconds: 300,
    })
}

#[async_trait]
impl CompletionService for MockCompletion {
    fn model_name(&self) -> &str {
        "gpt-4o"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let label = label_of(&request);
        let nth = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls
                .entry(format!("{}:{}", request.step, label))
                .or_insert(0);
            *count += 1;
            *count
        };
        if let Some(reply) = (self.overrides)(&request, &label, nth) {
            return reply;
        }
        ok(self.default_reply(&request.step, &label).to_string())
    }
}

#[derive(Default)]
struct MemoryFileStore {
    uploaded: Mutex<Vec<FileRef>>,
    deleted: Mutex<Vec<FileRef>>,
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn upload(&self, path: &Path) -> AppResult<FileRef> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let file = FileRef::new(format!("file-{}", name));
        self.uploaded.lock().unwrap().push(file.clone());
        Ok(file)
    }

    async fn delete(&self, file: &FileRef) -> AppResult<()> {
        self.deleted.lock().unwrap().push(file.clone());
        Ok(())
    }
}

/// 12 页，每页 100x100 点，渲染为 200x200 像素
struct BlankPages;

#[async_trait]
impl PageRenderer for BlankPages {
    async fn page_count(&self, _document: &Path) -> AppResult<u32> {
        Ok(12)
    }

    async fn render_page(&self, _document: &Path, page: u32) -> AppResult<RasterPage> {
        RasterPage::from_image(
            page,
            DynamicImage::ImageRgba8(RgbaImage::new(200, 200)),
            100.0,
            100.0,
        )
    }
}

/// 不读文件，只记录被标记的文档
#[derive(Default)]
struct RecordingMarker {
    marked: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl PageMarker for RecordingMarker {
    async fn mark(&self, document: &Path, output_dir: &Path) -> AppResult<PathBuf> {
        self.marked.lock().unwrap().push(document.to_path_buf());
        let stem = document.file_stem().unwrap().to_string_lossy();
        Ok(output_dir.join(format!("{}_marked.pdf", stem)))
    }
}

struct FixedTaxonomy;

#[async_trait]
impl TaxonomySource for FixedTaxonomy {
    async fn fetch(&self, _ctx: ClassificationContext) -> AppResult<Taxonomy> {
        Ok(Taxonomy::new(vec![TaxonomyEntry {
            topic_id: 1,
            topic_name: "Algebra".to_string(),
            subtopic_id: 11,
            subtopic_name: "Linear equations".to_string(),
        }]))
    }
}

struct Harness {
    completion: Arc<MockCompletion>,
    store: Arc<MemoryFileStore>,
    marker: Arc<RecordingMarker>,
    pipeline: Pipeline,
}

fn harness(completion: MockCompletion, config: Config) -> Harness {
    let completion = Arc::new(completion);
    let store = Arc::new(MemoryFileStore::default());
    let marker = Arc::new(RecordingMarker::default());
    let collaborators = Collaborators {
        completion: completion.clone(),
        review_completion: completion.clone(),
        file_store: store.clone(),
        renderer: Arc::new(BlankPages),
        marker: marker.clone(),
        taxonomy_source: Arc::new(FixedTaxonomy),
    };
    Harness {
        completion,
        store,
        marker,
        pipeline: Pipeline::new(collaborators, PricingTable::default(), config),
    }
}

fn config() -> Config {
    Config {
        refine_regions: false,
        ..Config::default()
    }
}

fn documents() -> DocumentPair {
    DocumentPair::new("paper.pdf", "solution.pdf")
}

fn context() -> ClassificationContext {
    ClassificationContext {
        subject_id: 3,
        grade_id: 10,
    }
}

#[tokio::test]
async fn test_full_run_completes_every_item() {
    let h = harness(MockCompletion::new(&["1(a)", "1(b)"], "type1"), config());

    let result = h.pipeline.run("demo", &documents(), context()).await;

    assert_eq!(result.status, PipelineStatus::Completed);
    assert!(result.listing_verified);
    assert_eq!(result.items.len(), 2);
    for (i, item) in result.items.iter().enumerate() {
        assert_eq!(item.item.index, i + 1);
        assert_eq!(item.status, ItemStatus::Success);
        assert_eq!(item.mark, Some(2));
        let label = item.classification.as_ref().unwrap();
        assert_eq!((label.topic_id, label.subtopic_id), (1, 11));
        assert_eq!(item.question_regions.len(), 1);
        // 不做校正时也会截图一次
        let region = &item.question_regions[0];
        assert_eq!(region.termination, None);
        assert_eq!(region.crops.len(), 1);
    }
    assert_eq!(result.items[0].question_markup.as_deref(), Some("Q 1(a)"));

    // classify + listing + 2 annotate + 2 * (2 markup + labelling)
    let total = result.usage.total;
    assert_eq!(total.requests, 10);
    assert_eq!(total.input_tokens, 1000);
    assert_eq!(total.output_tokens, 200);
    assert!((result.usage.estimated_cost_usd - 0.0045).abs() < 1e-9);
    let steps: Vec<&str> = result.usage.steps.iter().map(|s| s.step.as_str()).collect();
    assert_eq!(&steps[..2], &["classify", "listing"]);

    // 原件和加标记的副本共四个文件，结束后全部删除
    assert_eq!(h.store.uploaded.lock().unwrap().len(), 4);
    assert_eq!(h.store.deleted.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_companion_annotation_failure_aborts() {
    let completion = MockCompletion::new(&["1", "2"], "type2").with_overrides(|req, _, _| {
        (req.step == "annotate_companion").then(timeout)
    });
    let h = harness(completion, config());

    let result = h.pipeline.run("demo", &documents(), context()).await;

    match &result.status {
        PipelineStatus::AbortedAt { stage, reason } => {
            assert_eq!(*stage, Stage::Annotating);
            assert!(reason.contains("超时"));
        }
        other => panic!("unexpected status {:?}", other),
    }
    assert!(result.items.is_empty());
    assert!(h.completion.requests("question_markup").is_empty());
    // classify + listing + annotate_primary
    assert_eq!(result.usage.total.requests, 3);
    assert_eq!(h.store.deleted.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_truncated_item_fails_alone() {
    let labels: Vec<String> = (1..=10).map(|i| i.to_string()).collect();
    let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
    // 第 4 题的题目和答案排版在两次预算下都被截断
    let completion = MockCompletion::new(&label_refs, "type2").with_overrides(|req, label, _| {
        let markup = matches!(req.step.as_str(), "question_markup" | "answer_markup");
        (markup && label == "4").then(truncated)
    });
    let h = harness(completion, config());

    let result = h.pipeline.run("demo", &documents(), context()).await;

    assert_eq!(result.status, PipelineStatus::Completed);
    assert_eq!(result.items.len(), 10);
    for item in &result.items {
        if item.item.label == "4" {
            assert_eq!(item.status, ItemStatus::Failed);
            let error = item.error.as_deref().unwrap();
            assert!(error.contains("题目排版失败"));
            assert!(error.contains("答案排版失败"));
            assert!(item.classification.is_none());
        } else {
            assert_eq!(item.status, ItemStatus::Success, "item {}", item.item.label);
        }
    }

    for step in ["question_markup", "answer_markup"] {
        let budgets: Vec<u32> = h
            .completion
            .requests(step)
            .iter()
            .filter(|r| label_of(r) == "4")
            .map(|r| r.max_output_tokens)
            .collect();
        assert_eq!(budgets, vec![8000, 12000], "{}", step);
    }
    // 排版失败的题目不做分类
    assert!(h
        .completion
        .requests("labelling")
        .iter()
        .all(|r| label_of(r) != "4"));
    assert_eq!(result.item_counts(), (9, 0, 1));
}

#[tokio::test]
async fn test_listing_is_reasked_once_then_unverified() {
    // type2 试卷却列出了小问
    let h = harness(MockCompletion::new(&["1(a)", "1(b)"], "type2"), config());

    let result = h.pipeline.run("demo", &documents(), context()).await;

    let listing = h.completion.requests("listing");
    assert_eq!(listing.len(), 2);
    assert!(!listing[0].system.contains("CRITICAL REMINDER"));
    assert!(listing[1].system.contains("CRITICAL REMINDER"));

    assert_eq!(result.status, PipelineStatus::Completed);
    assert!(!result.listing_verified);
    assert_eq!(result.items.len(), 2);
}

#[tokio::test]
async fn test_refinement_is_bounded() {
    let completion = MockCompletion::new(&["1", "2"], "type2").with_overrides(|req, _, _| {
        (req.step == "region_review").then(|| {
            ok(json!({
                "is_correct": false,
                "confidence": 0.4,
                "corrected_bbox": [12, 12, 160, 60],
                "reasoning": "keep moving",
            })
            .to_string())
        })
    });
    let h = harness(
        completion,
        Config {
            refine_regions: true,
            refinement_max_iterations: 3,
            ..Config::default()
        },
    );

    let result = h.pipeline.run("demo", &documents(), context()).await;

    assert_eq!(result.status, PipelineStatus::Completed);
    for item in &result.items {
        let region = &item.question_regions[0];
        assert_eq!(region.termination, Some(TerminationReason::Exhausted));
        assert_eq!(region.iterations, 3);
        // x2 被截断到页面宽度
        assert_eq!(region.region.rect.x2, 100.0);
        assert_eq!(region.crops.len(), 4);
    }
    assert_eq!(h.completion.requests("region_review").len(), 6);
}

#[tokio::test]
async fn test_annotation_receives_stamped_copies() {
    let h = harness(MockCompletion::new(&["1", "2"], "type2"), config());

    let result = h.pipeline.run("demo", &documents(), context()).await;
    assert!(result.is_completed());

    let marked = h.marker.marked.lock().unwrap().clone();
    assert_eq!(
        marked,
        vec![PathBuf::from("paper.pdf"), PathBuf::from("solution.pdf")]
    );

    let has_file = |req: &CompletionRequest, id: &str| {
        req.user
            .iter()
            .any(|p| matches!(p, ContentPart::File(f) if f.as_str() == id))
    };
    let primary = h.completion.requests("annotate_primary");
    assert!(has_file(&primary[0], "file-paper_marked.pdf"));
    assert!(!has_file(&primary[0], "file-paper.pdf"));
    let companion = h.completion.requests("annotate_companion");
    assert!(has_file(&companion[0], "file-solution_marked.pdf"));

    // 排版仍使用原件
    let markup = h.completion.requests("question_markup");
    assert!(has_file(&markup[0], "file-paper.pdf"));
    let answers = h.completion.requests("answer_markup");
    assert!(has_file(&answers[0], "file-solution.pdf"));
}

#[tokio::test]
async fn test_provided_marked_documents_skip_stamping() {
    let h = harness(MockCompletion::new(&["1", "2"], "type2"), config());
    let documents = DocumentPair {
        primary_marked: Some("paper_marked.pdf".into()),
        companion_marked: Some("solution_marked.pdf".into()),
        ..documents()
    };

    let result = h.pipeline.run("demo", &documents, context()).await;
    assert!(result.is_completed());

    let annotated = h.completion.requests("annotate_primary");
    assert!(annotated[0]
        .user
        .iter()
        .any(|p| matches!(p, ContentPart::File(f) if f.as_str() == "file-paper_marked.pdf")));
    let markup = h.completion.requests("question_markup");
    assert!(markup[0]
        .user
        .iter()
        .any(|p| matches!(p, ContentPart::File(f) if f.as_str() == "file-paper.pdf")));
    assert_eq!(h.store.deleted.lock().unwrap().len(), 4);
    assert!(h.marker.marked.lock().unwrap().is_empty());
}

#[tokio::test]
#[ignore] // 默认忽略，需要手动运行：cargo test -- --ignored
async fn test_run_jobs_folder() {
    exam_extract::utils::logging::init(true);

    // 加载配置（需要 LLM_API_KEY、JOBS_FOLDER、PAGES_ROOT、TAXONOMY_FILE）
    let config = Config::from_env();

    let app = App::initialize(config).await.expect("初始化失败");
    app.run().await.expect("处理任务失败");
}
