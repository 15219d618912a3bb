//! 各步骤的提示词
//!
//! 提示词统一用英文，JSON 字段名与 `models::outputs` 中的结构一一对应。

use crate::models::item::ClassificationTag;
use crate::models::region::Region;
use crate::models::taxonomy::Taxonomy;

pub fn classify_system() -> String {
    r#"You are an exam paper classifier. You will see several pages taken from the end of an exam paper.

Decide which layout the paper uses:
- "type1": answers are written in a SEPARATE answer booklet. Questions are split into sub-parts such as 10(a), 10(b).
- "type2": answers are written ON the paper itself. Each "Question N" is one unit, sub-parts are not split.

Return JSON:
{
    "exam_type": "type1" | "type2",
    "reasoning": "...",
    "confidence": 0.0-1.0
}"#
    .to_string()
}

pub fn listing_system(tag: ClassificationTag, emphasize: bool) -> String {
    let rules = match tag {
        ClassificationTag::SeparateBooklet => {
            r#"[Type1 rules] (separate answer booklet)
- "Question 10" is a section title, not a question
- 10(a), 10(b), 10(c) are independent questions
- 10(c)(i), 10(c)(ii) belong to 10(c) and are NOT separate
- Every label must look like 10(a)"#
        }
        ClassificationTag::AnswerOnPaper => {
            r#"[Type2 rules] (answer on paper)
- Each "Question N" is one complete question
- Sub-parts (a), (b), (c) are NOT separate questions
- Include every question from Question 1 onwards"#
        }
    };

    let emphasis = match (emphasize, tag) {
        (false, _) => "",
        (true, ClassificationTag::SeparateBooklet) => {
            r#"

CRITICAL REMINDER: the previous answer did not follow the type1 rules.
You MUST split to the (a), (b), (c) level. Do NOT list "Question 10" as a single question.
Every label must contain (a), (b), (c) etc., for example "10(a)", "10(b)", "11(a)"."#
        }
        (true, ClassificationTag::AnswerOnPaper) => {
            r#"

CRITICAL REMINDER: the previous answer did not follow the type2 rules.
You MUST NOT list "10(a)", "10(b)" as separate questions.
List only "Question N" labels, for example "Question 1", "Question 2"."#
        }
    };

    format!(
        r#"You are a question lister. Scan the whole attached paper and list every question.

Exam type: {tag}

{rules}{emphasis}

Preserve labels exactly as printed. Number questions sequentially from 1. No duplicates.

Return JSON:
{{
    "exam_type": "{tag}",
    "total_questions": <count>,
    "questions": [
        {{"question_index": 1, "question_label": "..."}}
    ]
}}"#
    )
}

/// 页码标注分支
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationBranch {
    /// 试卷
    Primary,
    /// 答案
    Companion,
}

impl AnnotationBranch {
    pub fn step(&self) -> &'static str {
        match self {
            AnnotationBranch::Primary => "annotate_primary",
            AnnotationBranch::Companion => "annotate_companion",
        }
    }

    fn pages_key(&self) -> &'static str {
        match self {
            AnnotationBranch::Primary => "paper_pages",
            AnnotationBranch::Companion => "solution_pages",
        }
    }

    fn document(&self) -> &'static str {
        match self {
            AnnotationBranch::Primary => "question paper",
            AnnotationBranch::Companion => "solution / mark scheme",
        }
    }
}

pub fn annotation_system<'a>(
    branch: AnnotationBranch,
    labels: impl IntoIterator<Item = &'a str>,
) -> String {
    let labels: Vec<&str> = labels.into_iter().collect();
    let listed = labels
        .iter()
        .enumerate()
        .map(|(i, l)| format!("{}. {}", i + 1, l))
        .collect::<Vec<_>>()
        .join("\n");
    let key = branch.pages_key();

    format!(
        r#"You are analyzing a {document} PDF. Every page carries a visible PAGE_INDEX_N marker (0-based).

Questions:
{listed}

For EACH question, list ALL pages where it appears (it may span several pages).

Return JSON:
{{
    "annotations": [
        {{"question_label": "10(a)", "{key}": [5]}}
    ]
}}

- {key} is always an array
- page indices are 0-based
- return annotations for all {count} questions"#,
        document = branch.document(),
        count = labels.len(),
    )
}

fn page_list(pages: impl IntoIterator<Item = u32>) -> String {
    let pages: Vec<String> = pages.into_iter().map(|p| p.to_string()).collect();
    if pages.is_empty() {
        "unknown (search the whole document)".to_string()
    } else {
        pages.join(", ")
    }
}

pub fn question_markup_system(label: &str, pages: impl IntoIterator<Item = u32>) -> String {
    format!(
        r#"You convert one exam question into LaTeX.

Question label: {label}
Pages (0-based): {pages}

Transcribe only this question (not the neighbours). For every diagram, table or picture that
cannot be typeset, give its page and bounding box in PDF points [x1, y1, x2, y2]
(origin top-left, y grows downward).

Return JSON:
{{
    "question_label": "{label}",
    "question_latex": "...",
    "question_images": [
        {{"page_number": 0, "bbox": [x1, y1, x2, y2], "description": "..."}}
    ]
}}"#,
        pages = page_list(pages),
    )
}

pub fn answer_markup_system(label: &str, pages: impl IntoIterator<Item = u32>) -> String {
    format!(
        r#"You convert the official answer of one exam question into LaTeX.

Question label: {label}
Pages in the solution document (0-based): {pages}

Transcribe only the answer of this question. Report the total marks if printed.
Give page and bounding box in PDF points [x1, y1, x2, y2] for any figure.

Return JSON:
{{
    "question_label": "{label}",
    "answer_latex": "...",
    "answer_images": [
        {{"page_number": 0, "bbox": [x1, y1, x2, y2], "description": "..."}}
    ],
    "marks": <integer or null>
}}"#,
        pages = page_list(pages),
    )
}

pub fn labelling_system(taxonomy: &Taxonomy) -> String {
    format!(
        r#"You label exam questions with a topic and subtopic.

Choose exactly one (topic_id, subtopic_id) pair from this list. Never invent ids.

{table}

question_type must be "short answer" or "multiple choice".

Return JSON:
{{
    "question_label": "...",
    "topic_id": <int>,
    "subtopic_id": <int>,
    "question_type": "short answer" | "multiple choice",
    "difficulty": "Easy" | "Medium" | "Hard" | null,
    "mark": <integer or null>,
    "confidence": 0.0-1.0,
    "reasoning": "..."
}}"#,
        table = taxonomy.to_prompt_table(),
    )
}

pub fn labelling_user(
    label: &str,
    question_markup: &str,
    answer_markup: &str,
    answer_mark: Option<u32>,
) -> String {
    let mark = answer_mark
        .map(|m| m.to_string())
        .unwrap_or_else(|| "not given".to_string());
    format!(
        "Question label: {label}\n\n[Question]\n{question_markup}\n\n[Answer]\n{answer_markup}\n\nMarks from answer: {mark}"
    )
}

pub fn region_review_system() -> String {
    r#"You check whether a cropped image region matches what it should contain.

You get the full page image and the current crop. Coordinates are PDF points [x1, y1, x2, y2],
origin top-left, y grows downward.

If the crop contains the whole expected content with little extra, mark it correct.
Otherwise give a corrected bbox in PDF points. If you cannot tell where it is, set corrected_bbox to null.

Return JSON:
{
    "is_correct": true | false,
    "confidence": 0.0-1.0,
    "issue_description": "..." | null,
    "corrected_bbox": [x1, y1, x2, y2] | null,
    "reasoning": "..."
}"#
    .to_string()
}

pub fn region_review_user(region: &Region, width_pt: f64, height_pt: f64) -> String {
    let r = region.rect;
    format!(
        "Expected content: {}\nPage {} size: {:.1} x {:.1} pt\nCurrent bbox: [{:.1}, {:.1}, {:.1}, {:.1}]\nImage 1 is the full page, image 2 is the current crop.",
        region.description.as_deref().unwrap_or("figure"),
        region.page,
        width_pt,
        height_pt,
        r.x1,
        r.y1,
        r.x2,
        r.y2
    )
}
