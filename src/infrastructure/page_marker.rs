//! 页码标记
//!
//! 在每页右上角盖上 `PAGE_INDEX_n`（从 0 开始），供页码标注阶段识别页码。
//! 原有页面内容包在 `q ... Q` 中，标记不受原内容的坐标变换影响。

use async_trait::async_trait;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{AppError, AppResult, RenderError};

/// 标记在页面中使用的 XObject 名称
const MARKER_XOBJECT: &str = "PgIdxMarker";

/// 找不到 MediaBox 时按 A4 处理
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 595.0, 842.0];

/// 页码标记能力
#[async_trait]
pub trait PageMarker: Send + Sync {
    /// 为 `document` 的每一页盖上页码标记，写入 `output_dir`，返回标记后的文件路径
    async fn mark(&self, document: &Path, output_dir: &Path) -> AppResult<PathBuf>;
}

/// 基于 lopdf 的页码标记
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfPageMarker;

#[async_trait]
impl PageMarker for LopdfPageMarker {
    async fn mark(&self, document: &Path, output_dir: &Path) -> AppResult<PathBuf> {
        let stem = document
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "document".to_string());
        let output = output_dir.join(format!("{}_marked.pdf", stem));

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| AppError::file_write_failed(output_dir.display().to_string(), e))?;

        let input = document.to_path_buf();
        let target = output.clone();
        let pages = tokio::task::spawn_blocking(move || -> AppResult<u32> {
            let mut doc = Document::load(&input)
                .map_err(|e| AppError::pdf_failed(input.display().to_string(), e))?;
            let pages = stamp_page_markers(&mut doc)
                .map_err(|e| AppError::pdf_failed(input.display().to_string(), e))?;
            doc.compress();
            doc.save(&target)
                .map_err(|e| AppError::file_write_failed(target.display().to_string(), e))?;
            Ok(pages)
        })
        .await
        .map_err(RenderError::TaskFailed)??;

        info!("🔖 已为 {} 页加上页码标记: {}", pages, output.display());
        Ok(output)
    }
}

/// 标记在页面上的位置和大小（PDF 坐标，原点左下）
#[derive(Debug, Clone, Copy, PartialEq)]
struct MarkerBox {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl MarkerBox {
    /// 右上角：宽 15%、高 3%，边距为页宽的 1%
    fn for_media_box(media_box: [f64; 4]) -> Self {
        let [llx, lly, urx, ury] = media_box;
        let (page_width, page_height) = (urx - llx, ury - lly);
        let width = page_width * 0.15;
        let height = page_height * 0.03;
        let margin = page_width * 0.01;
        Self {
            x: urx - margin - width,
            y: ury - margin - height,
            width,
            height,
        }
    }

    /// 标记自身的绘制内容：白底红字
    fn content(&self, text: &str) -> Vec<u8> {
        // Helvetica 平均字宽约为字号的 0.6 倍
        let by_width = self.width / (text.len() as f64 * 0.6);
        let size = (self.height * 0.8).min(by_width);
        let baseline = (self.height - size * 0.7) / 2.0;
        format!(
            "1 1 1 rg 0 0 {w:.2} {h:.2} re f 0.8 0 0 rg BT /F1 {size:.2} Tf 1 {baseline:.2} Td ({text}) Tj ET",
            w = self.width,
            h = self.height,
        )
        .into_bytes()
    }
}

/// 给文档每页盖上页码标记，返回页数
fn stamp_page_markers(doc: &mut Document) -> Result<u32, lopdf::Error> {
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    for (index, page_id) in pages.iter().copied().enumerate() {
        let marker = MarkerBox::for_media_box(media_box(doc, page_id));
        let text = format!("PAGE_INDEX_{}", index);

        let xobject = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(marker.width.ceil() as i64),
                    Object::Integer(marker.height.ceil() as i64),
                ],
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                },
            },
            marker.content(&text),
        );
        let xobject_id = doc.add_object(xobject);
        doc.add_xobject(page_id, MARKER_XOBJECT, xobject_id)?;

        let original = doc.get_page_content(page_id)?;
        let mut content = Vec::with_capacity(original.len() + 64);
        content.extend_from_slice(b"q\n");
        content.extend_from_slice(&original);
        content.extend_from_slice(
            format!(
                "\nQ\nq 1 0 0 1 {:.2} {:.2} cm /{} Do Q\n",
                marker.x, marker.y, MARKER_XOBJECT
            )
            .as_bytes(),
        );
        doc.change_page_content(page_id, content)?;
        debug!("第 {} 页已加标记", index);
    }

    Ok(pages.len() as u32)
}

/// 读取页面的 MediaBox，沿 Parent 向上查找继承值
fn media_box(doc: &Document, page_id: ObjectId) -> [f64; 4] {
    let mut current = Some(page_id);
    // 页面树深度有限，防止循环引用
    for _ in 0..32 {
        let Some(id) = current else { break };
        let Ok(dict) = doc.get_dictionary(id) else {
            break;
        };
        let found = dict.get(b"MediaBox").ok().and_then(|obj| parse_box(doc, obj));
        if let Some(found) = found {
            return found;
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    DEFAULT_MEDIA_BOX
}

fn parse_box(doc: &Document, obj: &Object) -> Option<[f64; 4]> {
    let obj = match obj {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    let values: Vec<f64> = obj.as_array().ok()?.iter().filter_map(number).collect();
    let [x1, y1, x2, y2] = <[f64; 4]>::try_from(values).ok()?;
    Some([x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)])
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}
