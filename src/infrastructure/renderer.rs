//! 页面栅格化
//!
//! 流水线只依赖 `PageRenderer` 的坐标约定：每页给出文档尺寸（点）和渲染尺寸（像素），
//! 两者之比即为横纵各自的缩放比例。
//!
//! `PrerenderedPages` 读取预先渲染好的页面图片：
//!
//! ```text
//! <pages_root>/<文档文件名去掉扩展名>/manifest.toml
//! <pages_root>/<文档文件名去掉扩展名>/page_000.png
//! ```
//!
//! ```toml
//! [[pages]]
//! file = "page_000.png"
//! width_pt = 595.0
//! height_pt = 842.0
//! ```

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, ImageFormat};
use serde::Deserialize;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{AppError, AppResult, RenderError};
use crate::models::region::{PageGeometry, PixelRect};

/// 一页的完整栅格图
#[derive(Debug, Clone)]
pub struct RasterPage {
    /// 0 起始页码
    pub page: u32,
    pub image: Arc<DynamicImage>,
    /// PNG 编码（发给模型用）
    pub png: Arc<Vec<u8>>,
    pub geometry: PageGeometry,
}

impl RasterPage {
    /// 由内存中的图片构造，并编码为 PNG
    pub fn from_image(
        page: u32,
        image: DynamicImage,
        width_pt: f64,
        height_pt: f64,
    ) -> AppResult<Self> {
        let (width_px, height_px) = image.dimensions();
        let geometry = PageGeometry {
            width_pt,
            height_pt,
            width_px,
            height_px,
        };
        if !geometry.is_valid() {
            return Err(RenderError::InvalidGeometry { page }.into());
        }
        let png = encode_png(&image)?;
        Ok(Self {
            page,
            image: Arc::new(image),
            png: Arc::new(png),
            geometry,
        })
    }
}

/// 从整页中裁出的区域图
#[derive(Debug, Clone)]
pub struct CropImage {
    pub png: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

/// 页面渲染能力
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn page_count(&self, document: &Path) -> AppResult<u32>;

    async fn render_page(&self, document: &Path, page: u32) -> AppResult<RasterPage>;
}

/// 按像素矩形裁剪并编码为 PNG（在阻塞线程池中执行）
pub async fn crop(page: &RasterPage, rect: PixelRect) -> AppResult<CropImage> {
    let image = Arc::clone(&page.image);
    tokio::task::spawn_blocking(move || {
        let cropped = image.crop_imm(rect.x1, rect.y1, rect.width(), rect.height());
        let png = encode_png(&cropped)?;
        Ok(CropImage {
            png: Arc::new(png),
            width: cropped.width(),
            height: cropped.height(),
        })
    })
    .await
    .map_err(RenderError::TaskFailed)?
}

fn encode_png(image: &DynamicImage) -> AppResult<Vec<u8>> {
    let mut buffer = Vec::new();
    image.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
    Ok(buffer)
}

#[derive(Debug, Deserialize)]
struct Manifest {
    pages: Vec<ManifestPage>,
}

#[derive(Debug, Deserialize)]
struct ManifestPage {
    file: String,
    width_pt: f64,
    height_pt: f64,
}

/// 读取预渲染页面的渲染器
pub struct PrerenderedPages {
    root: PathBuf,
}

impl PrerenderedPages {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn document_dir(&self, document: &Path) -> PathBuf {
        let stem = document
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.root.join(stem)
    }

    async fn load_manifest(&self, document: &Path) -> AppResult<(PathBuf, Manifest)> {
        let dir = self.document_dir(document);
        let manifest_path = dir.join("manifest.toml");
        if !manifest_path.exists() {
            return Err(RenderError::ManifestMissing {
                path: manifest_path.display().to_string(),
            }
            .into());
        }

        let content = tokio::fs::read_to_string(&manifest_path)
            .await
            .map_err(|e| AppError::file_read_failed(manifest_path.display().to_string(), e))?;
        let manifest: Manifest = toml::from_str(&content)
            .map_err(|e| AppError::toml_parse_failed(manifest_path.display().to_string(), e))?;
        Ok((dir, manifest))
    }
}

#[async_trait]
impl PageRenderer for PrerenderedPages {
    async fn page_count(&self, document: &Path) -> AppResult<u32> {
        let (_, manifest) = self.load_manifest(document).await?;
        Ok(manifest.pages.len() as u32)
    }

    async fn render_page(&self, document: &Path, page: u32) -> AppResult<RasterPage> {
        let (dir, manifest) = self.load_manifest(document).await?;
        let total = manifest.pages.len() as u32;
        let entry = manifest
            .pages
            .get(page as usize)
            .ok_or(RenderError::PageOutOfRange { page, total })?;

        let image_path = dir.join(&entry.file);
        debug!("加载页面图片: {}", image_path.display());

        let bytes = tokio::fs::read(&image_path)
            .await
            .map_err(|e| AppError::file_read_failed(image_path.display().to_string(), e))?;
        let (width_pt, height_pt) = (entry.width_pt, entry.height_pt);

        let decoded = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&bytes).map(|img| (img, bytes))
        })
        .await
        .map_err(RenderError::TaskFailed)??;
        let (image, png) = decoded;

        let (width_px, height_px) = image.dimensions();
        let geometry = PageGeometry {
            width_pt,
            height_pt,
            width_px,
            height_px,
        };
        if !geometry.is_valid() {
            return Err(RenderError::InvalidGeometry { page }.into());
        }

        Ok(RasterPage {
            page,
            image: Arc::new(image),
            png: Arc::new(png),
            geometry,
        })
    }
}
