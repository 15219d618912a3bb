//! 页面坐标与区域
//!
//! 文档坐标以“点”为单位，原点在左上角，x 向右，y 向下。

use serde::{Deserialize, Serialize};

/// 文档坐标系中的矩形，序列化为 `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Rect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl From<[f64; 4]> for Rect {
    fn from([x1, y1, x2, y2]: [f64; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<Rect> for [f64; 4] {
    fn from(r: Rect) -> Self {
        [r.x1, r.y1, r.x2, r.y2]
    }
}

impl Rect {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 交换颠倒的坐标，保证 x1 <= x2 且 y1 <= y2
    pub fn normalized(self) -> Self {
        Self {
            x1: self.x1.min(self.x2),
            y1: self.y1.min(self.y2),
            x2: self.x1.max(self.x2),
            y2: self.y1.max(self.y2),
        }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }
}

/// 一个视觉区域（题目或答案在某页上的位置）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// 0 起始页码
    pub page: u32,
    pub rect: Rect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// 像素坐标矩形（右、下边界不包含）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl PixelRect {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

/// 页面尺寸：文档点与渲染像素
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width_pt: f64,
    pub height_pt: f64,
    pub width_px: u32,
    pub height_px: u32,
}

impl PageGeometry {
    pub fn scale_x(&self) -> f64 {
        f64::from(self.width_px) / self.width_pt
    }

    pub fn scale_y(&self) -> f64 {
        f64::from(self.height_px) / self.height_pt
    }

    pub fn is_valid(&self) -> bool {
        self.width_pt > 0.0 && self.height_pt > 0.0 && self.width_px > 0 && self.height_px > 0
    }

    /// 文档坐标转像素坐标
    ///
    /// 先规范化颠倒的坐标，再按两个方向各自的缩放比例换算并截断到栅格范围内，
    /// 结果至少为 1×1 像素。
    pub fn to_pixels(&self, rect: &Rect) -> PixelRect {
        let r = rect.normalized();
        let (sx, sy) = (self.scale_x(), self.scale_y());
        let (w, h) = (self.width_px, self.height_px);

        let x1 = clamp_floor(r.x1 * sx, w.saturating_sub(1));
        let y1 = clamp_floor(r.y1 * sy, h.saturating_sub(1));
        let x2 = clamp_floor(r.x2 * sx, w).max(x1 + 1);
        let y2 = clamp_floor(r.y2 * sy, h).max(y1 + 1);

        PixelRect { x1, y1, x2, y2 }
    }

    /// 像素坐标换算回文档坐标
    pub fn to_points(&self, px: &PixelRect) -> Rect {
        let (sx, sy) = (self.scale_x(), self.scale_y());
        Rect {
            x1: f64::from(px.x1) / sx,
            y1: f64::from(px.y1) / sy,
            x2: f64::from(px.x2) / sx,
            y2: f64::from(px.y2) / sy,
        }
    }
}

fn clamp_floor(value: f64, max: u32) -> u32 {
    if !value.is_finite() || value <= 0.0 {
        0
    } else {
        (value.floor() as u64).min(u64::from(max)) as u32
    }
}
