//! 画面叠加 (Overlay)
//!
//! 区域轮廓 / 检测框 / 顶部状态栏 / 告警文字, 全部直接烧录到 RgbImage 上。
//! 状态栏颜色与文字只由 Verdict 决定。

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{info, warn};

use super::verdict::{Metric, Verdict};
use super::zone::Zone;
use crate::detection::Detection;

pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const AMBER: Rgb<u8> = Rgb([255, 170, 0]);
pub const CYAN: Rgb<u8> = Rgb([0, 255, 255]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// 顶部状态栏高度
pub const HEADER_HEIGHT: u32 = 60;
const HEADER_ALPHA: f32 = 0.6;

/// 内置字体 (DejaVu Sans Mono Bold), 未配置 font_path 时使用
static BUNDLED_FONT: &[u8] = include_bytes!("../../assets/font/DejaVuSansMono-Bold.ttf");

/// 状态栏内容
#[derive(Clone, Debug, PartialEq)]
pub struct Banner {
    pub color: Rgb<u8>,
    pub text: String,
}

/// Verdict → 状态栏 (纯函数)
pub fn banner(verdict: &Verdict) -> Banner {
    match &verdict.metric {
        Metric::Count { count } => {
            if verdict.qualifies {
                Banner {
                    color: RED,
                    text: format!("OVERCROWDED | ZONE COUNT: {count}"),
                }
            } else {
                Banner {
                    color: GREEN,
                    text: format!("NORMAL | ZONE COUNT: {count}"),
                }
            }
        }
        Metric::Violation { missing } => {
            if missing.is_empty() {
                Banner {
                    color: GREEN,
                    text: "PPE OK".to_string(),
                }
            } else {
                Banner {
                    color: RED,
                    text: format!("VIOLATION: MISSING {}", missing.join(", ")),
                }
            }
        }
        Metric::Motion { person, .. } => match (verdict.qualifies, *person) {
            (true, _) => Banner {
                color: RED,
                text: "MOTION: PERSON DETECTED".to_string(),
            },
            (false, true) => Banner {
                color: AMBER,
                text: "PERSON (STILL)".to_string(),
            },
            (false, false) => Banner {
                color: GREEN,
                text: "NO MOTION".to_string(),
            },
        },
    }
}

/// 叠加绘制器, 字体可选
pub struct Overlay {
    font: Option<FontArc>,
}

impl Default for Overlay {
    fn default() -> Self {
        Self::bundled()
    }
}

impl Overlay {
    /// 使用内置字体
    pub fn bundled() -> Self {
        match FontArc::try_from_slice(BUNDLED_FONT) {
            Ok(font) => Self { font: Some(font) },
            Err(e) => {
                warn!("⚠️ 内置字体解析失败: {}, 叠加层不显示文字", e);
                Self::without_text()
            }
        }
    }

    /// 不加载字体: 只画色块与线框
    pub fn without_text() -> Self {
        Self { font: None }
    }

    /// 从字体文件创建; 加载失败时退回内置字体
    pub fn from_font_file(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => match FontArc::try_from_vec(bytes) {
                Ok(font) => {
                    info!("✅ 叠加字体加载成功: {}", path.display());
                    Self { font: Some(font) }
                }
                Err(e) => {
                    warn!("⚠️ 字体解析失败 {}: {}, 使用内置字体", path.display(), e);
                    Self::bundled()
                }
            },
            Err(e) => {
                warn!("⚠️ 字体文件不可用 {}: {}, 使用内置字体", path.display(), e);
                Self::bundled()
            }
        }
    }

    pub fn has_text(&self) -> bool {
        self.font.is_some()
    }

    /// 区域轮廓
    pub fn draw_zone(&self, frame: &mut RgbImage, zone: &Zone) {
        let outline = zone.outline();
        for i in 0..outline.len() {
            let (x0, y0) = outline[i];
            let (x1, y1) = outline[(i + 1) % outline.len()];
            thick_line(frame, (x0 as f32, y0 as f32), (x1 as f32, y1 as f32), CYAN);
        }
    }

    /// 编辑中的点击点
    pub fn draw_clicks(&self, frame: &mut RgbImage, clicks: &[(i32, i32)]) {
        for (x, y) in clicks {
            draw_filled_circle_mut(frame, (*x, *y), 5, RED);
        }
    }

    /// 检测框 (2px)
    pub fn draw_detections(&self, frame: &mut RgbImage, detections: &[Detection], color: Rgb<u8>) {
        for det in detections {
            let b = det.bbox;
            for inset in 0..2 {
                let x = b.x1 as i32 + inset;
                let y = b.y1 as i32 + inset;
                let w = b.width() as i32 - 2 * inset;
                let h = b.height() as i32 - 2 * inset;
                if w > 0 && h > 0 {
                    draw_hollow_rect_mut(frame, Rect::at(x, y).of_size(w as u32, h as u32), color);
                }
            }
            self.text(frame, &format!("{} {:.2}", det.label, det.confidence), b.x1 as i32, b.y1 as i32 - 18, 16.0, color);
        }
    }

    /// 顶部半透明状态栏 + 文字
    pub fn draw_banner(&self, frame: &mut RgbImage, banner: &Banner) {
        let height = HEADER_HEIGHT.min(frame.height());
        let Rgb([cr, cg, cb]) = banner.color;
        for y in 0..height {
            for x in 0..frame.width() {
                let p = frame.get_pixel_mut(x, y);
                p.0 = [
                    blend(cr, p.0[0]),
                    blend(cg, p.0[1]),
                    blend(cb, p.0[2]),
                ];
            }
        }
        // 文字过长时缩小字号
        let scale = if banner.text.len() > 30 { 26.0 } else { 32.0 };
        self.text(frame, &banner.text, 20, 16, scale, WHITE);
    }

    /// 任意位置的一行文字
    pub fn draw_line(&self, frame: &mut RgbImage, text: &str, x: i32, y: i32, scale: f32, color: Rgb<u8>) {
        self.text(frame, text, x, y, scale, color);
    }

    fn text(&self, frame: &mut RgbImage, text: &str, x: i32, y: i32, scale: f32, color: Rgb<u8>) {
        if let Some(font) = &self.font {
            draw_text_mut(frame, color, x, y.max(0), PxScale::from(scale), font, text);
        }
    }
}

fn blend(overlay: u8, base: u8) -> u8 {
    (overlay as f32 * HEADER_ALPHA + base as f32 * (1.0 - HEADER_ALPHA)).round() as u8
}

fn thick_line(frame: &mut RgbImage, from: (f32, f32), to: (f32, f32), color: Rgb<u8>) {
    draw_line_segment_mut(frame, from, to, color);
    draw_line_segment_mut(frame, (from.0 + 1.0, from.1), (to.0 + 1.0, to.1), color);
    draw_line_segment_mut(frame, (from.0, from.1 + 1.0), (to.0, to.1 + 1.0), color);
}
