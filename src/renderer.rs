//! HUD 渲染 (HUD Renderer)
//!
//! 在帧的副本上绘制检测框、标签和统计面板, 输入帧保持不变.

pub mod palette;

use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::detection::{BBox, Detection, DetectionSet, PipelineStats};

/// 未配置字体时依次尝试的系统字体
const FALLBACK_FONTS: &[&str] = &[
    "assets/font/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// HUD 样式
#[derive(Clone, Debug)]
pub struct HudStyle {
    pub box_thickness: u32,
    pub label_scale: f32,
    pub panel_scale: f32,
    pub panel_width: u32,
    pub panel_alpha: f32,
    pub panel_bg: Rgb<u8>,
    pub header_color: Rgb<u8>,
    pub accent_color: Rgb<u8>,
    pub muted_color: Rgb<u8>,
}

impl Default for HudStyle {
    fn default() -> Self {
        Self {
            box_thickness: 2,
            label_scale: 16.0,
            panel_scale: 15.0,
            panel_width: 220,
            panel_alpha: 0.65,
            panel_bg: Rgb([0, 0, 0]),
            header_color: Rgb([180, 255, 0]),
            accent_color: Rgb([140, 255, 0]),
            muted_color: Rgb([150, 150, 150]),
        }
    }
}

/// 面板一行
#[derive(Clone, Debug, PartialEq)]
pub struct PanelLine {
    pub text: String,
    pub kind: LineKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineKind {
    Header,
    Accent,
    Muted,
}

impl PanelLine {
    fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }
}

/// HUD 渲染器, 无状态
#[derive(Clone, Default)]
pub struct HudRenderer {
    font: Option<FontArc>,
    style: HudStyle,
}

impl HudRenderer {
    pub fn new(font: Option<FontArc>) -> Self {
        Self {
            font,
            style: HudStyle::default(),
        }
    }

    /// 按配置加载字体; 找不到字体时只画框不写字
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(load_font(config.font_path.as_deref()))
    }

    pub fn with_style(mut self, style: HudStyle) -> Self {
        self.style = style;
        self
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 渲染一帧
    pub fn render(
        &self,
        frame: &RgbImage,
        detections: &DetectionSet,
        stats: &PipelineStats,
        config: &PipelineConfig,
    ) -> RgbImage {
        let mut canvas = frame.clone();
        if canvas.width() == 0 || canvas.height() == 0 {
            return canvas;
        }

        for det in detections.iter() {
            self.draw_detection(&mut canvas, det, config);
        }
        self.draw_panel(&mut canvas, detections, stats);
        canvas
    }

    fn draw_detection(&self, canvas: &mut RgbImage, det: &Detection, config: &PipelineConfig) {
        let Some(bbox) = det.bbox.clip(canvas.width(), canvas.height()) else {
            return;
        };
        let color = config.color_assignment.color_for(det.class_id, &det.class_name);

        // 插值框用细线
        let thickness = if det.interpolated {
            1
        } else {
            self.style.box_thickness
        };
        draw_box(canvas, &bbox, thickness, color);

        let Some(font) = &self.font else {
            return;
        };
        let label = label_text(det);
        let scale = PxScale::from(self.style.label_scale);
        let (tw, th) = text_size(scale, font, &label);
        let x = bbox.x1.round() as i32;
        let y = (bbox.y1.round() as i32 - th as i32 - 6).max(0);
        draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(tw + 6, th + 6), color);
        draw_text_mut(canvas, Rgb([0, 0, 0]), x + 3, y + 3, scale, font, &label);
    }

    fn draw_panel(&self, canvas: &mut RgbImage, detections: &DetectionSet, stats: &PipelineStats) {
        let line_h = (self.style.panel_scale * 1.4).ceil() as u32;
        let padding = 8;
        let max_lines = (canvas.height().saturating_sub(2 * padding) / line_h.max(1)) as usize;
        let lines = panel_lines(detections, stats, max_lines);

        let width = self.style.panel_width.min(canvas.width());
        let height = (lines.len() as u32 * line_h + 2 * padding).min(canvas.height());
        blend_rect(canvas, width, height, self.style.panel_bg, self.style.panel_alpha);

        let Some(font) = &self.font else {
            return;
        };
        let scale = PxScale::from(self.style.panel_scale);
        for (i, line) in lines.iter().enumerate() {
            let color = match line.kind {
                LineKind::Header => self.style.header_color,
                LineKind::Accent => self.style.accent_color,
                LineKind::Muted => self.style.muted_color,
            };
            let y = (padding + i as u32 * line_h) as i32;
            draw_text_mut(canvas, color, padding as i32, y, scale, font, &line.text);
        }
    }
}

/// 检测框标签: 类别 + 两位小数置信度 (+ 跟踪ID)
pub fn label_text(det: &Detection) -> String {
    let mut label = format!("{} {:.2}", det.class_name, det.confidence);
    if let Some(id) = det.track_id {
        label.push_str(&format!(" #{id}"));
    }
    label
}

/// 统计面板内容, 总行数不超过 `max_lines`, ID 列表溢出时显示 `...+N`
pub fn panel_lines(detections: &DetectionSet, stats: &PipelineStats, max_lines: usize) -> Vec<PanelLine> {
    let mut lines = vec![
        PanelLine::new(LineKind::Header, "MORPH1X"),
        PanelLine::new(LineKind::Accent, format!("FPS: {:.2}", stats.fps)),
        PanelLine::new(LineKind::Accent, format!("Active: {}", stats.detection_count)),
    ];
    for (name, count) in &stats.counts_by_class {
        lines.push(PanelLine::new(LineKind::Accent, format!("  {name}: {count}")));
    }
    lines.push(PanelLine::new(LineKind::Header, "Tracked IDs:"));

    let ids = detections.active_ids();
    if ids.is_empty() {
        lines.push(PanelLine::new(LineKind::Muted, "No objects tracked"));
    } else {
        let room = max_lines.saturating_sub(lines.len());
        if ids.len() <= room {
            lines.extend(ids.into_iter().map(|id| PanelLine::new(LineKind::Accent, format!("- {id}"))));
        } else {
            let shown = room.saturating_sub(1);
            lines.extend(
                ids.iter()
                    .take(shown)
                    .map(|id| PanelLine::new(LineKind::Accent, format!("- {id}"))),
            );
            lines.push(PanelLine::new(LineKind::Muted, format!("...+{}", ids.len() - shown)));
        }
    }
    lines.truncate(max_lines.max(1));
    lines
}

/// 从配置路径或系统字体加载
pub fn load_font(path: Option<&Path>) -> Option<FontArc> {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![p.to_path_buf()],
        None => FALLBACK_FONTS.iter().map(PathBuf::from).collect(),
    };
    for candidate in &candidates {
        let Ok(bytes) = std::fs::read(candidate) else {
            continue;
        };
        match FontArc::try_from_vec(bytes) {
            Ok(font) => {
                debug!("🔤 字体已加载: {}", candidate.display());
                return Some(font);
            }
            Err(e) => warn!("⚠️  字体解析失败 {}: {}", candidate.display(), e),
        }
    }
    warn!("⚠️ 未找到可用字体, HUD 只绘制检测框");
    None
}

fn draw_box(canvas: &mut RgbImage, bbox: &BBox, thickness: u32, color: Rgb<u8>) {
    let x = bbox.x1.floor() as i32;
    let y = bbox.y1.floor() as i32;
    let w = (bbox.x2.ceil() as i32 - x).max(0) as u32;
    let h = (bbox.y2.ceil() as i32 - y).max(0) as u32;
    for i in 0..thickness {
        let (wi, hi) = (w.saturating_sub(2 * i), h.saturating_sub(2 * i));
        if wi == 0 || hi == 0 {
            break;
        }
        draw_hollow_rect_mut(canvas, Rect::at(x + i as i32, y + i as i32).of_size(wi, hi), color);
    }
}

/// 左上角半透明底板
fn blend_rect(canvas: &mut RgbImage, width: u32, height: u32, bg: Rgb<u8>, alpha: f32) {
    let alpha = alpha.clamp(0.0, 1.0);
    for y in 0..height.min(canvas.height()) {
        for x in 0..width.min(canvas.width()) {
            let px = canvas.get_pixel_mut(x, y);
            for c in 0..3 {
                px.0[c] = (px.0[c] as f32 * (1.0 - alpha) + bg.0[c] as f32 * alpha).round() as u8;
            }
        }
    }
}
