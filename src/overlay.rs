// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测框叠加与截图
//!
//! 窗口内的实时叠加由 macroquad 直接绘制, 这里负责写入图片的版本

use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detection::types::{Bbox, CarDetections};
use crate::error::{MonitorError, Result};

pub const BOX_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const COUNT_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]);
pub const LEVEL_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const BOX_THICKNESS: i32 = 2;

/// 检测框标签, 例如 "Car 0.87"
pub fn box_label(bbox: &Bbox) -> String {
    format!("Car {:.2}", bbox.confidence())
}

/// 左上角状态文字
pub fn hud_lines(detections: &CarDetections) -> [String; 2] {
    [
        format!("Cars: {}", detections.count()),
        format!("Traffic: {}", detections.level),
    ]
}

/// 画检测框 (线宽 BOX_THICKNESS), 有字体时附带标签与状态文字
pub fn annotate(canvas: &mut RgbaImage, detections: &CarDetections, font: Option<&FontVec>) {
    let (w, h) = canvas.dimensions();
    for bbox in &detections.boxes {
        for inset in 0..BOX_THICKNESS {
            let x = bbox.xmin() as i32 + inset;
            let y = bbox.ymin() as i32 + inset;
            let bw = (bbox.width() as i32 - 2 * inset).max(1) as u32;
            let bh = (bbox.height() as i32 - 2 * inset).max(1) as u32;
            draw_hollow_rect_mut(canvas, Rect::at(x, y).of_size(bw, bh), BOX_COLOR);
        }
        if let Some(font) = font {
            let ty = (bbox.ymin() as i32 - 22).max(0);
            draw_text_mut(
                canvas,
                BOX_COLOR,
                bbox.xmin() as i32,
                ty,
                PxScale::from(20.0),
                font,
                &box_label(bbox),
            );
        }
    }

    if let Some(font) = font {
        let [cars, level] = hud_lines(detections);
        let scale = PxScale::from((h.min(w) as f32 / 20.0).clamp(16.0, 40.0));
        draw_text_mut(canvas, COUNT_COLOR, 10, 10, scale, font, &cars);
        draw_text_mut(canvas, LEVEL_COLOR, 10, 10 + scale.y as i32 + 8, scale, font, &level);
    }
}

pub fn load_font(path: &Path) -> Result<FontVec> {
    let bytes = fs::read(path)?;
    FontVec::try_from_vec(bytes)
        .map_err(|e| MonitorError::config(format!("invalid font {}: {}", path.display(), e)))
}

/// 截图写入器
pub struct SnapshotWriter {
    dir: PathBuf,
    font: Option<FontVec>,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, font: Option<FontVec>) -> Self {
        Self {
            dir: dir.into(),
            font,
        }
    }

    /// 保存叠加后的 JPEG, 返回文件路径
    pub fn save(&self, image: &DynamicImage, detections: &CarDetections) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let mut canvas = image.to_rgba8();
        annotate(&mut canvas, detections, self.font.as_ref());

        let path = self
            .dir
            .join(format!("cars_{}.jpg", crate::gen_time_string("")));
        DynamicImage::ImageRgba8(canvas).to_rgb8().save(&path)?;
        Ok(path)
    }
}
