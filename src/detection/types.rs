// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 车辆检测数据结构定义
/// Data structures for the car detection pipeline
use std::sync::Arc;

use image::{DynamicImage, RgbaImage};

use crate::traffic::{TrafficLevel, TrafficThresholds};

// ========== 数据结构 ==========

#[derive(Debug, Clone, PartialEq)]
pub struct Bbox {
    // a bounding box around an object
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
    id: usize,
    confidence: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32, id: usize, confidence: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
            id,
            confidence,
        }
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = (self.xmin + self.width).min(another.xmin + another.width);
        let t = self.ymin.max(another.ymin);
        let b = (self.ymin + self.height).min(another.ymin + another.height);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        self.intersection_area(another) / self.union(another)
    }
}

/// 已解码帧 (采集线程 → 检测线程)
#[derive(Clone, Debug)]
pub struct DecodedFrame {
    pub rgba_data: Arc<Vec<u8>>, // 使用Arc共享数据,避免复制
    pub width: u32,
    pub height: u32,
    pub frame_id: u64,
    pub decode_fps: f64,
}

impl DecodedFrame {
    pub fn to_image(&self) -> Option<DynamicImage> {
        RgbaImage::from_raw(self.width, self.height, self.rgba_data.to_vec())
            .map(DynamicImage::ImageRgba8)
    }
}

/// 单帧车辆检测结果
#[derive(Clone, Debug, PartialEq)]
pub struct CarDetections {
    pub boxes: Vec<Bbox>,
    pub level: TrafficLevel,
}

impl CarDetections {
    pub fn new(boxes: Vec<Bbox>, thresholds: &TrafficThresholds) -> Self {
        let level = thresholds.classify(boxes.len() as u32);
        Self { boxes, level }
    }

    pub fn empty() -> Self {
        Self {
            boxes: Vec::new(),
            level: TrafficLevel::Light,
        }
    }

    pub fn count(&self) -> u32 {
        self.boxes.len() as u32
    }
}

/// 检测报告 (检测线程 → 渲染线程)
#[derive(Clone, Debug)]
pub struct FrameReport {
    pub frame: DecodedFrame,
    pub detections: CarDetections,
    pub detection_enabled: bool,
    pub inference_fps: f64,
    pub inference_ms: f64,
}

/// 配置更新消息 (渲染线程 → 检测线程)
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigMessage {
    ToggleDetection(bool),
    Snapshot,
}
