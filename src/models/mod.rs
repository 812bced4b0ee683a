// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 模型统一接口与实现
///
/// # 架构说明
///
/// - **YOLOv8**: 完整模型 (加载 + 预处理 + 推理 + 后处理), 文件 `yolov8.rs`
///   - YOLOv11 与 YOLOv8 的 ONNX 输出格式一致, 直接复用
///   - YOLOv5 仅输出格式不同 (带 objectness), 由后处理器区分
/// - **YoloPostprocessor**: 纯后处理, 不依赖推理引擎, 便于单独测试
///
/// ## 使用示例
/// ```no_run
/// use traffic_monitor::models::{Model, YOLOv8};
/// use traffic_monitor::DetectionConfig;
///
/// # fn main() -> anyhow::Result<()> {
/// let mut model = YOLOv8::new(&DetectionConfig::default())?;
/// let image = image::open("street.jpg")?;
/// let bboxes = model.forward(&[image])?;
/// # Ok(())
/// # }
/// ```
use anyhow::Result;
use image::DynamicImage;
use ndarray::{Array, IxDyn};
use serde::{Deserialize, Serialize};

use crate::Bbox;

/// 模型类型枚举（决定输出张量布局）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    /// YOLOv8 / YOLOv11: [B, 4+nc, N]
    YOLOv8,
    /// YOLOv5: [B, N, 5+nc]
    YOLOv5,
}

impl ModelType {
    /// 从模型路径推断模型类型
    pub fn from_path(path: &str) -> Self {
        let name = path.to_lowercase();
        if name.contains("yolov5") || name.contains("v5") {
            ModelType::YOLOv5
        } else {
            ModelType::YOLOv8
        }
    }
}

/// 统一的检测模型接口
///
/// ```text
/// 原始图片 → preprocess → ndarray张量
///          ↓
///     推理引擎 run
///          ↓
///     原始输出 → postprocess → 每张图的检测框
/// ```
pub trait Model {
    /// 预处理: 图片 → NCHW 张量
    fn preprocess(&mut self, images: &[DynamicImage]) -> Result<Array<f32, IxDyn>>;

    /// 推理: 执行模型前向传播
    fn run(&mut self, xs: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>>;

    /// 后处理: 原始输出 → 检测框 (原图坐标)
    fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<Vec<Bbox>>>;

    /// 完整的推理流程: preprocess → run → postprocess
    fn forward(&mut self, images: &[DynamicImage]) -> Result<Vec<Vec<Bbox>>> {
        let xs = self.preprocess(images)?;
        let ys = self.run(xs)?;
        self.postprocess(ys, images)
    }

    fn set_conf(&mut self, val: f32);

    fn conf(&self) -> f32;

    fn set_iou(&mut self, val: f32);

    fn iou(&self) -> f32;

    /// 打印模型信息
    fn summary(&self);
}

pub mod yolov8; // YOLOv8 完整模型 + 实现 Model trait

pub use yolov8::{YOLOv8, YoloPostprocessor};
