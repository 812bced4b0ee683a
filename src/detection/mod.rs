// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 检测系统 (Detection System)
///
/// 独立工作线程,负责车辆检测与车流采样
/// - Detector:  目标检测 + 车辆过滤
/// - LogTicker: 定时采样 (traffic.rs)
pub mod detector;
pub mod types;

pub use detector::{CarFilter, Detector};
pub use types::{Bbox, CarDetections, ConfigMessage, DecodedFrame, FrameReport};
