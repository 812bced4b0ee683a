#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 配置文件 + 检测参数
pub mod control; // 操作指令 (键盘/标准输入)
pub mod detection; // 车辆检测系统
pub mod drone; // Tello 无人机 UDP 指令
pub mod error; // 错误类型
pub mod input; // 视频输入系统
pub mod logging; // tracing 初始化
pub mod models; // 模型接口与具体实现
pub mod overlay; // 检测框叠加 / 截图
pub mod recorder; // 数据库写入线程
pub mod report; // 离线统计与CSV导出
pub mod storage; // SQLite 车流日志
pub mod traffic; // 车流等级

pub mod ort_backend;

pub use crate::config::{DetectionConfig, MonitorConfig};
pub use crate::detection::types::{Bbox, CarDetections, DecodedFrame, FrameReport};
pub use crate::error::{MonitorError, Result};
pub use crate::models::{Model, ModelType, YOLOv8};
pub use crate::ort_backend::{OrtBackend, OrtConfig, OrtEP};
pub use crate::traffic::{TrafficLevel, TrafficSample, TrafficThresholds};

/// COCO 数据集中 "car" 的类别ID
pub const CAR_CLASS_ID: usize = 2;

/// 贪心NMS: 按置信度降序, 与已保留框 IoU 超过阈值的框被丢弃
pub fn non_max_suppression(xs: &mut Vec<Bbox>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence().total_cmp(&b1.confidence()));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].iou(&xs[index]);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// 本地时间字符串, 用于截图文件名
pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%3f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}
