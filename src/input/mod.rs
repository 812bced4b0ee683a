// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 视频输入系统 (Video Input System)
///
/// - InputSource: 摄像头 / 网络流 / 文件
/// - Capture: FFmpeg 解码线程 (需要 `capture` 特性)
/// - DecodeFilter: 帧过滤, RGBA 拷贝, 送往检测线程
/// - RecordSwitch: 录像开关
pub mod recording;
pub mod source;

#[cfg(feature = "capture")]
pub mod capture;
#[cfg(feature = "capture")]
pub mod decode_filter;

pub use recording::RecordSwitch;
pub use source::InputSource;

#[cfg(feature = "capture")]
pub use capture::{camera_devices, spawn_capture, Capture};
#[cfg(feature = "capture")]
pub use decode_filter::{CaptureStats, DecodeFilter};
