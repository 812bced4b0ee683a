// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// FFmpeg解码过滤器: 视频源 → RGBA帧 → 检测线程
///
/// 滤镜图已经输出 `format=rgba`, 这里只按行拷贝 data[0]
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame};
use tracing::{debug, info, warn};

use super::recording::RecordSwitch;
use crate::detection::types::DecodedFrame;

/// 最大支持分辨率
pub const MAX_DIMENSION: u32 = 4096;

/// 采集统计, 采集线程与主线程共享
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub decoded: AtomicU64,
    pub dropped: AtomicU64, // 坏帧
    pub skipped: AtomicU64, // 检测线程忙, 未送出
}

impl CaptureStats {
    pub fn decoded(&self) -> u64 {
        self.decoded.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

/// 检查帧尺寸与步长, 不合法返回原因
pub fn validate_layout(width: u32, height: u32, linesize: i32) -> Result<(), String> {
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(format!("非法分辨率 {}x{}", width, height));
    }
    if linesize < 0 || (linesize as usize) < width as usize * 4 {
        return Err(format!("步长异常 linesize={}", linesize));
    }
    Ok(())
}

/// 按行拷贝带填充的 RGBA 平面
pub fn copy_rgba_rows(src: &[u8], linesize: usize, width: u32, height: u32) -> Vec<u8> {
    let row = width as usize * 4;
    let mut out = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * linesize;
        out.extend_from_slice(&src[start..start + row]);
    }
    out
}

#[derive(Clone)]
pub struct DecodeFilter {
    tx: Sender<DecodedFrame>,
    stop: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
    // 录像开关与本轮是否在录像
    record: Option<(Arc<RecordSwitch>, bool)>,
    frame_id: u64,
    count: usize,
    last: Instant,
    current_fps: f64,
}

impl DecodeFilter {
    pub fn new(tx: Sender<DecodedFrame>, stop: Arc<AtomicBool>, stats: Arc<CaptureStats>) -> Self {
        Self {
            tx,
            stop,
            stats,
            record: None,
            frame_id: 0,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
        }
    }

    pub fn with_record(mut self, switch: Arc<RecordSwitch>, recording: bool) -> Self {
        self.record = Some((switch, recording));
        self
    }

    fn drop_frame(&self, reason: &str) {
        let n = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if n <= 10 {
            warn!("⚠️ 丢弃帧 #{}: {}", self.frame_id, reason);
        }
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<Frame>, String> {
        if self.stop.load(Ordering::Relaxed) {
            return Err("capture stopped".to_string());
        }
        if let Some((switch, recording)) = &self.record {
            if switch.changed(*recording) {
                return Err("recording toggled".to_string());
            }
        }
        self.frame_id += 1;

        if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
            self.drop_frame("空帧/损坏帧");
            return Ok(None);
        }

        let (width, height, linesize, plane) = unsafe {
            let raw = &*frame.as_ptr();
            (raw.width as u32, raw.height as u32, raw.linesize[0], raw.data[0])
        };
        if let Err(reason) = validate_layout(width, height, linesize) {
            self.drop_frame(&reason);
            return Ok(None);
        }
        if plane.is_null() {
            self.drop_frame("数据指针为空");
            return Ok(None);
        }

        let linesize = linesize as usize;
        let plane_len = linesize * (height as usize - 1) + width as usize * 4;
        // data[0] 至少包含 height 行, 最后一行不保证有填充
        let src = unsafe { std::slice::from_raw_parts(plane, plane_len) };
        let rgba_data = copy_rgba_rows(src, linesize, width, height);

        self.count += 1;
        self.stats.decoded.fetch_add(1, Ordering::Relaxed);
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            self.current_fps = self.count as f64 / elapsed;
            debug!(
                "📺 解码统计: {:.1}fps | 总帧{} | 丢弃{} | 跳过{}",
                self.current_fps,
                self.stats.decoded(),
                self.stats.dropped(),
                self.stats.skipped()
            );
            self.last = Instant::now();
            self.count = 0;
        }

        let decoded = DecodedFrame {
            rgba_data: Arc::new(rgba_data),
            width,
            height,
            frame_id: self.frame_id,
            decode_fps: self.current_fps,
        };

        match self.tx.try_send(decoded) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            }
            // 检测线程已退出
            Err(TrySendError::Disconnected(_)) => return Err("detector gone".to_string()),
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        info!("✅ 解码线程退出");
    }
}
