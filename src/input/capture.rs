// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 采集线程: 打开视频源, 解码为 RGBA 并送往检测线程
//!
//! 摄像头打开失败重试 3 次 (间隔 1 秒); 流结束或停止标志置位后线程退出.
//! 录像开关切换时按新输出重建解码上下文

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input, Output};
use tracing::{error, info, warn};

use super::decode_filter::{CaptureStats, DecodeFilter};
use super::recording::RecordSwitch;
use super::source::{camera_device, InputSource};
use crate::detection::types::DecodedFrame;
use crate::error::{MonitorError, Result};

pub const CAMERA_RETRIES: u32 = 3;
pub const CAMERA_RETRY_DELAY: Duration = Duration::from_secs(1);

/// 获取可用的摄像头设备列表
pub fn camera_devices() -> Vec<String> {
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices,
        Err(e) => {
            warn!("⚠️ 获取摄像头列表失败: {}", e);
            vec![]
        }
    }
}

pub struct Capture {
    source: InputSource,
    tx: Sender<DecodedFrame>,
    stop: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
    record: Option<Arc<RecordSwitch>>,
}

impl Capture {
    pub fn new(source: InputSource, tx: Sender<DecodedFrame>, stop: Arc<AtomicBool>) -> Self {
        Self {
            source,
            tx,
            stop,
            stats: Arc::new(CaptureStats::default()),
            record: None,
        }
    }

    /// 录像开关, 文件源忽略 (重建上下文会从头播放)
    pub fn with_record(mut self, switch: Arc<RecordSwitch>) -> Self {
        if !matches!(self.source, InputSource::File(_)) {
            self.record = Some(switch);
        }
        self
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// FFmpeg 输入 URL
    fn input_url(&self) -> Result<String> {
        match &self.source {
            InputSource::Camera(index) => {
                if cfg!(target_os = "windows") {
                    let devices = camera_devices();
                    let name = devices.get(*index as usize).ok_or_else(|| {
                        MonitorError::InvalidSource(format!(
                            "camera #{} not found ({} devices)",
                            index,
                            devices.len()
                        ))
                    })?;
                    Ok(format!("video={}", name))
                } else {
                    Ok(camera_device(*index))
                }
            }
            InputSource::Stream(url) => Ok(url.clone()),
            InputSource::File(path) => {
                if !path.exists() {
                    return Err(MonitorError::InvalidSource(format!(
                        "{} does not exist",
                        path.display()
                    )));
                }
                Ok(path.to_string_lossy().into_owned())
            }
        }
    }

    /// 解码输出 (RGBA → 检测线程), 录像时再加一个文件输出
    fn build_context(&self, url: &str, recording: Option<&Path>) -> Result<FfmpegContext> {
        let mut filter = DecodeFilter::new(self.tx.clone(), Arc::clone(&self.stop), self.stats());
        if let Some(switch) = &self.record {
            filter = filter.with_record(Arc::clone(switch), recording.is_some());
        }
        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("decode", Box::new(filter));
        let out = create_null_output().add_frame_pipeline(pipe);

        let mut input = Input::new(url);
        if let Some(format) = self.source.ffmpeg_format() {
            input = input.set_format(format);
        }
        let opts: HashMap<&str, &str> = self.source.input_opts().into_iter().collect();
        if !opts.is_empty() {
            input = input.set_input_opts(opts);
        }

        let mut builder = FfmpegContext::builder()
            .input(input)
            .filter_descs(["format=rgba"].into())
            .output(out);
        // 滤镜图只接第一个输出, 录像文件直接取输入视频流编码
        if let Some(path) = recording {
            builder = builder.output(Output::from(path.to_string_lossy().into_owned()));
        }
        builder
            .build()
            .map_err(|e| MonitorError::capture(format!("构建失败: {}", e)))
    }

    /// 打开视频源, 摄像头失败时重试
    fn open(&self, url: &str, recording: Option<&Path>) -> Result<FfmpegContext> {
        let attempts = if self.source.is_camera() { CAMERA_RETRIES } else { 1 };
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.build_context(url, recording) {
                Ok(ctx) => return Ok(ctx),
                Err(e) if attempt < attempts => {
                    warn!(
                        "⚠️ 摄像头忙或无法打开, 1秒后重试... ({}/{}): {}",
                        attempt, attempts, e
                    );
                    std::thread::sleep(CAMERA_RETRY_DELAY);
                }
                Err(e) => {
                    error!("❌ 无法打开视频源 {}", self.source);
                    return Err(e);
                }
            }
        }
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// 阻塞运行直到流结束.
    /// 停止标志或文件播放完毕返回 Ok; 打开失败或实时源中断返回 Err
    pub fn run(self) -> Result<Arc<CaptureStats>> {
        let url = self.input_url()?;
        info!("🔗 视频源: {} ({})", self.source, url);

        let outcome = loop {
            let recording = match &self.record {
                Some(switch) if switch.is_requested() => Some(switch.next_path()?),
                _ => None,
            };
            let ctx = self.open(&url, recording.as_deref())?;
            let sch = ctx
                .start()
                .map_err(|e| MonitorError::capture(format!("启动失败: {}", e)))?;
            match &recording {
                Some(path) => info!("🎬 开始录像: {}", path.display()),
                None => info!("✅ 视频源连接成功, 开始解码"),
            }

            let finished = sch.wait();
            if let Some(path) = &recording {
                info!("🎬 录像结束: {}", path.display());
            }
            if self.stopped() {
                break Ok(());
            }
            if let Some(switch) = &self.record {
                if switch.changed(recording.is_some()) {
                    info!("🎬 录像切换, 重新打开视频源");
                    continue;
                }
            }
            break stream_end(&self.source, finished);
        };

        info!(
            "📹 采集结束 (解码{} 丢弃{} 跳过{})",
            self.stats.decoded(),
            self.stats.dropped(),
            self.stats.skipped()
        );
        outcome.map(|()| self.stats)
    }
}

/// 解码结束: 文件读完是正常结束, 直播流或摄像头结束视为取帧失败
fn stream_end<E: std::fmt::Display>(
    source: &InputSource,
    finished: std::result::Result<(), E>,
) -> Result<()> {
    match finished {
        Err(e) => Err(MonitorError::capture(format!("视频流中断: {}", e))),
        Ok(()) if matches!(source, InputSource::File(_)) => Ok(()),
        Ok(()) => Err(MonitorError::capture("Failed to grab frame")),
    }
}

/// 启动采集线程
pub fn spawn_capture(capture: Capture) -> std::io::Result<JoinHandle<Result<Arc<CaptureStats>>>> {
    std::thread::Builder::new()
        .name("capture".into())
        .spawn(move || capture.run())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_eof_ends_normally() {
        let source = InputSource::File("traffic.mp4".into());
        assert!(stream_end::<String>(&source, Ok(())).is_ok());
    }

    #[test]
    fn live_source_end_is_an_error() {
        let stream = InputSource::Stream("udp://0.0.0.0:11111".into());
        let err = stream_end::<String>(&stream, Ok(())).unwrap_err();
        assert!(err.to_string().contains("Failed to grab frame"));

        let camera = InputSource::Camera(0);
        assert!(stream_end::<String>(&camera, Ok(())).is_err());
        let err = stream_end(&camera, Err("EOF")).unwrap_err();
        assert!(err.to_string().contains("视频流中断"));
    }

    #[test]
    fn missing_file_fails_capture_thread() {
        let (tx, _rx) = crossbeam_channel::bounded(1);
        let capture = Capture::new(
            InputSource::File("no/such/video.mp4".into()),
            tx,
            Arc::new(AtomicBool::new(false)),
        );
        let outcome = spawn_capture(capture).unwrap().join().unwrap();
        assert!(matches!(outcome, Err(MonitorError::InvalidSource(_))));
    }
}
