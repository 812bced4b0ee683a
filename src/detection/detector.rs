// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测器 (Detector)
//! 职责: 接收DecodedFrame → YOLO检测 → 车辆过滤 → 发送FrameReport, 定时发送TrafficSample

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use image::DynamicImage;
use tracing::{debug, info, warn};

use super::types::{Bbox, CarDetections, ConfigMessage, DecodedFrame, FrameReport};
use crate::config::{DetectionConfig, MonitorConfig};
use crate::models::Model;
use crate::overlay::SnapshotWriter;
use crate::traffic::{LogTicker, TrafficSample, TrafficThresholds};

/// 车辆过滤: 类别 + 最小尺寸
#[derive(Debug, Clone, PartialEq)]
pub struct CarFilter {
    classes: Vec<usize>,
    min_width: f32,
    min_height: f32,
}

impl CarFilter {
    pub fn new(classes: Vec<usize>, min_width: f32, min_height: f32) -> Self {
        Self {
            classes,
            min_width,
            min_height,
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(
            config.classes.clone(),
            config.min_box_width,
            config.min_box_height,
        )
    }

    pub fn accepts(&self, bbox: &Bbox) -> bool {
        self.classes.contains(&bbox.id())
            && bbox.width() >= self.min_width
            && bbox.height() >= self.min_height
    }

    pub fn apply(&self, boxes: Vec<Bbox>) -> Vec<Bbox> {
        boxes.into_iter().filter(|b| self.accepts(b)).collect()
    }
}

pub struct Detector<M: Model> {
    model: M,
    filter: CarFilter,
    thresholds: TrafficThresholds,
    ticker: LogTicker,
    enabled: bool,
    snapshots: Option<SnapshotWriter>,
    pending_snapshot: bool,
    stop: Option<Arc<AtomicBool>>,

    // 统计
    count: u64,
    last: Instant,
    current_fps: f64,
}

impl<M: Model> Detector<M> {
    pub fn new(model: M, config: &MonitorConfig) -> Self {
        Self {
            model,
            filter: CarFilter::from_config(&config.detection),
            thresholds: config.thresholds,
            ticker: LogTicker::new(Duration::from_secs(config.log_interval_secs)),
            enabled: true,
            snapshots: None,
            pending_snapshot: false,
            stop: None,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
        }
    }

    pub fn with_ticker(mut self, ticker: LogTicker) -> Self {
        self.ticker = ticker;
        self
    }

    pub fn with_snapshots(mut self, writer: SnapshotWriter) -> Self {
        self.snapshots = Some(writer);
        self
    }

    /// 停止标志: 置位后即使采集端未关闭也退出主循环
    pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stopped(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|s| s.load(Ordering::Relaxed))
    }

    /// 检测一张图中的车辆
    pub fn detect(&mut self, image: &DynamicImage) -> Result<CarDetections> {
        let ys = self
            .model
            .forward(std::slice::from_ref(image))
            .context("car detection failed")?;
        let boxes = ys.into_iter().next().unwrap_or_default();
        Ok(CarDetections::new(self.filter.apply(boxes), &self.thresholds))
    }

    pub fn apply(&mut self, msg: ConfigMessage) {
        match msg {
            ConfigMessage::ToggleDetection(enabled) => {
                self.enabled = enabled;
                info!("🚗 车辆检测: {}", if enabled { "开启" } else { "关闭" });
            }
            ConfigMessage::Snapshot => self.pending_snapshot = true,
        }
    }

    /// 处理一帧: 返回渲染报告, 到达记录间隔时附带一次采样
    pub fn process(&mut self, frame: DecodedFrame, now: Instant) -> (FrameReport, Option<TrafficSample>) {
        let start = Instant::now();

        let image = frame.to_image();
        // None: 本帧检测失败, 不产生采样, 记录间隔保持到期
        let outcome = match (&image, self.enabled) {
            (None, _) => {
                warn!("❌ RGBA图像转换失败 (帧 {})", frame.frame_id);
                None
            }
            (Some(img), true) => match self.detect(img) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("⚠️  检测失败 (帧 {}): {:#}", frame.frame_id, e);
                    None
                }
            },
            (Some(_), false) => Some(CarDetections::empty()),
        };

        let sample = match &outcome {
            Some(d) if self.enabled && self.ticker.due(now) => {
                Some(TrafficSample::new(d.count(), &self.thresholds))
            }
            _ => None,
        };
        let detections = outcome.unwrap_or_else(CarDetections::empty);

        if self.pending_snapshot {
            self.pending_snapshot = false;
            match (&self.snapshots, &image) {
                (Some(writer), Some(img)) => match writer.save(img, &detections) {
                    Ok(path) => info!("📸 截图已保存: {}", path.display()),
                    Err(e) => warn!("❌ 截图保存失败: {}", e),
                },
                (None, _) => warn!("⚠️  未配置截图目录"),
                _ => {}
            }
        }

        let inference_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.count += 1;
        if self.last.elapsed().as_secs_f64() >= 1.0 {
            self.current_fps = self.count as f64 / self.last.elapsed().as_secs_f64();
            debug!(
                "🔍 检测统计: {:.1}fps | {:.1}ms | 车辆 {}",
                self.current_fps,
                inference_ms,
                detections.count()
            );
            self.count = 0;
            self.last = Instant::now();
        }

        let report = FrameReport {
            frame,
            detections,
            detection_enabled: self.enabled,
            inference_fps: self.current_fps,
            inference_ms,
        };
        (report, sample)
    }

    /// 检测线程主循环, 采集端关闭后退出
    pub fn run(
        mut self,
        frames: Receiver<DecodedFrame>,
        control: Receiver<ConfigMessage>,
        reports: Sender<FrameReport>,
        samples: Sender<TrafficSample>,
    ) {
        info!("🔍 检测线程等待数据...");
        self.model.summary();

        let mut dropped_reports = 0u64;
        loop {
            let frame = match frames.recv_timeout(Duration::from_millis(200)) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) if self.stopped() => break,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if self.stopped() {
                break;
            }
            for msg in control.try_iter() {
                self.apply(msg);
            }

            let (report, sample) = self.process(frame, Instant::now());

            if let Some(sample) = sample {
                info!("🚗 Cars: {} | Traffic: {}", sample.car_count, sample.level);
                if samples.send(sample).is_err() {
                    warn!("⚠️  记录线程已退出, 采样丢弃");
                }
            }

            match reports.try_send(report) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => dropped_reports += 1,
                // 无窗口模式下没有接收端
                Err(TrySendError::Disconnected(_)) => {}
            }
        }

        info!("🛑 检测线程退出 (渲染丢弃 {} 帧)", dropped_reports);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::TrafficLevel;
    use crate::CAR_CLASS_ID;
    use ndarray::{Array, IxDyn};
    use std::sync::Arc;

    /// 固定输出的假模型
    struct FakeModel {
        boxes: Vec<Bbox>,
        conf: f32,
        iou: f32,
        fail: bool,
    }

    impl Model for FakeModel {
        fn preprocess(&mut self, _images: &[DynamicImage]) -> Result<Array<f32, IxDyn>> {
            if self.fail {
                anyhow::bail!("onnx session error");
            }
            Ok(Array::zeros(vec![1]))
        }

        fn run(&mut self, xs: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>> {
            Ok(vec![xs])
        }

        fn postprocess(
            &self,
            _xs: Vec<Array<f32, IxDyn>>,
            _xs0: &[DynamicImage],
        ) -> Result<Vec<Vec<Bbox>>> {
            Ok(vec![self.boxes.clone()])
        }

        fn set_conf(&mut self, val: f32) {
            self.conf = val;
        }

        fn conf(&self) -> f32 {
            self.conf
        }

        fn set_iou(&mut self, val: f32) {
            self.iou = val;
        }

        fn iou(&self) -> f32 {
            self.iou
        }

        fn summary(&self) {}
    }

    fn fake(boxes: Vec<Bbox>) -> FakeModel {
        FakeModel {
            boxes,
            conf: 0.25,
            iou: 0.45,
            fail: false,
        }
    }

    fn frame(id: u64) -> DecodedFrame {
        DecodedFrame {
            rgba_data: Arc::new(vec![0; 8 * 8 * 4]),
            width: 8,
            height: 8,
            frame_id: id,
            decode_fps: 30.0,
        }
    }

    fn cars(n: usize) -> Vec<Bbox> {
        (0..n)
            .map(|i| Bbox::new(i as f32 * 300.0, 0.0, 260.0, 90.0, CAR_CLASS_ID, 0.8))
            .collect()
    }

    #[test]
    fn filter_keeps_only_configured_classes() {
        let filter = CarFilter::new(vec![CAR_CLASS_ID], 0.0, 0.0);
        let boxes = vec![
            Bbox::new(0.0, 0.0, 10.0, 10.0, 0, 0.9), // person
            Bbox::new(0.0, 0.0, 10.0, 10.0, CAR_CLASS_ID, 0.9),
            Bbox::new(0.0, 0.0, 10.0, 10.0, 7, 0.9), // truck
        ];
        let kept = filter.apply(boxes);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id(), CAR_CLASS_ID);
    }

    #[test]
    fn filter_drops_small_boxes() {
        let filter = CarFilter::new(vec![CAR_CLASS_ID], 250.0, 80.0);
        assert!(filter.accepts(&Bbox::new(0.0, 0.0, 250.0, 80.0, CAR_CLASS_ID, 0.5)));
        assert!(!filter.accepts(&Bbox::new(0.0, 0.0, 249.0, 200.0, CAR_CLASS_ID, 0.5)));
        assert!(!filter.accepts(&Bbox::new(0.0, 0.0, 400.0, 60.0, CAR_CLASS_ID, 0.5)));
    }

    #[test]
    fn process_counts_cars_and_samples_when_due() {
        let config = MonitorConfig::default();
        let start = Instant::now();
        let mut det = Detector::new(fake(cars(6)), &config)
            .with_ticker(LogTicker::starting_at(Duration::from_secs(10), start));

        let (report, sample) = det.process(frame(1), start + Duration::from_secs(1));
        assert_eq!(report.detections.count(), 6);
        assert_eq!(report.detections.level, TrafficLevel::Moderate);
        assert!(sample.is_none());

        let (_, sample) = det.process(frame(2), start + Duration::from_secs(11));
        let sample = sample.expect("sample after interval");
        assert_eq!(sample.car_count, 6);
        assert_eq!(sample.level, TrafficLevel::Moderate);
    }

    #[test]
    fn disabled_detection_reports_nothing() {
        let config = MonitorConfig::default();
        let start = Instant::now();
        let mut det = Detector::new(fake(cars(12)), &config)
            .with_ticker(LogTicker::starting_at(Duration::from_secs(10), start));
        det.apply(ConfigMessage::ToggleDetection(false));

        let (report, sample) = det.process(frame(1), start + Duration::from_secs(30));
        assert!(!report.detection_enabled);
        assert_eq!(report.detections.count(), 0);
        assert!(sample.is_none());
    }

    #[test]
    fn failed_inference_is_not_logged_and_next_frame_is() {
        let config = MonitorConfig::default();
        let start = Instant::now();
        let mut det = Detector::new(fake(cars(3)), &config)
            .with_ticker(LogTicker::starting_at(Duration::from_secs(10), start));

        det.model.fail = true;
        let (report, sample) = det.process(frame(1), start + Duration::from_secs(11));
        assert_eq!(report.detections.count(), 0);
        assert!(sample.is_none());

        det.model.fail = false;
        let (_, sample) = det.process(frame(2), start + Duration::from_secs(12));
        let sample = sample.expect("interval still due after the failed frame");
        assert_eq!(sample.car_count, 3);
        assert_eq!(sample.level, TrafficLevel::Light);
    }

    #[test]
    fn unreadable_frame_is_not_logged() {
        let config = MonitorConfig::default();
        let start = Instant::now();
        let mut det = Detector::new(fake(cars(7)), &config)
            .with_ticker(LogTicker::starting_at(Duration::from_secs(10), start));

        let mut bad = frame(1);
        bad.rgba_data = Arc::new(vec![0; 3]);
        let (_, sample) = det.process(bad, start + Duration::from_secs(20));
        assert!(sample.is_none());

        let (_, sample) = det.process(frame(2), start + Duration::from_secs(20));
        assert_eq!(sample.map(|s| s.car_count), Some(7));
    }

    #[test]
    fn run_forwards_reports_and_exits_when_capture_closes() {
        let mut config = MonitorConfig::default();
        config.log_interval_secs = 1;
        let det = Detector::new(fake(cars(11)), &config)
            .with_ticker(LogTicker::starting_at(Duration::from_millis(0), Instant::now()));

        let (frame_tx, frame_rx) = crossbeam_channel::bounded(4);
        let (_control_tx, control_rx) = crossbeam_channel::bounded(4);
        let (report_tx, report_rx) = crossbeam_channel::bounded(4);
        let (sample_tx, sample_rx) = crossbeam_channel::unbounded();

        std::thread::sleep(Duration::from_millis(2));
        frame_tx.send(frame(1)).unwrap();
        drop(frame_tx);

        det.run(frame_rx, control_rx, report_tx, sample_tx);

        let report = report_rx.recv().unwrap();
        assert_eq!(report.frame.frame_id, 1);
        assert_eq!(report.detections.level, TrafficLevel::Heavy);
        let sample = sample_rx.recv().unwrap();
        assert_eq!(sample.car_count, 11);
        assert!(sample_rx.try_recv().is_err());
    }

    #[test]
    fn run_exits_on_stop_flag_while_capture_is_open() {
        let stop = Arc::new(AtomicBool::new(true));
        let det = Detector::new(fake(cars(1)), &MonitorConfig::default()).with_stop(stop);

        let (_frame_tx, frame_rx) = crossbeam_channel::bounded::<DecodedFrame>(1);
        let (_control_tx, control_rx) = crossbeam_channel::bounded(1);
        let (report_tx, _report_rx) = crossbeam_channel::bounded(1);
        let (sample_tx, sample_rx) = crossbeam_channel::unbounded();

        det.run(frame_rx, control_rx, report_tx, sample_tx);
        assert!(sample_rx.try_recv().is_err());
    }
}
