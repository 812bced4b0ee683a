// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 检测线程 + 记录线程: 模拟模型输出 → 车辆计数 → SQLite

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use image::DynamicImage;
use ndarray::{Array, IxDyn};

use traffic_monitor::detection::Detector;
use traffic_monitor::models::yolov8::letterbox;
use traffic_monitor::models::{Model, ModelType, YoloPostprocessor};
use traffic_monitor::recorder::spawn_recorder;
use traffic_monitor::storage::TrafficStore;
use traffic_monitor::traffic::LogTicker;
use traffic_monitor::{Bbox, DecodedFrame, MonitorConfig, TrafficLevel, CAR_CLASS_ID};

const SIZE: u32 = 64;
const NUM_CLASSES: usize = 3;

/// 输出固定候选框的 YOLOv8 布局模型: [1, 4+nc, N]
struct ScriptedModel {
    post: YoloPostprocessor,
    candidates: Vec<([f32; 4], usize, f32)>,
}

impl ScriptedModel {
    fn new(cars: usize) -> Self {
        let mut candidates: Vec<([f32; 4], usize, f32)> = (0..cars)
            .map(|i| {
                let c = 4.0 + (i % 8) as f32 * 8.0;
                let r = 4.0 + (i / 8) as f32 * 8.0;
                ([c, r, 6.0, 6.0], CAR_CLASS_ID, 0.9)
            })
            .collect();
        // 行人不计入
        candidates.push(([32.0, 60.0, 4.0, 4.0], 0, 0.95));
        Self {
            post: YoloPostprocessor::new(ModelType::YOLOv8, SIZE, SIZE, 0.25, 0.45),
            candidates,
        }
    }
}

impl Model for ScriptedModel {
    fn preprocess(&mut self, images: &[DynamicImage]) -> Result<Array<f32, IxDyn>> {
        Ok(letterbox(images, SIZE, SIZE))
    }

    fn run(&mut self, _xs: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>> {
        let n = self.candidates.len();
        let mut out = Array::<f32, _>::zeros((1, 4 + NUM_CLASSES, n));
        for (j, (xywh, class, score)) in self.candidates.iter().enumerate() {
            for (k, v) in xywh.iter().enumerate() {
                out[[0, k, j]] = *v;
            }
            out[[0, 4 + class, j]] = *score;
        }
        Ok(vec![out.into_dyn()])
    }

    fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<Vec<Bbox>>> {
        let sizes: Vec<(u32, u32)> = xs0.iter().map(|x| (x.width(), x.height())).collect();
        self.post.postprocess(&xs, &sizes)
    }

    fn set_conf(&mut self, val: f32) {
        self.post.conf = val;
    }

    fn conf(&self) -> f32 {
        self.post.conf
    }

    fn set_iou(&mut self, val: f32) {
        self.post.iou = val;
    }

    fn iou(&self) -> f32 {
        self.post.iou
    }

    fn summary(&self) {}
}

fn frame(id: u64) -> DecodedFrame {
    DecodedFrame {
        rgba_data: Arc::new(vec![128; (SIZE * SIZE * 4) as usize]),
        width: SIZE,
        height: SIZE,
        frame_id: id,
        decode_fps: 25.0,
    }
}

#[test]
fn detected_cars_are_logged_to_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("traffic_data.db");
    let config = MonitorConfig::default();

    let detector = Detector::new(ScriptedModel::new(12), &config)
        .with_ticker(LogTicker::starting_at(Duration::ZERO, Instant::now()));

    let (frame_tx, frame_rx) = crossbeam_channel::bounded(4);
    let (_control_tx, control_rx) = crossbeam_channel::unbounded();
    let (report_tx, report_rx) = crossbeam_channel::bounded(4);
    let (sample_tx, sample_rx) = crossbeam_channel::unbounded();

    let recorder = spawn_recorder(db.clone(), sample_rx).unwrap();
    let worker = std::thread::spawn(move || {
        detector.run(frame_rx, control_rx, report_tx, sample_tx)
    });

    std::thread::sleep(Duration::from_millis(5));
    frame_tx.send(frame(1)).unwrap();
    drop(frame_tx);
    worker.join().unwrap();

    let report = report_rx.recv().unwrap();
    assert_eq!(report.detections.count(), 12);
    assert_eq!(report.detections.level, TrafficLevel::Heavy);
    assert!(report
        .detections
        .boxes
        .iter()
        .all(|b| b.id() == CAR_CLASS_ID));

    assert_eq!(recorder.join().unwrap().unwrap(), 1);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let rows = rt.block_on(async {
        let store = TrafficStore::connect(&db).await.unwrap();
        store.recent(10).await.unwrap()
    });
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].car_count, 12);
    assert_eq!(rows[0].traffic_level, "Heavy");
}
