// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 车流监测 (Traffic Monitor)
///
/// 系统架构:
/// 1. 采集线程: 摄像头 / Tello 视频流解码 (ez-ffmpeg)
/// 2. 检测线程: YOLO 车辆检测, 定时产生车流采样
/// 3. 记录线程: 采样写入 SQLite
/// 4. 主线程:   渲染显示 (macroquad) 或无窗口模式下读取标准输入
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, select, unbounded, Receiver};
use tracing::{error, info, warn};

use traffic_monitor::control::{Action, Controller};
use traffic_monitor::detection::Detector;
use traffic_monitor::drone::{self, TelloClient};
use traffic_monitor::input::{spawn_capture, Capture, CaptureStats, InputSource, RecordSwitch};
use traffic_monitor::logging::init_logger;
use traffic_monitor::overlay::{load_font, SnapshotWriter};
use traffic_monitor::recorder::spawn_recorder;
use traffic_monitor::{FrameReport, MonitorConfig, YOLOv8};

#[cfg(feature = "viewer")]
mod viewer;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// 车流监测参数
#[derive(Parser, Debug)]
#[command(author, version, about = "车流监测 - 摄像头/无人机车辆计数与记录", long_about = None)]
struct Args {
    /// 配置文件 (不存在时写出默认配置)
    #[arg(short, long, default_value = "monitor.json")]
    config: PathBuf,

    /// 视频源: 摄像头序号 / 流地址 / 视频文件
    #[arg(short, long)]
    source: Option<String>,

    /// 连接 Tello 无人机并使用其视频流
    #[arg(long)]
    drone: bool,

    /// ONNX 模型路径
    #[arg(short, long)]
    model: Option<String>,

    /// SQLite 数据库文件
    #[arg(long)]
    database: Option<PathBuf>,

    /// 置信度阈值
    #[arg(long)]
    conf: Option<f32>,

    /// 记录间隔 (秒)
    #[arg(long)]
    interval: Option<u64>,

    /// 使用 CUDA
    #[arg(long)]
    cuda: bool,

    /// 无窗口模式, 指令从标准输入读取
    #[arg(long)]
    headless: bool,

    /// 调试日志
    #[arg(short, long)]
    verbose: bool,

    /// JSON 格式日志
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn apply(&self, config: &mut MonitorConfig) {
        if let Some(model) = &self.model {
            config.detection.model = model.clone();
        }
        if let Some(db) = &self.database {
            config.database = db.clone();
        }
        if let Some(conf) = self.conf {
            config.detection.conf = conf;
        }
        if let Some(interval) = self.interval {
            config.log_interval_secs = interval;
        }
        if self.cuda {
            config.detection.cuda = true;
        }
    }

    fn source(&self, config: &MonitorConfig) -> Result<InputSource> {
        Ok(match &self.source {
            Some(s) => s.parse()?,
            None if self.drone => InputSource::Stream(config.drone.video_url.clone()),
            None => InputSource::Camera(0),
        })
    }
}

/// 所有工作线程句柄, 退出时按顺序回收
pub struct Pipeline {
    stop: Arc<AtomicBool>,
    capture: JoinHandle<traffic_monitor::Result<Arc<CaptureStats>>>,
    detector: JoinHandle<()>,
    recorder: JoinHandle<traffic_monitor::Result<u64>>,
    drone: Option<JoinHandle<TelloClient>>,
}

impl Pipeline {
    /// 回收所有线程; 采集失败 (打开失败或视频流中断) 作为错误返回
    pub fn shutdown(self, controller: Controller) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        // 关闭指令通道: 无人机线程降落并关闭视频流
        drop(controller);
        if let Some(handle) = self.drone {
            let _ = handle.join();
        }

        // 视频流卡住时解码线程可能收不到新帧, 最多等待 3 秒
        let deadline = Instant::now() + Duration::from_secs(3);
        while !self.capture.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        let mut outcome = Ok(());
        if self.capture.is_finished() {
            match self.capture.join() {
                Ok(Ok(stats)) => info!(
                    "📹 采集统计: 解码{} 丢弃{} 跳过{}",
                    stats.decoded(),
                    stats.dropped(),
                    stats.skipped()
                ),
                Ok(Err(e)) => {
                    error!("❌ 采集失败: {}", e);
                    outcome = Err(anyhow::Error::new(e).context("video capture failed"));
                }
                Err(_) => outcome = Err(anyhow!("capture thread panicked")),
            }
        } else {
            warn!("⚠️  采集线程未响应, 放弃等待");
        }

        let _ = self.detector.join();
        match self.recorder.join() {
            Ok(Ok(n)) => info!("💾 本次共记录 {} 条", n),
            Ok(Err(e)) => error!("❌ 记录线程失败: {}", e),
            Err(_) => error!("❌ 记录线程崩溃"),
        }
        info!("✅ 已退出");
        outcome
    }
}

fn start(args: &Args) -> Result<(Pipeline, Controller, Receiver<FrameReport>)> {
    let mut config = MonitorConfig::load(&args.config)?;
    args.apply(&mut config);
    config.validate()?;
    config.print_summary();
    let source = args.source(&config)?;

    // 无人机: 进入SDK模式并打开视频流
    let drone = if args.drone {
        let mut client = TelloClient::connect(&config.drone)?;
        client
            .start_video()
            .context("failed to start Tello video stream")?;
        match client.battery() {
            Ok(Some(level)) => info!("🔋 电量: {}%", level),
            Ok(None) => {}
            Err(e) => warn!("⚠️  电量查询失败: {}", e),
        }
        Some(drone::spawn_worker(client, config.drone.status_interval())?)
    } else {
        None
    };

    let model = YOLOv8::new(&config.detection)
        .with_context(|| format!("failed to load model {}", config.detection.model))?;
    let font = config.font.as_deref().map(load_font).transpose()?;

    let stop = Arc::new(AtomicBool::new(false));
    let detector = Detector::new(model, &config)
        .with_snapshots(SnapshotWriter::new(&config.snapshot_dir, font))
        .with_stop(Arc::clone(&stop));

    // 帧通道有界: 检测或渲染忙时丢帧, 采样通道不丢
    let (frame_tx, frame_rx) = bounded(1);
    let (report_tx, report_rx) = bounded(2);
    let (control_tx, control_rx) = unbounded();
    let (sample_tx, sample_rx) = unbounded();

    let recorder = spawn_recorder(config.database.clone(), sample_rx)?;
    let detector = std::thread::Builder::new()
        .name("detector".into())
        .spawn(move || detector.run(frame_rx, control_rx, report_tx, sample_tx))?;

    // 录像文件与截图放在同一目录; 文件源不录像 (重建上下文会从头播放)
    let recordable = !matches!(source, InputSource::File(_));
    let mut controller = Controller::new(control_tx, Arc::clone(&stop));
    let mut capture = Capture::new(source, frame_tx, Arc::clone(&stop));
    if recordable {
        let record = Arc::new(RecordSwitch::new(&config.snapshot_dir));
        controller = controller.with_record(Arc::clone(&record));
        capture = capture.with_record(record);
    }
    let capture = spawn_capture(capture)?;

    let drone_handle = match drone {
        Some(worker) => {
            controller = controller.with_drone(worker.commands, worker.status, config.drone.clone());
            Some(worker.handle)
        }
        None => None,
    };
    let pipeline = Pipeline {
        stop,
        capture,
        detector,
        recorder,
        drone: drone_handle,
    };
    Ok((pipeline, controller, report_rx))
}

/// 无窗口模式: 标准输入指令
fn run_headless(controller: &mut Controller, reports: Receiver<FrameReport>) {
    info!("⌨️  指令: t=起飞 l=降落 h=悬停 f=前翻 w/s/z/x/up/down=移动 cw/ccw=旋转 c=检测开关 a=截图 v=录像 q=退出");
    let (line_tx, line_rx) = unbounded::<String>();
    // 标准输入线程阻塞在 read_line 上, 不回收
    let _ = std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines().map_while(|l| l.ok()) {
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        });

    let mut status = controller.status_updates();
    loop {
        let mut drone_gone = false;
        select! {
            recv(line_rx) -> line => {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Action>() {
                    Ok(action) => {
                        if !controller.handle(action) {
                            break;
                        }
                    }
                    Err(msg) => println!("{}", msg),
                }
            }
            recv(status) -> update => match update {
                Ok(update) => info!("🛸 {}", update.status_line(controller.detection_enabled())),
                Err(_) => drone_gone = true,
            },
            recv(reports) -> report => {
                // 检测线程退出 = 视频流结束
                if report.is_err() {
                    info!("📹 视频流结束");
                    break;
                }
            }
        }
        // 无人机线程已退出
        if drone_gone {
            status = crossbeam_channel::never();
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.verbose, args.log_json);

    info!("🚀 车流监测启动");
    let (pipeline, controller, reports) = start(&args)?;

    #[cfg(feature = "viewer")]
    {
        if !args.headless {
            return viewer::run(pipeline, controller, reports);
        }
    }

    let mut controller = controller;
    run_headless(&mut controller, reports);
    pipeline.shutdown(controller)
}
