// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 监测配置 - 通过JSON文件调整参数, 命令行参数可覆盖

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MonitorError, Result};
use crate::models::ModelType;
use crate::traffic::TrafficThresholds;
use crate::CAR_CLASS_ID;

/// 检测模型参数
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    pub model: String,                 // ONNX 模型路径
    pub model_type: Option<ModelType>, // 不填则从路径推断
    pub inference_size: u32,           // 推理输入尺寸
    pub conf: f32,                     // 置信度阈值
    pub iou: f32,                      // NMS IOU阈值
    pub classes: Vec<usize>,           // 计入车辆的COCO类别
    pub min_box_width: f32,            // 过滤远处小车 (0 = 不过滤)
    pub min_box_height: f32,
    pub cuda: bool,
    pub trt: bool,
    pub device_id: i32,
    pub profile: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model: "models/yolov8n.onnx".to_string(),
            model_type: None,
            inference_size: 640,
            conf: 0.25,
            iou: 0.45,
            classes: vec![CAR_CLASS_ID],
            min_box_width: 0.0,
            min_box_height: 0.0,
            cuda: false,
            trt: false,
            device_id: 0,
            profile: false,
        }
    }
}

impl DetectionConfig {
    pub fn model_type(&self) -> ModelType {
        self.model_type
            .unwrap_or_else(|| ModelType::from_path(&self.model))
    }
}

/// Tello 无人机参数
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DroneConfig {
    pub address: String,    // 指令端口
    pub bind: String,       // 本地UDP端口
    pub video_url: String,  // 视频流
    pub timeout_ms: u64,    // 指令应答超时
    pub status_interval_secs: u64, // 状态栏刷新间隔 (0 = 不查询)
    pub move_cm: u32,       // 每次平移距离
    pub rotate_deg: u32,    // 每次旋转角度
}

impl Default for DroneConfig {
    fn default() -> Self {
        Self {
            address: "192.168.10.1:8889".to_string(),
            bind: "0.0.0.0:8889".to_string(),
            video_url: "udp://0.0.0.0:11111".to_string(),
            timeout_ms: 7000,
            status_interval_secs: 5,
            move_cm: 50,
            rotate_deg: 45,
        }
    }
}

impl DroneConfig {
    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then(|| Duration::from_secs(self.status_interval_secs))
    }
}

/// 离线统计参数
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    pub csv_path: PathBuf,
    pub recent_limit: u32,
    pub watch_interval_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("traffic_summary.csv"),
            recent_limit: 10,
            watch_interval_secs: 30,
        }
    }
}

/// 完整配置
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub database: PathBuf,
    pub log_interval_secs: u64,
    pub thresholds: TrafficThresholds,
    pub detection: DetectionConfig,
    pub drone: DroneConfig,
    pub report: ReportConfig,
    pub snapshot_dir: PathBuf,
    pub font: Option<PathBuf>, // 截图标签字体 (TTF)
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("traffic_data.db"),
            log_interval_secs: 10,
            thresholds: TrafficThresholds::default(),
            detection: DetectionConfig::default(),
            drone: DroneConfig::default(),
            report: ReportConfig::default(),
            snapshot_dir: PathBuf::from("Photos"),
            font: None,
        }
    }
}

impl MonitorConfig {
    /// 从JSON文件加载配置, 文件不存在时写出默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => {
                let config: Self = serde_json::from_str(&json)?;
                config.validate()?;
                info!("✅ 配置已从 {} 加载", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    warn!("⚠️  默认配置写出失败: {}", e);
                }
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        info!("💾 配置已保存到 {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.thresholds.is_valid() {
            return Err(MonitorError::config(format!(
                "moderate threshold {} is above heavy threshold {}",
                self.thresholds.moderate, self.thresholds.heavy
            )));
        }
        if self.log_interval_secs == 0 {
            return Err(MonitorError::config("log_interval_secs must be positive"));
        }
        let d = &self.detection;
        if !(0.0..=1.0).contains(&d.conf) || !(0.0..=1.0).contains(&d.iou) {
            return Err(MonitorError::config("conf and iou must be within 0..=1"));
        }
        if d.classes.is_empty() {
            return Err(MonitorError::config("detection.classes must not be empty"));
        }
        if d.inference_size == 0 || d.inference_size % 32 != 0 {
            return Err(MonitorError::config(
                "inference_size must be a positive multiple of 32",
            ));
        }
        Ok(())
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️  当前监测配置:");
        info!("  数据库: {}", self.database.display());
        info!("  记录间隔: {}s", self.log_interval_secs);
        info!(
            "  车流阈值: Moderate ≥ {}, Heavy ≥ {}",
            self.thresholds.moderate, self.thresholds.heavy
        );
        info!(
            "  模型: {} ({:?}) conf {:.2} iou {:.2}",
            self.detection.model,
            self.detection.model_type(),
            self.detection.conf,
            self.detection.iou
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.json");

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.json");
        std::fs::write(
            &path,
            r#"{ "log_interval_secs": 30, "detection": { "classes": [2, 7] } }"#,
        )
        .unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.log_interval_secs, 30);
        assert_eq!(config.detection.classes, vec![2, 7]);
        assert_eq!(config.detection.iou, 0.45);
        assert_eq!(config.thresholds, TrafficThresholds::default());
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let mut config = MonitorConfig::default();
        config.thresholds = TrafficThresholds {
            moderate: 12,
            heavy: 10,
        };
        assert!(matches!(config.validate(), Err(MonitorError::Config { .. })));
    }

    #[test]
    fn zero_status_interval_disables_polling() {
        let mut drone = DroneConfig::default();
        assert_eq!(drone.status_interval(), Some(Duration::from_secs(5)));
        drone.status_interval_secs = 0;
        assert_eq!(drone.status_interval(), None);
    }

    #[test]
    fn model_type_inferred_from_path() {
        let mut d = DetectionConfig::default();
        assert_eq!(d.model_type(), ModelType::YOLOv8);
        d.model = "models/yolov5s.onnx".into();
        assert_eq!(d.model_type(), ModelType::YOLOv5);
        d.model_type = Some(ModelType::YOLOv8);
        assert_eq!(d.model_type(), ModelType::YOLOv8);
    }
}
