// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 视频源描述与解析
//!
//! 命令行字符串: 纯数字 → 摄像头, 带协议头 (`udp://` `rtsp://` ...) → 网络流, 其他 → 文件

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::MonitorError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Camera(u32),
    Stream(String),
    File(PathBuf),
}

impl InputSource {
    /// FFmpeg 输入格式, 只有摄像头需要显式指定
    pub fn ffmpeg_format(&self) -> Option<&'static str> {
        match self {
            InputSource::Camera(_) => Some(camera_format()),
            _ => None,
        }
    }

    pub fn is_camera(&self) -> bool {
        matches!(self, InputSource::Camera(_))
    }

    /// 网络流输入参数 (低延迟)
    pub fn input_opts(&self) -> Vec<(&'static str, &'static str)> {
        match self {
            InputSource::Stream(url) if url.starts_with("rtsp://") => vec![
                ("rtsp_transport", "tcp"),
                ("rtsp_flags", "prefer_tcp"),
                ("fflags", "nobuffer"),
            ],
            InputSource::Stream(url) if url.starts_with("udp://") => vec![
                ("fflags", "nobuffer"),
                ("flags", "low_delay"),
                ("overrun_nonfatal", "1"),
            ],
            _ => Vec::new(),
        }
    }
}

/// 摄像头格式 - 根据平台选择
pub fn camera_format() -> &'static str {
    if cfg!(target_os = "windows") {
        "dshow"
    } else if cfg!(target_os = "macos") {
        "avfoundation"
    } else {
        "v4l2"
    }
}

/// 非 Windows 平台的摄像头设备名 (Windows 需要按索引查询设备名称)
pub fn camera_device(index: u32) -> String {
    if cfg!(target_os = "macos") {
        index.to_string()
    } else {
        format!("/dev/video{}", index)
    }
}

impl FromStr for InputSource {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MonitorError::InvalidSource("empty source".to_string()));
        }
        if s.chars().all(|c| c.is_ascii_digit()) {
            return s
                .parse()
                .map(InputSource::Camera)
                .map_err(|_| MonitorError::InvalidSource(s.to_string()));
        }
        if let Some((scheme, rest)) = s.split_once("://") {
            let valid_scheme = !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
            if !valid_scheme || rest.is_empty() {
                return Err(MonitorError::InvalidSource(s.to_string()));
            }
            return Ok(InputSource::Stream(s.to_string()));
        }
        Ok(InputSource::File(PathBuf::from(s)))
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Camera(i) => write!(f, "camera #{}", i),
            InputSource::Stream(url) => f.write_str(url),
            InputSource::File(p) => write!(f, "{}", p.display()),
        }
    }
}
