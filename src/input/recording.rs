// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 录像开关
//!
//! 按键只修改请求状态; 采集线程发现请求与当前输出不一致时结束本轮解码,
//! 按新状态重建 FFmpeg 上下文 (开始录像时多一个 mp4 输出)

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;

#[derive(Debug)]
pub struct RecordSwitch {
    dir: PathBuf,
    requested: AtomicBool,
}

impl RecordSwitch {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            requested: AtomicBool::new(false),
        }
    }

    /// 切换录像, 返回切换后的状态
    pub fn toggle(&self) -> bool {
        !self.requested.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// 当前输出与请求不一致, 需要重建
    pub fn changed(&self, recording: bool) -> bool {
        self.is_requested() != recording
    }

    /// 新录像文件: <dir>/video_<时间>.mp4
    pub fn next_path(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        Ok(self
            .dir
            .join(format!("video_{}.mp4", crate::gen_time_string(""))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_flips_request() {
        let switch = RecordSwitch::new("Photos");
        assert!(!switch.is_requested());
        assert!(switch.toggle());
        assert!(switch.is_requested());
        assert!(switch.changed(false));
        assert!(!switch.changed(true));
        assert!(!switch.toggle());
        assert!(!switch.is_requested());
    }

    #[test]
    fn next_path_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let switch = RecordSwitch::new(dir.path().join("Photos"));

        let path = switch.next_path().unwrap();
        assert!(dir.path().join("Photos").is_dir());
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("video_")));
    }
}
