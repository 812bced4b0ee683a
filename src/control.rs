// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 操作指令: 窗口按键与标准输入共用同一套动作
//!
//! ```text
//! t = 起飞    l = 降落    h = 悬停    f = 前翻
//! w / s = 前进 / 后退     z / x = 左移 / 右移
//! up / down = 上升 / 下降 cw / ccw = 右转 / 左转
//! c = 车辆检测开/关      a = 截图    v = 录像开/关    q = 退出
//! ```

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{info, warn};

use crate::config::DroneConfig;
use crate::detection::ConfigMessage;
use crate::drone::{Direction, DroneStatus, Flip, TelloCommand};
use crate::input::RecordSwitch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Takeoff,
    Land,
    Stop,
    Flip,
    Move(Direction),
    RotateLeft,
    RotateRight,
    ToggleDetection,
    Snapshot,
    Record,
    Quit,
}

impl Action {
    /// 对应的无人机指令, 平移与旋转步长取自配置
    pub fn drone_command(&self, drone: &DroneConfig) -> Option<TelloCommand> {
        match self {
            Action::Takeoff => Some(TelloCommand::Takeoff),
            Action::Land => Some(TelloCommand::Land),
            Action::Stop => Some(TelloCommand::Stop),
            Action::Flip => Some(TelloCommand::Flip(Flip::Forward)),
            Action::Move(direction) => Some(TelloCommand::move_by(*direction, drone.move_cm)),
            Action::RotateLeft => Some(TelloCommand::ccw(drone.rotate_deg)),
            Action::RotateRight => Some(TelloCommand::cw(drone.rotate_deg)),
            _ => None,
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "t" | "takeoff" => Ok(Action::Takeoff),
            "l" | "land" => Ok(Action::Land),
            "h" | "stop" => Ok(Action::Stop),
            "f" | "flip" => Ok(Action::Flip),
            "w" | "forward" => Ok(Action::Move(Direction::Forward)),
            "s" | "back" => Ok(Action::Move(Direction::Back)),
            "z" | "left" => Ok(Action::Move(Direction::Left)),
            "x" | "right" => Ok(Action::Move(Direction::Right)),
            "up" => Ok(Action::Move(Direction::Up)),
            "down" => Ok(Action::Move(Direction::Down)),
            "ccw" => Ok(Action::RotateLeft),
            "cw" => Ok(Action::RotateRight),
            "c" | "detect" => Ok(Action::ToggleDetection),
            "a" | "snapshot" => Ok(Action::Snapshot),
            "v" | "record" => Ok(Action::Record),
            "q" | "quit" => Ok(Action::Quit),
            _ => Err("Unknown command. Use T/L/H/F/C/A/V/Q, W/S/Z/X, up/down, cw/ccw".to_string()),
        }
    }
}

/// 操作指令分发 (窗口按键与标准输入共用)
pub struct Controller {
    control: Sender<ConfigMessage>,
    stop: Arc<AtomicBool>,
    drone: Option<Sender<TelloCommand>>,
    drone_config: DroneConfig,
    status: Receiver<DroneStatus>,
    latest_status: Option<DroneStatus>,
    record: Option<Arc<RecordSwitch>>,
    detection_enabled: bool,
}

impl Controller {
    pub fn new(control: Sender<ConfigMessage>, stop: Arc<AtomicBool>) -> Self {
        Self {
            control,
            stop,
            drone: None,
            drone_config: DroneConfig::default(),
            status: crossbeam_channel::never(),
            latest_status: None,
            record: None,
            detection_enabled: true,
        }
    }

    pub fn with_drone(
        mut self,
        commands: Sender<TelloCommand>,
        status: Receiver<DroneStatus>,
        config: DroneConfig,
    ) -> Self {
        self.drone = Some(commands);
        self.status = status;
        self.drone_config = config;
        self
    }

    pub fn with_record(mut self, switch: Arc<RecordSwitch>) -> Self {
        self.record = Some(switch);
        self
    }

    /// 返回 false 表示退出
    pub fn handle(&mut self, action: Action) -> bool {
        if let Some(command) = action.drone_command(&self.drone_config) {
            match &self.drone {
                Some(tx) => {
                    let _ = tx.send(command);
                }
                None => warn!("⚠️  未连接无人机, 忽略 {:?}", action),
            }
            return true;
        }
        match action {
            Action::ToggleDetection => {
                self.detection_enabled = !self.detection_enabled;
                let _ = self
                    .control
                    .send(ConfigMessage::ToggleDetection(self.detection_enabled));
            }
            Action::Snapshot => {
                let _ = self.control.send(ConfigMessage::Snapshot);
            }
            Action::Record => match &self.record {
                Some(switch) => {
                    let on = switch.toggle();
                    info!("🎬 录像: {}", if on { "开始" } else { "停止" });
                }
                None => warn!("⚠️  当前视频源不支持录像"),
            },
            Action::Quit => {
                info!("👋 退出...");
                self.stop.store(true, Ordering::Relaxed);
                return false;
            }
            _ => {}
        }
        true
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection_enabled
    }

    pub fn has_drone(&self) -> bool {
        self.drone.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.record.as_ref().is_some_and(|r| r.is_requested())
    }

    /// 状态更新通道 (无人机线程 → 主线程)
    pub fn status_updates(&self) -> Receiver<DroneStatus> {
        self.status.clone()
    }

    /// 取最新的无人机状态
    pub fn poll_status(&mut self) -> Option<&DroneStatus> {
        if let Some(status) = self.status.try_iter().last() {
            self.latest_status = Some(status);
        }
        self.latest_status.as_ref()
    }

    /// 状态栏文字, 没有无人机时为空
    pub fn status_line(&mut self) -> Option<String> {
        let detecting = self.detection_enabled;
        self.poll_status().map(|s| s.status_line(detecting))
    }
}
