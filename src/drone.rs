// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! Tello 无人机指令客户端 (SDK 文本协议, UDP 8889)
//!
//! 每条指令发出后等待应答: `ok` 成功, `error...` 被拒绝, 其他文本为查询值.
//! 发送前丢弃缓冲中的过期应答, 与指令类型不符的应答 (查询收到 `ok`) 跳过

use std::fmt;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use crate::config::DroneConfig;
use crate::error::{MonitorError, Result};

/// 翻转方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flip {
    Left,
    Right,
    Forward,
    Back,
}

impl Flip {
    fn code(&self) -> char {
        match self {
            Flip::Left => 'l',
            Flip::Right => 'r',
            Flip::Forward => 'f',
            Flip::Back => 'b',
        }
    }
}

/// 平移方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Back,
}

impl Direction {
    fn word(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Forward => "forward",
            Direction::Back => "back",
        }
    }

    fn from_word(word: &str) -> Option<Self> {
        Some(match word {
            "up" => Direction::Up,
            "down" => Direction::Down,
            "left" => Direction::Left,
            "right" => Direction::Right,
            "forward" => Direction::Forward,
            "back" => Direction::Back,
            _ => return None,
        })
    }
}

/// SDK 指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelloCommand {
    Command,
    StreamOn,
    StreamOff,
    Takeoff,
    Land,
    Emergency,
    Stop,
    Flip(Flip),
    /// 厘米, 20..=500
    Move(Direction, u32),
    /// 顺时针旋转角度, 1..=360
    Cw(u32),
    Ccw(u32),
    /// 左右, 前后, 上下, 偏航, 各 -100..=100
    Rc(i32, i32, i32, i32),
    Battery,
    Height,
    Speed,
    FlightTime,
    Attitude,
}

impl TelloCommand {
    pub fn rc(a: i32, b: i32, c: i32, d: i32) -> Self {
        let clamp = |v: i32| v.clamp(-100, 100);
        TelloCommand::Rc(clamp(a), clamp(b), clamp(c), clamp(d))
    }

    pub fn move_by(direction: Direction, cm: u32) -> Self {
        TelloCommand::Move(direction, cm.clamp(20, 500))
    }

    pub fn cw(degrees: u32) -> Self {
        TelloCommand::Cw(degrees.clamp(1, 360))
    }

    pub fn ccw(degrees: u32) -> Self {
        TelloCommand::Ccw(degrees.clamp(1, 360))
    }

    /// `rc` 指令没有应答
    pub fn expects_reply(&self) -> bool {
        !matches!(self, TelloCommand::Rc(..))
    }

    /// 查询指令应答数值, 其余指令应答 `ok`
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            TelloCommand::Battery
                | TelloCommand::Height
                | TelloCommand::Speed
                | TelloCommand::FlightTime
                | TelloCommand::Attitude
        )
    }

    /// 应答是否属于本指令: 查询不接受 `ok`, 动作只接受 `ok`
    fn matches_reply(&self, reply: &str) -> bool {
        if reply.to_lowercase().starts_with("error") {
            return true;
        }
        self.is_query() != reply.eq_ignore_ascii_case("ok")
    }

    /// 解析命令行文本, 例如 "flip f" / "battery?" / "forward 50"
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let head = parts.next()?.to_lowercase();
        let args: Vec<&str> = parts.collect();
        let cmd = match (head.as_str(), args.as_slice()) {
            ("command", []) => TelloCommand::Command,
            ("streamon", []) => TelloCommand::StreamOn,
            ("streamoff", []) => TelloCommand::StreamOff,
            ("takeoff", []) => TelloCommand::Takeoff,
            ("land", []) => TelloCommand::Land,
            ("emergency", []) => TelloCommand::Emergency,
            ("stop", []) => TelloCommand::Stop,
            ("battery?", []) => TelloCommand::Battery,
            ("height?", []) => TelloCommand::Height,
            ("speed?", []) => TelloCommand::Speed,
            ("time?", []) => TelloCommand::FlightTime,
            ("attitude?", []) => TelloCommand::Attitude,
            ("flip", [dir]) => TelloCommand::Flip(match *dir {
                "l" => Flip::Left,
                "r" => Flip::Right,
                "f" => Flip::Forward,
                "b" => Flip::Back,
                _ => return None,
            }),
            ("rc", [a, b, c, d]) => TelloCommand::rc(
                a.parse().ok()?,
                b.parse().ok()?,
                c.parse().ok()?,
                d.parse().ok()?,
            ),
            ("cw", [deg]) => TelloCommand::cw(deg.parse().ok()?),
            ("ccw", [deg]) => TelloCommand::ccw(deg.parse().ok()?),
            (word, [cm]) => TelloCommand::move_by(Direction::from_word(word)?, cm.parse().ok()?),
            _ => return None,
        };
        Some(cmd)
    }
}

impl fmt::Display for TelloCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelloCommand::Command => f.write_str("command"),
            TelloCommand::StreamOn => f.write_str("streamon"),
            TelloCommand::StreamOff => f.write_str("streamoff"),
            TelloCommand::Takeoff => f.write_str("takeoff"),
            TelloCommand::Land => f.write_str("land"),
            TelloCommand::Emergency => f.write_str("emergency"),
            TelloCommand::Stop => f.write_str("stop"),
            TelloCommand::Flip(dir) => write!(f, "flip {}", dir.code()),
            TelloCommand::Move(dir, cm) => write!(f, "{} {}", dir.word(), cm),
            TelloCommand::Cw(deg) => write!(f, "cw {}", deg),
            TelloCommand::Ccw(deg) => write!(f, "ccw {}", deg),
            TelloCommand::Rc(a, b, c, d) => write!(f, "rc {} {} {} {}", a, b, c, d),
            TelloCommand::Battery => f.write_str("battery?"),
            TelloCommand::Height => f.write_str("height?"),
            TelloCommand::Speed => f.write_str("speed?"),
            TelloCommand::FlightTime => f.write_str("time?"),
            TelloCommand::Attitude => f.write_str("attitude?"),
        }
    }
}

/// 指令应答
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelloReply {
    Ok,
    Value(String),
    NoReply,
}

/// `height?` 应答: "10dm" → 100 厘米
pub fn parse_height(reply: &str) -> Option<i32> {
    let reply = reply.trim();
    match reply.strip_suffix("dm") {
        Some(dm) => dm.trim().parse::<i32>().ok().map(|v| v * 10),
        None => reply.trim_end_matches("cm").trim().parse().ok(),
    }
}

/// `attitude?` 应答: "pitch:0;roll:0;yaw:-12;" → -12
pub fn parse_yaw(reply: &str) -> Option<i32> {
    reply
        .split(';')
        .filter_map(|kv| kv.split_once(':'))
        .find(|(k, _)| k.trim() == "yaw")
        .and_then(|(_, v)| v.trim().parse().ok())
}

/// 状态栏数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DroneStatus {
    pub battery: Option<u32>,
    pub height_cm: Option<i32>,
    pub heading: Option<i32>,
    pub flying: bool,
}

impl DroneStatus {
    /// "Batt: 87  Alt: 30  Hdg: -12  Rdy: true  CarDetect: true"
    pub fn status_line(&self, detecting: bool) -> String {
        fn or_dash<T: fmt::Display>(v: Option<T>) -> String {
            v.map_or_else(|| "--".to_string(), |v| v.to_string())
        }
        format!(
            "Batt: {}  Alt: {}  Hdg: {}  Rdy: {}  CarDetect: {}",
            or_dash(self.battery),
            or_dash(self.height_cm),
            or_dash(self.heading),
            self.flying,
            detecting
        )
    }
}

pub struct TelloClient {
    socket: UdpSocket,
    drone: SocketAddr,
    timeout: Duration,
    flying: bool,
}

impl TelloClient {
    pub fn connect(config: &DroneConfig) -> Result<Self> {
        let drone = config
            .address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| MonitorError::config(format!("bad drone address {}", config.address)))?;
        let socket = UdpSocket::bind(config.bind.as_str())?;
        let timeout = Duration::from_millis(config.timeout_ms.max(1));
        socket.set_read_timeout(Some(timeout))?;
        info!("🛸 Tello 指令通道: {} → {}", socket.local_addr()?, drone);
        Ok(Self {
            socket,
            drone,
            timeout,
            flying: false,
        })
    }

    pub fn is_flying(&self) -> bool {
        self.flying
    }

    /// 丢弃上一条指令超时后才到达的应答
    fn drain_stale(&mut self) -> Result<()> {
        self.socket.set_nonblocking(true)?;
        let mut buf = [0u8; 1024];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((n, _)) => debug!("丢弃过期应答: {}", String::from_utf8_lossy(&buf[..n]).trim()),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("清理接收缓冲: {}", e);
                    break;
                }
            }
        }
        self.socket.set_nonblocking(false)?;
        Ok(())
    }

    pub fn send(&mut self, command: &TelloCommand) -> Result<TelloReply> {
        let text = command.to_string();
        self.drain_stale()?;
        debug!("→ {}", text);
        self.socket.send_to(text.as_bytes(), self.drone)?;
        if !command.expects_reply() {
            return Ok(TelloReply::NoReply);
        }

        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; 1024];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.timed_out(command, text));
            }
            self.socket.set_read_timeout(Some(remaining))?;
            let (n, from) = match self.socket.recv_from(&mut buf) {
                Ok(r) => r,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(self.timed_out(command, text));
                }
                Err(e) => return Err(e.into()),
            };
            // 其他来源的报文 (例如状态广播) 忽略
            if from.ip() != self.drone.ip() {
                continue;
            }
            let reply = String::from_utf8_lossy(&buf[..n]).trim().to_string();
            debug!("← {}", reply);

            if reply.is_empty() {
                return Err(MonitorError::DroneProtocol {
                    command: text,
                    reply,
                });
            }
            if !command.matches_reply(&reply) {
                debug!("应答 `{}` 不属于 `{}`, 继续等待", reply, text);
                continue;
            }
            if reply.eq_ignore_ascii_case("ok") {
                self.track_state(command);
                return Ok(TelloReply::Ok);
            }
            if reply.to_lowercase().starts_with("error") {
                return Err(MonitorError::DroneRejected {
                    command: text,
                    reply,
                });
            }
            return Ok(TelloReply::Value(reply));
        }
    }

    fn timed_out(&mut self, command: &TelloCommand, text: String) -> MonitorError {
        // 起飞应答超时时无人机可能已经起飞, 退出时仍需降落
        if *command == TelloCommand::Takeoff {
            warn!("⚠️  起飞应答超时, 按飞行中处理");
            self.flying = true;
        }
        MonitorError::DroneTimeout {
            command: text,
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }

    fn track_state(&mut self, command: &TelloCommand) {
        match command {
            TelloCommand::Takeoff => self.flying = true,
            TelloCommand::Land | TelloCommand::Emergency => self.flying = false,
            _ => {}
        }
    }

    /// 进入SDK模式并打开视频流
    pub fn start_video(&mut self) -> Result<()> {
        self.send(&TelloCommand::Command)?;
        self.send(&TelloCommand::StreamOn)?;
        info!("[Tello] Sent 'command' and 'streamon' to drone");
        Ok(())
    }

    pub fn battery(&mut self) -> Result<Option<u32>> {
        match self.send(&TelloCommand::Battery)? {
            TelloReply::Value(v) => Ok(v.parse().ok()),
            _ => Ok(None),
        }
    }

    fn query(&mut self, command: &TelloCommand) -> Option<String> {
        match self.send(command) {
            Ok(TelloReply::Value(v)) => Some(v),
            Ok(_) => None,
            Err(e) => {
                debug!("状态查询失败: {}", e);
                None
            }
        }
    }

    /// 电量, 高度, 航向; 查询失败的项为空
    pub fn status(&mut self) -> DroneStatus {
        DroneStatus {
            battery: self
                .query(&TelloCommand::Battery)
                .and_then(|v| v.parse().ok()),
            height_cm: self
                .query(&TelloCommand::Height)
                .and_then(|v| parse_height(&v)),
            heading: self
                .query(&TelloCommand::Attitude)
                .and_then(|v| parse_yaw(&v)),
            flying: self.flying,
        }
    }

    /// 退出前: 飞行中先降落, 然后关闭视频流
    pub fn shutdown(&mut self) {
        if self.flying {
            if let Err(e) = self.send(&TelloCommand::Land) {
                warn!("⚠️  降落失败: {}", e);
            }
        }
        if let Err(e) = self.send(&TelloCommand::StreamOff) {
            warn!("⚠️  关闭视频流失败: {}", e);
        }
    }
}

/// 指令线程句柄
pub struct DroneWorker {
    pub commands: Sender<TelloCommand>,
    pub status: Receiver<DroneStatus>,
    pub handle: JoinHandle<TelloClient>,
}

/// 指令线程: 应答最长要等待 timeout, 不能阻塞渲染线程.
/// 空闲时每隔 status_interval 查询一次状态; 发送端全部关闭后执行 shutdown 并交回客户端
pub fn spawn_worker(
    mut client: TelloClient,
    status_interval: Option<Duration>,
) -> std::io::Result<DroneWorker> {
    let (tx, rx) = crossbeam_channel::unbounded::<TelloCommand>();
    let (status_tx, status_rx) = crossbeam_channel::bounded::<DroneStatus>(4);
    let handle = std::thread::Builder::new()
        .name("tello".into())
        .spawn(move || {
            let mut last_status = Instant::now();
            loop {
                let command = match status_interval {
                    Some(interval) => {
                        match rx.recv_timeout(interval.saturating_sub(last_status.elapsed())) {
                            Ok(command) => Some(command),
                            Err(RecvTimeoutError::Timeout) => None,
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                    None => match rx.recv() {
                        Ok(command) => Some(command),
                        Err(_) => break,
                    },
                };

                if let Some(command) = command {
                    match client.send(&command) {
                        Ok(TelloReply::Value(v)) => info!("[Tello] {} → {}", command, v),
                        Ok(_) => info!("[Tello] {}", command),
                        Err(e) => error!("❌ [Tello] {}", e),
                    }
                }

                if let Some(interval) = status_interval {
                    if last_status.elapsed() >= interval {
                        let status = client.status();
                        debug!("🛸 {:?}", status);
                        let _ = status_tx.try_send(status);
                        last_status = Instant::now();
                    }
                }
            }
            client.shutdown();
            client
        })?;
    Ok(DroneWorker {
        commands: tx,
        status: status_rx,
        handle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_render_sdk_text() {
        assert_eq!(TelloCommand::StreamOn.to_string(), "streamon");
        assert_eq!(TelloCommand::Flip(Flip::Forward).to_string(), "flip f");
        assert_eq!(TelloCommand::rc(150, -20, 0, -300).to_string(), "rc 100 -20 0 -100");
        assert_eq!(TelloCommand::Battery.to_string(), "battery?");
    }

    #[test]
    fn parse_command_text() {
        assert_eq!(TelloCommand::parse("takeoff"), Some(TelloCommand::Takeoff));
        assert_eq!(
            TelloCommand::parse("flip b"),
            Some(TelloCommand::Flip(Flip::Back))
        );
        assert_eq!(
            TelloCommand::parse("rc 10 20 30 40"),
            Some(TelloCommand::Rc(10, 20, 30, 40))
        );
        assert_eq!(TelloCommand::parse("rc 10 20"), None);
        assert_eq!(TelloCommand::parse("flip x"), None);
        assert_eq!(TelloCommand::parse("land now"), None);
        assert_eq!(TelloCommand::parse(""), None);
    }

    #[test]
    fn rc_has_no_reply() {
        assert!(!TelloCommand::rc(0, 0, 0, 0).expects_reply());
        assert!(TelloCommand::Land.expects_reply());
    }

    #[test]
    fn movement_commands_are_clamped() {
        assert_eq!(
            TelloCommand::move_by(Direction::Forward, 50).to_string(),
            "forward 50"
        );
        assert_eq!(TelloCommand::move_by(Direction::Up, 5).to_string(), "up 20");
        assert_eq!(TelloCommand::move_by(Direction::Back, 900).to_string(), "back 500");
        assert_eq!(TelloCommand::cw(0).to_string(), "cw 1");
        assert_eq!(TelloCommand::ccw(720).to_string(), "ccw 360");
        assert_eq!(
            TelloCommand::parse("left 30"),
            Some(TelloCommand::Move(Direction::Left, 30))
        );
        assert_eq!(TelloCommand::parse("cw 45"), Some(TelloCommand::Cw(45)));
        assert_eq!(TelloCommand::parse("down"), None);
        assert_eq!(TelloCommand::parse("sideways 30"), None);
    }

    #[test]
    fn replies_are_matched_to_command_kind() {
        assert!(TelloCommand::Battery.matches_reply("87"));
        assert!(!TelloCommand::Battery.matches_reply("ok"));
        assert!(TelloCommand::Land.matches_reply("ok"));
        assert!(!TelloCommand::Land.matches_reply("87"));
        assert!(TelloCommand::Takeoff.matches_reply("error Motor stop"));
        assert!(TelloCommand::Height.matches_reply("error"));
    }

    #[test]
    fn status_replies_are_parsed() {
        assert_eq!(parse_height("10dm"), Some(100));
        assert_eq!(parse_height("0dm"), Some(0));
        assert_eq!(parse_height("35"), Some(35));
        assert_eq!(parse_height("high"), None);
        assert_eq!(parse_yaw("pitch:0;roll:1;yaw:-12;"), Some(-12));
        assert_eq!(parse_yaw("pitch:0;roll:1;"), None);
    }

    #[test]
    fn status_line_shows_missing_values() {
        let status = DroneStatus {
            battery: Some(87),
            height_cm: None,
            heading: Some(90),
            flying: true,
        };
        assert_eq!(
            status.status_line(false),
            "Batt: 87  Alt: --  Hdg: 90  Rdy: true  CarDetect: false"
        );
    }
}
