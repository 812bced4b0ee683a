// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 渲染器 (Viewer)
///
/// 主线程: 只保留最新一份检测报告, 绘制画面 + 检测框 + 车流状态, 处理按键
use std::time::Instant;

use crossbeam_channel::{Receiver, TryRecvError};
use macroquad::prelude::*;
use tracing::info;

use traffic_monitor::control::{Action, Controller};
use traffic_monitor::drone::Direction;
use traffic_monitor::overlay::{box_label, hud_lines};
use traffic_monitor::{CarDetections, FrameReport};

use super::Pipeline;

// W/S 前后, Z/X 左右, ↑/↓ 升降, ←/→ 旋转
const KEYS: [(KeyCode, Action); 16] = [
    (KeyCode::Q, Action::Quit),
    (KeyCode::C, Action::ToggleDetection),
    (KeyCode::A, Action::Snapshot),
    (KeyCode::V, Action::Record),
    (KeyCode::T, Action::Takeoff),
    (KeyCode::L, Action::Land),
    (KeyCode::H, Action::Stop),
    (KeyCode::F, Action::Flip),
    (KeyCode::W, Action::Move(Direction::Forward)),
    (KeyCode::S, Action::Move(Direction::Back)),
    (KeyCode::Z, Action::Move(Direction::Left)),
    (KeyCode::X, Action::Move(Direction::Right)),
    (KeyCode::Up, Action::Move(Direction::Up)),
    (KeyCode::Down, Action::Move(Direction::Down)),
    (KeyCode::Left, Action::RotateLeft),
    (KeyCode::Right, Action::RotateRight),
];

struct Viewer {
    reports: Receiver<FrameReport>,
    texture: Option<Texture2D>,
    detections: CarDetections,
    inference_fps: f64,
    decode_fps: f64,
    stream_ended: bool,

    render_count: u64,
    render_last: Instant,
    render_fps: f64,
}

impl Viewer {
    fn new(reports: Receiver<FrameReport>) -> Self {
        Self {
            reports,
            texture: None,
            detections: CarDetections::empty(),
            inference_fps: 0.0,
            decode_fps: 0.0,
            stream_ended: false,
            render_count: 0,
            render_last: Instant::now(),
            render_fps: 0.0,
        }
    }

    /// 只取最新一帧, 旧帧丢弃
    fn update(&mut self) {
        let mut latest = None;
        loop {
            match self.reports.try_recv() {
                Ok(report) => latest = Some(report),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.stream_ended {
                        info!("📹 视频流结束");
                    }
                    self.stream_ended = true;
                    break;
                }
            }
        }
        let Some(report) = latest else { return };

        let frame = &report.frame;
        // 只在分辨率变化时重建纹理
        let needs_rebuild = match &self.texture {
            Some(tex) => tex.width() != frame.width as f32 || tex.height() != frame.height as f32,
            None => true,
        };
        if needs_rebuild {
            let texture =
                Texture2D::from_rgba8(frame.width as u16, frame.height as u16, &frame.rgba_data);
            texture.set_filter(FilterMode::Linear);
            self.texture = Some(texture);
        } else if let Some(tex) = &self.texture {
            let img = Image {
                bytes: frame.rgba_data.to_vec(),
                width: frame.width as u16,
                height: frame.height as u16,
            };
            tex.update(&img);
        }

        self.detections = report.detections;
        self.inference_fps = report.inference_fps;
        self.decode_fps = frame.decode_fps;
    }

    fn draw(&mut self, controller: &mut Controller) {
        clear_background(BLACK);

        if let Some(texture) = &self.texture {
            // 等比缩放居中
            let scale = (screen_width() / texture.width()).min(screen_height() / texture.height());
            let w = texture.width() * scale;
            let h = texture.height() * scale;
            let ox = (screen_width() - w) / 2.0;
            let oy = (screen_height() - h) / 2.0;

            draw_texture_ex(
                texture,
                ox,
                oy,
                WHITE,
                DrawTextureParams {
                    dest_size: Some(vec2(w, h)),
                    ..Default::default()
                },
            );

            for bbox in &self.detections.boxes {
                let x = bbox.xmin() * scale + ox;
                let y = bbox.ymin() * scale + oy;
                draw_rectangle_lines(x, y, bbox.width() * scale, bbox.height() * scale, 2.0, GREEN);
                draw_text(&box_label(bbox), x, y - 5.0, 20.0, GREEN);
            }
        } else {
            draw_text("等待视频流...", 20.0, screen_height() / 2.0, 32.0, WHITE);
        }

        let [cars, level] = hud_lines(&self.detections);
        draw_text(&cars, 10.0, 30.0, 32.0, BLUE);
        draw_text(&level, 10.0, 62.0, 32.0, RED);

        self.render_count += 1;
        let now = Instant::now();
        if now.duration_since(self.render_last).as_secs() >= 1 {
            self.render_fps =
                self.render_count as f64 / now.duration_since(self.render_last).as_secs_f64();
            self.render_count = 0;
            self.render_last = now;
        }

        let status = format!(
            "decode {:.0}fps | detect {:.0}fps | render {:.0}fps | detection {}{}",
            self.decode_fps,
            self.inference_fps,
            self.render_fps,
            if controller.detection_enabled() { "ON" } else { "OFF" },
            if controller.has_drone() { " | T/L/H/F WSZX arrows drone" } else { "" }
        );
        draw_text(&status, 10.0, screen_height() - 10.0, 18.0, WHITE);
        if let Some(line) = controller.status_line() {
            draw_text(&line, 10.0, screen_height() - 34.0, 22.0, YELLOW);
        }
        if controller.is_recording() {
            draw_text("REC", screen_width() - 70.0, 30.0, 32.0, RED);
        }
    }
}

fn window_conf() -> Conf {
    Conf {
        window_title: "Traffic Monitor".to_string(),
        window_width: 1280,
        window_height: 720,
        high_dpi: true,
        ..Default::default()
    }
}

/// 窗口主循环; 按 Q 或视频流结束后回收线程
pub fn run(
    pipeline: Pipeline,
    mut controller: Controller,
    reports: Receiver<FrameReport>,
) -> anyhow::Result<()> {
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    macroquad::Window::from_config(window_conf(), async move {
        let mut viewer = Viewer::new(reports);
        'main: loop {
            viewer.update();
            if viewer.stream_ended {
                break 'main;
            }
            viewer.draw(&mut controller);

            for (key, action) in KEYS {
                if is_key_pressed(key) && !controller.handle(action) {
                    break 'main;
                }
            }
            next_frame().await;
        }
        let _ = done_tx.send(pipeline.shutdown(controller));
    });
    done_rx.try_recv().unwrap_or(Ok(()))
}
