// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 完整模型实现
// 包含: 模型加载、预处理、推理、后处理

use anyhow::{bail, Result};
use image::{DynamicImage, GenericImageView};
use ndarray::{s, Array, ArrayView1, Axis, Ix2, IxDyn};
use tracing::{debug, info};

use super::ModelType;
use crate::{non_max_suppression, Bbox, DetectionConfig, OrtBackend, OrtConfig, OrtEP};

const CXYWH_OFFSET: usize = 4;

/// letterbox 缩放: 返回 (ratio, 新宽, 新高)
fn scale_wh(w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
    let r = (w1 / w0).min(h1 / h0);
    (r, (w0 * r).round(), (h0 * r).round())
}

/// YOLO 后处理器 (不依赖推理引擎)
#[derive(Debug, Clone)]
pub struct YoloPostprocessor {
    pub layout: ModelType,
    pub conf: f32,
    pub iou: f32,
    pub width: u32,  // 模型输入宽
    pub height: u32, // 模型输入高
}

impl YoloPostprocessor {
    pub fn new(layout: ModelType, width: u32, height: u32, conf: f32, iou: f32) -> Self {
        Self {
            layout,
            conf,
            iou,
            width,
            height,
        }
    }

    /// 单个候选框: 返回 (类别, 置信度, cx, cy, w, h)
    fn decode_candidate(&self, pred: ArrayView1<f32>) -> Option<(usize, f32, [f32; 4])> {
        let (score_offset, objectness) = match self.layout {
            ModelType::YOLOv8 => (CXYWH_OFFSET, 1.0),
            ModelType::YOLOv5 => (CXYWH_OFFSET + 1, pred[CXYWH_OFFSET]),
        };
        let clss = pred.slice(s![score_offset..]);
        let (id, &score) = clss
            .iter()
            .enumerate()
            .reduce(|max, x| if x.1 > max.1 { x } else { max })?;

        let confidence = objectness * score;
        if confidence < self.conf {
            return None;
        }
        Some((id, confidence, [pred[0], pred[1], pred[2], pred[3]]))
    }

    /// xs[0]: YOLOv8 [B, 4+nc, N] / YOLOv5 [B, N, 5+nc]
    /// sizes: 每张原图的 (宽, 高)
    pub fn postprocess(
        &self,
        xs: &[Array<f32, IxDyn>],
        sizes: &[(u32, u32)],
    ) -> Result<Vec<Vec<Bbox>>> {
        let preds = match xs.first() {
            Some(p) => p,
            None => bail!("model returned no outputs"),
        };
        if preds.ndim() != 3 {
            bail!("expected 3-d detection output, got shape {:?}", preds.shape());
        }
        let min_channels = match self.layout {
            ModelType::YOLOv8 => CXYWH_OFFSET + 1,
            ModelType::YOLOv5 => CXYWH_OFFSET + 2,
        };

        let mut ys = Vec::with_capacity(sizes.len());
        for (idx, anchor) in preds.axis_iter(Axis(0)).enumerate() {
            let Some(&(w0, h0)) = sizes.get(idx) else {
                bail!("output batch {} has no matching input image", idx);
            };
            let anchor = anchor.into_dimensionality::<Ix2>()?;
            let width_original = w0 as f32;
            let height_original = h0 as f32;
            let (ratio, _, _) = scale_wh(
                width_original,
                height_original,
                self.width as f32,
                self.height as f32,
            );

            // YOLOv8 按列存放候选框, YOLOv5 按行
            let candidate_axis = match self.layout {
                ModelType::YOLOv8 => Axis(1),
                ModelType::YOLOv5 => Axis(0),
            };
            let channel_axis = Axis(1 - candidate_axis.index());
            if anchor.len_of(channel_axis) < min_channels {
                bail!(
                    "{:?} output has {} channels per candidate",
                    self.layout,
                    anchor.len_of(channel_axis)
                );
            }

            let mut data: Vec<Bbox> = Vec::new();
            for pred in anchor.axis_iter(candidate_axis) {
                let Some((id, confidence, [cx, cy, w, h])) = self.decode_candidate(pred) else {
                    continue;
                };
                let cx = cx / ratio;
                let cy = cy / ratio;
                let w = w / ratio;
                let h = h / ratio;
                let x = (cx - w / 2.).max(0.0f32).min(width_original);
                let y = (cy - h / 2.).max(0.0f32).min(height_original);
                data.push(Bbox::new(
                    x,
                    y,
                    w.min(width_original - x),
                    h.min(height_original - y),
                    id,
                    confidence,
                ));
            }

            non_max_suppression(&mut data, self.iou);
            ys.push(data);
        }

        Ok(ys)
    }
}

/// YOLOv8 完整模型结构
pub struct YOLOv8 {
    engine: OrtBackend,
    post: YoloPostprocessor,
    names: Vec<String>,
    profile: bool,
}

impl YOLOv8 {
    /// 从配置创建 YOLOv8 模型
    pub fn new(config: &DetectionConfig) -> Result<Self> {
        // execution provider
        let ep = if config.trt {
            OrtEP::Trt(config.device_id)
        } else if config.cuda {
            OrtEP::CUDA(config.device_id)
        } else {
            OrtEP::CPU
        };

        let engine = OrtBackend::build(OrtConfig {
            f: config.model.clone(),
            ep,
            image_size: (config.inference_size, config.inference_size),
        })?;

        let post = YoloPostprocessor::new(
            config.model_type(),
            engine.width(),
            engine.height(),
            config.conf,
            config.iou,
        );

        // class names
        let names = engine
            .names()
            .cloned()
            .unwrap_or_else(|| vec!["Unknown".to_string()]);

        Ok(Self {
            engine,
            post,
            names,
            profile: config.profile,
        })
    }

    pub fn width(&self) -> u32 {
        self.post.width
    }

    pub fn height(&self) -> u32 {
        self.post.height
    }

}

/// letterbox: 左上对齐, 其余填充 144/255
pub fn letterbox(xs: &[DynamicImage], width: u32, height: u32) -> Array<f32, IxDyn> {
    let mut ys = Array::ones((xs.len(), 3, height as usize, width as usize)).into_dyn();
    ys.fill(144.0 / 255.0);
    for (idx, x) in xs.iter().enumerate() {
        let (w0, h0) = x.dimensions();
        let (_, w_new, h_new) = scale_wh(w0 as f32, h0 as f32, width as f32, height as f32);
        let img = x.resize_exact(
            w_new as u32,
            h_new as u32,
            image::imageops::FilterType::Triangle,
        );

        for (x, y, rgb) in img.pixels() {
            let x = x as usize;
            let y = y as usize;
            let [r, g, b, _] = rgb.0;
            ys[[idx, 0, y, x]] = (r as f32) / 255.0;
            ys[[idx, 1, y, x]] = (g as f32) / 255.0;
            ys[[idx, 2, y, x]] = (b as f32) / 255.0;
        }
    }
    ys
}

impl super::Model for YOLOv8 {
    fn preprocess(&mut self, images: &[DynamicImage]) -> Result<Array<f32, IxDyn>> {
        let t = std::time::Instant::now();
        let xs = letterbox(images, self.width(), self.height());
        if self.profile {
            debug!("[Model Preprocess]: {:?}", t.elapsed());
        }
        Ok(xs)
    }

    fn run(&mut self, xs: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>> {
        self.engine.run(xs, self.profile)
    }

    fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<Vec<Bbox>>> {
        let t = std::time::Instant::now();
        let sizes: Vec<(u32, u32)> = xs0.iter().map(|x| x.dimensions()).collect();
        let ys = self.post.postprocess(&xs, &sizes)?;
        if self.profile {
            debug!("[Model Postprocess]: {:?}", t.elapsed());
        }
        Ok(ys)
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

    fn summary(&self) {
        info!(
            "Summary: {:?} | EP {:?} | {}x{} | {} classes | conf {} iou {}",
            self.post.layout,
            self.engine.ep(),
            self.width(),
            self.height(),
            self.names.len(),
            self.post.conf,
            self.post.iou,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v8_output() -> Array<f32, IxDyn> {
        // [1, 4+3, 2]: 两个候选, 第一个是高分 car
        #[rustfmt::skip]
        let data = vec![
            100.0, 300.0, // cx
            50.0, 300.0,  // cy
            40.0, 10.0,   // w
            20.0, 10.0,   // h
            0.1, 0.05,    // person
            0.2, 0.05,    // bicycle
            0.9, 0.1,     // car
        ];
        Array::from_shape_vec((1, 7, 2), data).unwrap().into_dyn()
    }

    #[test]
    fn v8_boxes_are_mapped_back_to_original_scale() {
        let post = YoloPostprocessor::new(ModelType::YOLOv8, 640, 640, 0.25, 0.45);
        // 1280x640 → ratio 0.5
        let ys = post.postprocess(&[v8_output()], &[(1280, 640)]).unwrap();

        assert_eq!(ys.len(), 1);
        assert_eq!(ys[0].len(), 1);
        let b = &ys[0][0];
        assert_eq!(b.id(), 2);
        assert!((b.confidence() - 0.9).abs() < 1e-6);
        assert!((b.xmin() - 160.0).abs() < 1e-3);
        assert!((b.ymin() - 80.0).abs() < 1e-3);
        assert!((b.width() - 80.0).abs() < 1e-3);
        assert!((b.height() - 40.0).abs() < 1e-3);
    }

    #[test]
    fn v5_uses_objectness() {
        // [1, 2, 5+2]: 行为候选框
        #[rustfmt::skip]
        let data = vec![
            320.0, 320.0, 64.0, 32.0, 0.9, 0.1, 0.8,
            100.0, 100.0, 20.0, 20.0, 0.2, 0.0, 0.9,
        ];
        let out = Array::from_shape_vec((1, 2, 7), data).unwrap().into_dyn();
        let post = YoloPostprocessor::new(ModelType::YOLOv5, 640, 640, 0.25, 0.45);
        let ys = post.postprocess(&[out], &[(640, 640)]).unwrap();

        // 第二个候选 0.2 * 0.9 < 0.25
        assert_eq!(ys[0].len(), 1);
        assert_eq!(ys[0][0].id(), 1);
        assert!((ys[0][0].confidence() - 0.72).abs() < 1e-5);
        assert!((ys[0][0].xmin() - 288.0).abs() < 1e-3);
    }

    #[test]
    fn boxes_are_clamped_to_image() {
        #[rustfmt::skip]
        let data = vec![
            5.0,   // cx
            5.0,   // cy
            40.0,  // w
            40.0,  // h
            0.95,  // class 0
        ];
        let out = Array::from_shape_vec((1, 5, 1), data).unwrap().into_dyn();
        let post = YoloPostprocessor::new(ModelType::YOLOv8, 640, 640, 0.25, 0.45);
        let ys = post.postprocess(&[out], &[(640, 640)]).unwrap();

        let b = &ys[0][0];
        assert_eq!(b.xmin(), 0.0);
        assert_eq!(b.ymin(), 0.0);
    }

    #[test]
    fn wrong_rank_is_an_error() {
        let out = Array::<f32, _>::zeros((7, 2)).into_dyn();
        let post = YoloPostprocessor::new(ModelType::YOLOv8, 640, 640, 0.25, 0.45);
        assert!(post.postprocess(&[out], &[(640, 640)]).is_err());
    }

    #[test]
    fn letterbox_pads_and_keeps_ratio() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            64,
            32,
            image::Rgb([255, 0, 0]),
        ));
        let xs = letterbox(&[img], 32, 32);

        assert_eq!(xs.shape(), &[1, 3, 32, 32]);
        // 上半部分是图像, 下半部分是填充
        assert!((xs[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((xs[[0, 1, 0, 0]]).abs() < 1e-6);
        assert!((xs[[0, 0, 31, 0]] - 144.0 / 255.0).abs() < 1e-6);
    }
}
