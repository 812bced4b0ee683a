// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// ONNX Runtime 推理引擎封装

use anyhow::{bail, Context, Result};
use ndarray::{Array, IxDyn};
use ort::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    GraphOptimizationLevel, Session, TensorRTExecutionProvider,
};
use tracing::{debug, info};

/// 执行后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrtEP {
    CPU,
    CUDA(i32),
    Trt(i32),
}

impl OrtEP {
    fn dispatch(&self) -> Vec<ExecutionProviderDispatch> {
        match *self {
            OrtEP::CPU => vec![CPUExecutionProvider::default().build()],
            OrtEP::CUDA(id) => vec![
                CUDAExecutionProvider::default().with_device_id(id).build(),
                CPUExecutionProvider::default().build(),
            ],
            OrtEP::Trt(id) => vec![
                TensorRTExecutionProvider::default()
                    .with_device_id(id)
                    .build(),
                CUDAExecutionProvider::default().with_device_id(id).build(),
                CPUExecutionProvider::default().build(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub f: String,
    pub ep: OrtEP,
    pub image_size: (u32, u32), // 动态输入时使用 (height, width)
}

pub struct OrtBackend {
    session: Session,
    ep: OrtEP,
    input_name: String,
    output_names: Vec<String>,
    height: u32,
    width: u32,
    names: Option<Vec<String>>,
}

impl OrtBackend {
    pub fn build(args: OrtConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_execution_providers(args.ep.dispatch())?
            .commit_from_file(&args.f)
            .with_context(|| format!("failed to load model {}", args.f))?;

        let input = match session.inputs.first() {
            Some(input) => input,
            None => bail!("model {} has no inputs", args.f),
        };
        let input_name = input.name.clone();
        let dims = input
            .input_type
            .tensor_dimensions()
            .cloned()
            .unwrap_or_default();
        if dims.len() != 4 {
            bail!("expected NCHW input, got {:?}", dims);
        }
        // 动态维度为 -1
        let height = if dims[2] > 0 {
            dims[2] as u32
        } else {
            args.image_size.0
        };
        let width = if dims[3] > 0 {
            dims[3] as u32
        } else {
            args.image_size.1
        };

        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        let output_shape = session
            .outputs
            .first()
            .and_then(|o| o.output_type.tensor_dimensions().cloned())
            .unwrap_or_default();

        // ultralytics 导出的模型在 metadata 中带有类别名: {0: 'person', 1: 'bicycle', ...}
        let names = session
            .metadata()
            .ok()
            .and_then(|m| m.custom("names").ok().flatten())
            .map(|s| parse_names(&s));

        info!(
            "✅ 模型加载成功: {} | 输入 {} {}x{} | 输出 {:?} | {:?}",
            args.f, input_name, width, height, output_shape, args.ep
        );

        Ok(Self {
            session,
            ep: args.ep,
            input_name,
            output_names,
            height,
            width,
            names,
        })
    }

    pub fn run(&mut self, xs: Array<f32, IxDyn>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        let t = std::time::Instant::now();
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => xs.view()]?)?;

        let mut ys = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let y = outputs[name.as_str()]
                .try_extract_tensor::<f32>()?
                .into_owned();
            ys.push(y);
        }
        if profile {
            debug!("[ORT Inference]: {:?}", t.elapsed());
        }
        Ok(ys)
    }

    pub fn ep(&self) -> OrtEP {
        self.ep
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn names(&self) -> Option<&Vec<String>> {
        self.names.as_ref()
    }
}

/// 解析 "{0: 'person', 1: 'bicycle'}" 形式的类别表
fn parse_names(raw: &str) -> Vec<String> {
    raw.trim_matches(|c| c == '{' || c == '}')
        .split(',')
        .filter_map(|item| item.split_once(':'))
        .map(|(_, name)| {
            name.trim()
                .trim_matches(|c| c == '\'' || c == '"')
                .to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ultralytics_names_metadata() {
        let names = parse_names("{0: 'person', 1: 'bicycle', 2: 'car'}");
        assert_eq!(names, vec!["person", "bicycle", "car"]);
    }

    #[test]
    fn empty_names_metadata() {
        assert!(parse_names("{}").is_empty());
    }
}
