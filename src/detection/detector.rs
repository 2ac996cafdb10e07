// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测器接口与 ONNX 实现
//!
//! ## 核心流程
//! ```text
//! 切片 RgbImage → letterbox → NCHW 张量
//!          ↓
//!     ONNX Runtime
//!          ↓
//!  [1, 4+nc, N] → 置信度过滤 → 还原坐标 → NMS
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::{Array, Axis, Ix4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use tracing::{debug, info};

use super::presets::ModelPreset;
use super::types::{BBox, Detection};
use crate::non_max_suppression;

/// Per-tile NMS threshold applied by the ONNX back-end.
pub const TILE_NMS_IOU: f32 = 0.45;

/// 检测器能力 (object detector over one RGB region)
///
/// Returned boxes are in the region's own pixel coordinates. The aggregator
/// owns the translation into global image coordinates.
pub trait Detector {
    /// Detections in `region` whose confidence is at least `conf`.
    fn infer(&mut self, region: &RgbImage, conf: f32) -> Result<Vec<Detection>>;

    /// One result per region, in order. A failure only affects its own slot.
    fn infer_batch(&mut self, regions: &[RgbImage], conf: f32) -> Vec<Result<Vec<Detection>>> {
        regions.iter().map(|r| self.infer(r, conf)).collect()
    }

    fn name(&self) -> &str {
        "detector"
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn infer(&mut self, region: &RgbImage, conf: f32) -> Result<Vec<Detection>> {
        (**self).infer(region, conf)
    }

    fn infer_batch(&mut self, regions: &[RgbImage], conf: f32) -> Vec<Result<Vec<Detection>>> {
        (**self).infer_batch(regions, conf)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// YOLO 检测头 (ONNX Runtime)
pub struct OnnxDetector {
    session: Session,
    name: String,
    input_size: u32,
    iou: f32,
}

impl OnnxDetector {
    /// Load `weights` and feed it `input_size × input_size` tensors.
    pub fn new(weights: &Path, input_size: u32) -> Result<Self> {
        if input_size == 0 {
            bail!("input size must be positive");
        }
        info!(weights = %weights.display(), input_size, "🚀 loading ONNX model");
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads)?
            .commit_from_file(weights)
            .with_context(|| format!("failed to load model {}", weights.display()))?;

        let name = weights
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());
        info!(model = %name, "✅ model ready");

        Ok(Self {
            session,
            name,
            input_size,
            iou: TILE_NMS_IOU,
        })
    }

    /// Weights resolved as `<weights_dir>/<preset.weights>`.
    pub fn from_preset(preset: &ModelPreset, weights_dir: &Path) -> Result<Self> {
        Self::new(&weights_dir.join(preset.weights), preset.input_size)
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn with_iou(mut self, iou: f32) -> Self {
        self.iou = iou;
        self
    }
}

impl Detector for OnnxDetector {
    fn infer(&mut self, region: &RgbImage, conf: f32) -> Result<Vec<Detection>> {
        let (w0, h0) = region.dimensions();
        if w0 == 0 || h0 == 0 {
            return Ok(Vec::new());
        }
        let size = self.input_size as usize;
        let (ratio, input) = letterbox(region, self.input_size);

        let shape = [1, 3, size, size];
        let value = ort::value::Value::from_array((
            shape.as_slice(),
            input.into_raw_vec_and_offset().0.into_boxed_slice(),
        ))?;
        let outputs = self.session.run(ort::inputs!["images" => value])?;
        let (out_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = out_shape.iter().map(|&d| d.max(0) as usize).collect();
        if dims.len() != 3 || dims[1] <= 4 {
            bail!("unexpected output shape {dims:?}, want [1, 4+nc, N]");
        }
        let preds = Array::from_shape_vec((dims[1], dims[2]), data.to_vec())?;

        let mut ys = decode_head(&preds, ratio, conf, w0 as f32, h0 as f32);
        debug!(candidates = ys.len(), "head decoded");
        non_max_suppression(&mut ys, self.iou);
        Ok(ys)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Resize keeping aspect ratio into a `size × size` canvas filled with 144/255,
/// image anchored top-left. Returns the scale ratio and the NCHW tensor.
pub fn letterbox(region: &RgbImage, size: u32) -> (f32, Array<f32, Ix4>) {
    let (w0, h0) = region.dimensions();
    let ratio = (size as f32 / w0 as f32).min(size as f32 / h0 as f32);
    let w1 = ((w0 as f32 * ratio).round() as u32).clamp(1, size);
    let h1 = ((h0 as f32 * ratio).round() as u32).clamp(1, size);

    let mut ys = Array::from_elem((1, 3, size as usize, size as usize), 144.0 / 255.0);
    let img = DynamicImage::ImageRgb8(region.clone())
        .resize_exact(w1, h1, FilterType::Triangle)
        .to_rgb8();
    for (x, y, rgb) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = rgb.0;
        ys[[0, 0, y, x]] = r as f32 / 255.0;
        ys[[0, 1, y, x]] = g as f32 / 255.0;
        ys[[0, 2, y, x]] = b as f32 / 255.0;
    }
    (ratio, ys)
}

/// Decode a `[4+nc, N]` YOLO head (cx, cy, w, h, class scores...) into
/// region coordinates, clamped to `width × height`.
pub fn decode_head(
    preds: &Array<f32, ndarray::Ix2>,
    ratio: f32,
    conf: f32,
    width: f32,
    height: f32,
) -> Vec<Detection> {
    const CXYWH_OFFSET: usize = 4;
    let mut ys = Vec::new();
    for pred in preds.axis_iter(Axis(1)) {
        let best = pred
            .iter()
            .skip(CXYWH_OFFSET)
            .copied()
            .enumerate()
            .reduce(|max, x| if x.1 > max.1 { x } else { max });
        let Some((class_id, confidence)) = best else {
            continue;
        };
        if confidence < conf {
            continue;
        }

        let (cx, cy, w, h) = (pred[0], pred[1], pred[2], pred[3]);
        let bbox = BBox::new(
            (cx - w / 2.) / ratio,
            (cy - h / 2.) / ratio,
            (cx + w / 2.) / ratio,
            (cy + h / 2.) / ratio,
        )
        .clamp(width, height);
        if bbox.area() <= 0. {
            continue;
        }
        ys.push(Detection::new(bbox, class_id, confidence));
    }
    ys
}
