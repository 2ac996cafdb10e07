// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 整图切片检测 (tiled processor): load → tile → aggregate → overlay

use std::path::{Path, PathBuf};

use tracing::info;

use super::aggregator::DetectionAggregator;
use super::detector::{Detector, OnnxDetector};
use super::overlay;
use super::presets::ModelPreset;
use super::types::DetectionSet;
use crate::error::{Error, Result};
use crate::task::CancelToken;
use crate::tiling::TileConfig;

/// Result of one processed image.
#[derive(Debug)]
pub struct ProcessedImage {
    pub source: PathBuf,
    pub overlay: PathBuf,
    pub detections: DetectionSet,
}

pub struct TiledProcessor<D: Detector> {
    detector: D,
    aggregator: DetectionAggregator,
    overlay_dir: PathBuf,
}

impl TiledProcessor<OnnxDetector> {
    /// ONNX detector and tile grid both taken from `preset`.
    pub fn from_preset(
        preset: &ModelPreset,
        weights_dir: &Path,
        overlay_dir: impl Into<PathBuf>,
    ) -> anyhow::Result<Self> {
        let detector = OnnxDetector::from_preset(preset, weights_dir)?;
        Ok(Self::new(detector, preset.tile_config()?, overlay_dir))
    }
}

impl<D: Detector> TiledProcessor<D> {
    pub fn new(detector: D, config: TileConfig, overlay_dir: impl Into<PathBuf>) -> Self {
        Self {
            detector,
            aggregator: DetectionAggregator::new(config),
            overlay_dir: overlay_dir.into(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.aggregator = self.aggregator.with_batch_size(batch_size);
        self
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    pub fn process_image(
        &mut self,
        path: &Path,
        conf: f32,
        cancel: &CancelToken,
    ) -> Result<ProcessedImage> {
        self.process_image_with_progress(path, conf, cancel, |_, _| {})
    }

    /// `on_batch(tiles_done, tiles_total)` fires after every tile batch.
    pub fn process_image_with_progress<F: FnMut(usize, usize)>(
        &mut self,
        path: &Path,
        conf: f32,
        cancel: &CancelToken,
        on_batch: F,
    ) -> Result<ProcessedImage> {
        cancel.check()?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Config(format!("not a file path: {}", path.display())))?;

        let image = image::open(path)?.to_rgb8();
        let (w, h) = image.dimensions();
        let tiles = self.aggregator.config().generate(w, h);
        info!(
            file = %name,
            width = w,
            height = h,
            tiles = tiles.len(),
            detector = self.detector.name(),
            "🔍 tiled detection started"
        );

        let detections =
            self.aggregator
                .run_with_progress(&image, &tiles, &mut self.detector, conf, cancel, on_batch)?;
        let overlay = overlay::save(&image, &detections.detections, &self.overlay_dir, &name)?;

        Ok(ProcessedImage {
            source: path.to_path_buf(),
            overlay,
            detections,
        })
    }
}
