// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 切片检测聚合 (tiled detection aggregation)
//!
//! ```text
//! tiles ─batch─▶ crop ─▶ Detector::infer_batch ─▶ +(x1, y1)
//!                                                    │
//!                              margin band filter ◀──┘
//!                                      │
//!                        global NMS @ 0.1 ─▶ DetectionSet
//! ```

use image::{imageops, RgbImage};
use tracing::{debug, info, warn};

use super::detector::Detector;
use super::types::{BBox, Detection, DetectionSet};
use crate::error::{Error, Result};
use crate::non_max_suppression;
use crate::task::CancelToken;
use crate::tiling::{Tile, TileConfig};

pub const DEFAULT_BATCH_SIZE: usize = 4;

/// Overlapping detections above this IoU collapse into the most confident one.
pub const DEDUP_IOU: f32 = 0.1;

#[derive(Debug, Clone, Copy)]
pub struct DetectionAggregator {
    config: TileConfig,
    batch_size: usize,
    dedup_iou: f32,
}

impl DetectionAggregator {
    pub fn new(config: TileConfig) -> Self {
        Self {
            config,
            batch_size: DEFAULT_BATCH_SIZE,
            dedup_iou: DEDUP_IOU,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn config(&self) -> TileConfig {
        self.config
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn run<D: Detector + ?Sized>(
        &self,
        image: &RgbImage,
        tiles: &[Tile],
        detector: &mut D,
        conf: f32,
        cancel: &CancelToken,
    ) -> Result<DetectionSet> {
        self.run_with_progress(image, tiles, detector, conf, cancel, |_, _| {})
    }

    /// Like [`run`](Self::run); `on_batch(tiles_done, tiles_total)` fires
    /// after every batch. Cancellation is observed before each batch.
    pub fn run_with_progress<D, F>(
        &self,
        image: &RgbImage,
        tiles: &[Tile],
        detector: &mut D,
        conf: f32,
        cancel: &CancelToken,
        mut on_batch: F,
    ) -> Result<DetectionSet>
    where
        D: Detector + ?Sized,
        F: FnMut(usize, usize),
    {
        let margin = self.config.margin() as f32;
        let mut set = DetectionSet::default();
        let mut kept = Vec::new();

        for (batch_idx, batch) in tiles.chunks(self.batch_size).enumerate() {
            cancel.check()?;
            let first = batch_idx * self.batch_size;
            let regions: Vec<RgbImage> = batch
                .iter()
                .map(|t| imageops::crop_imm(image, t.x1, t.y1, t.width(), t.height()).to_image())
                .collect();

            let results = detector.infer_batch(&regions, conf);
            for (offset, (tile, result)) in batch.iter().zip(results).enumerate() {
                let index = first + offset;
                set.tiles_processed += 1;
                let local = match result {
                    Ok(ys) => ys,
                    Err(source) => {
                        warn!(index, ?tile, error = %source, "tile detection failed, skipped");
                        set.failures.push(Error::PerTileDetection {
                            index,
                            tile: *tile,
                            source,
                        });
                        continue;
                    }
                };

                for det in local {
                    let bbox = det.bbox.translate(tile.x1 as f32, tile.y1 as f32);
                    if in_margin_band(&bbox, tile, margin) {
                        set.suppressed_at_boundary += 1;
                        continue;
                    }
                    kept.push(Detection { bbox, ..det });
                }
            }
            debug!(
                batch = batch_idx,
                tiles_done = set.tiles_processed,
                candidates = kept.len(),
                "batch done"
            );
            on_batch(set.tiles_processed, tiles.len());
        }

        let before = kept.len();
        non_max_suppression(&mut kept, self.dedup_iou);
        set.suppressed_as_duplicate = before - kept.len();
        set.detections = kept;

        info!(
            tiles = tiles.len(),
            failed = set.failures.len(),
            kept = set.len(),
            boundary = set.suppressed_at_boundary,
            duplicate = set.suppressed_as_duplicate,
            "aggregation finished"
        );
        Ok(set)
    }
}

/// Any edge of the global `bbox` lies in the `margin`-wide band inside the
/// tile perimeter. Applied to every tile, image-border tiles included.
pub fn in_margin_band(bbox: &BBox, tile: &Tile, margin: f32) -> bool {
    bbox.x1 < tile.x1 as f32 + margin
        || bbox.x2 > tile.x2 as f32 - margin
        || bbox.y1 < tile.y1 as f32 + margin
        || bbox.y2 > tile.y2 as f32 - margin
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_margin_band() {
        let tile = Tile::new(100, 100, 356, 356);
        assert!(!in_margin_band(&BBox::new(125., 125., 331., 331.), &tile, 25.));
        assert!(in_margin_band(&BBox::new(124., 200., 150., 220.), &tile, 25.));
        assert!(in_margin_band(&BBox::new(200., 200., 332., 220.), &tile, 25.));
        assert!(!in_margin_band(&BBox::new(0., 0., 10., 10.), &Tile::new(0, 0, 256, 256), 0.));
    }

    #[test]
    fn test_batch_size_floor() {
        let config = TileConfig::new(256, 50).unwrap();
        assert_eq!(DetectionAggregator::new(config).with_batch_size(0).batch_size(), 1);
        assert_eq!(DetectionAggregator::new(config).batch_size(), DEFAULT_BATCH_SIZE);
    }
}
