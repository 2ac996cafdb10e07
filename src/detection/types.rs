// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测数据结构 (detection data structures)

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::tiling::Tile;

/// 检测框 (axis-aligned box, `x1 < x2`, `y1 < y2`)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_xywh(xmin: f32, ymin: f32, width: f32, height: f32) -> Self {
        Self::new(xmin, ymin, xmin + width, ymin + height)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.) * self.height().max(0.)
    }

    pub fn cxcy(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2., (self.y1 + self.y2) / 2.)
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }

    pub fn clamp(&self, width: f32, height: f32) -> Self {
        Self::new(
            self.x1.clamp(0., width),
            self.y1.clamp(0., height),
            self.x2.clamp(0., width),
            self.y2.clamp(0., height),
        )
    }

    pub fn intersection_area(&self, another: &BBox) -> f32 {
        let l = self.x1.max(another.x1);
        let r = self.x2.min(another.x2);
        let t = self.y1.max(another.y1);
        let b = self.y2.min(another.y2);
        if r < l || b < t {
            return 0.;
        }
        (r - l) * (b - t)
    }

    pub fn union(&self, another: &BBox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    /// Intersection over union; 0 for disjoint boxes or an empty union.
    pub fn iou(&self, another: &BBox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}

/// 检测结果 (one object, coordinates depend on context: tile-local or global)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub class_id: usize,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BBox, class_id: usize, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            confidence,
        }
    }

    pub fn iou(&self, another: &Detection) -> f32 {
        self.bbox.iou(&another.bbox)
    }
}

/// 聚合结果 (de-duplicated detections in global image coordinates)
#[derive(Debug, Default)]
pub struct DetectionSet {
    pub detections: Vec<Detection>,
    /// `Error::PerTileDetection` for every tile the detector failed on.
    pub failures: Vec<Error>,
    pub tiles_processed: usize,
    /// Detections dropped by the tile-margin rule.
    pub suppressed_at_boundary: usize,
    /// Detections dropped as duplicates.
    pub suppressed_as_duplicate: usize,
}

impl DetectionSet {
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    /// Tiles whose area contributed nothing.
    pub fn failed_tiles(&self) -> impl Iterator<Item = (usize, Tile)> + '_ {
        self.failures.iter().filter_map(|e| match e {
            Error::PerTileDetection { index, tile, .. } => Some((*index, *tile)),
            _ => None,
        })
    }
}
