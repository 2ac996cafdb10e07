// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 切片网格 (Tile grid)
//!
//! Covers an image of arbitrary size with `tile_size × tile_size` windows
//! stepped by `tile_size - overlap`. Windows that would run past the border
//! are shifted back inside, so every tile is full-size wherever the image is.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 切片 (tile rectangle in image pixels, half-open `[x1, x2) × [y1, y2)`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tile {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Tile {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x1 && x < self.x2 && y >= self.y1 && y < self.y2
    }
}

/// 网格参数
///
/// Only constructible through [`TileConfig::new`], so `stride() > 0` always
/// holds. Deserialization goes through the same check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTileConfig")]
pub struct TileConfig {
    tile_size: u32,
    overlap: u32,
}

#[derive(Deserialize)]
struct RawTileConfig {
    tile_size: u32,
    overlap: u32,
}

impl TryFrom<RawTileConfig> for TileConfig {
    type Error = Error;

    fn try_from(raw: RawTileConfig) -> Result<Self> {
        Self::new(raw.tile_size, raw.overlap)
    }
}

impl TileConfig {
    pub fn new(tile_size: u32, overlap: u32) -> Result<Self> {
        if tile_size == 0 || overlap >= tile_size {
            return Err(Error::InvalidTileConfig { tile_size, overlap });
        }
        Ok(Self { tile_size, overlap })
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn overlap(&self) -> u32 {
        self.overlap
    }

    pub fn stride(&self) -> u32 {
        self.tile_size - self.overlap
    }

    /// No-detection band kept along each tile edge.
    pub fn margin(&self) -> u32 {
        self.overlap / 2
    }

    pub fn generate(&self, width: u32, height: u32) -> Vec<Tile> {
        let stride = self.stride();
        let cols = steps(width, self.overlap, stride);
        let rows = steps(height, self.overlap, stride);

        let mut tiles = Vec::with_capacity((rows * cols) as usize);
        for i in 0..rows {
            for j in 0..cols {
                let mut x1 = j * stride;
                let mut y1 = i * stride;
                let x2 = (x1 + self.tile_size).min(width);
                let y2 = (y1 + self.tile_size).min(height);

                // 边缘切片向内回退
                if x2 - x1 < self.tile_size || y2 - y1 < self.tile_size {
                    x1 = x2.saturating_sub(self.tile_size);
                    y1 = y2.saturating_sub(self.tile_size);
                }
                tiles.push(Tile::new(x1, y1, x2, y2));
            }
        }
        tiles
    }
}

/// Tiles for a `width × height` image, row-major.
pub fn generate(width: u32, height: u32, tile_size: u32, overlap: u32) -> Result<Vec<Tile>> {
    Ok(TileConfig::new(tile_size, overlap)?.generate(width, height))
}

// ceil((extent - overlap) / stride); images no larger than the overlap get none
fn steps(extent: u32, overlap: u32, stride: u32) -> u32 {
    extent.saturating_sub(overlap).div_ceil(stride)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_overlap_covers_without_gaps() {
        let tiles = generate(1000, 1000, 256, 0).unwrap();
        assert_eq!(tiles.len(), 16);

        let mut hits = vec![0u8; 1000 * 1000];
        for t in &tiles {
            for y in t.y1..t.y2 {
                for x in t.x1..t.x2 {
                    hits[(y * 1000 + x) as usize] += 1;
                }
            }
        }
        // 边缘回退会让最后一列/行与前一列/行重叠
        assert!(hits.iter().all(|&h| h >= 1));
    }

    #[test]
    fn test_zero_overlap_interior_grid_is_disjoint() {
        let tiles = generate(1024, 768, 256, 0).unwrap();
        assert_eq!(tiles.len(), 4 * 3);
        let total: u64 = tiles.iter().map(Tile::area).sum();
        assert_eq!(total, 1024 * 768);
    }

    #[test]
    fn test_overlap_layout_500() {
        let tiles = generate(500, 500, 256, 50).unwrap();
        // stride 206, ceil(450 / 206) = 3 per axis
        assert_eq!(tiles.len(), 9);
        for t in &tiles {
            assert_eq!((t.width(), t.height()), (256, 256));
            assert!(t.x2 <= 500 && t.y2 <= 500);
        }
        let xs: Vec<u32> = tiles[..3].iter().map(|t| t.x1).collect();
        assert_eq!(xs, vec![0, 206, 244]);
        // first two columns overlap by exactly the configured 50 px
        assert_eq!(tiles[0].x2 - tiles[1].x1, 50);
        assert_eq!(tiles[0].y2 - tiles[3].y1, 50);
    }

    #[test]
    fn test_image_smaller_than_tile() {
        let tiles = generate(100, 60, 256, 50).unwrap();
        assert_eq!(tiles, vec![Tile::new(0, 0, 100, 60)]);
    }

    #[test]
    fn test_edge_shift_only_moves_short_axis() {
        let tiles = generate(300, 256, 256, 0).unwrap();
        assert_eq!(tiles, vec![Tile::new(0, 0, 256, 256), Tile::new(44, 0, 300, 256)]);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            generate(100, 100, 50, 50),
            Err(Error::InvalidTileConfig {
                tile_size: 50,
                overlap: 50
            })
        ));
        assert!(generate(100, 100, 0, 0).is_err());
    }

    #[test]
    fn test_invalid_config_rejected_on_every_path() {
        assert!(matches!(
            TileConfig::new(256, 300),
            Err(Error::InvalidTileConfig {
                tile_size: 256,
                overlap: 300
            })
        ));
        assert!(generate(500, 500, 256, 300).is_err());

        let err = serde_json::from_str::<TileConfig>(r#"{"tile_size":256,"overlap":300}"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid tile config"), "{err}");
        assert!(serde_json::from_str::<TileConfig>(r#"{"tile_size":0,"overlap":0}"#).is_err());

        let ok: TileConfig = serde_json::from_str(r#"{"tile_size":256,"overlap":50}"#).unwrap();
        assert_eq!((ok.tile_size(), ok.overlap(), ok.stride()), (256, 50, 206));
        assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"tile_size":256,"overlap":50}"#);
    }

    #[test]
    fn test_degenerate_image() {
        assert!(generate(0, 0, 256, 0).unwrap().is_empty());
        assert!(generate(40, 40, 256, 50).unwrap().is_empty());
    }
}
