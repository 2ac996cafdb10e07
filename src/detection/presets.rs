// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 模型预设 (model presets)
//!
//! Each preset pairs a weights file with the detector input size and the
//! tile grid it was trained for.

use phf::phf_map;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::tiling::TileConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelPreset {
    pub name: &'static str,
    pub weights: &'static str,
    pub input_size: u32,
    pub tile_size: u32,
    pub overlap: u32,
}

impl ModelPreset {
    pub fn tile_config(&self) -> Result<TileConfig> {
        TileConfig::new(self.tile_size, self.overlap)
    }
}

/// Display order for listings.
pub static PRESET_NAMES: [&str; 3] = ["ground", "large-ships", "small-ships"];

static PRESETS: phf::Map<&'static str, ModelPreset> = phf_map! {
    "ground" => ModelPreset {
        name: "ground",
        weights: "nano960-9.onnx",
        input_size: 960,
        tile_size: 4000,
        overlap: 100,
    },
    "large-ships" => ModelPreset {
        name: "large-ships",
        weights: "medium_ships.onnx",
        input_size: 800,
        tile_size: 800,
        overlap: 100,
    },
    "small-ships" => ModelPreset {
        name: "small-ships",
        weights: "bkr.onnx",
        input_size: 256,
        tile_size: 256,
        overlap: 50,
    },
};

pub fn preset(name: &str) -> Result<&'static ModelPreset> {
    PRESETS.get(name).ok_or_else(|| {
        Error::Config(format!(
            "unknown preset '{name}', expected one of {}",
            PRESET_NAMES.join(", ")
        ))
    })
}

pub fn presets() -> impl Iterator<Item = &'static ModelPreset> {
    PRESET_NAMES.iter().filter_map(|name| PRESETS.get(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let p = preset("small-ships").unwrap();
        assert_eq!((p.input_size, p.tile_size, p.overlap), (256, 256, 50));
        assert_eq!(p.tile_config().unwrap().margin(), 25);
        assert!(matches!(preset("tanks"), Err(Error::Config(_))));
    }

    #[test]
    fn test_every_preset_is_listed_and_valid() {
        let all: Vec<_> = presets().collect();
        assert_eq!(all.len(), PRESET_NAMES.len());
        for p in all {
            assert!(p.tile_config().is_ok(), "{}", p.name);
            assert!(p.weights.ends_with(".onnx"));
        }
    }
}
