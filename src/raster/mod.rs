// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 栅格解码 (Raster decoding)
//!
//! Interprets a received body as a row-major grid of samples and turns it
//! into a displayable 8-bit image. 8-bit encodings are used as-is; 16-bit
//! and float rasters get a min–max stretch over the whole grid.

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use ndarray::Array2;
use tracing::{info, warn};

use crate::acquisition::Encoding;
use crate::error::{Error, Result};
use crate::gen_time_string;

/// 采样网格 (sample grid, `height × width`)
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    Int8(Array2<i8>),
    UInt8(Array2<u8>),
    UInt16(Array2<u16>),
    Float32(Array2<f32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    samples: Samples,
    declared_height: usize,
}

impl Raster {
    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    pub fn encoding(&self) -> Encoding {
        match self.samples {
            Samples::Int8(_) => Encoding::Int8,
            Samples::UInt8(_) => Encoding::UInt8,
            Samples::UInt16(_) => Encoding::UInt16,
            Samples::Float32(_) => Encoding::Float32,
        }
    }

    pub fn width(&self) -> usize {
        self.dim().1
    }

    pub fn height(&self) -> usize {
        self.dim().0
    }

    /// Fewer rows arrived than the mode declared.
    pub fn is_truncated(&self) -> bool {
        self.height() < self.declared_height
    }

    fn dim(&self) -> (usize, usize) {
        match &self.samples {
            Samples::Int8(a) => a.dim(),
            Samples::UInt8(a) => a.dim(),
            Samples::UInt16(a) => a.dim(),
            Samples::Float32(a) => a.dim(),
        }
    }

    /// 8-bit grayscale view of the raster.
    pub fn to_gray(&self) -> GrayImage {
        let (w, h) = (self.width() as u32, self.height() as u32);
        let pixels: Vec<u8> = match &self.samples {
            // 有符号 8 位按字节原样显示
            Samples::Int8(a) => a.iter().map(|&v| v as u8).collect(),
            Samples::UInt8(a) => a.iter().copied().collect(),
            Samples::UInt16(a) => stretch(a),
            Samples::Float32(a) => stretch(a),
        };
        GrayImage::from_raw(w, h, pixels).unwrap_or_else(|| GrayImage::new(w, h))
    }

    /// Gray replicated into three channels.
    pub fn to_rgb(&self) -> RgbImage {
        DynamicImage::ImageLuma8(self.to_gray()).to_rgb8()
    }

    /// Save as `image_<YYYY-MM-DD-HH-MM-SS>.tiff` inside `dir`.
    pub fn save_timestamped(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("image_{}.tiff", gen_time_string("-")));
        DynamicImage::ImageRgb8(self.to_rgb()).save_with_format(&path, ImageFormat::Tiff)?;
        info!(path = %path.display(), width = self.width(), height = self.height(), "raster saved");
        Ok(path)
    }
}

/// Decode a body whose encoding arrives as its wire code.
pub fn decode_code(
    buffer: &[u8],
    width: usize,
    declared_height: usize,
    code: u8,
) -> Result<Raster> {
    decode(buffer, width, declared_height, Encoding::from_code(code)?)
}

/// Reshape `buffer` into a `height × width` grid.
///
/// The height comes from the buffer length, not from `declared_height`: a
/// short body yields fewer rows. Trailing samples that do not fill a row are
/// dropped; a short sample run is zero-padded.
pub fn decode(
    buffer: &[u8],
    width: usize,
    declared_height: usize,
    encoding: Encoding,
) -> Result<Raster> {
    let sample_size = encoding.sample_size();
    let available = buffer.len() / sample_size;
    let height = if width == 0 { 0 } else { available / width };
    if height == 0 {
        return Err(Error::EmptyRaster {
            len: buffer.len(),
            width,
        });
    }

    let expected_bytes = width * declared_height * sample_size;
    if buffer.len() < expected_bytes {
        warn!(
            actual = buffer.len(),
            expected = expected_bytes,
            declared_height,
            height,
            "raw body shorter than declared, height adjusted"
        );
    }

    let count = width * height;
    let samples = match encoding {
        Encoding::Int8 => Samples::Int8(grid(buffer, width, height, i8::from_ne_bytes)?),
        Encoding::UInt8 => Samples::UInt8(grid(buffer, width, height, u8::from_ne_bytes)?),
        Encoding::UInt16 => Samples::UInt16(grid(buffer, width, height, u16::from_ne_bytes)?),
        Encoding::Float32 => Samples::Float32(grid(buffer, width, height, f32::from_ne_bytes)?),
    };
    if available > count {
        info!(dropped = available - count, "trailing samples dropped");
    }

    Ok(Raster {
        samples,
        declared_height,
    })
}

fn grid<T, const N: usize>(
    buffer: &[u8],
    width: usize,
    height: usize,
    from_bytes: fn([u8; N]) -> T,
) -> Result<Array2<T>>
where
    T: Copy + Default,
{
    let count = width * height;
    let mut values: Vec<T> = buffer
        .chunks_exact(N)
        .take(count)
        .map(|chunk| {
            let mut bytes = [0u8; N];
            bytes.copy_from_slice(chunk);
            from_bytes(bytes)
        })
        .collect();
    values.resize(count, T::default());
    Array2::from_shape_vec((height, width), values)
        .map_err(|e| Error::Config(format!("raster reshape failed: {e}")))
}

/// Min–max stretch to 0..=255, truncating. A constant grid maps to zeros.
fn stretch<T: Copy + Into<f64>>(grid: &Array2<T>) -> Vec<u8> {
    let (min, max) = grid
        .iter()
        .map(|&v| v.into())
        .filter(|v: &f64| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if max <= min {
        return vec![0; grid.len()];
    }
    let range = max - min;
    grid.iter()
        .map(|&v| {
            let v: f64 = v.into();
            if v.is_finite() {
                ((v - min) * 255.0 / range).floor().clamp(0.0, 255.0) as u8
            } else {
                0
            }
        })
        .collect()
}
