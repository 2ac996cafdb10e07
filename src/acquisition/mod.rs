// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 采集系统 (Acquisition System)
//!
//! Pulls one raster per session from the acquisition server:
//! - codec:    fixed-layout mode request / params record
//! - receiver: length-prefixed body transfer over a byte stream
//! - worker:   background fetch task with progress and cancellation
pub mod codec;
pub mod receiver;
pub mod worker;

pub use codec::{FrameCodec, MODE_REQUEST_LEN, PARAMS_LEN, SIZE_HEADER_LEN};
pub use receiver::{RawBuffer, SessionState, StreamReceiver, Transport, CHUNK_SIZE};
pub use worker::{FetchOutcome, FetchRequest, FetchTask};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 采样编码 (sample encoding of the raster body)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Encoding {
    #[default]
    Int8,
    UInt8,
    UInt16,
    Float32,
}

impl Encoding {
    pub const ALL: [Encoding; 4] = [
        Encoding::Int8,
        Encoding::UInt8,
        Encoding::UInt16,
        Encoding::Float32,
    ];

    /// ASCII code used on the wire.
    pub fn code(self) -> u8 {
        match self {
            Encoding::Int8 => b'0',
            Encoding::UInt8 => b'1',
            Encoding::UInt16 => b'2',
            Encoding::Float32 => b'4',
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            b'0' => Ok(Encoding::Int8),
            b'1' => Ok(Encoding::UInt8),
            b'2' => Ok(Encoding::UInt16),
            b'4' => Ok(Encoding::Float32),
            _ => Err(Error::UnsupportedEncoding { code }),
        }
    }

    /// Bytes per sample.
    pub fn sample_size(self) -> usize {
        match self {
            Encoding::Int8 | Encoding::UInt8 => 1,
            Encoding::UInt16 => 2,
            Encoding::Float32 => 4,
        }
    }

    pub fn is_8bit(self) -> bool {
        self.sample_size() == 1
    }
}

/// 请求模式 (mode request, sent once per session)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    pub encoding: Encoding,
    pub width: u16,
    pub height: u16,
}

impl Mode {
    pub fn new(encoding: Encoding, width: u16, height: u16) -> Self {
        Self {
            encoding,
            width,
            height,
        }
    }
}

/// 影像参数 (params record, precedes the raster body)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Params {
    pub encoding: Encoding,
    pub width: i16,
    pub height: i16,
    pub frame_count: i8,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: f64,
    pub dy: f32,
    pub dx: f32,
}
