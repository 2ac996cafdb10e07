// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 错误类型 (Error types)
//!
//! Every fallible operation in the crate returns `Result<T, Error>`.
//! Variants carry the byte counts, codes and rectangles needed to act on a
//! failure without re-running the acquisition.

use thiserror::Error;

use crate::acquisition::SessionState;
use crate::tiling::Tile;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // ========== 连接 (Connection) ==========
    /// The TCP connection to the acquisition server could not be opened.
    #[error("cannot connect to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing the mode request failed.
    #[error("failed to send mode request: {0}")]
    Send(#[source] std::io::Error),

    /// An operation was called in a session state that does not allow it.
    #[error("invalid session state: expected {expected:?}, found {actual:?}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    // ========== 协议 (Protocol) ==========
    #[error("stream closed inside the size header: got {received} of {expected} bytes")]
    TruncatedHeader { received: usize, expected: usize },

    #[error("stream closed inside the params record: got {received} of {expected} bytes")]
    TruncatedParams { received: usize, expected: usize },

    #[error("malformed params record: {reason}")]
    MalformedParams { reason: String },

    /// The peer closed the connection before `expected` body bytes arrived.
    #[error("stream closed after {received} of {expected} body bytes")]
    TruncatedStream { received: u64, expected: u64 },

    /// An I/O error interrupted the body transfer.
    #[error("receive failed after {received} of {expected} bytes: {source}")]
    Receive {
        received: u64,
        expected: u64,
        #[source]
        source: std::io::Error,
    },

    // ========== 解码 (Raster) ==========
    #[error("unsupported encoding code {code:#04x} ({})", *code as char)]
    UnsupportedEncoding { code: u8 },

    #[error("raster is empty: {len} bytes for width {width}")]
    EmptyRaster { len: usize, width: usize },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // ========== 检测 (Detection) ==========
    #[error("invalid tile config: tile size {tile_size}, overlap {overlap}")]
    InvalidTileConfig { tile_size: u32, overlap: u32 },

    /// The detector failed on a single tile. Recorded, never propagated.
    #[error("detector failed on tile #{index} {tile:?}: {source}")]
    PerTileDetection {
        index: usize,
        tile: Tile,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    // ========== 配置 (Config) ==========
    #[error("config error: {0}")]
    Config(String),
}
