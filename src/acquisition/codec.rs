// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 帧编解码 (Frame codec)
//!
//! Fixed-size records exchanged with the acquisition server. All numeric
//! fields use native byte order and are packed without padding.
//!
//! ```text
//! mode request (5):  code:u8 | width:i16 | height:i16
//! size header  (8):  total_size:u64
//! params      (38):  code:u8 | width:i16 | height:i16 | frames:i8
//!                    | lat:f64 | lon:f64 | heading:f64 | dy:f32 | dx:f32
//! ```

use super::{Encoding, Mode, Params};
use crate::error::{Error, Result};

pub const MODE_REQUEST_LEN: usize = 5;
pub const SIZE_HEADER_LEN: usize = 8;
pub const PARAMS_LEN: usize = 38;

pub struct FrameCodec;

impl FrameCodec {
    pub fn encode_mode_request(mode: &Mode) -> [u8; MODE_REQUEST_LEN] {
        let mut frame = [0u8; MODE_REQUEST_LEN];
        frame[0] = mode.encoding.code();
        frame[1..3].copy_from_slice(&mode.width.to_ne_bytes());
        frame[3..5].copy_from_slice(&mode.height.to_ne_bytes());
        frame
    }

    /// Server side of the mode request; used by test servers and tooling.
    pub fn decode_mode_request(bytes: &[u8]) -> Result<Mode> {
        if bytes.len() != MODE_REQUEST_LEN {
            return Err(Error::MalformedParams {
                reason: format!(
                    "mode request is {} bytes, expected {}",
                    bytes.len(),
                    MODE_REQUEST_LEN
                ),
            });
        }
        let encoding = Encoding::from_code(bytes[0]).map_err(|_| Error::MalformedParams {
            reason: format!("unknown encoding code {:#04x}", bytes[0]),
        })?;
        Ok(Mode {
            encoding,
            width: u16::from_ne_bytes([bytes[1], bytes[2]]),
            height: u16::from_ne_bytes([bytes[3], bytes[4]]),
        })
    }

    pub fn encode_size_header(total_size: u64) -> [u8; SIZE_HEADER_LEN] {
        total_size.to_ne_bytes()
    }

    pub fn decode_size_header(bytes: [u8; SIZE_HEADER_LEN]) -> u64 {
        u64::from_ne_bytes(bytes)
    }

    pub fn encode_params(params: &Params) -> [u8; PARAMS_LEN] {
        let mut record = [0u8; PARAMS_LEN];
        record[0] = params.encoding.code();
        record[1..3].copy_from_slice(&params.width.to_ne_bytes());
        record[3..5].copy_from_slice(&params.height.to_ne_bytes());
        record[5..6].copy_from_slice(&params.frame_count.to_ne_bytes());
        record[6..14].copy_from_slice(&params.latitude.to_ne_bytes());
        record[14..22].copy_from_slice(&params.longitude.to_ne_bytes());
        record[22..30].copy_from_slice(&params.heading.to_ne_bytes());
        record[30..34].copy_from_slice(&params.dy.to_ne_bytes());
        record[34..38].copy_from_slice(&params.dx.to_ne_bytes());
        record
    }

    pub fn decode_params(bytes: &[u8]) -> Result<Params> {
        let record: &[u8; PARAMS_LEN] =
            bytes.try_into().map_err(|_| Error::MalformedParams {
                reason: format!(
                    "params record is {} bytes, expected {}",
                    bytes.len(),
                    PARAMS_LEN
                ),
            })?;

        let encoding = Encoding::from_code(record[0]).map_err(|_| Error::MalformedParams {
            reason: format!("unknown encoding code {:#04x}", record[0]),
        })?;

        Ok(Params {
            encoding,
            width: i16::from_ne_bytes(field(record, 1)),
            height: i16::from_ne_bytes(field(record, 3)),
            frame_count: i8::from_ne_bytes(field(record, 5)),
            latitude: f64::from_ne_bytes(field(record, 6)),
            longitude: f64::from_ne_bytes(field(record, 14)),
            heading: f64::from_ne_bytes(field(record, 22)),
            dy: f32::from_ne_bytes(field(record, 30)),
            dx: f32::from_ne_bytes(field(record, 34)),
        })
    }
}

// 固定偏移读取 N 字节
fn field<const N: usize>(record: &[u8; PARAMS_LEN], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&record[offset..offset + N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> Params {
        Params {
            encoding: Encoding::UInt16,
            width: 1024,
            height: 768,
            frame_count: 3,
            latitude: 55.7558,
            longitude: 37.6173,
            heading: 271.5,
            dy: 0.75,
            dx: 1.25,
        }
    }

    #[test]
    fn test_mode_request_layout() {
        let frame = FrameCodec::encode_mode_request(&Mode::new(Encoding::Float32, 600, 400));
        assert_eq!(frame.len(), 5);
        assert_eq!(frame[0], b'4');
        assert_eq!(u16::from_ne_bytes([frame[1], frame[2]]), 600);
        assert_eq!(u16::from_ne_bytes([frame[3], frame[4]]), 400);
    }

    #[test]
    fn test_encoding_codes() {
        let codes: Vec<u8> = Encoding::ALL.iter().map(|e| e.code()).collect();
        assert_eq!(codes, b"0124".to_vec());
    }

    #[test]
    fn test_params_roundtrip() {
        let params = sample_params();
        let bytes = FrameCodec::encode_params(&params);
        assert_eq!(bytes.len(), PARAMS_LEN);
        assert_eq!(FrameCodec::decode_params(&bytes).unwrap(), params);
    }

    #[test]
    fn test_params_share_mode_fields() {
        let mode = Mode::new(Encoding::UInt8, 512, 256);
        let request = FrameCodec::encode_mode_request(&mode);

        // server echoes code/width/height into the params record
        let mut record = [0u8; PARAMS_LEN];
        record[..5].copy_from_slice(&request);
        let params = FrameCodec::decode_params(&record).unwrap();

        assert_eq!(params.encoding, mode.encoding);
        assert_eq!(params.width as u16, mode.width);
        assert_eq!(params.height as u16, mode.height);
    }

    #[test]
    fn test_params_wrong_length() {
        let err = FrameCodec::decode_params(&[b'0'; 37]).unwrap_err();
        match err {
            Error::MalformedParams { reason } => assert!(reason.contains("37")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_params_unknown_encoding() {
        let mut bytes = FrameCodec::encode_params(&sample_params());
        bytes[0] = b'3';
        let err = FrameCodec::decode_params(&bytes).unwrap_err();
        match err {
            Error::MalformedParams { reason } => assert!(reason.contains("0x33")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_size_header_roundtrip() {
        let bytes = FrameCodec::encode_size_header(0x0102_0304_0506_0708);
        assert_eq!(FrameCodec::decode_size_header(bytes), 0x0102_0304_0506_0708);
    }
}
