// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 流接收器 (Stream receiver)
//!
//! Drives one acquisition session over a byte stream:
//!
//! ```text
//! Idle → Connecting → Connected → AwaitingLength → AwaitingParams → Streaming → Complete
//!                    (any non-terminal state) ──────────────────────────────────→ Failed
//! ```
//!
//! The receiver owns the stream exclusively. Reads are strictly sequential and
//! every protocol error closes the connection before it is returned.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::codec::{FrameCodec, PARAMS_LEN, SIZE_HEADER_LEN};
use super::{Mode, Params};
use crate::error::{Error, Result};

/// Upper bound for a single body read.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// 传输层抽象: a bidirectional byte stream that can be closed explicitly.
pub trait Transport: Read + Write {
    fn close(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    AwaitingLength,
    AwaitingParams,
    Streaming,
    Complete,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Failed)
    }
}

/// 原始数据缓冲 (raw body buffer)
///
/// Once [`reset`](Self::reset) declares a total size it never holds more than
/// that; before then it grows like a `Vec`. After a truncated transfer it
/// keeps the bytes that did arrive.
#[derive(Debug, Default, Clone)]
pub struct RawBuffer {
    data: Vec<u8>,
    total_size: Option<u64>,
}

/// Up-front reservation on `reset`; the rest grows as chunks arrive.
const INITIAL_RESERVE: usize = 4 * CHUNK_SIZE;

impl RawBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard any content and expect `total_size` bytes.
    pub fn reset(&mut self, total_size: u64) {
        self.data.clear();
        let reserve = usize::try_from(total_size).map_or(INITIAL_RESERVE, |n| n.min(INITIAL_RESERVE));
        self.data.reserve(reserve);
        self.total_size = Some(total_size);
    }

    /// Declared size, if any.
    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn bytes_received(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_complete(&self) -> bool {
        self.total_size == Some(self.bytes_received())
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Write for RawBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(total) = self.total_size {
            let room = total - self.bytes_received();
            if buf.len() as u64 > room {
                return Err(io::Error::new(
                    ErrorKind::InvalidInput,
                    format!(
                        "raw buffer overflow: {} bytes offered, {} bytes left of {}",
                        buf.len(),
                        room,
                        total
                    ),
                ));
            }
        }
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct StreamReceiver<S: Transport = TcpStream> {
    stream: Option<S>,
    state: SessionState,
    mode: Option<Mode>,
    total_size: Option<u64>,
    bytes_received: u64,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl StreamReceiver<TcpStream> {
    pub fn new() -> Self {
        Self {
            stream: None,
            state: SessionState::Idle,
            mode: None,
            total_size: None,
            bytes_received: 0,
            connect_timeout: None,
            read_timeout: None,
        }
    }

    pub fn with_timeouts(
        mut self,
        connect_timeout: Option<Duration>,
        read_timeout: Option<Duration>,
    ) -> Self {
        self.connect_timeout = connect_timeout;
        self.read_timeout = read_timeout;
        self
    }

    /// Open a TCP connection. No retry: the caller decides what to do on failure.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        if self.stream.is_some() {
            self.disconnect();
        }
        self.reset_session();
        self.state = SessionState::Connecting;

        let addr = format!("{host}:{port}");
        match self.open(&addr) {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = SessionState::Connected;
                info!(%addr, "connected to acquisition server");
                Ok(())
            }
            Err(source) => {
                self.state = SessionState::Failed;
                warn!(%addr, error = %source, "connection failed");
                Err(Error::Connection { addr, source })
            }
        }
    }

    fn open(&self, addr: &str) -> io::Result<TcpStream> {
        let stream = match self.connect_timeout {
            Some(timeout) => {
                let mut last_err = None;
                let mut connected = None;
                for sock_addr in addr.to_socket_addrs()? {
                    match TcpStream::connect_timeout(&sock_addr, timeout) {
                        Ok(stream) => {
                            connected = Some(stream);
                            break;
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                match connected {
                    Some(stream) => stream,
                    None => {
                        return Err(last_err.unwrap_or_else(|| {
                            io::Error::new(ErrorKind::InvalidInput, "address resolved to nothing")
                        }))
                    }
                }
            }
            None => TcpStream::connect(addr)?,
        };
        stream.set_read_timeout(self.read_timeout)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl Default for StreamReceiver<TcpStream> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Transport> StreamReceiver<S> {
    /// Wrap an already-open stream; the session starts in `Connected`.
    pub fn from_stream(stream: S) -> Self {
        Self {
            stream: Some(stream),
            state: SessionState::Connected,
            mode: None,
            total_size: None,
            bytes_received: 0,
            connect_timeout: None,
            read_timeout: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mode(&self) -> Option<&Mode> {
        self.mode.as_ref()
    }

    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn send_mode(&mut self, mode: &Mode) -> Result<()> {
        self.expect_state(SessionState::Connected)?;
        let frame = FrameCodec::encode_mode_request(mode);
        let sent = match self.stream.as_mut() {
            Some(stream) => stream.write_all(&frame).and_then(|_| stream.flush()),
            None => Err(io::Error::new(ErrorKind::NotConnected, "stream already closed")),
        };
        match sent {
            Ok(()) => {
                debug!(?mode, "mode request sent");
                self.mode = Some(*mode);
                self.state = SessionState::AwaitingLength;
                Ok(())
            }
            Err(e) => {
                self.fail();
                Err(Error::Send(e))
            }
        }
    }

    /// Receive the size header, the params record and the body into `sink`.
    /// A sink that refuses a chunk fails the session with [`Error::Receive`].
    ///
    /// `on_progress(bytes_received, total_size)` runs after every chunk; the
    /// last call always reports `total_size`.
    pub fn receive_data<'w, W, F>(
        &mut self,
        sink: &'w mut W,
        on_progress: F,
    ) -> Result<(Params, &'w mut W)>
    where
        W: Write,
        F: FnMut(u64, u64),
    {
        let params = self.receive_with(sink, |_, _| {}, on_progress)?;
        Ok((params, sink))
    }

    /// Like [`receive_data`](Self::receive_data), sized into a [`RawBuffer`].
    /// On a truncated transfer the buffer keeps everything received so far.
    pub fn receive_raw<F>(&mut self, buffer: &mut RawBuffer, on_progress: F) -> Result<Params>
    where
        F: FnMut(u64, u64),
    {
        self.receive_with(buffer, |buffer, total| buffer.reset(total), on_progress)
    }

    /// Close the connection. Idempotent and safe after any failure.
    pub fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close() {
                debug!(error = %e, "close reported an error");
            }
            info!("disconnected from acquisition server");
        }
        if !self.state.is_terminal() {
            self.state = SessionState::Idle;
        }
    }

    fn receive_with<W, P, F>(&mut self, sink: &mut W, prepare: P, on_progress: F) -> Result<Params>
    where
        W: Write,
        P: FnOnce(&mut W, u64),
        F: FnMut(u64, u64),
    {
        self.expect_state(SessionState::AwaitingLength)?;
        match self.receive_inner(sink, prepare, on_progress) {
            Ok(params) => {
                self.state = SessionState::Complete;
                Ok(params)
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    fn receive_inner<W, P, F>(
        &mut self,
        sink: &mut W,
        prepare: P,
        mut on_progress: F,
    ) -> Result<Params>
    where
        W: Write,
        P: FnOnce(&mut W, u64),
        F: FnMut(u64, u64),
    {
        let stream = self
            .stream
            .as_mut()
            .ok_or(Error::InvalidState {
                expected: SessionState::AwaitingLength,
                actual: SessionState::Idle,
            })?;

        // 1. 长度头
        let mut header = [0u8; SIZE_HEADER_LEN];
        let n = read_full(stream, &mut header).map_err(|(n, source)| Error::Receive {
            received: n as u64,
            expected: SIZE_HEADER_LEN as u64,
            source,
        })?;
        if n < SIZE_HEADER_LEN {
            return Err(Error::TruncatedHeader {
                received: n,
                expected: SIZE_HEADER_LEN,
            });
        }
        let total_size = FrameCodec::decode_size_header(header);
        self.total_size = Some(total_size);
        self.state = SessionState::AwaitingParams;
        info!(total_size, "size header received");

        // 2. 参数记录
        let mut record = [0u8; PARAMS_LEN];
        let n = read_full(stream, &mut record).map_err(|(n, source)| Error::Receive {
            received: n as u64,
            expected: PARAMS_LEN as u64,
            source,
        })?;
        if n < PARAMS_LEN {
            return Err(Error::TruncatedParams {
                received: n,
                expected: PARAMS_LEN,
            });
        }
        let params = FrameCodec::decode_params(&record)?;
        self.state = SessionState::Streaming;
        info!(?params, "params received");

        // 3. 数据体
        prepare(sink, total_size);
        self.bytes_received = 0;
        if total_size == 0 {
            on_progress(0, 0);
            return Ok(params);
        }

        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut last_decile = 0;
        while self.bytes_received < total_size {
            let want = (total_size - self.bytes_received).min(CHUNK_SIZE as u64) as usize;
            let n = match stream.read(&mut chunk[..want]) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(Error::Receive {
                        received: self.bytes_received,
                        expected: total_size,
                        source,
                    })
                }
            };
            if n == 0 {
                warn!(
                    received = self.bytes_received,
                    expected = total_size,
                    "connection terminated prematurely"
                );
                return Err(Error::TruncatedStream {
                    received: self.bytes_received,
                    expected: total_size,
                });
            }

            if let Err(source) = sink.write_all(&chunk[..n]) {
                warn!(received = self.bytes_received, error = %source, "sink rejected chunk");
                return Err(Error::Receive {
                    received: self.bytes_received,
                    expected: total_size,
                    source,
                });
            }
            self.bytes_received += n as u64;
            on_progress(self.bytes_received, total_size);

            let decile = self.bytes_received * 10 / total_size;
            if decile > last_decile {
                last_decile = decile;
                info!(
                    received = self.bytes_received,
                    total = total_size,
                    "received {}%",
                    decile * 10
                );
            } else {
                debug!(received = self.bytes_received, total = total_size, "chunk");
            }
        }
        sink.flush().map_err(|source| Error::Receive {
            received: self.bytes_received,
            expected: total_size,
            source,
        })?;
        info!(bytes = self.bytes_received, "body received");
        Ok(params)
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        if self.state == expected && self.stream.is_some() {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    fn fail(&mut self) {
        self.disconnect();
        self.state = SessionState::Failed;
    }

    fn reset_session(&mut self) {
        self.mode = None;
        self.total_size = None;
        self.bytes_received = 0;
    }
}

impl<S: Transport> Drop for StreamReceiver<S> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Read until `buf` is full or the stream ends. Returns the byte count; on an
/// I/O error the count read so far travels with it.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::result::Result<usize, (usize, io::Error)> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err((filled, e)),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::acquisition::Encoding;

    /// In-memory peer: serves scripted chunks, records what the client wrote.
    #[derive(Default)]
    struct ScriptedStream {
        chunks: VecDeque<Vec<u8>>,
        written: Vec<u8>,
        closed: usize,
        fail_writes: bool,
    }

    impl ScriptedStream {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks: chunks.into(),
                ..Default::default()
            }
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(front) = self.chunks.front_mut() else {
                return Ok(0);
            };
            let n = front.len().min(buf.len());
            buf[..n].copy_from_slice(&front[..n]);
            front.drain(..n);
            if front.is_empty() {
                self.chunks.pop_front();
            }
            Ok(n)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::Error::new(ErrorKind::BrokenPipe, "peer went away"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for ScriptedStream {
        fn close(&mut self) -> io::Result<()> {
            self.closed += 1;
            Ok(())
        }
    }

    fn params() -> Params {
        Params {
            encoding: Encoding::UInt8,
            width: 16,
            height: 4,
            frame_count: 1,
            latitude: 10.0,
            longitude: 20.0,
            heading: 90.0,
            dy: 1.0,
            dx: 1.0,
        }
    }

    fn preamble(total: u64) -> Vec<u8> {
        let mut bytes = FrameCodec::encode_size_header(total).to_vec();
        bytes.extend_from_slice(&FrameCodec::encode_params(&params()));
        bytes
    }

    fn ready(chunks: Vec<Vec<u8>>) -> StreamReceiver<ScriptedStream> {
        let mut rx = StreamReceiver::from_stream(ScriptedStream::new(chunks));
        rx.send_mode(&Mode::new(Encoding::UInt8, 16, 4)).unwrap();
        rx
    }

    #[test]
    fn test_send_mode_writes_frame() {
        let mut rx = ready(vec![]);
        let written = &rx.stream.as_ref().unwrap().written;
        assert_eq!(written, &FrameCodec::encode_mode_request(&Mode::new(Encoding::UInt8, 16, 4)));
        assert_eq!(rx.state(), SessionState::AwaitingLength);
        rx.disconnect();
    }

    #[test]
    fn test_receive_chunked_body() {
        let body: Vec<u8> = (0..64u8).collect();
        let mut script = vec![preamble(64)];
        script.extend(body.chunks(7).map(|c| c.to_vec()));
        let mut rx = ready(script);

        let mut sink = Vec::new();
        let mut calls = Vec::new();
        let (got, sink) = rx
            .receive_data(&mut sink, |done, total| calls.push((done, total)))
            .unwrap();

        assert_eq!(got, params());
        assert_eq!(sink.as_slice(), body.as_slice());
        assert_eq!(rx.bytes_received(), 64);
        assert_eq!(rx.state(), SessionState::Complete);
        assert!(calls.windows(2).all(|w| w[0].0 <= w[1].0));
        assert_eq!(calls.last(), Some(&(64, 64)));
    }

    #[test]
    fn test_truncated_stream_keeps_partial_bytes() {
        let mut rx = ready(vec![preamble(10), vec![7u8; 9]]);
        let mut buffer = RawBuffer::new();
        let err = rx.receive_raw(&mut buffer, |_, _| {}).unwrap_err();

        match err {
            Error::TruncatedStream { received, expected } => {
                assert_eq!(received, 9);
                assert_eq!(expected, 10);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(buffer.bytes_received(), 9);
        assert!(!buffer.is_complete());
        assert_eq!(rx.state(), SessionState::Failed);
        assert!(!rx.is_connected());
    }

    #[test]
    fn test_truncated_header() {
        let mut rx = ready(vec![vec![1, 2, 3]]);
        let err = rx.receive_data(&mut Vec::new(), |_, _| {}).unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedHeader {
                received: 3,
                expected: 8
            }
        ));
    }

    #[test]
    fn test_truncated_params() {
        let mut bytes = preamble(4);
        bytes.truncate(8 + 20);
        let mut rx = ready(vec![bytes]);
        let err = rx.receive_data(&mut Vec::new(), |_, _| {}).unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedParams {
                received: 20,
                expected: 38
            }
        ));
    }

    #[test]
    fn test_malformed_params() {
        let mut bytes = preamble(4);
        bytes[8] = b'9';
        let mut rx = ready(vec![bytes]);
        let err = rx.receive_data(&mut Vec::new(), |_, _| {}).unwrap_err();
        assert!(matches!(err, Error::MalformedParams { .. }));
        assert_eq!(rx.state(), SessionState::Failed);
    }

    #[test]
    fn test_zero_length_body() {
        let mut rx = ready(vec![preamble(0)]);
        let mut calls = Vec::new();
        rx.receive_data(&mut Vec::new(), |d, t| calls.push((d, t)))
            .unwrap();
        assert_eq!(calls, vec![(0, 0)]);
        assert_eq!(rx.state(), SessionState::Complete);
    }

    #[test]
    fn test_receive_before_send_is_rejected() {
        let mut rx = StreamReceiver::from_stream(ScriptedStream::new(vec![preamble(1)]));
        let err = rx.receive_data(&mut Vec::new(), |_, _| {}).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                expected: SessionState::AwaitingLength,
                actual: SessionState::Connected
            }
        ));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut rx = ready(vec![]);
        rx.disconnect();
        rx.disconnect();
        assert!(!rx.is_connected());
        assert_eq!(rx.state(), SessionState::Idle);
        assert!(rx.send_mode(&Mode::new(Encoding::Int8, 1, 1)).is_err());
    }

    #[test]
    fn test_raw_buffer_rejects_overflow() {
        let mut buffer = RawBuffer::new();
        buffer.reset(4);
        buffer.write_all(&[1, 2, 3]).unwrap();
        assert!(buffer.write_all(&[4, 5]).is_err());
        assert_eq!(buffer.bytes_received(), 3);
    }

    #[test]
    fn test_send_mode_write_failure() {
        let stream = ScriptedStream {
            fail_writes: true,
            ..Default::default()
        };
        let mut rx = StreamReceiver::from_stream(stream);
        let err = rx.send_mode(&Mode::new(Encoding::UInt8, 16, 4)).unwrap_err();
        assert!(matches!(err, Error::Send(ref e) if e.kind() == ErrorKind::BrokenPipe), "{err}");
        assert_eq!(rx.state(), SessionState::Failed);
        assert!(!rx.is_connected());
        assert!(rx.mode().is_none());
    }

    #[test]
    fn test_receive_data_into_fresh_raw_buffer() {
        let mut rx = ready(vec![preamble(4), vec![9, 8, 7, 6]]);
        let mut buffer = RawBuffer::new();
        let (got, buffer) = rx.receive_data(&mut buffer, |_, _| {}).unwrap();
        assert_eq!(got, params());
        assert_eq!(buffer.as_slice(), &[9, 8, 7, 6]);
        assert_eq!(rx.state(), SessionState::Complete);
    }

    #[test]
    fn test_sink_rejection_reports_byte_counts() {
        let mut rx = ready(vec![preamble(6), vec![1, 2], vec![3, 4, 5, 6]]);
        let mut buffer = RawBuffer::new();
        buffer.reset(3);
        let err = rx.receive_data(&mut buffer, |_, _| {}).unwrap_err();
        match err {
            Error::Receive {
                received,
                expected,
                source,
            } => {
                assert_eq!((received, expected), (2, 6));
                assert_eq!(source.kind(), ErrorKind::InvalidInput);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(buffer.as_slice(), &[1, 2]);
        assert_eq!(rx.state(), SessionState::Failed);
        assert!(!rx.is_connected());
    }

    #[test]
    fn test_reset_does_not_reserve_declared_size() {
        let mut buffer = RawBuffer::new();
        buffer.reset(1 << 40);
        assert!(buffer.capacity() <= INITIAL_RESERVE);
        assert_eq!(buffer.total_size(), Some(1 << 40));

        let body = vec![0xab; INITIAL_RESERVE + 1];
        buffer.write_all(&body).unwrap();
        assert_eq!(buffer.bytes_received(), body.len() as u64);
        assert!(!buffer.is_complete());
    }

    #[test]
    fn test_connect_refused() {
        // bind then drop to get a port nobody listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut rx = StreamReceiver::new();
        let err = rx.connect("127.0.0.1", port).unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        assert_eq!(rx.state(), SessionState::Failed);
        rx.disconnect();
    }
}
