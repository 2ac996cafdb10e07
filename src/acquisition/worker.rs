// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 采集任务 (Fetch task)
//! 职责: 连接 → 发送模式 → 接收数据 → 解码 → 保存, 总是断开连接

use std::fs;
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{error, info};

use super::receiver::{RawBuffer, StreamReceiver, Transport};
use super::{Mode, Params};
use crate::error::Result;
use crate::raster;
use crate::task::{CancelToken, ProgressReporter, TaskEvent};

/// 采集请求
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub host: String,
    pub port: u16,
    pub mode: Mode,
    /// Directory for the decoded `image_<timestamp>.tiff`.
    pub raster_dir: PathBuf,
    /// Optional dump of the raw body.
    pub raw_dump: Option<PathBuf>,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
}

/// 采集结果
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub params: Params,
    pub image_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
    /// The body was shorter than the declared raster.
    pub truncated: bool,
}

impl FetchOutcome {
    pub fn file_name(&self) -> String {
        self.image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub struct FetchTask {
    request: FetchRequest,
}

impl FetchTask {
    pub fn new(request: FetchRequest) -> Self {
        Self { request }
    }

    /// Run on a dedicated thread. Events: `Progress`*, then `Fetched` or `Failed`.
    pub fn spawn(self, tx: Sender<TaskEvent>, cancel: CancelToken) -> JoinHandle<()> {
        std::thread::spawn(move || {
            let event = match self.run(&tx, &cancel) {
                Ok(outcome) => TaskEvent::Fetched(outcome),
                Err(e) => TaskEvent::Failed(e),
            };
            let _ = tx.send(event);
        })
    }

    /// Blocking body of [`spawn`](Self::spawn); only progress goes to `tx`.
    pub fn run(&self, tx: &Sender<TaskEvent>, cancel: &CancelToken) -> Result<FetchOutcome> {
        info!(host = %self.request.host, port = self.request.port, "🎬 fetch task started");
        let result = self.fetch(tx, cancel);
        match &result {
            Ok(outcome) => info!(path = %outcome.image_path.display(), "fetch task finished"),
            Err(e) => error!(error = %e, "fetch task failed"),
        }
        result
    }

    fn fetch(&self, tx: &Sender<TaskEvent>, cancel: &CancelToken) -> Result<FetchOutcome> {
        cancel.check()?;
        let mut receiver = StreamReceiver::new()
            .with_timeouts(self.request.connect_timeout, self.request.read_timeout);
        let result = receiver
            .connect(&self.request.host, self.request.port)
            .and_then(|_| self.acquire(&mut receiver, tx, cancel));
        receiver.disconnect();
        result
    }

    /// Everything after the connection is open.
    pub fn acquire<S: Transport>(
        &self,
        receiver: &mut StreamReceiver<S>,
        tx: &Sender<TaskEvent>,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome> {
        cancel.check()?;
        receiver.send_mode(&self.request.mode)?;

        cancel.check()?;
        let mut reporter = ProgressReporter::new(tx.clone(), "Receiving image");
        let mut buffer = RawBuffer::new();
        let params = receiver.receive_raw(&mut buffer, |done, total| reporter.report(done, total))?;
        reporter.finish();
        receiver.disconnect();

        if let Some(path) = &self.request.raw_dump {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, buffer.as_slice())?;
            info!(path = %path.display(), "raw body saved");
        }

        cancel.check()?;
        let declared_width = params.width.max(0) as usize;
        let declared_height = params.height.max(0) as usize;
        let raster = raster::decode(
            buffer.as_slice(),
            declared_width,
            declared_height,
            params.encoding,
        )?;
        let image_path = raster.save_timestamped(&self.request.raster_dir)?;

        Ok(FetchOutcome {
            params,
            image_path,
            width: raster.width() as u32,
            height: raster.height() as u32,
            bytes: buffer.bytes_received(),
            truncated: raster.is_truncated(),
        })
    }
}
