// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 后台任务公共部分 (shared pieces of the background tasks)
//!
//! Acquisition and detection run on their own threads and talk back to the
//! caller through a `crossbeam_channel` of [`TaskEvent`]s. Cancellation is
//! cooperative: workers poll a [`CancelToken`] between units of work.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::acquisition::FetchOutcome;
use crate::error::Error;

/// 取消令牌 (shared, cloneable cancellation flag)
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Error::Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// 任务事件 (worker → caller)
#[derive(Debug)]
pub enum TaskEvent {
    /// Monotonically non-decreasing percentage with a short label.
    Progress { percent: u8, label: String },
    /// A raster was received, decoded and saved.
    Fetched(FetchOutcome),
    /// One image went through tiled detection.
    FileProcessed {
        file: String,
        detections: usize,
        overlay: PathBuf,
    },
    /// A single file failed; the task carries on with the next one.
    FileFailed { file: String, error: Error },
    /// The whole task failed.
    Failed(Error),
    Finished,
}

/// 进度上报器: turns `(done, total)` pairs into de-duplicated percentages.
pub struct ProgressReporter {
    tx: Sender<TaskEvent>,
    label: String,
    last: Option<u8>,
}

impl ProgressReporter {
    pub fn new(tx: Sender<TaskEvent>, label: impl Into<String>) -> Self {
        Self {
            tx,
            label: label.into(),
            last: None,
        }
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn report(&mut self, done: u64, total: u64) {
        let percent = if total == 0 {
            100
        } else {
            (done.min(total) * 100 / total) as u8
        };
        self.report_percent(percent);
    }

    /// Emits only when the value moves forward.
    pub fn report_percent(&mut self, percent: u8) {
        let percent = percent.min(100);
        if self.last.is_some_and(|last| percent <= last) {
            return;
        }
        self.last = Some(percent);
        // 接收端已关闭时静默丢弃
        let _ = self.tx.send(TaskEvent::Progress {
            percent,
            label: self.label.clone(),
        });
    }

    /// Force a labelled notification at `percent`, even if it repeats.
    pub fn announce(&mut self, percent: u8) {
        let percent = percent.min(100).max(self.last.unwrap_or(0));
        self.last = Some(percent);
        let _ = self.tx.send(TaskEvent::Progress {
            percent,
            label: self.label.clone(),
        });
    }

    /// Guarantee the final notification reads 100%.
    pub fn finish(&mut self) {
        if self.last != Some(100) {
            self.announce(100);
        }
    }
}
