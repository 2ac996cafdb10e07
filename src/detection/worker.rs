// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测任务 (detection task over a list of files)
//! 职责: 逐文件切片检测, 单个文件失败不影响后续文件

use std::path::PathBuf;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use tracing::{error, info, warn};

use super::detector::Detector;
use super::processor::TiledProcessor;
use crate::error::Error;
use crate::task::{CancelToken, ProgressReporter, TaskEvent};

pub struct DetectionTask<D: Detector> {
    processor: TiledProcessor<D>,
    files: Vec<PathBuf>,
    conf: f32,
}

impl<D: Detector + Send + 'static> DetectionTask<D> {
    pub fn new(processor: TiledProcessor<D>, files: Vec<PathBuf>, conf: f32) -> Self {
        Self {
            processor,
            files,
            conf,
        }
    }

    /// Run on a dedicated thread, handing the processor back when done.
    pub fn spawn(self, tx: Sender<TaskEvent>, cancel: CancelToken) -> JoinHandle<TiledProcessor<D>> {
        std::thread::spawn(move || self.run(&tx, &cancel))
    }
}

impl<D: Detector> DetectionTask<D> {
    /// Events: per file `Progress(100*i/n, name)` then `FileProcessed` or
    /// `FileFailed`; finally `Progress(100)` and `Finished`. On cancellation
    /// `Failed(Cancelled)` replaces the tail.
    pub fn run(mut self, tx: &Sender<TaskEvent>, cancel: &CancelToken) -> TiledProcessor<D> {
        let total = self.files.len();
        info!(files = total, conf = self.conf, "🎬 detection task started");
        let mut reporter = ProgressReporter::new(tx.clone(), "");

        for (i, path) in self.files.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(done = i, total, "detection task cancelled");
                let _ = tx.send(TaskEvent::Failed(Error::Cancelled));
                return self.processor;
            }

            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            reporter.set_label(file.clone());
            reporter.announce((100 * i / total) as u8);

            match self.processor.process_image(path, self.conf, cancel) {
                Ok(done) => {
                    info!(file = %file, detections = done.detections.len(), "file processed");
                    let _ = tx.send(TaskEvent::FileProcessed {
                        file,
                        detections: done.detections.len(),
                        overlay: done.overlay,
                    });
                }
                Err(Error::Cancelled) => {
                    warn!(file = %file, "detection task cancelled mid-file");
                    let _ = tx.send(TaskEvent::Failed(Error::Cancelled));
                    return self.processor;
                }
                Err(e) => {
                    error!(file = %file, error = %e, "file failed");
                    let _ = tx.send(TaskEvent::FileFailed { file, error: e });
                }
            }
        }

        reporter.set_label("Done");
        reporter.announce(100);
        let _ = tx.send(TaskEvent::Finished);
        info!(files = total, "detection task finished");
        self.processor
    }
}
