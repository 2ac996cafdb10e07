// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测系统 (Detection System)
//!
//! 大图切片检测:
//! - detector:   Detector 能力 + ONNX 实现
//! - presets:    模型预设 (权重 / 输入尺寸 / 切片参数)
//! - aggregator: 边缘抑制 + 全局去重
//! - overlay:    检测框绘制
//! - processor:  单张图片完整流程
//! - worker:     多文件后台任务
pub mod aggregator;
pub mod detector;
pub mod overlay;
pub mod presets;
pub mod processor;
pub mod types;
pub mod worker;

pub use aggregator::{DetectionAggregator, DEDUP_IOU, DEFAULT_BATCH_SIZE};
pub use detector::{Detector, OnnxDetector};
pub use presets::{preset, presets, ModelPreset};
pub use processor::{ProcessedImage, TiledProcessor};
pub use types::{BBox, Detection, DetectionSet};
pub use worker::DetectionTask;
