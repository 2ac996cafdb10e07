// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod acquisition; // 栅格采集 (TCP)
pub mod config; // 客户端配置
pub mod detection; // 切片检测
pub mod error;
pub mod raster; // 栅格解码
pub mod task; // 后台任务事件与取消
pub mod tiling; // 切片网格

pub use crate::acquisition::{Encoding, FetchRequest, FetchTask, Mode, Params, StreamReceiver};
pub use crate::config::AppConfig;
pub use crate::detection::{
    BBox, Detection, DetectionAggregator, DetectionSet, DetectionTask, Detector, OnnxDetector,
    TiledProcessor,
};
pub use crate::error::{Error, Result};
pub use crate::raster::Raster;
pub use crate::task::{CancelToken, TaskEvent};
pub use crate::tiling::{Tile, TileConfig};

/// Greedy NMS, class-agnostic: keep the most confident detection and drop
/// every later one whose IoU with a kept detection exceeds `iou_threshold`.
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].iou(&xs[index]);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// Local time as `YYYY<d>MM<d>DD<d>HH<d>MM<d>SS`.
pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S",
        delimiter, delimiter, delimiter, delimiter, delimiter
    );
    chrono::Local::now().format(&fmt).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Detection {
        Detection::new(BBox::new(x1, y1, x2, y2), 0, confidence)
    }

    #[test]
    fn test_nms_keeps_most_confident() {
        // IoU 0.5
        let mut xs = vec![det(0., 0., 10., 5., 0.4), det(0., 0., 10., 10., 0.9)];
        non_max_suppression(&mut xs, 0.1);
        assert_eq!(xs.len(), 1);
        assert_eq!(xs[0].confidence, 0.9);
    }

    #[test]
    fn test_nms_threshold_is_inclusive_keep() {
        // IoU exactly 0.5 survives a 0.5 threshold
        let mut xs = vec![det(0., 0., 10., 10., 0.9), det(0., 0., 10., 5., 0.4)];
        non_max_suppression(&mut xs, 0.5);
        assert_eq!(xs.len(), 2);
    }

    #[test]
    fn test_nms_disjoint_untouched() {
        let mut xs = vec![
            det(0., 0., 10., 10., 0.3),
            det(20., 20., 30., 30., 0.8),
            det(40., 40., 50., 50., 0.5),
        ];
        non_max_suppression(&mut xs, 0.1);
        let confs: Vec<f32> = xs.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.8, 0.5, 0.3]);
    }

    #[test]
    fn test_time_string_shape() {
        let s = gen_time_string("-");
        assert_eq!(s.len(), 19);
        assert_eq!(s.split('-').count(), 6);
    }
}
