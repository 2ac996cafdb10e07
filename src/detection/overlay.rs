// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测结果叠加绘制 (overlay rendering)

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use tracing::info;

use super::types::Detection;
use crate::error::Result;

const COLOR_PALETTE: [(u8, u8, u8); 10] = [
    (255, 64, 64),   // 红色
    (64, 255, 64),   // 绿色
    (64, 64, 255),   // 蓝色
    (255, 255, 64),  // 黄色
    (255, 64, 255),  // 品红
    (64, 255, 255),  // 青色
    (255, 128, 0),   // 橙色
    (128, 0, 255),   // 紫色
    (255, 128, 192), // 粉色
    (128, 255, 128), // 浅绿
];

pub fn class_color(class_id: usize) -> Rgb<u8> {
    let (r, g, b) = COLOR_PALETTE[class_id % COLOR_PALETTE.len()];
    Rgb([r, g, b])
}

/// `max(1, floor(2 * max(w, h) / 1000))`
pub fn line_width(width: u32, height: u32) -> u32 {
    (2 * width.max(height) / 1000).max(1)
}

/// Copy of `image` with every detection drawn as a hollow rectangle.
pub fn render(image: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = image.clone();
    let (w, h) = canvas.dimensions();
    let thickness = line_width(w, h);

    for det in detections {
        let bbox = det.bbox.clamp(w as f32, h as f32);
        let color = class_color(det.class_id);
        let (x1, y1) = (bbox.x1.round() as i32, bbox.y1.round() as i32);
        let (x2, y2) = (bbox.x2.round() as i32, bbox.y2.round() as i32);

        // 由外向内逐像素加粗
        for t in 0..thickness as i32 {
            let (bw, bh) = (x2 - x1 - 2 * t, y2 - y1 - 2 * t);
            if bw <= 0 || bh <= 0 {
                break;
            }
            let rect = Rect::at(x1 + t, y1 + t).of_size(bw as u32, bh as u32);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
    }
    canvas
}

/// `<dir>/detected_<source_name>`
pub fn overlay_path(dir: &Path, source_name: &str) -> PathBuf {
    dir.join(format!("detected_{source_name}"))
}

/// Render and save; the format follows the file extension.
pub fn save(
    image: &RgbImage,
    detections: &[Detection],
    dir: &Path,
    source_name: &str,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = overlay_path(dir, source_name);
    if detections.is_empty() {
        image.save(&path)?;
    } else {
        render(image, detections).save(&path)?;
    }
    info!(path = %path.display(), boxes = detections.len(), "overlay saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::BBox;

    #[test]
    fn test_line_width_rule() {
        assert_eq!(line_width(100, 100), 1);
        assert_eq!(line_width(999, 10), 1);
        assert_eq!(line_width(1000, 10), 2);
        assert_eq!(line_width(2400, 4000), 8);
    }

    #[test]
    fn test_render_draws_outline_only() {
        let image = RgbImage::new(50, 50);
        let det = Detection::new(BBox::new(10., 10., 30., 30.), 1, 0.9);
        let out = render(&image, &[det]);
        assert_eq!(*out.get_pixel(10, 10), class_color(1));
        assert_eq!(*out.get_pixel(29, 20), class_color(1));
        assert_eq!(*out.get_pixel(20, 20), Rgb([0, 0, 0]));
        // 原图不变
        assert_eq!(*image.get_pixel(10, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_save_names_after_source() {
        let dir = tempfile::tempdir().unwrap();
        let image = RgbImage::new(8, 8);
        let path = save(&image, &[], dir.path(), "scene.png").unwrap();
        assert_eq!(path, dir.path().join("detected_scene.png"));
        assert!(path.exists());
    }
}
