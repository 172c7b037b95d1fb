//! Boxes, overlap and letterbox coordinate mapping.

use serde::Serialize;

/// Axis-aligned box in pixel coordinates, corners inclusive of `x1,y1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// From a center point and size, as YOLO heads emit them.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union; 0 when either box is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = ix * iy;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// Clip to an image of `width` x `height`.
    pub fn clamp(&self, width: f32, height: f32) -> Self {
        Self::new(
            self.x1.clamp(0.0, width),
            self.y1.clamp(0.0, height),
            self.x2.clamp(0.0, width),
            self.y2.clamp(0.0, height),
        )
    }

    /// `(x, y, width, height)` rounded to whole pixels.
    pub fn to_xywh(&self) -> (u32, u32, u32, u32) {
        (
            self.x1.max(0.0).round() as u32,
            self.y1.max(0.0).round() as u32,
            self.width().round() as u32,
            self.height().round() as u32,
        )
    }
}

/// Uniform scale plus centered padding that fits a source image into a
/// model's square (or rectangular) input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    /// Size of the resized image before padding.
    pub resized: (u32, u32),
}

impl Letterbox {
    pub fn fit(src_width: u32, src_height: u32, dst_width: u32, dst_height: u32) -> Self {
        let scale = (dst_width as f32 / src_width.max(1) as f32)
            .min(dst_height as f32 / src_height.max(1) as f32);
        let resized_w = ((src_width as f32 * scale).round() as u32).clamp(1, dst_width.max(1));
        let resized_h = ((src_height as f32 * scale).round() as u32).clamp(1, dst_height.max(1));
        Self {
            scale,
            pad_x: dst_width.saturating_sub(resized_w) as f32 / 2.0,
            pad_y: dst_height.saturating_sub(resized_h) as f32 / 2.0,
            resized: (resized_w, resized_h),
        }
    }

    /// Model-input point back to source-image pixels.
    pub fn point_to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }

    pub fn to_source(&self, bbox: &BoundingBox) -> BoundingBox {
        let (x1, y1) = self.point_to_source(bbox.x1, bbox.y1);
        let (x2, y2) = self.point_to_source(bbox.x2, bbox.y2);
        BoundingBox::new(x1, y1, x2, y2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_iou_of_half_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&BoundingBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
    }

    #[test]
    fn test_letterbox_wide_image() {
        let lb = Letterbox::fit(1280, 720, 640, 640);
        assert_eq!(lb.scale, 0.5);
        assert_eq!(lb.resized, (640, 360));
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 140.0));

        let bbox = lb.to_source(&BoundingBox::new(100.0, 240.0, 200.0, 340.0));
        assert_eq!(bbox, BoundingBox::new(200.0, 200.0, 400.0, 400.0));
    }

    #[test]
    fn test_letterbox_zero_target_does_not_underflow() {
        let lb = Letterbox::fit(1280, 720, 0, 0);
        assert_eq!(lb.resized, (1, 1));
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 0.0));
    }

    #[test]
    fn test_from_center_and_xywh() {
        let bbox = BoundingBox::from_center(50.0, 40.0, 20.0, 10.0);
        assert_eq!(bbox.to_xywh(), (40, 35, 20, 10));
        assert_eq!(bbox.clamp(45.0, 100.0).x2, 45.0);
    }

    proptest! {
        #[test]
        fn iou_is_symmetric_and_bounded(
            ax in 0.0f32..100.0, ay in 0.0f32..100.0, aw in 1.0f32..50.0, ah in 1.0f32..50.0,
            bx in 0.0f32..100.0, by in 0.0f32..100.0, bw in 1.0f32..50.0, bh in 1.0f32..50.0,
        ) {
            let a = BoundingBox::new(ax, ay, ax + aw, ay + ah);
            let b = BoundingBox::new(bx, by, bx + bw, by + bh);
            let iou = a.iou(&b);
            prop_assert!((0.0..=1.0001).contains(&iou));
            prop_assert!((iou - b.iou(&a)).abs() < 1e-5);
            prop_assert!((a.iou(&a) - 1.0).abs() < 1e-5);
        }
    }
}
