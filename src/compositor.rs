//! Overlay compositing.
//!
//! Blends a straight-alpha RGBA overlay bitmap onto a live RGB24 frame. The
//! overlay is anchored to the bottom edge, horizontally centered, and clipped
//! when it is larger than the frame. No scaling happens here; the overlay is
//! rendered at its final pixel size before it reaches the driver.

use crate::session::Frame;

/// An overlay bitmap plus its dimensions, straight (non-premultiplied) alpha.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayBitmap {
    /// Raw RGBA pixel data, 4 bytes per pixel, row-major.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl OverlayBitmap {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// A fully transparent bitmap of the given size.
    pub fn transparent(width: u32, height: u32) -> Self {
        OverlayBitmap {
            data: vec![0; width as usize * height as usize * Self::BYTES_PER_PIXEL],
            width,
            height,
        }
    }

    /// A solid-color bitmap, mainly for tests and placeholder rendering.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut bitmap = Self::transparent(width, height);
        for px in bitmap.data.chunks_exact_mut(Self::BYTES_PER_PIXEL) {
            px.copy_from_slice(&rgba);
        }
        bitmap
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Composite `overlay` onto `frame` in place, bottom edge flush with the
/// frame's bottom edge, horizontally centered.
pub fn composite(frame: &mut Frame, overlay: &OverlayBitmap) {
    if overlay.is_empty() || frame.width == 0 || frame.height == 0 {
        return;
    }

    let fw = frame.width as i64;
    let fh = frame.height as i64;
    let ow = overlay.width as i64;
    let oh = overlay.height as i64;

    // Anchor: bottom-centered. May be negative when the overlay exceeds the
    // frame; the per-axis clip below handles that.
    let dest_x = (fw - ow) / 2;
    let dest_y = fh - oh;

    let src_x0 = (-dest_x).max(0);
    let src_y0 = (-dest_y).max(0);
    let src_x1 = ow.min(fw - dest_x);
    let src_y1 = oh.min(fh - dest_y);
    if src_x0 >= src_x1 || src_y0 >= src_y1 {
        return;
    }

    for sy in src_y0..src_y1 {
        let fy = (dest_y + sy) as usize;
        for sx in src_x0..src_x1 {
            let fx = (dest_x + sx) as usize;
            let si = (sy as usize * overlay.width as usize + sx as usize)
                * OverlayBitmap::BYTES_PER_PIXEL;
            let a = overlay.data[si + 3] as u32;
            if a == 0 {
                continue;
            }
            let di = (fy * frame.width as usize + fx) * Frame::BYTES_PER_PIXEL;
            if a == 255 {
                frame.data[di..di + 3].copy_from_slice(&overlay.data[si..si + 3]);
                continue;
            }
            for c in 0..3 {
                let src = overlay.data[si + c] as u32;
                let dst = frame.data[di + c] as u32;
                frame.data[di + c] = ((src * a + dst * (255 - a)) / 255) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(width: u32, height: u32, level: u8) -> Frame {
        let mut frame = Frame::black(width, height);
        frame.data.fill(level);
        frame
    }

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * frame.width as usize + x as usize) * Frame::BYTES_PER_PIXEL;
        [frame.data[i], frame.data[i + 1], frame.data[i + 2]]
    }

    #[test]
    fn test_opaque_overlay_replaces_pixels() {
        let mut frame = gray_frame(8, 8, 100);
        let overlay = OverlayBitmap::solid(4, 2, [255, 0, 0, 255]);
        composite(&mut frame, &overlay);

        // Bottom-centered: columns 2..6, rows 6..8.
        assert_eq!(pixel(&frame, 2, 6), [255, 0, 0]);
        assert_eq!(pixel(&frame, 5, 7), [255, 0, 0]);
        // Outside the overlay region the frame is untouched.
        assert_eq!(pixel(&frame, 1, 7), [100, 100, 100]);
        assert_eq!(pixel(&frame, 6, 7), [100, 100, 100]);
        assert_eq!(pixel(&frame, 3, 5), [100, 100, 100]);
    }

    #[test]
    fn test_half_alpha_blends() {
        let mut frame = gray_frame(4, 4, 100);
        let overlay = OverlayBitmap::solid(4, 4, [200, 0, 0, 128]);
        composite(&mut frame, &overlay);

        let [r, g, b] = pixel(&frame, 0, 0);
        // (200*128 + 100*127) / 255 = 150, (0*128 + 100*127) / 255 = 49.
        assert_eq!(r, 150);
        assert_eq!(g, 49);
        assert_eq!(b, 49);
    }

    #[test]
    fn test_zero_alpha_is_a_no_op() {
        let mut frame = gray_frame(4, 4, 77);
        let before = frame.data.clone();
        composite(&mut frame, &OverlayBitmap::transparent(4, 4));
        assert_eq!(frame.data, before);
    }

    #[test]
    fn test_oversized_overlay_is_clipped() {
        let mut frame = gray_frame(4, 4, 0);
        let overlay = OverlayBitmap::solid(10, 10, [50, 60, 70, 255]);
        composite(&mut frame, &overlay);
        // Every frame pixel is covered, and no out-of-bounds write happened.
        assert!(frame
            .data
            .chunks_exact(Frame::BYTES_PER_PIXEL)
            .all(|px| px == [50, 60, 70]));
    }

    #[test]
    fn test_empty_inputs_are_safe() {
        let mut frame = gray_frame(4, 4, 10);
        composite(&mut frame, &OverlayBitmap::transparent(0, 0));
        assert!(frame.data.iter().all(|&b| b == 10));

        let mut empty = Frame::black(0, 0);
        composite(&mut empty, &OverlayBitmap::solid(2, 2, [1, 2, 3, 255]));
        assert!(empty.data.is_empty());
    }

    #[test]
    fn test_anchor_is_bottom_edge() {
        let mut frame = gray_frame(6, 6, 0);
        let overlay = OverlayBitmap::solid(6, 1, [255, 255, 255, 255]);
        composite(&mut frame, &overlay);
        assert_eq!(pixel(&frame, 0, 5), [255, 255, 255]);
        assert_eq!(pixel(&frame, 0, 4), [0, 0, 0]);
    }
}
