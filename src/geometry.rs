//! Safe-area geometry for overlay placement.
//!
//! Downstream video apps crop the virtual camera's output to their own aspect
//! ratios (grid tiles, portrait mobile layouts, ...). The safe area is the
//! canvas sub-rectangle that stays visible under every crop a mode cares
//! about, shrunk inward by a title-safe margin.

/// A rectangle in normalized canvas coordinates (0.0..=1.0 on both axes).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// The full canvas.
    pub const FULL: Rect = Rect {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    /// Create a rect of the given size centered in the unit canvas.
    pub fn centered(width: f64, height: f64) -> Self {
        Rect {
            x: (1.0 - width) / 2.0,
            y: (1.0 - height) / 2.0,
            width,
            height,
        }
    }

    /// True if the rect has no usable area.
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Intersection of two rects. May be empty.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);
        Rect {
            x: x0,
            y: y0,
            width: (x1 - x0).max(0.0),
            height: (y1 - y0).max(0.0),
        }
    }

    /// Shrink the rect toward its center by `fraction` of its own size
    /// (0.05 removes 5% of the width and 5% of the height).
    pub fn inset(&self, fraction: f64) -> Rect {
        let dw = self.width * fraction;
        let dh = self.height * fraction;
        Rect {
            x: self.x + dw / 2.0,
            y: self.y + dh / 2.0,
            width: self.width - dw,
            height: self.height - dh,
        }
    }

    /// True if `other` lies entirely within this rect (with float slack).
    pub fn contains(&self, other: &Rect) -> bool {
        const EPS: f64 = 1e-9;
        other.x + EPS >= self.x
            && other.y + EPS >= self.y
            && other.x + other.width <= self.x + self.width + EPS
            && other.y + other.height <= self.y + self.height + EPS
    }
}

/// How defensively the safe area is computed.
///
/// Broader crop lists and thicker padding cost usable canvas; `None` skips
/// the computation entirely and hands back the full canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafeAreaMode {
    /// Full canvas, no crop protection.
    None,
    /// Landscape desktop crop only, minimal padding.
    Aggressive,
    /// Common desktop crops, moderate padding.
    #[default]
    Balanced,
    /// Every supported platform crop including portrait, maximum padding.
    Conservative,
    /// Desktop-only crop list (no portrait), maximum padding.
    Compact,
}

impl SafeAreaMode {
    /// Target crop aspect ratios (width / height) this mode protects against.
    fn crop_aspects(&self) -> &'static [f64] {
        match self {
            SafeAreaMode::None => &[],
            SafeAreaMode::Aggressive => &[16.0 / 9.0],
            SafeAreaMode::Balanced => &[16.0 / 9.0, 4.0 / 3.0],
            SafeAreaMode::Conservative => {
                &[16.0 / 9.0, 4.0 / 3.0, 3.0 / 2.0, 1.0, 9.0 / 16.0]
            }
            SafeAreaMode::Compact => &[16.0 / 9.0, 4.0 / 3.0, 3.0 / 2.0],
        }
    }

    /// Title-safe padding removed from the intersection, as a fraction.
    fn padding(&self) -> f64 {
        match self {
            SafeAreaMode::None => 0.0,
            SafeAreaMode::Aggressive => 0.02,
            SafeAreaMode::Balanced => 0.05,
            SafeAreaMode::Conservative => 0.08,
            SafeAreaMode::Compact => 0.08,
        }
    }
}

/// Smallest rect ever returned, per side, when the intersection degenerates.
const MIN_SAFE_FRACTION: f64 = 0.2;

/// Compute the canvas region guaranteed visible under every crop in `mode`'s
/// platform list.
///
/// `input_aspect` is the camera's native width/height ratio; `output_size`
/// is the virtual camera canvas in pixels. The result is normalized to the
/// unit canvas, always non-empty, and always within the canvas.
pub fn compute_safe_area(mode: SafeAreaMode, input_aspect: f64, output_size: (u32, u32)) -> Rect {
    if mode == SafeAreaMode::None {
        return Rect::FULL;
    }

    let (out_w, out_h) = (output_size.0 as f64, output_size.1 as f64);
    if !input_aspect.is_finite() || input_aspect <= 0.0 || out_w <= 0.0 || out_h <= 0.0 {
        return Rect::centered(MIN_SAFE_FRACTION, MIN_SAFE_FRACTION);
    }

    // Center-fit the camera's native aspect into the canvas.
    let out_aspect = out_w / out_h;
    let (content_w, content_h) = fit_aspect(input_aspect, out_w, out_h, out_aspect);
    let content_aspect = content_w / content_h;

    // Intersect the centered crops of every target ratio. All crops share
    // the canvas center, so the intersection is just the minimum extents.
    let mut safe_w = content_w;
    let mut safe_h = content_h;
    for &crop_aspect in mode.crop_aspects() {
        let (cw, ch) = fit_aspect(crop_aspect, content_w, content_h, content_aspect);
        safe_w = safe_w.min(cw);
        safe_h = safe_h.min(ch);
    }

    let rect = Rect::centered(safe_w / out_w, safe_h / out_h).inset(mode.padding());

    if rect.is_empty() || rect.width < f64::EPSILON || rect.height < f64::EPSILON {
        // Pathological input; hand back something drawable rather than nothing.
        return Rect::centered(MIN_SAFE_FRACTION, MIN_SAFE_FRACTION);
    }
    rect
}

/// Largest `aspect`-ratio box that fits inside a `container_w x container_h`
/// box of ratio `container_aspect`.
fn fit_aspect(aspect: f64, container_w: f64, container_h: f64, container_aspect: f64) -> (f64, f64) {
    if aspect >= container_aspect {
        (container_w, container_w / aspect)
    } else {
        (container_h * aspect, container_h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODES: [SafeAreaMode; 5] = [
        SafeAreaMode::None,
        SafeAreaMode::Aggressive,
        SafeAreaMode::Balanced,
        SafeAreaMode::Conservative,
        SafeAreaMode::Compact,
    ];

    const ASPECTS: [f64; 5] = [
        16.0 / 9.0,
        4.0 / 3.0,
        3.0 / 2.0,
        1.0,
        9.0 / 16.0,
    ];

    #[test]
    fn test_all_modes_and_aspects_nonempty_within_canvas() {
        for mode in MODES {
            for aspect in ASPECTS {
                let rect = compute_safe_area(mode, aspect, (1920, 1080));
                assert!(
                    !rect.is_empty(),
                    "empty rect for {:?} aspect {}",
                    mode,
                    aspect
                );
                assert!(
                    Rect::FULL.contains(&rect),
                    "rect outside canvas for {:?} aspect {}: {:?}",
                    mode,
                    aspect,
                    rect
                );
            }
        }
    }

    #[test]
    fn test_mode_nesting() {
        // conservative ⊆ balanced ⊆ aggressive ⊆ none for the same input.
        for aspect in ASPECTS {
            let none = compute_safe_area(SafeAreaMode::None, aspect, (1920, 1080));
            let aggressive = compute_safe_area(SafeAreaMode::Aggressive, aspect, (1920, 1080));
            let balanced = compute_safe_area(SafeAreaMode::Balanced, aspect, (1920, 1080));
            let conservative = compute_safe_area(SafeAreaMode::Conservative, aspect, (1920, 1080));

            assert!(none.contains(&aggressive), "aspect {}", aspect);
            assert!(aggressive.contains(&balanced), "aspect {}", aspect);
            assert!(balanced.contains(&conservative), "aspect {}", aspect);
        }
    }

    #[test]
    fn test_balanced_4_3_on_1080p_canvas() {
        // Scenario: 4:3 camera on a 1920x1080 canvas, balanced mode.
        let rect = compute_safe_area(SafeAreaMode::Balanced, 4.0 / 3.0, (1920, 1080));

        // Centered.
        assert!((rect.x + rect.width / 2.0 - 0.5).abs() < 1e-9);
        assert!((rect.y + rect.height / 2.0 - 0.5).abs() < 1e-9);

        // Width lands between 70% and 85% of the canvas.
        assert!(
            rect.width >= 0.70 && rect.width <= 0.85,
            "width was {}",
            rect.width
        );
        assert!(Rect::FULL.contains(&rect));
    }

    #[test]
    fn test_none_mode_is_full_canvas() {
        let rect = compute_safe_area(SafeAreaMode::None, 16.0 / 9.0, (1280, 720));
        assert_eq!(rect, Rect::FULL);
    }

    #[test]
    fn test_pathological_input_falls_back_to_minimum_rect() {
        let cases = [
            compute_safe_area(SafeAreaMode::Conservative, 0.0, (1920, 1080)),
            compute_safe_area(SafeAreaMode::Conservative, -1.0, (1920, 1080)),
            compute_safe_area(SafeAreaMode::Conservative, f64::NAN, (1920, 1080)),
            compute_safe_area(SafeAreaMode::Conservative, 16.0 / 9.0, (0, 0)),
            compute_safe_area(SafeAreaMode::Balanced, f64::INFINITY, (1920, 1080)),
        ];
        for rect in cases {
            assert!(!rect.is_empty());
            assert!((rect.width - MIN_SAFE_FRACTION).abs() < 1e-9);
            assert!((rect.height - MIN_SAFE_FRACTION).abs() < 1e-9);
            assert!(Rect::FULL.contains(&rect));
        }
    }

    #[test]
    fn test_compact_excludes_portrait_crops() {
        // Portrait 9:16 crop narrows the safe area drastically; compact mode
        // skips it, so compact must be wider than conservative.
        let compact = compute_safe_area(SafeAreaMode::Compact, 16.0 / 9.0, (1920, 1080));
        let conservative = compute_safe_area(SafeAreaMode::Conservative, 16.0 / 9.0, (1920, 1080));
        assert!(compact.width > conservative.width);
    }

    #[test]
    fn test_rect_intersect() {
        let a = Rect {
            x: 0.0,
            y: 0.0,
            width: 0.6,
            height: 0.6,
        };
        let b = Rect {
            x: 0.4,
            y: 0.4,
            width: 0.6,
            height: 0.6,
        };
        let i = a.intersect(&b);
        assert!((i.x - 0.4).abs() < 1e-9);
        assert!((i.width - 0.2).abs() < 1e-9);

        let disjoint = Rect {
            x: 0.8,
            y: 0.8,
            width: 0.1,
            height: 0.1,
        };
        assert!(a.intersect(&disjoint).is_empty());
    }

    #[test]
    fn test_rect_inset_keeps_center() {
        let r = Rect::centered(0.8, 0.6).inset(0.1);
        assert!((r.x + r.width / 2.0 - 0.5).abs() < 1e-9);
        assert!((r.y + r.height / 2.0 - 0.5).abs() < 1e-9);
        assert!((r.width - 0.72).abs() < 1e-9);
        assert!((r.height - 0.54).abs() < 1e-9);
    }
}
