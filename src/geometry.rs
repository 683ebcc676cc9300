//! Layout geometry supplied by the host: element boxes and the scroll viewport.

use serde::{Deserialize, Serialize};

/// An element's border box in document coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Overlap test. Touching edges do not count, zero-sized boxes never intersect.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && self.right() > other.x
            && self.y < other.bottom()
            && self.bottom() > other.y
    }

    /// Grow the rect vertically by `margin` on both edges (a `"Npx 0px"` root margin).
    pub fn expand_vertical(&self, margin: f32) -> Rect {
        Rect {
            x: self.x,
            y: self.y - margin,
            width: self.width,
            height: self.height + margin * 2.0,
        }
    }
}

/// The visible scroll region of the page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub scroll_x: f32,
    pub scroll_y: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            scroll_x: 0.0,
            scroll_y: 0.0,
            width: 1280.0,
            height: 800.0,
        }
    }
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            scroll_x: 0.0,
            scroll_y: 0.0,
            width,
            height,
        }
    }

    pub fn scrolled_to(mut self, scroll_y: f32) -> Self {
        self.scroll_y = scroll_y;
        self
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.scroll_x, self.scroll_y, self.width, self.height)
    }

    pub fn intersects(&self, rect: &Rect) -> bool {
        self.rect().intersects(rect)
    }

    /// Intersection against the viewport widened by a vertical root margin.
    pub fn intersects_with_margin(&self, rect: &Rect, margin: f32) -> bool {
        self.rect().expand_vertical(margin).intersects(rect)
    }

    /// Parse a `WIDTHxHEIGHT` string such as `1280x800`.
    pub fn parse_size(s: &str) -> Option<Self> {
        let (w, h) = s.trim().split_once(['x', 'X'])?;
        let width: f32 = w.trim().parse().ok()?;
        let height: f32 = h.trim().parse().ok()?;
        if width <= 0.0 || height <= 0.0 {
            return None;
        }
        Some(Self::new(width, height))
    }
}
