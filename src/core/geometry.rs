//! Viewport transform for the displayed frame
//!
//! Content pixel `(cx, cy)` is drawn at viewport position
//! `(left + cx * scale, top + cy * scale)`. `width`/`height` are the fixed
//! display surface size.
//!
//! Invariant: `MIN_SCALE <= scale <= MAX_SCALE`, except right after `fit()`,
//! which scales the image to exactly fill the surface.

use log::trace;
use serde::{Deserialize, Serialize};

pub const MIN_SCALE: f64 = 0.1;
pub const MAX_SCALE: f64 = 10.0;

/// One wheel notch
pub const ZOOM_IN_FACTOR: f64 = 6.0 / 5.0;
pub const ZOOM_OUT_FACTOR: f64 = 5.0 / 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoomDirection {
    In,
    Out,
}

impl ZoomDirection {
    fn factor(self) -> f64 {
        match self {
            ZoomDirection::In => ZOOM_IN_FACTOR,
            ZoomDirection::Out => ZOOM_OUT_FACTOR,
        }
    }
}

/// Mutable part of the transform, as sent to the rendering surface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometrySnapshot {
    pub scale: f64,
    pub left: f64,
    pub top: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub scale: f64,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Geometry {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            scale: 1.0,
            left: 0.0,
            top: 0.0,
            width,
            height,
        }
    }

    pub fn snapshot(&self) -> GeometrySnapshot {
        GeometrySnapshot {
            scale: self.scale,
            left: self.left,
            top: self.top,
        }
    }

    /// Viewport point -> content point
    pub fn to_content(&self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.left) / self.scale, (y - self.top) / self.scale)
    }

    /// Content point -> viewport point
    pub fn to_viewport(&self, cx: f64, cy: f64) -> (f64, f64) {
        (self.left + cx * self.scale, self.top + cy * self.scale)
    }

    /// Scale the image to fit the surface and center it. No clamping.
    pub fn fit(&mut self, image_width: f64, image_height: f64) {
        if image_width <= 0.0 || image_height <= 0.0 {
            return;
        }
        self.scale = (self.width / image_width).min(self.height / image_height);
        self.top = (self.height - image_height * self.scale) / 2.0;
        self.left = (self.width - image_width * self.scale) / 2.0;
        trace!("fit: scale={:.4} left={:.1} top={:.1}", self.scale, self.left, self.top);
    }

    /// Zoom to the content box `[xtl, xbr] x [ytl, ybr]` and center on it.
    pub fn focus(&mut self, xtl: f64, xbr: f64, ytl: f64, ybr: f64) {
        let box_width = xbr - xtl;
        let box_height = ybr - ytl;
        let scale = (self.width / box_width).min(self.height / box_height);
        self.scale = clamp_scale(scale);
        self.left = (self.width / self.scale - xtl * 2.0 - box_width) * self.scale / 2.0;
        self.top = (self.height / self.scale - ytl * 2.0 - box_height) * self.scale / 2.0;
        trace!("focus: scale={:.4} left={:.1} top={:.1}", self.scale, self.left, self.top);
    }

    /// Zoom one notch keeping the content under viewport point `(x, y)` fixed.
    pub fn zoom_at(&mut self, x: f64, y: f64, direction: ZoomDirection) {
        let (old_cx, old_cy) = self.to_content(x, y);

        self.scale = clamp_scale(self.scale * direction.factor());

        let (new_cx, new_cy) = self.to_content(x, y);
        self.left += (new_cx - old_cx) * self.scale;
        self.top += (new_cy - old_cy) * self.scale;
    }

    /// Pure translation
    pub fn translate(&mut self, d_top: f64, d_left: f64) {
        self.top += d_top;
        self.left += d_left;
    }
}

fn clamp_scale(scale: f64) -> f64 {
    if scale.is_nan() {
        return MIN_SCALE;
    }
    scale.clamp(MIN_SCALE, MAX_SCALE)
}
