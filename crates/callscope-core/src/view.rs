//! Affine camera mapping normalized graph space to device space
//!
//! `device = zoom · point · viewport − origin`, independently per axis.
//! Zooming at a device-space anchor adjusts the origin so the anchor stays put.

use crate::model::{Point, Viewport};

/// Base of the per-notch wheel zoom.
const WHEEL_ZOOM_BASE: f64 = 1.25;

/// Camera origin plus independent x/y zoom ratios.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    origin: Point,
    zoom_x: f64,
    zoom_y: f64,
}

impl Default for ViewTransform {
    fn default() -> Self {
        ViewTransform {
            origin: Point::new(0.0, 0.0),
            zoom_x: 1.0,
            zoom_y: 1.0,
        }
    }
}

impl ViewTransform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn origin(&self) -> Point {
        self.origin
    }

    pub fn zoom_x(&self) -> f64 {
        self.zoom_x
    }

    pub fn zoom_y(&self) -> f64 {
        self.zoom_y
    }

    /// Map a normalized graph point to device coordinates.
    pub fn to_device(&self, point: Point, viewport: Viewport) -> Point {
        Point::new(
            self.zoom_x * point.x * viewport.width - self.origin.x,
            self.zoom_y * point.y * viewport.height - self.origin.y,
        )
    }

    /// Inverse of [`to_device`](Self::to_device), used for hit-testing.
    /// Returns `None` for a degenerate viewport or zoom.
    pub fn to_normalized(&self, device: Point, viewport: Viewport) -> Option<Point> {
        let sx = self.zoom_x * viewport.width;
        let sy = self.zoom_y * viewport.height;
        if sx == 0.0 || sy == 0.0 {
            return None;
        }
        Some(Point::new(
            (device.x + self.origin.x) / sx,
            (device.y + self.origin.y) / sy,
        ))
    }

    /// Zoom by `(factor_x, factor_y)` keeping the device-space `anchor` fixed.
    pub fn zoom_at(&mut self, anchor: Point, factor_x: f64, factor_y: f64) {
        self.origin = Point::new(
            factor_x * self.origin.x + (factor_x - 1.0) * anchor.x,
            factor_y * self.origin.y + (factor_y - 1.0) * anchor.y,
        );
        self.zoom_x *= factor_x;
        self.zoom_y *= factor_y;
    }

    /// Drag the view by a device-space pointer delta.
    pub fn pan_by(&mut self, delta: Point) {
        self.origin = Point::new(self.origin.x - delta.x, self.origin.y - delta.y);
    }

    /// Back to the identity camera.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Zoom factor for a mouse wheel rotation (positive = scroll down = zoom out).
    pub fn wheel_factor(rotation: i32) -> f64 {
        WHEEL_ZOOM_BASE.powi(-rotation)
    }
}
