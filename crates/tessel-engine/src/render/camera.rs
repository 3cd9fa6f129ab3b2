use crate::coords::{Mat4, Vec2, Viewport};

/// Anything that provides a combined projection-view matrix.
pub trait Camera {
    fn projection_view(&self) -> Mat4;
}

/// A fixed matrix is its own camera.
impl Camera for Mat4 {
    fn projection_view(&self) -> Mat4 {
        *self
    }
}

/// 2D camera over a pixel grid: origin top-left, +Y down.
///
/// `position` is the world point shown at the top-left corner of the
/// viewport; `zoom` scales world units to pixels.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct OrthographicCamera {
    pub position: Vec2,
    pub zoom: f32,
    pub viewport: Viewport,
}

impl OrthographicCamera {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            position: Vec2::ZERO,
            zoom: 1.0,
            viewport,
        }
    }

    /// World-space size of the visible area.
    pub fn extent(&self) -> Vec2 {
        let zoom = if self.zoom > 0.0 { self.zoom } else { 1.0 };
        Vec2::new(self.viewport.width / zoom, self.viewport.height / zoom)
    }
}

impl Camera for OrthographicCamera {
    fn projection_view(&self) -> Mat4 {
        let extent = self.extent();
        let left = self.position.x;
        let top = self.position.y;
        Mat4::orthographic(left, left + extent.x, top + extent.y, top, -1.0, 1.0)
    }
}
