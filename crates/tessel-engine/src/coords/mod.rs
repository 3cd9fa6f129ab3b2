//! Geometry types shared by cameras, quads and the backends.
//!
//! Default 2D space (see `render::OrthographicCamera`):
//! - origin top-left, +X right, +Y down
//! - one unit per target pixel

mod mat4;
mod vec2;
mod viewport;

pub use mat4::Mat4;
pub use vec2::Vec2;
pub use viewport::Viewport;
