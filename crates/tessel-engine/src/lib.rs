//! Tessel engine crate.
//!
//! Turns streams of textured quads into batched GPU draws. Geometry is
//! streamed through fenced ring buffers and pipeline state changes are
//! diffed so redundant calls never reach the backend.

pub mod error;
pub mod gpu;
pub mod render;

pub mod logging;
pub mod coords;
pub mod paint;

pub use error::{RenderError, Result};
