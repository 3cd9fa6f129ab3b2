//! Color model for vertex tints and target clears.

mod color;

pub use color::Color;
