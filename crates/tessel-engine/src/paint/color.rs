/// Straight-alpha RGBA color with `f32` channels in `[0, 1]`.
///
/// Quad vertices carry colors packed to four normalized bytes
/// (see [`Color::pack_rgba8`]); the default blend state is straight alpha
/// (`SrcAlpha`, `OneMinusSrcAlpha`).
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);

    #[inline]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    #[inline]
    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::new(
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
            a as f32 / 255.0,
        )
    }

    /// Returns the color with its alpha replaced.
    #[inline]
    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    /// Packs to `[r, g, b, a]` bytes in memory order (little-endian `u32`).
    pub fn pack_rgba8(self) -> u32 {
        let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0 + 0.5) as u32;
        q(self.r) | (q(self.g) << 8) | (q(self.b) << 16) | (q(self.a) << 24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_in_byte_order() {
        let packed = Color::from_rgba8(0x11, 0x22, 0x33, 0x44).pack_rgba8();
        assert_eq!(packed.to_le_bytes(), [0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn pack_clamps_out_of_range_channels() {
        let packed = Color::new(2.0, -1.0, 0.5, 1.0).pack_rgba8();
        assert_eq!(packed.to_le_bytes(), [255, 0, 128, 255]);
    }
}
