/// Write/draw cursor pair over a ring of vertex storage.
///
/// `write_offset` is in bytes, `draw_offset` in draw elements (vertices, or
/// indices when indexed). Both advance together and wrap to zero together.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RingCursor {
    write_offset: usize,
    draw_offset: u32,
}

impl RingCursor {
    #[inline]
    pub fn write_offset(&self) -> usize {
        self.write_offset
    }

    #[inline]
    pub fn draw_offset(&self) -> u32 {
        self.draw_offset
    }

    /// Wraps both cursors if `write_size` bytes do not fit before `capacity`.
    /// Returns `true` on wrap.
    pub fn fit(&mut self, write_size: usize, capacity: usize) -> bool {
        if self.write_offset + write_size > capacity {
            self.reset();
            return true;
        }
        false
    }

    pub fn advance(&mut self, write_size: usize, draw_count: u32) {
        self.write_offset += write_size;
        self.draw_offset += draw_count;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// How a streamer's vertex buffer grows after it had to wait on the GPU.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GrowthPolicy {
    /// Multiplier applied to the vertex capacity.
    pub factor: f32,
    /// Capacity in bytes the buffer never grows beyond.
    pub ceiling_bytes: usize,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            factor: 1.75,
            ceiling_bytes: 8 * 1024 * 1024,
        }
    }
}

impl GrowthPolicy {
    pub const fn disabled() -> Self {
        Self {
            factor: 1.0,
            ceiling_bytes: 0,
        }
    }

    /// Vertex capacity after one growth step, clamped to the ceiling.
    /// `None` once the buffer cannot grow any further.
    pub fn next_vertex_count(&self, current: usize, stride: usize) -> Option<usize> {
        if stride == 0 || current * stride >= self.ceiling_bytes {
            return None;
        }
        let grown = (current as f64 * f64::from(self.factor)) as usize;
        let next = grown.min(self.ceiling_bytes / stride);
        (next > current).then_some(next)
    }
}
