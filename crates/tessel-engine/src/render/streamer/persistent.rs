use std::marker::PhantomData;

use bytemuck::Pod;

use crate::error::{RenderError, Result};
use crate::gpu::{BufferStorage, Capabilities, GraphicsBackend, PrimitiveKind, ProgramId, VertexLayout};
use crate::render::FenceTracker;

use super::vertex_array::VertexArray;
use super::{GrowthPolicy, PrimitiveStreamer, RingCursor, StreamerStats, validate_render};

/// Streams primitives by copying them into a persistently mapped ring.
///
/// Writes are visible to the GPU immediately, so every range is fenced and
/// only rewritten once the GPU has consumed it. Waiting on a fence means the
/// ring is too small for the frame; the buffer then grows, up to the
/// policy's ceiling.
pub struct PersistentMapStreamer<P> {
    array: VertexArray,
    fences: FenceTracker,
    cursor: RingCursor,
    growth: GrowthPolicy,
    stats: StreamerStats,
    _primitive: PhantomData<fn() -> P>,
}

impl<P: Pod> PersistentMapStreamer<P> {
    pub fn supported(caps: &Capabilities) -> bool {
        caps.persistent_mapping && caps.fence_sync && caps.vertex_formats
    }

    pub fn new<B: GraphicsBackend + ?Sized>(
        gpu: &mut B,
        layout: VertexLayout,
        vertex_count: usize,
        indices: Option<&[u16]>,
        growth: GrowthPolicy,
    ) -> Result<Self> {
        if !Self::supported(gpu.capabilities()) {
            return Err(RenderError::MissingCapability("persistent buffer mapping"));
        }
        debug_assert!(
            layout.stride() > 0 && std::mem::size_of::<P>() % layout.stride() == 0,
            "primitive size must be a whole number of vertices"
        );
        Ok(Self {
            array: VertexArray::new(gpu, "persistent-map", layout, BufferStorage::Persistent, vertex_count, indices)?,
            fences: FenceTracker::new(),
            cursor: RingCursor::default(),
            growth,
            stats: StreamerStats::default(),
            _primitive: PhantomData,
        })
    }

    pub fn cursor(&self) -> RingCursor {
        self.cursor
    }

    fn grow<B: GraphicsBackend + ?Sized>(&mut self, gpu: &mut B) -> Result<()> {
        if self.array.is_indexed() {
            return Ok(());
        }
        let Some(vertex_count) = self.growth.next_vertex_count(self.array.vertex_count(), self.array.stride())
        else {
            return Ok(());
        };

        if self.fences.wait_for_all(gpu)? {
            self.stats.buffer_wait_count += 1;
        }
        self.array.rebuild(gpu, vertex_count)?;
        self.cursor.reset();
        self.stats.discarded_buffer_count += 1;

        log::debug!(
            "expanded the vertex buffer to {} vertices ({} KiB)",
            vertex_count,
            self.array.capacity_bytes() / 1024
        );
        Ok(())
    }
}

impl<B: GraphicsBackend, P: Pod> PrimitiveStreamer<B, P> for PersistentMapStreamer<P> {
    fn name(&self) -> &'static str {
        "persistent-map"
    }

    fn bind(&mut self, gpu: &mut B, program: ProgramId) -> Result<()> {
        self.array.bind(gpu, program)
    }

    fn unbind(&mut self, gpu: &mut B) -> Result<()> {
        self.array.unbind(gpu)
    }

    fn is_bound(&self) -> bool {
        self.array.is_bound()
    }

    fn render(
        &mut self,
        gpu: &mut B,
        kind: PrimitiveKind,
        primitives: &[P],
        primitive_count: usize,
        draw_count: u32,
        _can_buffer: bool,
    ) -> Result<()> {
        let Some(write_size) = validate_render(
            self.array.is_bound(),
            primitives,
            primitive_count,
            draw_count,
            self.array.capacity_bytes(),
        )?
        else {
            return Ok(());
        };

        self.cursor.fit(write_size, self.array.capacity_bytes());
        if self.fences.wait_for_range(gpu, self.cursor.write_offset(), write_size)? {
            self.stats.buffer_wait_count += 1;
            self.grow(gpu)?;
        }

        let offset = self.cursor.write_offset();
        let bytes: &[u8] = bytemuck::cast_slice(&primitives[..primitive_count]);
        let mapping = self
            .array
            .mapping_mut()
            .ok_or(RenderError::NotBound { component: "persistent mapping" })?;
        gpu.write_mapped(mapping, offset, bytes)?;

        self.array.draw(gpu, kind, self.cursor.draw_offset(), draw_count)?;
        self.fences.lock_range(gpu, offset, write_size)?;
        self.cursor.advance(write_size, draw_count);
        Ok(())
    }

    fn stats(&self) -> StreamerStats {
        self.stats
    }

    fn capacity_bytes(&self) -> usize {
        self.array.capacity_bytes()
    }

    fn dispose(mut self: Box<Self>, gpu: &mut B) {
        self.fences.dispose(gpu);
        self.array.dispose(gpu);
    }
}
