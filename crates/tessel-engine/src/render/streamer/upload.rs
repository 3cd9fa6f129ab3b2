use std::marker::PhantomData;

use bytemuck::Pod;

use crate::error::{RenderError, Result};
use crate::gpu::{BufferStorage, Capabilities, GraphicsBackend, PrimitiveKind, ProgramId, VertexLayout};
use crate::render::FenceTracker;

use super::vertex_array::VertexArray;
use super::{GrowthPolicy, PrimitiveStreamer, RingCursor, StreamerStats, validate_render};

/// Streams primitives by uploading each range into a dynamic vertex buffer.
///
/// Uploads are ordered with the draws before them, so the ring is safe even
/// without fences. When the backend has fences the streamer still tracks
/// ranges, which lets it count waits and grow like the mapped strategy.
pub struct UploadStreamer<P> {
    array: VertexArray,
    fences: Option<FenceTracker>,
    cursor: RingCursor,
    growth: GrowthPolicy,
    stats: StreamerStats,
    _primitive: PhantomData<fn() -> P>,
}

impl<P: Pod> UploadStreamer<P> {
    pub fn supported(caps: &Capabilities) -> bool {
        caps.vertex_formats
    }

    pub fn new<B: GraphicsBackend + ?Sized>(
        gpu: &mut B,
        layout: VertexLayout,
        vertex_count: usize,
        indices: Option<&[u16]>,
        growth: GrowthPolicy,
    ) -> Result<Self> {
        let caps = *gpu.capabilities();
        if !Self::supported(&caps) {
            return Err(RenderError::MissingCapability("vertex format objects"));
        }
        debug_assert!(
            layout.stride() > 0 && std::mem::size_of::<P>() % layout.stride() == 0,
            "primitive size must be a whole number of vertices"
        );
        Ok(Self {
            array: VertexArray::new(gpu, "upload", layout, BufferStorage::Dynamic, vertex_count, indices)?,
            fences: caps.fence_sync.then(FenceTracker::new),
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

        if let Some(fences) = self.fences.as_mut() {
            if fences.wait_for_all(gpu)? {
                self.stats.buffer_wait_count += 1;
            }
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

impl<B: GraphicsBackend, P: Pod> PrimitiveStreamer<B, P> for UploadStreamer<P> {
    fn name(&self) -> &'static str {
        "upload"
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
        let waited = match self.fences.as_mut() {
            Some(fences) => fences.wait_for_range(gpu, self.cursor.write_offset(), write_size)?,
            None => false,
        };
        if waited {
            self.stats.buffer_wait_count += 1;
            self.grow(gpu)?;
        }

        let offset = self.cursor.write_offset();
        let bytes: &[u8] = bytemuck::cast_slice(&primitives[..primitive_count]);
        gpu.upload(self.array.vertex_buffer()?, offset, bytes)?;

        self.array.draw(gpu, kind, self.cursor.draw_offset(), draw_count)?;
        if let Some(fences) = self.fences.as_mut() {
            fences.lock_range(gpu, offset, write_size)?;
        }
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
        if let Some(fences) = self.fences.as_mut() {
            fences.dispose(gpu);
        }
        self.array.dispose(gpu);
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{Segment, layout, program, segment};
    use super::*;
    use crate::gpu::{Call, RecordingBackend};

    fn render(s: &mut UploadStreamer<Segment>, gpu: &mut RecordingBackend, prims: &[Segment]) -> Result<()> {
        PrimitiveStreamer::render(s, gpu, PrimitiveKind::Lines, prims, prims.len(), prims.len() as u32 * 2, false)
    }

    #[test]
    fn uploads_into_ring_slots() {
        let mut gpu = RecordingBackend::new(Capabilities::BASELINE);
        let program = program(&mut gpu);
        let mut s = UploadStreamer::<Segment>::new(&mut gpu, layout(), 8, None, GrowthPolicy::disabled()).unwrap();
        PrimitiveStreamer::<RecordingBackend, Segment>::bind(&mut s, &mut gpu, program).unwrap();

        render(&mut s, &mut gpu, &[segment(1.0), segment(2.0), segment(3.0)]).unwrap();
        render(&mut s, &mut gpu, &[segment(4.0), segment(5.0)]).unwrap();

        let uploads: Vec<(usize, usize)> = gpu
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::Upload { offset, len, .. } => Some((*offset, *len)),
                _ => None,
            })
            .collect();
        assert_eq!(uploads, vec![(0, 48), (0, 32)]);
        Box::new(s).dispose(&mut gpu);
    }

    #[test]
    fn works_without_fences() {
        let caps = Capabilities {
            fence_sync: false,
            ..Capabilities::BASELINE
        };
        let mut gpu = RecordingBackend::new(caps).with_latency(16);
        let program = program(&mut gpu);
        let mut s = UploadStreamer::<Segment>::new(&mut gpu, layout(), 8, None, GrowthPolicy::default()).unwrap();
        PrimitiveStreamer::<RecordingBackend, Segment>::bind(&mut s, &mut gpu, program).unwrap();

        for i in 0..10 {
            render(&mut s, &mut gpu, &[segment(i as f32), segment(0.5)]).unwrap();
        }
        gpu.finish().unwrap();

        assert!(gpu.corruptions().is_empty());
        assert_eq!(gpu.count_calls(|c| matches!(c, Call::CreateFence(_))), 0);
        let stats = PrimitiveStreamer::<RecordingBackend, Segment>::stats(&s);
        assert_eq!(stats, StreamerStats::default());
        Box::new(s).dispose(&mut gpu);
    }

    #[test]
    fn fenced_uploads_count_waits_and_grow() {
        let mut gpu = RecordingBackend::new(Capabilities::BASELINE).with_latency(32);
        let program = program(&mut gpu);
        let mut s = UploadStreamer::<Segment>::new(&mut gpu, layout(), 8, None, GrowthPolicy::default()).unwrap();
        PrimitiveStreamer::<RecordingBackend, Segment>::bind(&mut s, &mut gpu, program).unwrap();

        for i in 0..12 {
            render(&mut s, &mut gpu, &[segment(i as f32), segment(1.0)]).unwrap();
        }
        gpu.finish().unwrap();

        let stats = PrimitiveStreamer::<RecordingBackend, Segment>::stats(&s);
        assert!(stats.buffer_wait_count > 0);
        assert!(stats.discarded_buffer_count > 0);
        assert!(gpu.corruptions().is_empty());
        Box::new(s).dispose(&mut gpu);
        assert_eq!(gpu.live_buffers(), 0);
        assert_eq!(gpu.live_fences(), 0);
    }
}
