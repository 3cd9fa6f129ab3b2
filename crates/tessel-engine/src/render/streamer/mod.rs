//! Streaming primitives into GPU vertex storage.
//!
//! A streamer owns one vertex buffer (and optionally a static index buffer)
//! used as a ring: each `render` writes the next free range, draws from it and
//! fences it. The range is only rewritten once its fence has signaled.
//!
//! Two strategies exist, picked once by [`create_streamer`]:
//! - [`PersistentMapStreamer`]: writes straight into a persistently mapped buffer
//! - [`UploadStreamer`]: re-uploads each range through the backend

mod persistent;
mod ring;
mod upload;
mod vertex_array;

use bytemuck::Pod;

pub use persistent::PersistentMapStreamer;
pub use ring::{GrowthPolicy, RingCursor};
pub use upload::UploadStreamer;

use crate::error::{RenderError, Result};
use crate::gpu::{GraphicsBackend, PrimitiveKind, ProgramId, VertexLayout};

/// Counters exposed by every streamer.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct StreamerStats {
    /// Vertex buffers thrown away by growth.
    pub discarded_buffer_count: usize,
    /// Renders (and growths) that blocked on the GPU.
    pub buffer_wait_count: usize,
}

/// Ring-buffer vertex streaming for primitives of type `P`.
///
/// `Unbound → Bound → Unbound`, any number of times; `dispose` is terminal.
pub trait PrimitiveStreamer<B: GraphicsBackend, P: Pod> {
    /// Strategy name, for logs.
    fn name(&self) -> &'static str;

    /// Binds the vertex format for `program`, rebuilding it if the program changed.
    fn bind(&mut self, gpu: &mut B, program: ProgramId) -> Result<()>;

    fn unbind(&mut self, gpu: &mut B) -> Result<()>;

    fn is_bound(&self) -> bool;

    /// Streams `primitives[..primitive_count]` and draws `draw_count` elements of `kind`.
    ///
    /// `can_buffer` tells the streamer the draw state is unchanged since the
    /// previous render; both strategies draw immediately either way.
    fn render(
        &mut self,
        gpu: &mut B,
        kind: PrimitiveKind,
        primitives: &[P],
        primitive_count: usize,
        draw_count: u32,
        can_buffer: bool,
    ) -> Result<()>;

    fn stats(&self) -> StreamerStats;

    /// Current vertex buffer size in bytes.
    fn capacity_bytes(&self) -> usize;

    /// Releases every GPU object. Waits on nothing.
    fn dispose(self: Box<Self>, gpu: &mut B);
}

/// Which strategy [`create_streamer`] may pick.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum StreamerPreference {
    /// Persistent mapping when available, upload otherwise.
    #[default]
    Auto,
    PersistentMap,
    Upload,
}

#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct StreamerConfig {
    pub preference: StreamerPreference,
    pub growth: GrowthPolicy,
}

/// Creates the streamer matching the backend's capabilities.
///
/// The decision is made once; a streamer never changes strategy afterwards.
pub fn create_streamer<B: GraphicsBackend, P: Pod>(
    gpu: &mut B,
    layout: VertexLayout,
    vertex_count: usize,
    indices: Option<&[u16]>,
    config: &StreamerConfig,
) -> Result<Box<dyn PrimitiveStreamer<B, P>>> {
    let caps = *gpu.capabilities();
    let persistent = PersistentMapStreamer::<P>::supported(&caps);
    let upload = UploadStreamer::<P>::supported(&caps);

    let streamer: Box<dyn PrimitiveStreamer<B, P>> = match config.preference {
        StreamerPreference::Auto | StreamerPreference::PersistentMap if persistent => Box::new(
            PersistentMapStreamer::new(gpu, layout, vertex_count, indices, config.growth)?,
        ),
        StreamerPreference::PersistentMap => {
            return Err(RenderError::MissingCapability("persistent buffer mapping"));
        }
        StreamerPreference::Auto | StreamerPreference::Upload if upload => {
            Box::new(UploadStreamer::new(gpu, layout, vertex_count, indices, config.growth)?)
        }
        StreamerPreference::Auto | StreamerPreference::Upload => {
            return Err(RenderError::MissingCapability("vertex format objects"));
        }
    };

    log::info!(
        "using {} streamer ({} vertices, {} bytes)",
        streamer.name(),
        vertex_count,
        streamer.capacity_bytes()
    );
    Ok(streamer)
}

/// Checks `render` arguments. `Ok(None)` means there is nothing to draw,
/// otherwise the number of bytes to write.
pub(crate) fn validate_render<P: Pod>(
    bound: bool,
    primitives: &[P],
    primitive_count: usize,
    draw_count: u32,
    capacity: usize,
) -> Result<Option<usize>> {
    if !bound {
        return Err(RenderError::NotBound { component: "streamer" });
    }
    if primitive_count > primitives.len() {
        return Err(RenderError::PrimitiveCountOutOfRange {
            requested: primitive_count,
            available: primitives.len(),
        });
    }
    if primitive_count == 0 {
        return Ok(None);
    }
    if draw_count as usize % primitive_count != 0 {
        return Err(RenderError::InvalidDrawCount {
            draw_count,
            primitive_count,
        });
    }
    let write_size = primitive_count * std::mem::size_of::<P>();
    if write_size > capacity {
        return Err(RenderError::BatchTooLarge { write_size, capacity });
    }
    Ok(Some(write_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Capabilities, ProgramDesc, ProgramSource, RecordingBackend, VertexAttribute};

    /// Two 2D positions: one 16-byte primitive of two vertices.
    #[repr(C)]
    #[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
    pub(super) struct Segment {
        pub points: [[f32; 2]; 2],
    }

    pub(super) fn segment(v: f32) -> Segment {
        Segment {
            points: [[v, v], [v, -v]],
        }
    }

    pub(super) fn layout() -> VertexLayout {
        VertexLayout::new([VertexAttribute::position_2d()])
    }

    pub(super) fn program(gpu: &mut RecordingBackend) -> ProgramId {
        let program = gpu
            .create_program(&ProgramDesc {
                label: "lines",
                source: ProgramSource::Native(String::new()),
                uniforms: &[],
            })
            .unwrap();
        gpu.use_program(Some(program));
        program
    }

    #[test]
    fn auto_prefers_persistent_mapping() {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let s = create_streamer::<_, Segment>(&mut gpu, layout(), 8, None, &StreamerConfig::default()).unwrap();
        assert_eq!(s.name(), "persistent-map");
        s.dispose(&mut gpu);
    }

    #[test]
    fn auto_falls_back_to_upload() {
        let mut gpu = RecordingBackend::new(Capabilities::BASELINE);
        let s = create_streamer::<_, Segment>(&mut gpu, layout(), 8, None, &StreamerConfig::default()).unwrap();
        assert_eq!(s.name(), "upload");
        s.dispose(&mut gpu);
        assert_eq!(gpu.live_buffers(), 0);
    }

    #[test]
    fn forced_persistent_without_capability_fails() {
        let mut gpu = RecordingBackend::new(Capabilities::BASELINE);
        let config = StreamerConfig {
            preference: StreamerPreference::PersistentMap,
            ..StreamerConfig::default()
        };
        let err = create_streamer::<_, Segment>(&mut gpu, layout(), 8, None, &config).err().unwrap();
        assert!(matches!(err, RenderError::MissingCapability(_)));
    }

    #[test]
    fn no_capabilities_is_an_error() {
        let mut gpu = RecordingBackend::new(Capabilities::NONE);
        let err = create_streamer::<_, Segment>(&mut gpu, layout(), 8, None, &StreamerConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, RenderError::MissingCapability(_)));
    }

    #[test]
    fn validation_order() {
        let prims = [segment(1.0); 2];
        assert!(matches!(
            validate_render(false, &prims, 1, 2, 64),
            Err(RenderError::NotBound { .. })
        ));
        assert!(matches!(
            validate_render(true, &prims, 3, 6, 64),
            Err(RenderError::PrimitiveCountOutOfRange { requested: 3, available: 2 })
        ));
        assert!(matches!(
            validate_render(true, &prims, 2, 3, 64),
            Err(RenderError::InvalidDrawCount { .. })
        ));
        assert!(matches!(
            validate_render(true, &prims, 2, 4, 16),
            Err(RenderError::BatchTooLarge { write_size: 32, capacity: 16 })
        ));
        assert_eq!(validate_render(true, &prims, 0, 0, 16).unwrap(), None);
        assert_eq!(validate_render(true, &prims, 2, 4, 32).unwrap(), Some(32));
    }
}
