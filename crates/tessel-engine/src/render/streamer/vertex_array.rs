use crate::error::{RenderError, Result};
use crate::gpu::{
    BufferDesc, BufferId, BufferKind, BufferStorage, GraphicsBackend, PersistentMapping,
    PrimitiveKind, ProgramId, VertexFormatDesc, VertexFormatId, VertexLayout,
};

/// Vertex buffer, optional static index buffer and the vertex format tying
/// them to a program.
///
/// The vertex format is created lazily on `bind` and rebuilt whenever the
/// program changes. A `Persistent` buffer is mapped for as long as it exists;
/// buffer and mapping are released together.
pub(super) struct VertexArray {
    label: &'static str,
    layout: VertexLayout,
    storage: BufferStorage,
    vertex_count: usize,

    vertex_buffer: Option<BufferId>,
    mapping: Option<PersistentMapping>,
    index_buffer: Option<BufferId>,
    format: Option<VertexFormatId>,
    program: Option<ProgramId>,
    bound: bool,
}

impl VertexArray {
    pub fn new<B: GraphicsBackend + ?Sized>(
        gpu: &mut B,
        label: &'static str,
        layout: VertexLayout,
        storage: BufferStorage,
        vertex_count: usize,
        indices: Option<&[u16]>,
    ) -> Result<Self> {
        let mut array = Self {
            label,
            layout,
            storage,
            vertex_count,
            vertex_buffer: None,
            mapping: None,
            index_buffer: None,
            format: None,
            program: None,
            bound: false,
        };
        if let Some(indices) = indices {
            let bytes: &[u8] = bytemuck::cast_slice(indices);
            array.index_buffer = Some(gpu.create_buffer(&BufferDesc {
                label,
                kind: BufferKind::Index,
                storage: BufferStorage::Dynamic,
                size: bytes.len(),
                contents: Some(bytes),
            })?);
        }
        array.create_vertex_buffer(gpu)?;
        Ok(array)
    }

    fn create_vertex_buffer<B: GraphicsBackend + ?Sized>(&mut self, gpu: &mut B) -> Result<()> {
        let buffer = gpu.create_buffer(&BufferDesc {
            label: self.label,
            kind: BufferKind::Vertex,
            storage: self.storage,
            size: self.capacity_bytes(),
            contents: None,
        })?;
        self.vertex_buffer = Some(buffer);
        if self.storage == BufferStorage::Persistent {
            self.mapping = Some(gpu.map_persistent(buffer)?);
        }
        Ok(())
    }

    fn release_vertex_buffer<B: GraphicsBackend + ?Sized>(&mut self, gpu: &mut B) {
        if let Some(mapping) = self.mapping.take() {
            gpu.unmap(mapping);
        }
        if let Some(buffer) = self.vertex_buffer.take() {
            gpu.delete_buffer(buffer);
        }
    }

    fn release_format<B: GraphicsBackend + ?Sized>(&mut self, gpu: &mut B) {
        if let Some(format) = self.format.take() {
            gpu.delete_vertex_format(format);
        }
    }

    #[inline]
    pub fn capacity_bytes(&self) -> usize {
        self.vertex_count * self.layout.stride()
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.layout.stride()
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    #[inline]
    pub fn is_indexed(&self) -> bool {
        self.index_buffer.is_some()
    }

    pub fn vertex_buffer(&self) -> Result<BufferId> {
        self.vertex_buffer
            .ok_or(RenderError::NotBound { component: "vertex buffer" })
    }

    /// Mapping and buffer for a direct write; `None` unless persistent.
    pub fn mapping_mut(&mut self) -> Option<&mut PersistentMapping> {
        self.mapping.as_mut()
    }

    pub fn bind<B: GraphicsBackend + ?Sized>(&mut self, gpu: &mut B, program: ProgramId) -> Result<()> {
        if self.program != Some(program) {
            self.release_format(gpu);
        }
        let format = match self.format {
            Some(format) => format,
            None => {
                let format = gpu.create_vertex_format(&VertexFormatDesc {
                    layout: self.layout.clone(),
                    vertex_buffer: self.vertex_buffer()?,
                    index_buffer: self.index_buffer,
                    program,
                })?;
                self.format = Some(format);
                format
            }
        };
        gpu.bind_vertex_format(Some(format));
        self.program = Some(program);
        self.bound = true;
        Ok(())
    }

    pub fn unbind<B: GraphicsBackend + ?Sized>(&mut self, gpu: &mut B) -> Result<()> {
        if !self.bound {
            return Err(RenderError::NotBound { component: "streamer" });
        }
        gpu.bind_vertex_format(None);
        self.bound = false;
        Ok(())
    }

    /// Replaces the vertex buffer with one of `vertex_count` vertices.
    ///
    /// The caller drains every fence on the old buffer first. The vertex
    /// format is rebuilt against the new buffer and rebound with the same
    /// program if the array was bound.
    pub fn rebuild<B: GraphicsBackend + ?Sized>(&mut self, gpu: &mut B, vertex_count: usize) -> Result<()> {
        let was_bound = self.bound;
        if was_bound {
            self.unbind(gpu)?;
        }
        self.release_format(gpu);
        self.release_vertex_buffer(gpu);

        self.vertex_count = vertex_count;
        self.create_vertex_buffer(gpu)?;

        if let (true, Some(program)) = (was_bound, self.program) {
            self.bind(gpu, program)?;
        }
        Ok(())
    }

    /// Issues the draw for `draw_count` elements starting at `draw_offset`.
    pub fn draw<B: GraphicsBackend + ?Sized>(
        &self,
        gpu: &mut B,
        kind: PrimitiveKind,
        draw_offset: u32,
        draw_count: u32,
    ) -> Result<()> {
        if self.is_indexed() {
            gpu.draw_elements(kind, draw_count, draw_offset)
        } else {
            gpu.draw_arrays(kind, draw_offset, draw_count)
        }
    }

    pub fn dispose<B: GraphicsBackend + ?Sized>(&mut self, gpu: &mut B) {
        if self.bound {
            gpu.bind_vertex_format(None);
            self.bound = false;
        }
        self.release_format(gpu);
        self.release_vertex_buffer(gpu);
        if let Some(buffer) = self.index_buffer.take() {
            gpu.delete_buffer(buffer);
        }
        self.program = None;
    }
}

impl Drop for VertexArray {
    fn drop(&mut self) {
        if self.vertex_buffer.is_some() || self.index_buffer.is_some() {
            log::warn!("{} streamer dropped without dispose; GPU buffers leaked", self.label);
        }
    }
}
