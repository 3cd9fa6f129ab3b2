//! Graphics-context boundary.
//!
//! The streaming core talks to the GPU only through [`GraphicsBackend`]: an
//! explicit, GL-shaped API with vertex buffers, vertex format objects, fences
//! and mapped buffer writes. Objects are referred to by opaque `Copy`
//! handles; ownership of what a handle names stays with whoever created it.
//!
//! Two backends ship with the crate:
//! - [`RecordingBackend`]: headless, simulates an asynchronous GPU and records
//!   every call (tests, benchmarks without a device)
//! - [`WgpuBackend`]: offscreen rendering through wgpu

mod caps;
mod recording;
mod types;
mod vertex;
mod wgpu_backend;

pub use caps::Capabilities;
pub use recording::{Call, Corruption, ExecutedDraw, RecordingBackend};
pub use types::{
    BlendFactor, BlendOp, BufferDesc, BufferId, BufferKind, BufferStorage, CullFace, DepthFunction,
    FenceId, PersistentMapping, PrimitiveKind, ProgramDesc, ProgramId, ProgramSource, TextureDesc,
    TextureId, Toggle, UniformLocation, VertexFormatDesc, VertexFormatId,
};
pub use vertex::{AttributeSemantic, ComponentType, VertexAttribute, VertexLayout};
pub use wgpu_backend::{WgpuBackend, WgpuInit};

use crate::coords::Mat4;
use crate::error::Result;
use crate::paint::Color;

/// Explicit graphics API consumed by streamers, render states and renderers.
///
/// Calls are issued from one thread. Work submitted through the draw calls
/// executes asynchronously; fences are the only way to learn that it finished.
pub trait GraphicsBackend {
    fn capabilities(&self) -> &Capabilities;

    // ── buffers ───────────────────────────────────────────────────────────

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferId>;

    /// Copies `data` into a `Dynamic` buffer at `offset`, ordered with
    /// previously issued draws.
    fn upload(&mut self, buffer: BufferId, offset: usize, data: &[u8]) -> Result<()>;

    /// Maps a `Persistent` buffer for the rest of its lifetime.
    fn map_persistent(&mut self, buffer: BufferId) -> Result<PersistentMapping>;

    /// Writes through a persistent mapping. The write is visible to the GPU
    /// immediately, including to draws that are still in flight.
    fn write_mapped(&mut self, mapping: &mut PersistentMapping, offset: usize, data: &[u8]) -> Result<()>;

    fn unmap(&mut self, mapping: PersistentMapping);

    fn delete_buffer(&mut self, buffer: BufferId);

    // ── vertex formats ───────────────────────────────────────────────────

    fn create_vertex_format(&mut self, desc: &VertexFormatDesc) -> Result<VertexFormatId>;

    fn bind_vertex_format(&mut self, format: Option<VertexFormatId>);

    fn delete_vertex_format(&mut self, format: VertexFormatId);

    // ── programs ─────────────────────────────────────────────────────────

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramId>;

    fn use_program(&mut self, program: Option<ProgramId>);

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    fn set_uniform_mat4(&mut self, location: UniformLocation, value: &Mat4);

    fn set_uniform_i32(&mut self, location: UniformLocation, value: i32);

    fn delete_program(&mut self, program: ProgramId);

    // ── textures ─────────────────────────────────────────────────────────

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureId>;

    fn bind_texture(&mut self, unit: u32, texture: TextureId);

    fn delete_texture(&mut self, texture: TextureId);

    // ── fixed-function state ─────────────────────────────────────────────

    fn set_enabled(&mut self, toggle: Toggle, enabled: bool);

    fn blend_func_separate(
        &mut self,
        src: BlendFactor,
        dst: BlendFactor,
        alpha_src: BlendFactor,
        alpha_dst: BlendFactor,
    );

    fn blend_equation_separate(&mut self, color: BlendOp, alpha: BlendOp);

    fn depth_func(&mut self, func: DepthFunction);

    fn depth_mask(&mut self, write: bool);

    fn cull_face(&mut self, face: CullFace);

    // ── drawing ──────────────────────────────────────────────────────────

    /// Clears the render target before the next draw.
    fn clear(&mut self, color: Color);

    /// Draws `count` vertices starting at vertex `first` of the bound format.
    fn draw_arrays(&mut self, kind: PrimitiveKind, first: u32, count: u32) -> Result<()>;

    /// Draws `count` indices starting at index `first_index` of the bound
    /// format's index buffer.
    fn draw_elements(&mut self, kind: PrimitiveKind, count: u32, first_index: u32) -> Result<()>;

    /// Hands recorded work to the GPU without waiting for it.
    fn submit(&mut self) -> Result<()>;

    /// Blocks until all submitted work has executed.
    fn finish(&mut self) -> Result<()>;

    // ── sync ─────────────────────────────────────────────────────────────

    /// Inserts a fence after all previously issued work.
    fn create_fence(&mut self) -> Result<FenceId>;

    fn fence_signaled(&mut self, fence: FenceId) -> Result<bool>;

    /// Blocks the calling thread until `fence` is signaled.
    fn wait_fence(&mut self, fence: FenceId) -> Result<()>;

    fn delete_fence(&mut self, fence: FenceId);
}
