//! Batched rendering over a [`GraphicsBackend`](crate::gpu::GraphicsBackend).
//!
//! The quad renderer queues geometry on the CPU and hands full batches to a
//! primitive streamer, which writes them into a ring-buffered vertex buffer
//! guarded by fences. Fixed-function state goes through [`RenderStates`],
//! diffed against an explicit [`StateCache`].
//!
//! Convention:
//! - quads are given in world units; the camera maps them to clip space
//! - vertex colors are packed RGBA8, normalized in the shader

mod camera;
mod fence;
mod quad;
mod shader;
mod states;
pub mod streamer;
mod texture;

pub use camera::{Camera, OrthographicCamera};
pub use fence::FenceTracker;
pub use quad::{QuadPrimitive, QuadRenderer, QuadRendererConfig, QuadVertex, RenderStats};
pub use shader::{ProgramShader, Shader};
pub use states::{
    BlendingEquationState, BlendingFactorState, BlendingMode, CullFaceState, DepthState, NoPendingBatch,
    PendingBatch, PointSpriteState, RenderStates, StateCache, StateGroup,
};
pub use streamer::{
    GrowthPolicy, PrimitiveStreamer, StreamerConfig, StreamerPreference, StreamerStats, create_streamer,
};
pub use texture::{DefaultTextureBinder, Texture, TextureBinder, TextureHandle};
