use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use crate::coords::{Mat4, Vec2};
use crate::error::{RenderError, Result};
use crate::gpu::{GraphicsBackend, PrimitiveKind, VertexAttribute, VertexLayout};
use crate::paint::Color;

use super::camera::Camera;
use super::shader::{ProgramShader, Shader};
use super::states::{PendingBatch, RenderStates, StateCache};
use super::streamer::{PrimitiveStreamer, StreamerConfig, create_streamer};
use super::texture::{DefaultTextureBinder, TextureBinder, TextureHandle};

/// One corner of a quad: position, texture coordinate and packed RGBA8 color.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: u32,
}

impl QuadVertex {
    pub fn new(position: Vec2, uv: Vec2, color: Color) -> Self {
        Self {
            position: position.to_array(),
            uv: uv.to_array(),
            color: color.pack_rgba8(),
        }
    }

    /// Position, texture coordinate 0, normalized color.
    pub fn layout() -> VertexLayout {
        VertexLayout::new([
            VertexAttribute::position_2d(),
            VertexAttribute::tex_coord(0),
            VertexAttribute::color(true),
        ])
    }
}

/// Four vertices wound top-left, top-right, bottom-right, bottom-left.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct QuadPrimitive {
    pub vertices: [QuadVertex; 4],
}

impl QuadPrimitive {
    /// Rectangle at `position` (top-left) of `size`, mapping `uv_min..uv_max`.
    pub fn axis_aligned(position: Vec2, size: Vec2, uv_min: Vec2, uv_max: Vec2, color: Color) -> Self {
        let (x0, y0) = (position.x, position.y);
        let (x1, y1) = (position.x + size.x, position.y + size.y);
        Self {
            vertices: [
                QuadVertex::new(Vec2::new(x0, y0), Vec2::new(uv_min.x, uv_min.y), color),
                QuadVertex::new(Vec2::new(x1, y0), Vec2::new(uv_max.x, uv_min.y), color),
                QuadVertex::new(Vec2::new(x1, y1), Vec2::new(uv_max.x, uv_max.y), color),
                QuadVertex::new(Vec2::new(x0, y1), Vec2::new(uv_min.x, uv_max.y), color),
            ],
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct QuadRendererConfig {
    /// Quads accumulated before a capacity flush.
    pub max_quads_per_batch: usize,
    /// Minimum vertex buffer size in bytes. Lets the ring hold several batches.
    pub primitive_buffer_size: usize,
    /// Let capacity flushes skip re-applying texture, matrix and hook.
    pub buffer_capacity_flushes: bool,
    pub streamer: StreamerConfig,
}

impl Default for QuadRendererConfig {
    fn default() -> Self {
        Self {
            max_quads_per_batch: 4096,
            primitive_buffer_size: 0,
            buffer_capacity_flushes: false,
            streamer: StreamerConfig::default(),
        }
    }
}

/// Counters since construction.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RenderStats {
    pub rendered_quad_count: usize,
    pub flushed_buffer_count: usize,
    /// Most quads drawn by one run of consecutive bufferable flushes.
    pub largest_batch: usize,
    pub discarded_buffer_count: usize,
    pub buffer_wait_count: usize,
}

enum ShaderSlot<B: GraphicsBackend> {
    Owned(ProgramShader),
    Shared(Rc<dyn Shader<B>>),
}

impl<B: GraphicsBackend> ShaderSlot<B> {
    fn get(&self) -> &dyn Shader<B> {
        match self {
            ShaderSlot::Owned(shader) => shader,
            ShaderSlot::Shared(shader) => shader.as_ref(),
        }
    }
}

/// Batches textured quads and streams them to the GPU.
///
/// Quads are queued by [`draw`](Self::draw) between
/// [`begin_rendering`](Self::begin_rendering) and
/// [`end_rendering`](Self::end_rendering). A batch is flushed when the texture
/// changes, when it is full, when the camera or transform changes, or when
/// render states are applied through [`apply_states`](Self::apply_states).
pub struct QuadRenderer<B: GraphicsBackend> {
    shader: ShaderSlot<B>,
    streamer: Box<dyn PrimitiveStreamer<B, QuadPrimitive>>,
    binder: Box<dyn TextureBinder<B>>,
    flush_hook: Option<Box<dyn FnMut(&mut B)>>,

    primitives: Box<[QuadPrimitive]>,
    quads_in_batch: usize,
    buffer_capacity_flushes: bool,

    camera: Rc<dyn Camera>,
    transform: Mat4,
    current_texture: Option<TextureHandle>,
    current_sampler_unit: i32,
    rendering: bool,
    last_flush_was_buffered: bool,

    rendered_quad_count: usize,
    flushed_buffer_count: usize,
    largest_batch: usize,
    current_run: usize,
}

impl<B: GraphicsBackend> QuadRenderer<B> {
    pub const VERTICES_PER_QUAD: usize = 4;
    pub const COMBINED_MATRIX_UNIFORM: &'static str = "u_combinedMatrix";
    pub const TEXTURE_UNIFORM: &'static str = "u_texture";

    /// Creates a renderer with its own textured-quad shader.
    pub fn new(gpu: &mut B, config: &QuadRendererConfig) -> Result<Self> {
        let streamer = Self::create_streamer(gpu, config)?;
        let shader = match ProgramShader::textured_quad(gpu, &[Self::COMBINED_MATRIX_UNIFORM, Self::TEXTURE_UNIFORM]) {
            Ok(shader) => shader,
            Err(err) => {
                streamer.dispose(gpu);
                return Err(err);
            }
        };
        Ok(Self::assemble(ShaderSlot::Owned(shader), streamer, config))
    }

    /// Creates a renderer drawing with a caller-owned shader.
    ///
    /// The shader must declare [`Self::COMBINED_MATRIX_UNIFORM`] and
    /// [`Self::TEXTURE_UNIFORM`] and consume [`QuadVertex::layout`].
    pub fn with_shader(gpu: &mut B, shader: Rc<dyn Shader<B>>, config: &QuadRendererConfig) -> Result<Self> {
        let streamer = Self::create_streamer(gpu, config)?;
        Ok(Self::assemble(ShaderSlot::Shared(shader), streamer, config))
    }

    fn create_streamer(
        gpu: &mut B,
        config: &QuadRendererConfig,
    ) -> Result<Box<dyn PrimitiveStreamer<B, QuadPrimitive>>> {
        let max_quads = config.max_quads_per_batch.max(1);
        let quad_bytes = Self::VERTICES_PER_QUAD * QuadVertex::layout().stride();
        let buffered_quads = max_quads.max(config.primitive_buffer_size / quad_bytes);
        create_streamer(
            gpu,
            QuadVertex::layout(),
            buffered_quads * Self::VERTICES_PER_QUAD,
            None,
            &config.streamer,
        )
    }

    fn assemble(
        shader: ShaderSlot<B>,
        streamer: Box<dyn PrimitiveStreamer<B, QuadPrimitive>>,
        config: &QuadRendererConfig,
    ) -> Self {
        let max_quads = config.max_quads_per_batch.max(1);
        log::info!(
            "initialized quad renderer using {} streamer ({} quads per batch)",
            streamer.name(),
            max_quads
        );
        Self {
            shader,
            streamer,
            binder: Box::new(DefaultTextureBinder),
            flush_hook: None,
            primitives: vec![QuadPrimitive::default(); max_quads].into_boxed_slice(),
            quads_in_batch: 0,
            buffer_capacity_flushes: config.buffer_capacity_flushes,
            camera: Rc::new(Mat4::IDENTITY),
            transform: Mat4::IDENTITY,
            current_texture: None,
            current_sampler_unit: 0,
            rendering: false,
            last_flush_was_buffered: false,
            rendered_quad_count: 0,
            flushed_buffer_count: 0,
            largest_batch: 0,
            current_run: 0,
        }
    }

    /// The caller-supplied shader, `None` when the renderer owns its default one.
    pub fn shader(&self) -> Option<&Rc<dyn Shader<B>>> {
        match &self.shader {
            ShaderSlot::Owned(_) => None,
            ShaderSlot::Shared(shader) => Some(shader),
        }
    }

    /// Runs after the texture is bound on every flush that re-applies state.
    pub fn set_flush_hook(&mut self, hook: impl FnMut(&mut B) + 'static) {
        self.flush_hook = Some(Box::new(hook));
    }

    pub fn clear_flush_hook(&mut self) {
        self.flush_hook = None;
    }

    pub fn set_texture_binder(&mut self, binder: impl TextureBinder<B> + 'static) {
        self.binder = Box::new(binder);
    }

    pub fn camera(&self) -> &Rc<dyn Camera> {
        &self.camera
    }

    /// Switches camera, flushing what was queued under the previous one.
    pub fn set_camera(&mut self, gpu: &mut B, camera: Rc<dyn Camera>) -> Result<()> {
        if Rc::ptr_eq(&self.camera, &camera) {
            return Ok(());
        }
        if self.rendering {
            self.flush(gpu, false)?;
        }
        self.camera = camera;
        self.last_flush_was_buffered = false;
        Ok(())
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn set_transform(&mut self, gpu: &mut B, transform: Mat4) -> Result<()> {
        if self.transform == transform {
            return Ok(());
        }
        self.flush(gpu, false)?;
        self.transform = transform;
        self.last_flush_was_buffered = false;
        Ok(())
    }

    #[inline]
    pub fn is_rendering(&self) -> bool {
        self.rendering
    }

    #[inline]
    pub fn quads_in_batch(&self) -> usize {
        self.quads_in_batch
    }

    #[inline]
    pub fn max_quads_per_batch(&self) -> usize {
        self.primitives.len()
    }

    pub fn begin_rendering(&mut self, gpu: &mut B) -> Result<()> {
        if self.rendering {
            return Err(RenderError::AlreadyRendering);
        }
        let shader = self.shader.get();
        shader.begin(gpu);
        if let Err(err) = self.streamer.bind(gpu, shader.program()) {
            shader.end(gpu);
            return Err(err);
        }
        self.rendering = true;
        self.last_flush_was_buffered = false;
        Ok(())
    }

    /// Flushes the pending batch and releases the shader and vertex format.
    pub fn end_rendering(&mut self, gpu: &mut B) -> Result<()> {
        if !self.rendering {
            return Err(RenderError::NotRendering);
        }
        let flushed = self.flush(gpu, false);
        let unbound = self.streamer.unbind(gpu);
        self.shader.get().end(gpu);

        self.quads_in_batch = 0;
        self.current_texture = None;
        self.rendering = false;
        flushed.and(unbound)
    }

    /// Queues `quad`, flushing first if the texture changed or the batch is full.
    pub fn draw(&mut self, gpu: &mut B, quad: &QuadPrimitive, texture: TextureHandle) -> Result<()> {
        if !self.rendering {
            return Err(RenderError::NotRendering);
        }

        if self.current_texture != Some(texture) {
            self.flush(gpu, false)?;
            self.current_texture = Some(texture);
            self.last_flush_was_buffered = false;
        } else if self.quads_in_batch == self.primitives.len() {
            self.flush(gpu, self.buffer_capacity_flushes)?;
        }

        self.primitives[self.quads_in_batch] = *quad;
        self.quads_in_batch += 1;
        self.rendered_quad_count += 1;
        Ok(())
    }

    /// Draws the queued quads.
    ///
    /// `can_buffer` promises the next flush runs under the same texture, matrix
    /// and hook state, so that flush skips re-applying them.
    pub fn flush(&mut self, gpu: &mut B, can_buffer: bool) -> Result<()> {
        if self.quads_in_batch == 0 {
            return Ok(());
        }
        if !self.rendering {
            return Err(RenderError::NotRendering);
        }
        let texture = self.current_texture.ok_or(RenderError::NoTexture)?;

        if !self.last_flush_was_buffered {
            let shader = self.shader.get();
            if let Some(location) = shader.uniform_location(gpu, Self::COMBINED_MATRIX_UNIFORM) {
                let combined = self.camera.projection_view() * self.transform;
                gpu.set_uniform_mat4(location, &combined);
            }

            let unit = self.binder.bind(gpu, texture);
            if unit != self.current_sampler_unit {
                self.current_sampler_unit = unit;
                if let Some(location) = shader.uniform_location(gpu, Self::TEXTURE_UNIFORM) {
                    gpu.set_uniform_i32(location, unit);
                }
            }

            if let Some(hook) = self.flush_hook.as_mut() {
                hook(gpu);
            }
        }

        let quads = self.quads_in_batch;
        self.streamer.render(
            gpu,
            PrimitiveKind::Quads,
            &self.primitives,
            quads,
            (quads * Self::VERTICES_PER_QUAD) as u32,
            can_buffer,
        )?;

        self.current_run += quads;
        if !can_buffer {
            self.largest_batch = self.largest_batch.max(self.current_run);
            self.current_run = 0;
        }
        self.quads_in_batch = 0;
        self.flushed_buffer_count += 1;
        self.last_flush_was_buffered = can_buffer;
        Ok(())
    }

    /// Applies `states`, flushing the pending batch before the first change.
    pub fn apply_states(&mut self, states: &RenderStates, cache: &mut StateCache, gpu: &mut B) -> Result<usize> {
        states.apply(cache, gpu, self)
    }

    pub fn stats(&self) -> RenderStats {
        let streamer = self.streamer.stats();
        RenderStats {
            rendered_quad_count: self.rendered_quad_count,
            flushed_buffer_count: self.flushed_buffer_count,
            largest_batch: self.largest_batch.max(self.current_run),
            discarded_buffer_count: streamer.discarded_buffer_count,
            buffer_wait_count: streamer.buffer_wait_count,
        }
    }

    /// Ends rendering if needed, then releases the streamer and the owned shader.
    pub fn dispose(mut self, gpu: &mut B) -> Result<()> {
        let ended = if self.rendering { self.end_rendering(gpu) } else { Ok(()) };
        self.streamer.dispose(gpu);
        if let ShaderSlot::Owned(shader) = self.shader {
            shader.dispose(gpu);
        }
        ended
    }
}

impl<B: GraphicsBackend> PendingBatch<B> for QuadRenderer<B> {
    fn flush_pending(&mut self, gpu: &mut B) -> Result<()> {
        self.flush(gpu, false)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::gpu::{BlendFactor, Call, Capabilities, RecordingBackend};
    use crate::render::states::BlendingFactorState;
    use crate::render::texture::Texture;

    fn quad(x: f32) -> QuadPrimitive {
        QuadPrimitive::axis_aligned(Vec2::new(x, 0.0), Vec2::ONE, Vec2::ZERO, Vec2::ONE, Color::WHITE)
    }

    fn config(max_quads: usize) -> QuadRendererConfig {
        QuadRendererConfig {
            max_quads_per_batch: max_quads,
            ..QuadRendererConfig::default()
        }
    }

    fn draw_counts(gpu: &RecordingBackend) -> Vec<u32> {
        gpu.calls()
            .iter()
            .filter_map(|c| match c {
                Call::DrawArrays { count, .. } => Some(*count),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn quad_layout_matches_vertex_struct() {
        let layout = QuadVertex::layout();
        assert_eq!(layout.stride(), std::mem::size_of::<QuadVertex>());
        let white = QuadPrimitive::axis_aligned(Vec2::new(1.0, 2.0), Vec2::new(3.0, 4.0), Vec2::ZERO, Vec2::ONE, Color::WHITE);
        assert_eq!(white.vertices[2].position, [4.0, 6.0]);
        assert_eq!(white.vertices[3].uv, [0.0, 1.0]);
        assert_eq!(white.vertices[0].color, u32::MAX);
    }

    #[test]
    fn capacity_splits_into_two_flushes() {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let texture = Texture::solid(&mut gpu, "white", Color::WHITE).unwrap();
        let mut renderer = QuadRenderer::new(&mut gpu, &config(4)).unwrap();

        renderer.begin_rendering(&mut gpu).unwrap();
        for i in 0..5 {
            renderer.draw(&mut gpu, &quad(i as f32), texture.handle()).unwrap();
        }
        renderer.end_rendering(&mut gpu).unwrap();

        let stats = renderer.stats();
        assert_eq!(stats.rendered_quad_count, 5);
        assert_eq!(stats.flushed_buffer_count, 2);
        assert_eq!(stats.largest_batch, 4);
        assert_eq!(draw_counts(&gpu), vec![16, 4]);

        renderer.dispose(&mut gpu).unwrap();
        texture.dispose(&mut gpu);
        assert_eq!(gpu.live_buffers(), 0);
    }

    #[test]
    fn texture_switch_flushes() {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let a = Texture::solid(&mut gpu, "a", Color::WHITE).unwrap();
        let b = Texture::solid(&mut gpu, "b", Color::BLACK).unwrap();
        let mut renderer = QuadRenderer::new(&mut gpu, &config(16)).unwrap();

        renderer.begin_rendering(&mut gpu).unwrap();
        renderer.draw(&mut gpu, &quad(0.0), a.handle()).unwrap();
        renderer.draw(&mut gpu, &quad(1.0), a.handle()).unwrap();
        renderer.draw(&mut gpu, &quad(2.0), b.handle()).unwrap();
        renderer.end_rendering(&mut gpu).unwrap();

        assert_eq!(renderer.stats().flushed_buffer_count, 2);
        assert_eq!(draw_counts(&gpu), vec![8, 4]);
        let binds: Vec<_> = gpu
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::BindTexture { texture, .. } => Some(*texture),
                _ => None,
            })
            .collect();
        assert_eq!(binds, vec![a.handle().id(), b.handle().id()]);

        renderer.dispose(&mut gpu).unwrap();
        a.dispose(&mut gpu);
        b.dispose(&mut gpu);
    }

    #[test]
    fn buffered_capacity_flush_skips_state() {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let texture = Texture::solid(&mut gpu, "white", Color::WHITE).unwrap();
        let config = QuadRendererConfig {
            max_quads_per_batch: 2,
            buffer_capacity_flushes: true,
            primitive_buffer_size: 8 * 80,
            ..QuadRendererConfig::default()
        };
        let mut renderer = QuadRenderer::new(&mut gpu, &config).unwrap();
        let hook_calls = Rc::new(Cell::new(0));
        let counter = hook_calls.clone();
        renderer.set_flush_hook(move |_gpu: &mut RecordingBackend| counter.set(counter.get() + 1));

        renderer.begin_rendering(&mut gpu).unwrap();
        for i in 0..5 {
            renderer.draw(&mut gpu, &quad(i as f32), texture.handle()).unwrap();
        }
        renderer.end_rendering(&mut gpu).unwrap();

        let stats = renderer.stats();
        assert_eq!(stats.flushed_buffer_count, 3);
        assert_eq!(stats.largest_batch, 5);
        assert_eq!(gpu.count_calls(|c| matches!(c, Call::UniformMat4(..))), 1);
        assert_eq!(gpu.count_calls(|c| matches!(c, Call::BindTexture { .. })), 1);
        assert_eq!(hook_calls.get(), 1);

        renderer.dispose(&mut gpu).unwrap();
        texture.dispose(&mut gpu);
    }

    #[test]
    fn session_state_errors() {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let texture = Texture::solid(&mut gpu, "white", Color::WHITE).unwrap();
        let mut renderer = QuadRenderer::new(&mut gpu, &config(4)).unwrap();

        assert!(matches!(
            renderer.draw(&mut gpu, &quad(0.0), texture.handle()),
            Err(RenderError::NotRendering)
        ));
        assert!(matches!(renderer.end_rendering(&mut gpu), Err(RenderError::NotRendering)));
        renderer.begin_rendering(&mut gpu).unwrap();
        assert!(matches!(
            renderer.begin_rendering(&mut gpu),
            Err(RenderError::AlreadyRendering)
        ));
        renderer.flush(&mut gpu, false).unwrap();
        assert_eq!(renderer.stats().flushed_buffer_count, 0);

        renderer.dispose(&mut gpu).unwrap();
        assert_eq!(gpu.bound_program(), None);
        texture.dispose(&mut gpu);
    }

    #[test]
    fn flush_reports_session_before_texture() {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let mut renderer = QuadRenderer::new(&mut gpu, &config(4)).unwrap();
        renderer.quads_in_batch = 1;

        assert!(matches!(renderer.flush(&mut gpu, false), Err(RenderError::NotRendering)));
        renderer.rendering = true;
        assert!(matches!(renderer.flush(&mut gpu, false), Err(RenderError::NoTexture)));

        renderer.rendering = false;
        renderer.quads_in_batch = 0;
        renderer.dispose(&mut gpu).unwrap();
    }

    #[test]
    fn cleared_flush_hook_is_not_called() {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let texture = Texture::solid(&mut gpu, "white", Color::WHITE).unwrap();
        let mut renderer = QuadRenderer::new(&mut gpu, &config(4)).unwrap();
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        renderer.set_flush_hook(move |_gpu: &mut RecordingBackend| counter.set(counter.get() + 1));

        renderer.begin_rendering(&mut gpu).unwrap();
        renderer.draw(&mut gpu, &quad(0.0), texture.handle()).unwrap();
        renderer.flush(&mut gpu, false).unwrap();
        assert_eq!(calls.get(), 1);

        renderer.clear_flush_hook();
        renderer.draw(&mut gpu, &quad(1.0), texture.handle()).unwrap();
        renderer.end_rendering(&mut gpu).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(renderer.stats().flushed_buffer_count, 2);

        renderer.dispose(&mut gpu).unwrap();
        texture.dispose(&mut gpu);
    }

    #[test]
    fn sampler_unit_uniform_only_on_change() {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let a = Texture::solid(&mut gpu, "a", Color::WHITE).unwrap();
        let b = Texture::solid(&mut gpu, "b", Color::BLACK).unwrap();
        let mut renderer = QuadRenderer::new(&mut gpu, &config(16)).unwrap();
        renderer.set_texture_binder(|gpu: &mut RecordingBackend, t: TextureHandle| {
            gpu.bind_texture(2, t.id());
            2
        });

        renderer.begin_rendering(&mut gpu).unwrap();
        renderer.draw(&mut gpu, &quad(0.0), a.handle()).unwrap();
        renderer.draw(&mut gpu, &quad(1.0), b.handle()).unwrap();
        renderer.end_rendering(&mut gpu).unwrap();

        let units: Vec<i32> = gpu
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::UniformI32(_, unit) => Some(*unit),
                _ => None,
            })
            .collect();
        assert_eq!(units, vec![2]);

        renderer.dispose(&mut gpu).unwrap();
        a.dispose(&mut gpu);
        b.dispose(&mut gpu);
    }

    #[test]
    fn camera_change_flushes_and_uploads_combined_matrix() {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let texture = Texture::solid(&mut gpu, "white", Color::WHITE).unwrap();
        let mut renderer = QuadRenderer::new(&mut gpu, &config(16)).unwrap();
        let camera: Rc<dyn Camera> = Rc::new(Mat4::scale(2.0, 2.0, 1.0));
        let transform = Mat4::translation(1.0, 0.0, 0.0);

        renderer.begin_rendering(&mut gpu).unwrap();
        renderer.draw(&mut gpu, &quad(0.0), texture.handle()).unwrap();
        renderer.set_camera(&mut gpu, camera.clone()).unwrap();
        assert_eq!(renderer.stats().flushed_buffer_count, 1);
        renderer.set_camera(&mut gpu, camera.clone()).unwrap();
        renderer.set_transform(&mut gpu, transform).unwrap();
        renderer.draw(&mut gpu, &quad(1.0), texture.handle()).unwrap();
        renderer.end_rendering(&mut gpu).unwrap();

        let matrices: Vec<Mat4> = gpu
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::UniformMat4(_, m) => Some(*m),
                _ => None,
            })
            .collect();
        assert_eq!(matrices, vec![Mat4::IDENTITY, camera.projection_view() * transform]);

        renderer.dispose(&mut gpu).unwrap();
        texture.dispose(&mut gpu);
    }

    #[test]
    fn applying_states_flushes_pending_quads() {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let texture = Texture::solid(&mut gpu, "white", Color::WHITE).unwrap();
        let mut renderer = QuadRenderer::new(&mut gpu, &config(16)).unwrap();
        let mut cache = StateCache::new();

        renderer.begin_rendering(&mut gpu).unwrap();
        renderer.apply_states(&RenderStates::default(), &mut cache, &mut gpu).unwrap();
        renderer.draw(&mut gpu, &quad(0.0), texture.handle()).unwrap();

        let additive = RenderStates {
            blending_factor: BlendingFactorState::new(BlendFactor::One, BlendFactor::One),
            ..RenderStates::default()
        };
        assert_eq!(renderer.apply_states(&additive, &mut cache, &mut gpu).unwrap(), 1);
        assert_eq!(renderer.quads_in_batch(), 0);
        assert_eq!(renderer.stats().flushed_buffer_count, 1);
        assert_eq!(renderer.apply_states(&additive, &mut cache, &mut gpu).unwrap(), 0);

        renderer.dispose(&mut gpu).unwrap();
        texture.dispose(&mut gpu);
    }

    #[test]
    fn owned_shader_is_hidden_and_released() {
        let mut gpu = RecordingBackend::new(Capabilities::BASELINE);
        let renderer = QuadRenderer::new(&mut gpu, &config(4)).unwrap();
        assert!(renderer.shader().is_none());
        renderer.dispose(&mut gpu).unwrap();
        assert_eq!(gpu.count_calls(|c| matches!(c, Call::DeleteProgram(_))), 1);
        assert_eq!(gpu.live_buffers(), 0);
        assert_eq!(gpu.live_vertex_formats(), 0);
    }

    #[test]
    fn shared_shader_survives_dispose() {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let shader = ProgramShader::textured_quad(
            &mut gpu,
            &[
                QuadRenderer::<RecordingBackend>::COMBINED_MATRIX_UNIFORM,
                QuadRenderer::<RecordingBackend>::TEXTURE_UNIFORM,
            ],
        )
        .unwrap();
        let shared: Rc<dyn Shader<RecordingBackend>> = Rc::new(shader);
        let renderer = QuadRenderer::with_shader(&mut gpu, shared.clone(), &config(4)).unwrap();
        assert!(renderer.shader().is_some());

        renderer.dispose(&mut gpu).unwrap();
        assert_eq!(gpu.count_calls(|c| matches!(c, Call::DeleteProgram(_))), 0);
    }

    #[test]
    fn dispose_while_rendering_flushes() {
        let mut gpu = RecordingBackend::new(Capabilities::FULL);
        let texture = Texture::solid(&mut gpu, "white", Color::WHITE).unwrap();
        let mut renderer = QuadRenderer::new(&mut gpu, &config(4)).unwrap();
        renderer.begin_rendering(&mut gpu).unwrap();
        renderer.draw(&mut gpu, &quad(0.0), texture.handle()).unwrap();

        renderer.dispose(&mut gpu).unwrap();
        assert_eq!(draw_counts(&gpu), vec![4]);
        texture.dispose(&mut gpu);
    }
}
