//! Offscreen [`GraphicsBackend`] on top of wgpu.
//!
//! The GL-shaped calls are mapped onto wgpu as follows:
//! - draws are recorded into one command encoder, a render pass per draw,
//!   and handed to the queue on `submit`, on fence creation and before uploads
//! - fixed-function state is accumulated in a [`FixedState`] and folded into a
//!   cached render pipeline per (program, vertex format, topology, state)
//! - quads are expanded into triangles through a shared `u32` index buffer
//! - fences are queue submission indices
//!
//! wgpu has no persistently mapped vertex storage, so this backend reports no
//! `persistent_mapping` capability and streamers pick the upload strategy.

mod init;
mod pipeline;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use wgpu::util::DeviceExt;

pub use init::WgpuInit;

use crate::coords::Mat4;
use crate::error::{RenderError, Result};
use crate::paint::Color;

use super::{
    BlendFactor, BlendOp, BufferDesc, BufferId, BufferKind, BufferStorage, Capabilities, CullFace,
    DepthFunction, FenceId, GraphicsBackend, PersistentMapping, PrimitiveKind, ProgramDesc,
    ProgramId, ProgramSource, TextureDesc, TextureId, Toggle, UniformLocation, VertexFormatDesc,
    VertexFormatId, VertexLayout,
};
use init::RenderTarget;
use pipeline::{FixedState, PipelineCache, PipelineInputs, PipelineKey};

struct GpuBuffer {
    label: String,
    buffer: wgpu::Buffer,
    size: usize,
}

struct GpuVertexFormat {
    layout: VertexLayout,
    attributes: Vec<wgpu::VertexAttribute>,
    vertex_buffer: BufferId,
    index_buffer: Option<BufferId>,
}

struct GpuProgram {
    module: wgpu::ShaderModule,
    uniforms: Vec<String>,
    mat4: Vec<Option<Mat4>>,
    ints: Vec<Option<i32>>,
}

impl GpuProgram {
    /// The first matrix uniform feeds binding 0.
    fn matrix(&self) -> Mat4 {
        self.mat4.iter().flatten().next().copied().unwrap_or(Mat4::IDENTITY)
    }

    /// The first integer uniform selects the texture unit.
    fn sampler_unit(&self) -> u32 {
        self.ints.iter().flatten().next().map_or(0, |u| (*u).max(0) as u32)
    }
}

struct GpuTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct GpuFence {
    submission: wgpu::SubmissionIndex,
    done: Arc<AtomicBool>,
}

enum DrawRange {
    Vertices { first: u32, count: u32 },
    Quads { first: u32, quads: u32 },
    Indexed { first_index: u32, count: u32 },
}

/// Headless wgpu device rendering into an offscreen color/depth target.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter: wgpu::AdapterInfo,
    caps: Capabilities,

    target: RenderTarget,
    pipelines: PipelineCache,
    sampler: wgpu::Sampler,
    fallback_texture: GpuTexture,
    quad_ibo: Option<(wgpu::Buffer, u32)>,

    next_handle: u32,
    buffers: HashMap<BufferId, GpuBuffer>,
    formats: HashMap<VertexFormatId, GpuVertexFormat>,
    programs: HashMap<ProgramId, GpuProgram>,
    textures: HashMap<TextureId, GpuTexture>,
    fences: HashMap<FenceId, GpuFence>,

    bound_format: Option<VertexFormatId>,
    program: Option<ProgramId>,
    texture_units: HashMap<u32, TextureId>,
    state: FixedState,
    ignored_toggle_logged: bool,

    encoder: Option<wgpu::CommandEncoder>,
    pending_clear: Option<Color>,
}

impl WgpuBackend {
    /// Acquires an adapter and device and allocates the offscreen target.
    pub async fn new(init: WgpuInit) -> anyhow::Result<Self> {
        let (device, queue, adapter) = init::request_device(&init).await?;
        log::info!("wgpu adapter: {} ({:?})", adapter.name, adapter.backend);

        let target = RenderTarget::new(&device, init.target_size, init.target_format);
        let pipelines = PipelineCache::new(&device);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("tessel sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });
        let fallback_texture = upload_texture(&device, &queue, "tessel white", 1, 1, &[255; 4]);

        Ok(Self {
            device,
            queue,
            adapter,
            caps: Capabilities::BASELINE,
            target,
            pipelines,
            sampler,
            fallback_texture,
            quad_ibo: None,
            next_handle: 1,
            buffers: HashMap::new(),
            formats: HashMap::new(),
            programs: HashMap::new(),
            textures: HashMap::new(),
            fences: HashMap::new(),
            bound_format: None,
            program: None,
            texture_units: HashMap::new(),
            state: FixedState::default(),
            ignored_toggle_logged: false,
            encoder: None,
            pending_clear: None,
        })
    }

    pub fn new_blocking(init: WgpuInit) -> anyhow::Result<Self> {
        pollster::block_on(Self::new(init))
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target.width, self.target.height)
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Reads back the color target as tightly packed RGBA8 rows.
    pub fn read_target(&mut self) -> Result<Vec<u8>> {
        self.record_pending_clear();
        let (width, height) = self.target_size();
        // Align to 256 bytes for COPY_BYTES_PER_ROW_ALIGNMENT
        let aligned_bytes_per_row = (width * 4 + 255) & !255;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tessel readback"),
            size: (aligned_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let encoder = self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("tessel encoder"),
                })
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.target.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(aligned_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        let submission = self.submit_pending();

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(submission),
                timeout: None,
            })
            .map_err(|e| RenderError::gpu("read target", "color target", e.to_string()))?;
        rx.recv()
            .map_err(|e| RenderError::gpu("read target", "color target", e.to_string()))?
            .map_err(|e| RenderError::gpu("read target", "color target", e.to_string()))?;

        let data = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            let start = (y * aligned_bytes_per_row) as usize;
            pixels.extend_from_slice(&data[start..start + (width * 4) as usize]);
        }
        drop(data);
        staging.unmap();
        Ok(pixels)
    }

    fn alloc(&mut self) -> u32 {
        let id = self.next_handle;
        self.next_handle += 1;
        id
    }

    /// Hands the current encoder (if any) to the queue.
    fn submit_pending(&mut self) -> wgpu::SubmissionIndex {
        self.record_pending_clear();
        self.queue.submit(self.encoder.take().map(|e| e.finish()))
    }

    /// A clear with no draw after it still has to reach the target.
    fn record_pending_clear(&mut self) {
        let Some(color) = self.pending_clear.take() else { return };
        let encoder = self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("tessel encoder"),
                })
        });
        let _pass = begin_pass(encoder, &self.target, Some(color));
    }

    fn ensure_quad_indices(&mut self, quads: u32) {
        if matches!(self.quad_ibo, Some((_, cap)) if cap >= quads) {
            return;
        }
        let cap = quads.next_power_of_two().max(64);
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("tessel quad ibo"),
            contents: bytemuck::cast_slice(&pipeline::quad_indices(cap)),
            usage: wgpu::BufferUsages::INDEX,
        });
        self.quad_ibo = Some((buffer, cap));
    }

    fn record_draw(&mut self, kind: PrimitiveKind, range: DrawRange) -> Result<()> {
        let program_id = self.program.ok_or(RenderError::NotBound { component: "program" })?;
        let format_id = self
            .bound_format
            .ok_or(RenderError::NotBound { component: "vertex format" })?;
        if let DrawRange::Quads { quads, .. } = range {
            self.ensure_quad_indices(quads);
        }
        let clear = self.pending_clear.take();

        let program = self
            .programs
            .get(&program_id)
            .ok_or_else(|| RenderError::unknown(ProgramId::KIND, program_id.0))?;
        let format = self
            .formats
            .get(&format_id)
            .ok_or_else(|| RenderError::unknown(VertexFormatId::KIND, format_id.0))?;
        let vertex_buffer = self
            .buffers
            .get(&format.vertex_buffer)
            .ok_or_else(|| RenderError::unknown(BufferId::KIND, format.vertex_buffer.0))?;
        let index_buffer = match range {
            DrawRange::Indexed { .. } => {
                let id = format
                    .index_buffer
                    .ok_or(RenderError::NotBound { component: "index buffer" })?;
                let b = self
                    .buffers
                    .get(&id)
                    .ok_or_else(|| RenderError::unknown(BufferId::KIND, id.0))?;
                Some((&b.buffer, wgpu::IndexFormat::Uint16))
            }
            DrawRange::Quads { .. } => self
                .quad_ibo
                .as_ref()
                .map(|(b, _)| (b, wgpu::IndexFormat::Uint32)),
            DrawRange::Vertices { .. } => None,
        };

        let matrix = program.matrix();
        let ubo = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("tessel matrix ubo"),
            contents: bytemuck::bytes_of(&matrix),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let view = self
            .texture_units
            .get(&program.sampler_unit())
            .and_then(|t| self.textures.get(t))
            .map_or(&self.fallback_texture.view, |t| &t.view);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tessel bind group"),
            layout: self.pipelines.bind_group_layout(),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: ubo.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let key = PipelineKey {
            program: program_id,
            format: format_id,
            kind,
            state: self.state,
        };
        let pipeline = self.pipelines.get_or_create(
            &self.device,
            key,
            PipelineInputs {
                module: &program.module,
                stride: format.layout.stride(),
                attributes: &format.attributes,
                target_format: self.target.format,
            },
        );

        let encoder = self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("tessel encoder"),
                })
        });
        let mut rpass = begin_pass(encoder, &self.target, clear);
        rpass.set_pipeline(pipeline);
        rpass.set_bind_group(0, &bind_group, &[]);
        rpass.set_vertex_buffer(0, vertex_buffer.buffer.slice(..));
        if let Some((buffer, format)) = index_buffer {
            rpass.set_index_buffer(buffer.slice(..), format);
        }
        match range {
            DrawRange::Vertices { first, count } => rpass.draw(first..first + count, 0..1),
            DrawRange::Quads { first, quads } => rpass.draw_indexed(0..quads * 6, first as i32, 0..1),
            DrawRange::Indexed { first_index, count } => {
                rpass.draw_indexed(first_index..first_index + count, 0, 0..1)
            }
        }
        Ok(())
    }
}

fn begin_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    target: &RenderTarget,
    clear: Option<Color>,
) -> wgpu::RenderPass<'e> {
    let (color_load, depth_load) = match clear {
        Some(c) => (
            wgpu::LoadOp::Clear(wgpu::Color {
                r: c.r as f64,
                g: c.g as f64,
                b: c.b as f64,
                a: c.a as f64,
            }),
            wgpu::LoadOp::Clear(1.0),
        ),
        None => (wgpu::LoadOp::Load, wgpu::LoadOp::Load),
    };
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("tessel pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: &target.color_view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: color_load,
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: &target.depth_view,
            depth_ops: Some(wgpu::Operations {
                load: depth_load,
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
        multiview_mask: None,
    })
}

fn upload_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    width: u32,
    height: u32,
    rgba8: &[u8],
) -> GpuTexture {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        rgba8,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * 4),
            rows_per_image: Some(height),
        },
        size,
    );
    GpuTexture {
        view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
        _texture: texture,
    }
}

/// Pads `data` to `wgpu::COPY_BUFFER_ALIGNMENT`.
fn aligned(data: &[u8]) -> std::borrow::Cow<'_, [u8]> {
    let rem = data.len() % wgpu::COPY_BUFFER_ALIGNMENT as usize;
    if rem == 0 {
        return std::borrow::Cow::Borrowed(data);
    }
    let mut padded = data.to_vec();
    padded.resize(data.len() + wgpu::COPY_BUFFER_ALIGNMENT as usize - rem, 0);
    std::borrow::Cow::Owned(padded)
}

fn aligned_size(size: usize) -> u64 {
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    (size as u64).div_ceil(align).max(1) * align
}

impl GraphicsBackend for WgpuBackend {
    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferId> {
        if desc.storage == BufferStorage::Persistent {
            return Err(RenderError::MissingCapability("persistent buffer storage"));
        }
        let usage = match desc.kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
        } | wgpu::BufferUsages::COPY_DST;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: aligned_size(desc.size),
            usage,
            mapped_at_creation: false,
        });
        if let Some(contents) = desc.contents {
            if contents.len() > desc.size {
                return Err(RenderError::OutOfBounds {
                    operation: "create buffer",
                    object: desc.label.to_owned(),
                    offset: 0,
                    end: contents.len(),
                    size: desc.size,
                });
            }
            self.queue.write_buffer(&buffer, 0, &aligned(contents));
        }

        let id = BufferId(self.alloc());
        self.buffers.insert(
            id,
            GpuBuffer {
                label: desc.label.to_owned(),
                buffer,
                size: desc.size,
            },
        );
        Ok(id)
    }

    fn upload(&mut self, buffer: BufferId, offset: usize, data: &[u8]) -> Result<()> {
        // Earlier draws must be submitted before the write is staged.
        if self.encoder.is_some() {
            self.submit_pending();
        }
        let b = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| RenderError::unknown(BufferId::KIND, buffer.0))?;
        if offset as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(RenderError::gpu("upload", b.label.clone(), "offset is not 4-byte aligned"));
        }
        let end = offset + data.len();
        if end > b.size {
            return Err(RenderError::OutOfBounds {
                operation: "upload",
                object: b.label.clone(),
                offset,
                end,
                size: b.size,
            });
        }
        self.queue.write_buffer(&b.buffer, offset as u64, &aligned(data));
        Ok(())
    }

    fn map_persistent(&mut self, _buffer: BufferId) -> Result<PersistentMapping> {
        Err(RenderError::MissingCapability("persistent buffer mapping"))
    }

    fn write_mapped(&mut self, _mapping: &mut PersistentMapping, _offset: usize, _data: &[u8]) -> Result<()> {
        Err(RenderError::MissingCapability("persistent buffer mapping"))
    }

    fn unmap(&mut self, _mapping: PersistentMapping) {}

    fn delete_buffer(&mut self, buffer: BufferId) {
        // wgpu keeps the storage alive until submitted work is done with it.
        if let Some(b) = self.buffers.remove(&buffer) {
            b.buffer.destroy();
        }
    }

    fn create_vertex_format(&mut self, desc: &VertexFormatDesc) -> Result<VertexFormatId> {
        for buffer in std::iter::once(desc.vertex_buffer).chain(desc.index_buffer) {
            if !self.buffers.contains_key(&buffer) {
                return Err(RenderError::unknown(BufferId::KIND, buffer.0));
            }
        }
        if !self.programs.contains_key(&desc.program) {
            return Err(RenderError::unknown(ProgramId::KIND, desc.program.0));
        }
        let attributes = pipeline::vertex_attributes(&desc.layout)?;

        let id = VertexFormatId(self.alloc());
        self.formats.insert(
            id,
            GpuVertexFormat {
                layout: desc.layout.clone(),
                attributes,
                vertex_buffer: desc.vertex_buffer,
                index_buffer: desc.index_buffer,
            },
        );
        Ok(id)
    }

    fn bind_vertex_format(&mut self, format: Option<VertexFormatId>) {
        self.bound_format = format;
    }

    fn delete_vertex_format(&mut self, format: VertexFormatId) {
        self.formats.remove(&format);
        self.pipelines.forget(|k| k.format == format);
        if self.bound_format == Some(format) {
            self.bound_format = None;
        }
    }

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramId> {
        let source = match &desc.source {
            ProgramSource::TexturedQuad => include_str!("shaders/quad.wgsl").to_owned(),
            ProgramSource::Native(src) => src.clone(),
        };
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let id = ProgramId(self.alloc());
        self.programs.insert(
            id,
            GpuProgram {
                module,
                uniforms: desc.uniforms.iter().map(|u| (*u).to_owned()).collect(),
                mat4: vec![None; desc.uniforms.len()],
                ints: vec![None; desc.uniforms.len()],
            },
        );
        Ok(id)
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.program = program;
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let index = self.programs.get(&program)?.uniforms.iter().position(|u| u == name)?;
        Some(UniformLocation {
            program,
            index: index as u32,
        })
    }

    fn set_uniform_mat4(&mut self, location: UniformLocation, value: &Mat4) {
        if let Some(slot) = self
            .programs
            .get_mut(&location.program)
            .and_then(|p| p.mat4.get_mut(location.index as usize))
        {
            *slot = Some(*value);
        }
    }

    fn set_uniform_i32(&mut self, location: UniformLocation, value: i32) {
        if let Some(slot) = self
            .programs
            .get_mut(&location.program)
            .and_then(|p| p.ints.get_mut(location.index as usize))
        {
            *slot = Some(value);
        }
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        self.pipelines.forget(|k| k.program == program);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureId> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::EmptyTexture {
                label: desc.label.to_owned(),
            });
        }
        let expected = desc.width as usize * desc.height as usize * 4;
        if desc.rgba8.len() != expected {
            return Err(RenderError::OutOfBounds {
                operation: "create texture",
                object: desc.label.to_owned(),
                offset: 0,
                end: desc.rgba8.len(),
                size: expected,
            });
        }
        let texture = upload_texture(&self.device, &self.queue, desc.label, desc.width, desc.height, desc.rgba8);
        let id = TextureId(self.alloc());
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        self.texture_units.insert(unit, texture);
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
        self.texture_units.retain(|_, t| *t != texture);
    }

    fn set_enabled(&mut self, toggle: Toggle, enabled: bool) {
        match toggle {
            Toggle::Blend => self.state.blend = enabled,
            Toggle::DepthTest => self.state.depth_test = enabled,
            Toggle::CullFace => self.state.cull = enabled,
            // Point size comes from the shader under wgpu.
            Toggle::PointSprite | Toggle::ProgramPointSize => {
                if !self.ignored_toggle_logged {
                    log::debug!("{toggle:?} has no wgpu equivalent; point state is ignored");
                    self.ignored_toggle_logged = true;
                }
            }
        }
    }

    fn blend_func_separate(
        &mut self,
        src: BlendFactor,
        dst: BlendFactor,
        alpha_src: BlendFactor,
        alpha_dst: BlendFactor,
    ) {
        self.state.src = src;
        self.state.dst = dst;
        self.state.alpha_src = alpha_src;
        self.state.alpha_dst = alpha_dst;
    }

    fn blend_equation_separate(&mut self, color: BlendOp, alpha: BlendOp) {
        self.state.color_op = color;
        self.state.alpha_op = alpha;
    }

    fn depth_func(&mut self, func: DepthFunction) {
        self.state.depth_func = func;
    }

    fn depth_mask(&mut self, write: bool) {
        self.state.depth_write = write;
    }

    fn cull_face(&mut self, face: CullFace) {
        self.state.cull_face = face;
    }

    fn clear(&mut self, color: Color) {
        self.pending_clear = Some(color);
    }

    fn draw_arrays(&mut self, kind: PrimitiveKind, first: u32, count: u32) -> Result<()> {
        let range = match kind {
            PrimitiveKind::Quads => DrawRange::Quads {
                first,
                quads: count / 4,
            },
            _ => DrawRange::Vertices { first, count },
        };
        self.record_draw(kind, range)
    }

    fn draw_elements(&mut self, kind: PrimitiveKind, count: u32, first_index: u32) -> Result<()> {
        if kind == PrimitiveKind::Quads {
            return Err(RenderError::gpu(
                "draw elements",
                "quads",
                "indexed quads are not supported; index triangles instead",
            ));
        }
        self.record_draw(kind, DrawRange::Indexed { first_index, count })
    }

    fn submit(&mut self) -> Result<()> {
        self.submit_pending();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let submission = self.submit_pending();
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(submission),
                timeout: None,
            })
            .map_err(|e| RenderError::gpu("finish", "queue", e.to_string()))?;
        Ok(())
    }

    fn create_fence(&mut self) -> Result<FenceId> {
        let submission = self.submit_pending();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        self.queue
            .on_submitted_work_done(move || flag.store(true, Ordering::Release));

        let id = FenceId(self.alloc());
        self.fences.insert(id, GpuFence { submission, done });
        Ok(id)
    }

    fn fence_signaled(&mut self, fence: FenceId) -> Result<bool> {
        let f = self
            .fences
            .get(&fence)
            .ok_or_else(|| RenderError::unknown(FenceId::KIND, fence.0))?;
        if !f.done.load(Ordering::Acquire) {
            self.device
                .poll(wgpu::PollType::Poll)
                .map_err(|e| RenderError::gpu("poll fence", fence.to_string(), e.to_string()))?;
        }
        Ok(f.done.load(Ordering::Acquire))
    }

    fn wait_fence(&mut self, fence: FenceId) -> Result<()> {
        let f = self
            .fences
            .get(&fence)
            .ok_or_else(|| RenderError::unknown(FenceId::KIND, fence.0))?;
        if f.done.load(Ordering::Acquire) {
            return Ok(());
        }
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(f.submission.clone()),
                timeout: None,
            })
            .map_err(|e| RenderError::gpu("wait fence", fence.to_string(), e.to_string()))?;
        f.done.store(true, Ordering::Release);
        Ok(())
    }

    fn delete_fence(&mut self, fence: FenceId) {
        self.fences.remove(&fence);
    }
}
