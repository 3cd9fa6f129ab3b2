//! Headless backend that simulates an asynchronously executing GPU.
//!
//! Every buffer has two views: the *client* view (what the CPU has written so
//! far) and the *device* view (what the GPU reads when a command executes).
//! Persistent-mapped writes land in both at once, exactly like coherent
//! mapped memory; uploads are queued and reach the device view in command
//! order.
//!
//! Draws and fences go into a queue that the simulated GPU retires lazily: it
//! lags `latency` commands behind the CPU. When a draw finally executes it
//! compares the device bytes it reads with the client bytes at the time it was
//! issued; a mismatch means the CPU overwrote data still in flight, and is
//! recorded as a [`Corruption`].

use std::collections::{HashMap, HashSet, VecDeque};

use crate::coords::Mat4;
use crate::error::{RenderError, Result};
use crate::paint::Color;

use super::{
    BlendFactor, BlendOp, BufferDesc, BufferId, BufferKind, BufferStorage, Capabilities, CullFace,
    DepthFunction, FenceId, GraphicsBackend, PersistentMapping, PrimitiveKind, ProgramDesc,
    ProgramId, TextureDesc, TextureId, Toggle, UniformLocation, VertexFormatDesc, VertexFormatId,
};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateBuffer {
        buffer: BufferId,
        kind: BufferKind,
        storage: BufferStorage,
        size: usize,
    },
    Upload {
        buffer: BufferId,
        offset: usize,
        len: usize,
    },
    MapPersistent(BufferId),
    WriteMapped {
        buffer: BufferId,
        offset: usize,
        len: usize,
    },
    Unmap(BufferId),
    DeleteBuffer(BufferId),
    CreateVertexFormat(VertexFormatId),
    BindVertexFormat(Option<VertexFormatId>),
    DeleteVertexFormat(VertexFormatId),
    CreateProgram(ProgramId),
    UseProgram(Option<ProgramId>),
    UniformMat4(UniformLocation, Mat4),
    UniformI32(UniformLocation, i32),
    DeleteProgram(ProgramId),
    CreateTexture(TextureId),
    BindTexture { unit: u32, texture: TextureId },
    DeleteTexture(TextureId),
    SetEnabled(Toggle, bool),
    BlendFunc {
        src: BlendFactor,
        dst: BlendFactor,
        alpha_src: BlendFactor,
        alpha_dst: BlendFactor,
    },
    BlendEquation { color: BlendOp, alpha: BlendOp },
    DepthFunc(DepthFunction),
    DepthMask(bool),
    CullFace(CullFace),
    Clear(Color),
    DrawArrays {
        kind: PrimitiveKind,
        first: u32,
        count: u32,
    },
    DrawElements {
        kind: PrimitiveKind,
        count: u32,
        first_index: u32,
    },
    Submit,
    Finish,
    CreateFence(FenceId),
    WaitFence { fence: FenceId, stalled: bool },
    DeleteFence(FenceId),
}

impl Call {
    /// Fixed-function state calls (the ones render states emit).
    pub fn is_state_change(&self) -> bool {
        matches!(
            self,
            Call::SetEnabled(..)
                | Call::BlendFunc { .. }
                | Call::BlendEquation { .. }
                | Call::DepthFunc(_)
                | Call::DepthMask(_)
                | Call::CullFace(_)
        )
    }

    pub fn is_draw(&self) -> bool {
        matches!(self, Call::DrawArrays { .. } | Call::DrawElements { .. })
    }
}

/// A draw the simulated GPU has executed, with the vertex bytes it consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedDraw {
    pub kind: PrimitiveKind,
    pub buffer: BufferId,
    pub offset: usize,
    pub vertex_bytes: Vec<u8>,
}

/// A draw read bytes that differ from what was in the buffer when it was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corruption {
    pub buffer: BufferId,
    pub offset: usize,
    pub len: usize,
}

struct SimBuffer {
    label: String,
    storage: BufferStorage,
    client: Vec<u8>,
    device: Vec<u8>,
    mapped: bool,
}

enum GpuCommand {
    Upload {
        buffer: BufferId,
        offset: usize,
        data: Vec<u8>,
    },
    Draw {
        kind: PrimitiveKind,
        buffer: BufferId,
        offset: usize,
        expected: Vec<u8>,
    },
    Fence(FenceId),
}

/// Simulated GPU; see the module docs.
pub struct RecordingBackend {
    caps: Capabilities,
    latency: usize,
    next_handle: u32,
    fail_fences: bool,

    buffers: HashMap<BufferId, SimBuffer>,
    formats: HashMap<VertexFormatId, VertexFormatDesc>,
    programs: HashMap<ProgramId, Vec<String>>,
    textures: HashSet<TextureId>,
    fences: HashMap<FenceId, bool>,

    bound_format: Option<VertexFormatId>,
    program: Option<ProgramId>,

    queue: VecDeque<GpuCommand>,
    calls: Vec<Call>,
    executed: Vec<ExecutedDraw>,
    corruptions: Vec<Corruption>,
    stalls: usize,
}

impl RecordingBackend {
    /// A backend whose GPU keeps up immediately (`latency == 0`).
    pub fn new(caps: Capabilities) -> Self {
        Self {
            caps,
            latency: 0,
            next_handle: 1,
            fail_fences: false,
            buffers: HashMap::new(),
            formats: HashMap::new(),
            programs: HashMap::new(),
            textures: HashSet::new(),
            fences: HashMap::new(),
            bound_format: None,
            program: None,
            queue: VecDeque::new(),
            calls: Vec::new(),
            executed: Vec::new(),
            corruptions: Vec::new(),
            stalls: 0,
        }
    }

    /// Lets the GPU fall `commands` commands behind the CPU.
    pub fn with_latency(mut self, commands: usize) -> Self {
        self.latency = commands;
        self
    }

    pub fn set_latency(&mut self, commands: usize) {
        self.latency = commands;
        self.retire_to(commands);
    }

    /// Makes every following `create_fence` fail like a lost device.
    pub fn fail_fence_creation(&mut self, fail: bool) {
        self.fail_fences = fail;
    }

    /// Lets the GPU execute up to `commands` queued commands.
    pub fn advance(&mut self, commands: usize) {
        for _ in 0..commands {
            let Some(cmd) = self.queue.pop_front() else { break };
            self.execute(cmd);
        }
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn executed_draws(&self) -> &[ExecutedDraw] {
        &self.executed
    }

    pub fn corruptions(&self) -> &[Corruption] {
        &self.corruptions
    }

    /// Number of fence waits that had to block.
    pub fn stall_count(&self) -> usize {
        self.stalls
    }

    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_vertex_formats(&self) -> usize {
        self.formats.len()
    }

    pub fn live_fences(&self) -> usize {
        self.fences.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn bound_program(&self) -> Option<ProgramId> {
        self.program
    }

    fn alloc(&mut self) -> u32 {
        let id = self.next_handle;
        self.next_handle += 1;
        id
    }

    fn buffer_mut(&mut self, buffer: BufferId) -> Result<&mut SimBuffer> {
        self.buffers
            .get_mut(&buffer)
            .ok_or_else(|| RenderError::unknown(BufferId::KIND, buffer.0))
    }

    fn push(&mut self, cmd: GpuCommand) {
        self.queue.push_back(cmd);
        self.retire_to(self.latency);
    }

    fn retire_to(&mut self, pending: usize) {
        while self.queue.len() > pending {
            let Some(cmd) = self.queue.pop_front() else { break };
            self.execute(cmd);
        }
    }

    fn execute(&mut self, cmd: GpuCommand) {
        match cmd {
            GpuCommand::Upload { buffer, offset, data } => {
                // Deleted buffers keep no observable contents.
                if let Some(b) = self.buffers.get_mut(&buffer) {
                    b.device[offset..offset + data.len()].copy_from_slice(&data);
                }
            }
            GpuCommand::Draw {
                kind,
                buffer,
                offset,
                expected,
            } => {
                let actual = match self.buffers.get(&buffer) {
                    Some(b) => b.device[offset..offset + expected.len()].to_vec(),
                    // Orphaned storage outlives its handle until the GPU is done with it.
                    None => expected.clone(),
                };
                if actual != expected {
                    self.corruptions.push(Corruption {
                        buffer,
                        offset,
                        len: expected.len(),
                    });
                }
                self.executed.push(ExecutedDraw {
                    kind,
                    buffer,
                    offset,
                    vertex_bytes: actual,
                });
            }
            GpuCommand::Fence(fence) => {
                if let Some(signaled) = self.fences.get_mut(&fence) {
                    *signaled = true;
                }
            }
        }
    }

    fn queue_draw(&mut self, kind: PrimitiveKind, first_vertex: usize, vertex_count: usize) -> Result<()> {
        if self.program.is_none() {
            return Err(RenderError::NotBound { component: "program" });
        }
        let format = self
            .bound_format
            .ok_or(RenderError::NotBound { component: "vertex format" })?;
        let desc = self
            .formats
            .get(&format)
            .ok_or_else(|| RenderError::unknown(VertexFormatId::KIND, format.0))?;
        let stride = desc.layout.stride();
        let buffer = desc.vertex_buffer;

        let offset = first_vertex * stride;
        let end = offset + vertex_count * stride;
        let b = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| RenderError::unknown(BufferId::KIND, buffer.0))?;
        if end > b.client.len() {
            return Err(RenderError::OutOfBounds {
                operation: "draw",
                object: b.label.clone(),
                offset,
                end,
                size: b.client.len(),
            });
        }
        let expected = b.client[offset..end].to_vec();
        self.push(GpuCommand::Draw {
            kind,
            buffer,
            offset,
            expected,
        });
        Ok(())
    }
}

fn check_range(operation: &'static str, b: &SimBuffer, offset: usize, len: usize) -> Result<()> {
    let end = offset + len;
    if end > b.client.len() {
        return Err(RenderError::OutOfBounds {
            operation,
            object: b.label.clone(),
            offset,
            end,
            size: b.client.len(),
        });
    }
    Ok(())
}

impl GraphicsBackend for RecordingBackend {
    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferId> {
        if desc.storage == BufferStorage::Persistent && !self.caps.persistent_mapping {
            return Err(RenderError::MissingCapability("persistent buffer storage"));
        }
        let mut client = vec![0u8; desc.size];
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
            client[..contents.len()].copy_from_slice(contents);
        }

        let buffer = BufferId(self.alloc());
        self.buffers.insert(
            buffer,
            SimBuffer {
                label: desc.label.to_owned(),
                storage: desc.storage,
                device: client.clone(),
                client,
                mapped: false,
            },
        );
        self.calls.push(Call::CreateBuffer {
            buffer,
            kind: desc.kind,
            storage: desc.storage,
            size: desc.size,
        });
        Ok(buffer)
    }

    fn upload(&mut self, buffer: BufferId, offset: usize, data: &[u8]) -> Result<()> {
        let b = self.buffer_mut(buffer)?;
        if b.storage != BufferStorage::Dynamic {
            return Err(RenderError::gpu("upload", b.label.clone(), "buffer storage is immutable"));
        }
        check_range("upload", b, offset, data.len())?;
        b.client[offset..offset + data.len()].copy_from_slice(data);

        self.calls.push(Call::Upload {
            buffer,
            offset,
            len: data.len(),
        });
        self.push(GpuCommand::Upload {
            buffer,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn map_persistent(&mut self, buffer: BufferId) -> Result<PersistentMapping> {
        let b = self.buffer_mut(buffer)?;
        if b.storage != BufferStorage::Persistent {
            return Err(RenderError::gpu("map buffer", b.label.clone(), "buffer was not created persistent"));
        }
        if b.mapped {
            return Err(RenderError::gpu("map buffer", b.label.clone(), "buffer is already mapped"));
        }
        b.mapped = true;
        let len = b.client.len();
        self.calls.push(Call::MapPersistent(buffer));
        Ok(PersistentMapping::new(buffer, len))
    }

    fn write_mapped(&mut self, mapping: &mut PersistentMapping, offset: usize, data: &[u8]) -> Result<()> {
        let buffer = mapping.buffer();
        let b = self.buffer_mut(buffer)?;
        if !b.mapped {
            return Err(RenderError::gpu("write mapped", b.label.clone(), "buffer is not mapped"));
        }
        check_range("write mapped", b, offset, data.len())?;
        b.client[offset..offset + data.len()].copy_from_slice(data);
        b.device[offset..offset + data.len()].copy_from_slice(data);

        self.calls.push(Call::WriteMapped {
            buffer,
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn unmap(&mut self, mapping: PersistentMapping) {
        let buffer = mapping.buffer();
        if let Some(b) = self.buffers.get_mut(&buffer) {
            b.mapped = false;
        }
        self.calls.push(Call::Unmap(buffer));
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        if let Some(b) = self.buffers.remove(&buffer) {
            if b.mapped {
                log::warn!("buffer {:?} deleted while mapped", b.label);
            }
        }
        self.calls.push(Call::DeleteBuffer(buffer));
    }

    fn create_vertex_format(&mut self, desc: &VertexFormatDesc) -> Result<VertexFormatId> {
        if !self.caps.vertex_formats {
            return Err(RenderError::MissingCapability("vertex format objects"));
        }
        for buffer in std::iter::once(desc.vertex_buffer).chain(desc.index_buffer) {
            if !self.buffers.contains_key(&buffer) {
                return Err(RenderError::unknown(BufferId::KIND, buffer.0));
            }
        }
        if !self.programs.contains_key(&desc.program) {
            return Err(RenderError::unknown(ProgramId::KIND, desc.program.0));
        }

        let format = VertexFormatId(self.alloc());
        self.formats.insert(format, desc.clone());
        self.calls.push(Call::CreateVertexFormat(format));
        Ok(format)
    }

    fn bind_vertex_format(&mut self, format: Option<VertexFormatId>) {
        self.bound_format = format;
        self.calls.push(Call::BindVertexFormat(format));
    }

    fn delete_vertex_format(&mut self, format: VertexFormatId) {
        self.formats.remove(&format);
        if self.bound_format == Some(format) {
            self.bound_format = None;
        }
        self.calls.push(Call::DeleteVertexFormat(format));
    }

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<ProgramId> {
        let program = ProgramId(self.alloc());
        self.programs
            .insert(program, desc.uniforms.iter().map(|u| (*u).to_owned()).collect());
        self.calls.push(Call::CreateProgram(program));
        Ok(program)
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.program = program;
        self.calls.push(Call::UseProgram(program));
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let uniforms = self.programs.get(&program)?;
        let index = uniforms.iter().position(|u| u == name)?;
        Some(UniformLocation {
            program,
            index: index as u32,
        })
    }

    fn set_uniform_mat4(&mut self, location: UniformLocation, value: &Mat4) {
        self.calls.push(Call::UniformMat4(location, *value));
    }

    fn set_uniform_i32(&mut self, location: UniformLocation, value: i32) {
        self.calls.push(Call::UniformI32(location, value));
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        if self.program == Some(program) {
            self.program = None;
        }
        self.calls.push(Call::DeleteProgram(program));
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
        let texture = TextureId(self.alloc());
        self.textures.insert(texture);
        self.calls.push(Call::CreateTexture(texture));
        Ok(texture)
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        self.calls.push(Call::BindTexture { unit, texture });
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
        self.calls.push(Call::DeleteTexture(texture));
    }

    fn set_enabled(&mut self, toggle: Toggle, enabled: bool) {
        self.calls.push(Call::SetEnabled(toggle, enabled));
    }

    fn blend_func_separate(
        &mut self,
        src: BlendFactor,
        dst: BlendFactor,
        alpha_src: BlendFactor,
        alpha_dst: BlendFactor,
    ) {
        self.calls.push(Call::BlendFunc {
            src,
            dst,
            alpha_src,
            alpha_dst,
        });
    }

    fn blend_equation_separate(&mut self, color: BlendOp, alpha: BlendOp) {
        self.calls.push(Call::BlendEquation { color, alpha });
    }

    fn depth_func(&mut self, func: DepthFunction) {
        self.calls.push(Call::DepthFunc(func));
    }

    fn depth_mask(&mut self, write: bool) {
        self.calls.push(Call::DepthMask(write));
    }

    fn cull_face(&mut self, face: CullFace) {
        self.calls.push(Call::CullFace(face));
    }

    fn clear(&mut self, color: Color) {
        self.calls.push(Call::Clear(color));
    }

    fn draw_arrays(&mut self, kind: PrimitiveKind, first: u32, count: u32) -> Result<()> {
        self.queue_draw(kind, first as usize, count as usize)?;
        self.calls.push(Call::DrawArrays { kind, first, count });
        Ok(())
    }

    fn draw_elements(&mut self, kind: PrimitiveKind, count: u32, first_index: u32) -> Result<()> {
        let format = self
            .bound_format
            .ok_or(RenderError::NotBound { component: "vertex format" })?;
        let index_buffer = self
            .formats
            .get(&format)
            .and_then(|f| f.index_buffer)
            .ok_or(RenderError::NotBound { component: "index buffer" })?;
        let b = self
            .buffers
            .get(&index_buffer)
            .ok_or_else(|| RenderError::unknown(BufferId::KIND, index_buffer.0))?;

        let start = first_index as usize * 2;
        check_range("draw elements", b, start, count as usize * 2)?;
        let indices: Vec<u16> = b.client[start..start + count as usize * 2]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();

        // The GPU reads every vertex between the smallest and largest index.
        if let (Some(min), Some(max)) = (indices.iter().min(), indices.iter().max()) {
            let (min, max) = (*min as usize, *max as usize);
            self.queue_draw(kind, min, max - min + 1)?;
        }
        self.calls.push(Call::DrawElements {
            kind,
            count,
            first_index,
        });
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        self.calls.push(Call::Submit);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.retire_to(0);
        self.calls.push(Call::Finish);
        Ok(())
    }

    fn create_fence(&mut self) -> Result<FenceId> {
        if self.fail_fences {
            return Err(RenderError::gpu("create fence", "command stream", "device lost"));
        }
        let fence = FenceId(self.alloc());
        self.fences.insert(fence, false);
        self.calls.push(Call::CreateFence(fence));
        self.push(GpuCommand::Fence(fence));
        Ok(fence)
    }

    fn fence_signaled(&mut self, fence: FenceId) -> Result<bool> {
        self.fences
            .get(&fence)
            .copied()
            .ok_or_else(|| RenderError::unknown(FenceId::KIND, fence.0))
    }

    fn wait_fence(&mut self, fence: FenceId) -> Result<()> {
        let signaled = self.fence_signaled(fence)?;
        if !signaled {
            self.stalls += 1;
            while let Some(cmd) = self.queue.pop_front() {
                let reached = matches!(cmd, GpuCommand::Fence(f) if f == fence);
                self.execute(cmd);
                if reached {
                    break;
                }
            }
        }
        self.calls.push(Call::WaitFence {
            fence,
            stalled: !signaled,
        });
        Ok(())
    }

    fn delete_fence(&mut self, fence: FenceId) {
        self.fences.remove(&fence);
        self.calls.push(Call::DeleteFence(fence));
    }
}
