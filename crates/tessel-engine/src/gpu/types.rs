use std::fmt;

use super::VertexLayout;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub const KIND: &'static str = $kind;
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} #{}", $kind, self.0)
            }
        }
    };
}

handle!(
    /// GPU buffer object.
    BufferId,
    "buffer"
);
handle!(
    /// Vertex array / vertex format object tying a layout to its buffers.
    VertexFormatId,
    "vertex format"
);
handle!(
    /// Linked shader program.
    ProgramId,
    "program"
);
handle!(
    /// Sampled 2D texture.
    TextureId,
    "texture"
);
handle!(
    /// Fence (sync object) inserted into the command stream.
    FenceId,
    "fence"
);

/// Uniform slot of a program, as resolved by `uniform_location`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct UniformLocation {
    pub program: ProgramId,
    pub index: u32,
}

/// Topology of a draw call.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
    /// Four vertices per primitive, wound around the quad.
    Quads,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// How a buffer's storage is allocated.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BufferStorage {
    /// Updated through `upload`.
    Dynamic,
    /// Immutable storage that stays mapped coherent for its whole lifetime.
    Persistent,
}

#[derive(Debug, Clone)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub kind: BufferKind,
    pub storage: BufferStorage,
    pub size: usize,
    /// Initial contents; must be at most `size` bytes.
    pub contents: Option<&'a [u8]>,
}

/// Exclusive CPU mapping of a persistently mapped buffer.
///
/// Not `Clone`: the streamer that maps a buffer is its only writer, and the
/// mapping is consumed by `unmap`, so writes after unmapping cannot compile.
#[derive(Debug)]
pub struct PersistentMapping {
    buffer: BufferId,
    len: usize,
}

impl PersistentMapping {
    /// Backends call this from `map_persistent`.
    pub fn new(buffer: BufferId, len: usize) -> Self {
        Self { buffer, len }
    }

    #[inline]
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Clone)]
pub struct VertexFormatDesc {
    pub layout: VertexLayout,
    pub vertex_buffer: BufferId,
    /// Static `u16` index buffer, when indexed.
    pub index_buffer: Option<BufferId>,
    /// Program whose attribute inputs the format is resolved against.
    pub program: ProgramId,
}

/// Shader code a backend builds a program from.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramSource {
    /// Textured, tinted 2D quads: `a_position`, `a_textureCoord0`, `a_color`.
    TexturedQuad,
    /// Backend-native shader source (WGSL for the wgpu backend).
    Native(String),
}

#[derive(Debug, Clone)]
pub struct ProgramDesc<'a> {
    pub label: &'a str,
    pub source: ProgramSource,
    /// Uniform names in declaration order; locations index into this list.
    pub uniforms: &'a [&'a str],
}

#[derive(Debug, Clone)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8 rows.
    pub rgba8: &'a [u8],
}

/// Fixed-function switches driven by render states.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Toggle {
    Blend,
    DepthTest,
    CullFace,
    PointSprite,
    ProgramPointSize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    SrcAlphaSaturate,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DepthFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CullFace {
    Front,
    Back,
}
