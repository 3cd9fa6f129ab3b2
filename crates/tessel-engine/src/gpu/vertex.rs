use std::fmt;

/// Scalar type of one vertex attribute component.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ComponentType {
    F32,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
}

impl ComponentType {
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            ComponentType::U8 | ComponentType::I8 => 1,
            ComponentType::U16 | ComponentType::I16 => 2,
            ComponentType::F32 | ComponentType::U32 | ComponentType::I32 => 4,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ComponentType::F32 => "f32",
            ComponentType::U8 => "u8",
            ComponentType::I8 => "i8",
            ComponentType::U16 => "u16",
            ComponentType::I16 => "i16",
            ComponentType::U32 => "u32",
            ComponentType::I32 => "i32",
        }
    }
}

/// What an attribute means to the shader.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AttributeSemantic {
    Position,
    Normal,
    Color,
    TexCoord(u8),
    Custom(&'static str),
}

impl fmt::Display for AttributeSemantic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeSemantic::Position => f.write_str("a_position"),
            AttributeSemantic::Normal => f.write_str("a_normal"),
            AttributeSemantic::Color => f.write_str("a_color"),
            AttributeSemantic::TexCoord(i) => write!(f, "a_textureCoord{i}"),
            AttributeSemantic::Custom(name) => f.write_str(name),
        }
    }
}

/// One attribute of a vertex. `offset` is assigned by [`VertexLayout::new`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub semantic: AttributeSemantic,
    pub component_type: ComponentType,
    pub component_count: u8,
    /// Integer components are normalized to `[0, 1]` / `[-1, 1]` when read.
    pub normalized: bool,
    pub offset: usize,
}

impl VertexAttribute {
    pub const fn new(
        semantic: AttributeSemantic,
        component_type: ComponentType,
        component_count: u8,
        normalized: bool,
    ) -> Self {
        Self {
            semantic,
            component_type,
            component_count,
            normalized,
            offset: 0,
        }
    }

    pub const fn position_2d() -> Self {
        Self::new(AttributeSemantic::Position, ComponentType::F32, 2, false)
    }

    pub const fn position_3d() -> Self {
        Self::new(AttributeSemantic::Position, ComponentType::F32, 3, false)
    }

    pub const fn tex_coord(index: u8) -> Self {
        Self::new(AttributeSemantic::TexCoord(index), ComponentType::F32, 2, false)
    }

    /// Four-byte RGBA color.
    pub const fn color(normalized: bool) -> Self {
        Self::new(AttributeSemantic::Color, ComponentType::U8, 4, normalized)
    }

    #[inline]
    pub const fn size(&self) -> usize {
        self.component_type.size() * self.component_count as usize
    }

    pub fn name(&self) -> String {
        self.semantic.to_string()
    }
}

/// Attribute layout of one vertex.
///
/// Offsets are packed in declaration order and the stride is their sum. A
/// layout is immutable once built; every primitive streamed through one
/// streamer shares it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    attributes: Vec<VertexAttribute>,
    stride: usize,
}

impl VertexLayout {
    pub fn new(attributes: impl IntoIterator<Item = VertexAttribute>) -> Self {
        let mut stride = 0;
        let attributes = attributes
            .into_iter()
            .map(|mut a| {
                a.offset = stride;
                stride += a.size();
                a
            })
            .collect();
        Self { attributes, stride }
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    pub fn attribute(&self, semantic: AttributeSemantic) -> Option<&VertexAttribute> {
        self.attributes.iter().find(|a| a.semantic == semantic)
    }
}
