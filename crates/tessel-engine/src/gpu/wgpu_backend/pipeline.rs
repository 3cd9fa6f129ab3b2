//! GL-style fixed-function state folded into cached wgpu pipelines.

use std::collections::HashMap;

use crate::error::{RenderError, Result};
use crate::gpu::{
    BlendFactor, BlendOp, ComponentType, CullFace, DepthFunction, PrimitiveKind, ProgramId,
    VertexAttribute, VertexFormatId, VertexLayout,
};

use super::init::DEPTH_FORMAT;

/// Fixed-function state as last set through the backend, GL defaults initially.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(super) struct FixedState {
    pub blend: bool,
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub alpha_src: BlendFactor,
    pub alpha_dst: BlendFactor,
    pub color_op: BlendOp,
    pub alpha_op: BlendOp,
    pub depth_test: bool,
    pub depth_func: DepthFunction,
    pub depth_write: bool,
    pub cull: bool,
    pub cull_face: CullFace,
}

impl Default for FixedState {
    fn default() -> Self {
        Self {
            blend: false,
            src: BlendFactor::One,
            dst: BlendFactor::Zero,
            alpha_src: BlendFactor::One,
            alpha_dst: BlendFactor::Zero,
            color_op: BlendOp::Add,
            alpha_op: BlendOp::Add,
            depth_test: false,
            depth_func: DepthFunction::Less,
            depth_write: true,
            cull: false,
            cull_face: CullFace::Back,
        }
    }
}

impl FixedState {
    fn blend_state(&self) -> Option<wgpu::BlendState> {
        if !self.blend {
            return None;
        }
        Some(wgpu::BlendState {
            color: blend_component(self.src, self.dst, self.color_op),
            alpha: blend_component(self.alpha_src, self.alpha_dst, self.alpha_op),
        })
    }

    fn depth_stencil(&self) -> wgpu::DepthStencilState {
        // A disabled depth test neither rejects fragments nor writes depth.
        wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: self.depth_test && self.depth_write,
            depth_compare: if self.depth_test {
                compare_function(self.depth_func)
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }
    }

    fn cull_mode(&self) -> Option<wgpu::Face> {
        self.cull.then(|| match self.cull_face {
            CullFace::Front => wgpu::Face::Front,
            CullFace::Back => wgpu::Face::Back,
        })
    }
}

fn blend_component(src: BlendFactor, dst: BlendFactor, op: BlendOp) -> wgpu::BlendComponent {
    // wgpu requires One/One for min/max; GL ignores the factors there.
    let (src, dst) = match op {
        BlendOp::Min | BlendOp::Max => (BlendFactor::One, BlendFactor::One),
        _ => (src, dst),
    };
    wgpu::BlendComponent {
        src_factor: blend_factor(src),
        dst_factor: blend_factor(dst),
        operation: match op {
            BlendOp::Add => wgpu::BlendOperation::Add,
            BlendOp::Subtract => wgpu::BlendOperation::Subtract,
            BlendOp::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
            BlendOp::Min => wgpu::BlendOperation::Min,
            BlendOp::Max => wgpu::BlendOperation::Max,
        },
    }
}

fn blend_factor(f: BlendFactor) -> wgpu::BlendFactor {
    match f {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcColor => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        BlendFactor::SrcAlphaSaturate => wgpu::BlendFactor::SrcAlphaSaturated,
    }
}

fn compare_function(f: DepthFunction) -> wgpu::CompareFunction {
    match f {
        DepthFunction::Never => wgpu::CompareFunction::Never,
        DepthFunction::Less => wgpu::CompareFunction::Less,
        DepthFunction::Equal => wgpu::CompareFunction::Equal,
        DepthFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        DepthFunction::Greater => wgpu::CompareFunction::Greater,
        DepthFunction::NotEqual => wgpu::CompareFunction::NotEqual,
        DepthFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        DepthFunction::Always => wgpu::CompareFunction::Always,
    }
}

pub(super) fn topology(kind: PrimitiveKind) -> wgpu::PrimitiveTopology {
    match kind {
        PrimitiveKind::Points => wgpu::PrimitiveTopology::PointList,
        PrimitiveKind::Lines => wgpu::PrimitiveTopology::LineList,
        PrimitiveKind::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveKind::Triangles => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveKind::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        // Quads are expanded through the quad index buffer.
        PrimitiveKind::Quads => wgpu::PrimitiveTopology::TriangleList,
    }
}

fn vertex_format(a: &VertexAttribute) -> Result<wgpu::VertexFormat> {
    use wgpu::VertexFormat as F;
    let format = match (a.component_type, a.component_count, a.normalized) {
        (ComponentType::F32, 1, _) => Some(F::Float32),
        (ComponentType::F32, 2, _) => Some(F::Float32x2),
        (ComponentType::F32, 3, _) => Some(F::Float32x3),
        (ComponentType::F32, 4, _) => Some(F::Float32x4),
        (ComponentType::U8, 4, true) => Some(F::Unorm8x4),
        (ComponentType::U8, 4, false) => Some(F::Uint8x4),
        (ComponentType::I8, 4, true) => Some(F::Snorm8x4),
        (ComponentType::I8, 4, false) => Some(F::Sint8x4),
        (ComponentType::U16, 2, true) => Some(F::Unorm16x2),
        (ComponentType::U16, 2, false) => Some(F::Uint16x2),
        (ComponentType::U16, 4, true) => Some(F::Unorm16x4),
        (ComponentType::U16, 4, false) => Some(F::Uint16x4),
        (ComponentType::I16, 2, true) => Some(F::Snorm16x2),
        (ComponentType::I16, 2, false) => Some(F::Sint16x2),
        (ComponentType::I16, 4, true) => Some(F::Snorm16x4),
        (ComponentType::I16, 4, false) => Some(F::Sint16x4),
        (ComponentType::U32, 1, _) => Some(F::Uint32),
        (ComponentType::U32, 2, _) => Some(F::Uint32x2),
        (ComponentType::U32, 3, _) => Some(F::Uint32x3),
        (ComponentType::U32, 4, _) => Some(F::Uint32x4),
        (ComponentType::I32, 1, _) => Some(F::Sint32),
        (ComponentType::I32, 2, _) => Some(F::Sint32x2),
        (ComponentType::I32, 3, _) => Some(F::Sint32x3),
        (ComponentType::I32, 4, _) => Some(F::Sint32x4),
        _ => None,
    };
    format.ok_or_else(|| RenderError::UnsupportedVertexFormat {
        attribute: a.name(),
        components: a.component_count,
        component_type: a.component_type.name(),
    })
}

/// Shader locations follow declaration order in the layout.
pub(super) fn vertex_attributes(layout: &VertexLayout) -> Result<Vec<wgpu::VertexAttribute>> {
    layout
        .attributes()
        .iter()
        .enumerate()
        .map(|(location, a)| {
            Ok(wgpu::VertexAttribute {
                format: vertex_format(a)?,
                offset: a.offset as u64,
                shader_location: location as u32,
            })
        })
        .collect()
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(super) struct PipelineKey {
    pub program: ProgramId,
    pub format: VertexFormatId,
    pub kind: PrimitiveKind,
    pub state: FixedState,
}

/// Everything a pipeline is built from besides its key.
pub(super) struct PipelineInputs<'a> {
    pub module: &'a wgpu::ShaderModule,
    pub stride: usize,
    pub attributes: &'a [wgpu::VertexAttribute],
    pub target_format: wgpu::TextureFormat,
}

/// Render pipelines keyed by everything wgpu bakes into them.
pub(super) struct PipelineCache {
    bind_group_layout: wgpu::BindGroupLayout,
    layout: wgpu::PipelineLayout,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl PipelineCache {
    pub fn new(device: &wgpu::Device) -> Self {
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tessel bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(64),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("tessel pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        Self {
            bind_group_layout,
            layout,
            pipelines: HashMap::new(),
        }
    }

    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Drops pipelines built against a deleted program or vertex format.
    pub fn forget(&mut self, pred: impl Fn(&PipelineKey) -> bool) {
        self.pipelines.retain(|k, _| !pred(k));
    }

    pub fn get_or_create(
        &mut self,
        device: &wgpu::Device,
        key: PipelineKey,
        inputs: PipelineInputs<'_>,
    ) -> &wgpu::RenderPipeline {
        let layout = &self.layout;
        self.pipelines.entry(key).or_insert_with(|| {
            log::debug!("creating pipeline for {:?} / {:?}", key.program, key.kind);
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("tessel pipeline"),
                layout: Some(layout),

                vertex: wgpu::VertexState {
                    module: inputs.module,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: inputs.stride as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: inputs.attributes,
                    }],
                },

                fragment: Some(wgpu::FragmentState {
                    module: inputs.module,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: inputs.target_format,
                        blend: key.state.blend_state(),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),

                primitive: wgpu::PrimitiveState {
                    topology: topology(key.kind),
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: key.state.cull_mode(),
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },

                depth_stencil: Some(key.state.depth_stencil()),
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
        })
    }
}

/// `u32` indices expanding `quads` quads into two triangles each.
pub(super) fn quad_indices(quads: u32) -> Vec<u32> {
    (0..quads)
        .flat_map(|q| {
            let b = q * 4;
            [b, b + 1, b + 2, b, b + 2, b + 3]
        })
        .collect()
}
