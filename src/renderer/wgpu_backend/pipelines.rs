//! Render pipeline cache.
//!
//! The device exposes immediate-style state; wgpu bakes that state into
//! immutable pipelines. Every distinct combination of program, fixed-function
//! state, vertex layout and attachment formats maps to one cached pipeline.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::convert;
use crate::renderer::device::{ProgramHandle, RenderState, StepMode, VertexFormat};
use crate::scene::Topology;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexKey {
    pub location: u32,
    pub format: VertexFormat,
    pub stride: u32,
    pub step: StepMode,
}

/// Attachments of the pass a pipeline draws into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub color: Option<wgpu::TextureFormat>,
    pub depth: Option<wgpu::TextureFormat>,
    pub samples: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub program: ProgramHandle,
    pub state: RenderState,
    pub topology: Topology,
    pub vertex: SmallVec<[VertexKey; 8]>,
    pub target: TargetKey,
}

/// What a program contributes to pipeline creation.
pub struct ProgramModule<'a> {
    pub label: &'a str,
    pub module: &'a wgpu::ShaderModule,
    pub layout: &'a wgpu::PipelineLayout,
}

#[derive(Default)]
pub struct PipelineCache {
    pipelines: FxHashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl PipelineCache {
    pub fn get_or_create(
        &mut self,
        device: &wgpu::Device,
        key: &PipelineKey,
        program: &ProgramModule<'_>,
    ) -> wgpu::RenderPipeline {
        if let Some(pipeline) = self.pipelines.get(key) {
            return pipeline.clone();
        }
        log::debug!("Creating pipeline for '{}' ({} cached)", program.label, self.pipelines.len());
        let pipeline = create_pipeline(device, key, program);
        self.pipelines.insert(key.clone(), pipeline.clone());
        pipeline
    }

    /// Drops every pipeline built from `program`.
    pub fn evict_program(&mut self, program: ProgramHandle) {
        self.pipelines.retain(|key, _| key.program != program);
    }

    pub fn clear(&mut self) {
        self.pipelines.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

/// Float32 color formats cannot blend without an extra device feature.
fn blendable(format: wgpu::TextureFormat) -> bool {
    !matches!(format, wgpu::TextureFormat::Rgba32Float | wgpu::TextureFormat::R32Float)
}

fn create_pipeline(device: &wgpu::Device, key: &PipelineKey, program: &ProgramModule<'_>) -> wgpu::RenderPipeline {
    let attributes: SmallVec<[[wgpu::VertexAttribute; 1]; 8]> = key
        .vertex
        .iter()
        .map(|vertex| {
            [wgpu::VertexAttribute {
                format: convert::vertex_format(vertex.format),
                offset: 0,
                shader_location: vertex.location,
            }]
        })
        .collect();
    let buffers: SmallVec<[wgpu::VertexBufferLayout<'_>; 8]> = key
        .vertex
        .iter()
        .zip(attributes.iter())
        .map(|(vertex, attribute)| wgpu::VertexBufferLayout {
            array_stride: u64::from(vertex.stride),
            step_mode: convert::step_mode(vertex.step),
            attributes: attribute,
        })
        .collect();

    let state = &key.state;
    let targets: SmallVec<[Option<wgpu::ColorTargetState>; 1]> = key
        .target
        .color
        .map(|format| wgpu::ColorTargetState {
            format,
            blend: if blendable(format) {
                convert::blend_state(state.blending, state.premultiplied_alpha)
            } else {
                None
            },
            write_mask: if state.color_write {
                wgpu::ColorWrites::ALL
            } else {
                wgpu::ColorWrites::empty()
            },
        })
        .into_iter()
        .map(Some)
        .collect();

    let depth_stencil = key.target.depth.map(|format| wgpu::DepthStencilState {
        format,
        depth_write_enabled: Some(state.depth_test && state.depth_write),
        depth_compare: Some(if state.depth_test {
            convert::compare_function(state.depth_func)
        } else {
            wgpu::CompareFunction::Always
        }),
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(program.label),
        layout: Some(program.layout),
        vertex: wgpu::VertexState {
            module: program.module,
            entry_point: Some("vs_main"),
            buffers: &buffers,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: program.module,
            entry_point: Some("fs_main"),
            targets: &targets,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: convert::primitive_state(key.topology, state),
        depth_stencil,
        multisample: wgpu::MultisampleState {
            count: key.target.samples.max(1),
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview_mask: None,
        cache: None,
    })
}
