//! Mip chain generation.
//!
//! Each level is produced by drawing a fullscreen triangle that samples the
//! previous level with a linear filter. Cube and array textures are handled
//! layer by layer.

use std::borrow::Cow;

use rustc_hash::FxHashMap;

const BLIT_WGSL: &str = r"
struct Varyings {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) vertex: u32) -> Varyings {
    // Oversized triangle covering the viewport.
    let uv = vec2<f32>(f32((vertex << 1u) & 2u), f32(vertex & 2u));
    return Varyings(vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0), uv);
}

@group(0) @binding(0) var src_level: texture_2d<f32>;
@group(0) @binding(1) var src_sampler: sampler;

@fragment
fn fs_main(v: Varyings) -> @location(0) vec4<f32> {
    return textureSample(src_level, src_sampler, v.uv);
}
";

pub struct MipmapGenerator {
    module: wgpu::ShaderModule,
    group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    linear: wgpu::Sampler,
    by_format: FxHashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
}

impl MipmapGenerator {
    #[must_use]
    pub fn new(device: &wgpu::Device) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("kiln mip blit"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(BLIT_WGSL)),
        });

        let fragment_entry = |binding, ty| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty,
            count: None,
        };
        let group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("kiln mip source"),
            entries: &[
                fragment_entry(
                    0,
                    wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                ),
                fragment_entry(1, wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("kiln mip blit"),
            bind_group_layouts: &[Some(&group_layout)],
            immediate_size: 0,
        });

        let linear = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("kiln mip source"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            module,
            group_layout,
            pipeline_layout,
            linear,
            by_format: FxHashMap::default(),
        }
    }

    /// Formats a filtered blit can downsample.
    #[must_use]
    pub fn supports(format: wgpu::TextureFormat) -> bool {
        use wgpu::TextureFormat as F;
        !matches!(format, F::Rgba32Float | F::R32Float | F::Depth24Plus | F::Depth24PlusStencil8)
    }

    fn pipeline_for(&mut self, device: &wgpu::Device, format: wgpu::TextureFormat) -> wgpu::RenderPipeline {
        let (module, layout) = (&self.module, &self.pipeline_layout);
        self.by_format
            .entry(format)
            .or_insert_with(|| {
                log::debug!("Creating mip blit pipeline for {format:?}");
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("kiln mip blit"),
                    layout: Some(layout),
                    vertex: wgpu::VertexState {
                        module,
                        entry_point: Some("vs_main"),
                        buffers: &[],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module,
                        entry_point: Some("fs_main"),
                        targets: &[Some(format.into())],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview_mask: None,
                    cache: None,
                })
            })
            .clone()
    }

    /// Records draws filling levels `1..` of every layer from level 0.
    pub fn generate(&mut self, device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder, texture: &wgpu::Texture) {
        let levels = texture.mip_level_count();
        if levels < 2 {
            return;
        }
        if !Self::supports(texture.format()) {
            log::debug!("No mip blit for {:?}; upper levels keep their contents", texture.format());
            return;
        }

        let pipeline = self.pipeline_for(device, texture.format());
        for layer in 0..texture.depth_or_array_layers() {
            for level in 1..levels {
                let source = level_view(texture, level - 1, layer, wgpu::TextureUsages::TEXTURE_BINDING);
                let target = level_view(texture, level, layer, wgpu::TextureUsages::RENDER_ATTACHMENT);
                let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: None,
                    layout: &self.group_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&source),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(&self.linear),
                        },
                    ],
                });
                blit(encoder, &pipeline, &group, &target);
            }
        }
    }
}

fn level_view(texture: &wgpu::Texture, level: u32, layer: u32, usage: wgpu::TextureUsages) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        dimension: Some(wgpu::TextureViewDimension::D2),
        base_mip_level: level,
        mip_level_count: Some(1),
        base_array_layer: layer,
        array_layer_count: Some(1),
        usage: Some(usage),
        ..Default::default()
    })
}

fn blit(encoder: &mut wgpu::CommandEncoder, pipeline: &wgpu::RenderPipeline, source: &wgpu::BindGroup, target: &wgpu::TextureView) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("kiln mip level"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target,
            resolve_target: None,
            ops: wgpu::Operations::default(),
            depth_slice: None,
        })],
        ..Default::default()
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, source, &[]);
    pass.draw(0..3, 0..1);
}
