//! wgpu implementation of [`GpuDevice`].
//!
//! wgpu records work into command encoders and bakes fixed-function state
//! into pipelines, while the device contract is immediate: bound state stays
//! in effect and draws are issued one by one. The bridge:
//!
//! - Each draw between `begin_pass` and `end_pass` is captured as a packet
//!   holding its pipeline, bind groups and buffers. `end_pass` encodes all
//!   packets into one render pass and submits it.
//! - Uniform values are kept per program on the CPU. A draw copies the bound
//!   program's block into the pass's uniform arena, bound at group 0 with a
//!   dynamic offset.
//! - Texture slot `k` is `@group(1) @binding(2k)` with its sampler at
//!   `@binding(2k + 1)`.
//! - Pipelines are cached by program, render state, vertex layout and the
//!   pass's attachment formats.

mod convert;
mod mipmap;
mod pipelines;

use std::borrow::Cow;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;

pub use convert::{device_format, texture_format};

use self::mipmap::MipmapGenerator;
use self::pipelines::{PipelineCache, PipelineKey, ProgramModule, TargetKey, VertexKey};
use crate::errors::{KilnError, Result};
use crate::renderer::device::{
    BufferDescriptor, BufferHandle, BufferUsage, DeviceCapabilities, DeviceFormat, DrawCall, FramebufferDescriptor,
    FramebufferHandle, GpuDevice, IndexFormat, PassDescriptor, ProgramDescriptor, ProgramHandle, ProgramLayout,
    RenderState, SamplerState, TextureDescriptor, TextureDimension, TextureHandle, VertexBinding, Viewport,
};
use crate::resources::UniformValue;

const SCREEN_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;
const HEADLESS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const INITIAL_ARENA_SIZE: u64 = 64 * 1024;

struct GpuBuffer {
    buffer: wgpu::Buffer,
    /// CPU copy used to widen partial writes to the 4-byte copy alignment.
    shadow: Vec<u8>,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    dimension: TextureDimension,
    sampler: wgpu::Sampler,
}

struct GpuProgram {
    label: String,
    module: wgpu::ShaderModule,
    layout: ProgramLayout,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: Option<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,
    uniforms: Vec<u8>,
}

/// Default framebuffer: a configured surface or an offscreen color texture.
struct Screen {
    surface: Option<(wgpu::Surface<'static>, wgpu::SurfaceConfiguration)>,
    frame: Option<wgpu::SurfaceTexture>,
    color: Option<wgpu::Texture>,
    depth: wgpu::Texture,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

impl Screen {
    fn headless(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        Self {
            surface: None,
            frame: None,
            color: Some(offscreen_color(device, width, height)),
            depth: screen_depth(device, width, height),
            format: HEADLESS_FORMAT,
            width,
            height,
        }
    }

    fn windowed(device: &wgpu::Device, surface: wgpu::Surface<'static>, config: wgpu::SurfaceConfiguration) -> Self {
        surface.configure(device, &config);
        Self {
            frame: None,
            color: None,
            depth: screen_depth(device, config.width, config.height),
            format: config.format,
            width: config.width,
            height: config.height,
            surface: Some((surface, config)),
        }
    }

    fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if width == 0 || height == 0 || (width == self.width && height == self.height) {
            return;
        }
        self.width = width;
        self.height = height;
        self.frame = None;
        if let Some((surface, config)) = &mut self.surface {
            config.width = width;
            config.height = height;
            surface.configure(device, config);
        }
        if self.color.is_some() {
            self.color = Some(offscreen_color(device, width, height));
        }
        self.depth = screen_depth(device, width, height);
    }

    /// View of the current color image, acquiring a surface frame if needed.
    fn color_view(&mut self, device: &wgpu::Device) -> Option<wgpu::TextureView> {
        if let Some(texture) = &self.color {
            return Some(texture.create_view(&wgpu::TextureViewDescriptor::default()));
        }
        let (surface, config) = self.surface.as_ref()?;
        if self.frame.is_none() {
            let frame = match surface.get_current_texture() {
                wgpu::CurrentSurfaceTexture::Success(frame)
                | wgpu::CurrentSurfaceTexture::Suboptimal(frame) => frame,
                wgpu::CurrentSurfaceTexture::Lost | wgpu::CurrentSurfaceTexture::Outdated => {
                    surface.configure(device, config);
                    match surface.get_current_texture() {
                        wgpu::CurrentSurfaceTexture::Success(frame)
                        | wgpu::CurrentSurfaceTexture::Suboptimal(frame) => frame,
                        err => {
                            log::warn!("Surface frame unavailable after reconfigure: {err:?}");
                            return None;
                        }
                    }
                }
                err => {
                    log::warn!("Surface frame unavailable: {err:?}");
                    return None;
                }
            };
            self.frame = Some(frame);
        }
        self.frame
            .as_ref()
            .map(|frame| frame.texture.create_view(&wgpu::TextureViewDescriptor::default()))
    }
}

fn offscreen_color(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Offscreen Color"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: HEADLESS_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

fn screen_depth(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Screen Depth"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SCREEN_DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    })
}

/// Single-layer, single-level view for use as an attachment.
fn layer_view(texture: &wgpu::Texture, layer: u32) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some("Attachment View"),
        dimension: Some(wgpu::TextureViewDimension::D2),
        base_mip_level: 0,
        mip_level_count: Some(1),
        base_array_layer: layer,
        array_layer_count: Some(1),
        ..Default::default()
    })
}

struct DrawPacket {
    pipeline: wgpu::RenderPipeline,
    program: ProgramHandle,
    uniform_offset: u32,
    textures: Option<wgpu::BindGroup>,
    vertex_buffers: SmallVec<[(wgpu::Buffer, u64); 8]>,
    index: Option<(wgpu::Buffer, wgpu::IndexFormat)>,
    call: DrawCall,
}

struct PassRecording {
    label: String,
    color: Option<wgpu::TextureView>,
    depth: Option<(wgpu::TextureView, wgpu::TextureFormat)>,
    target: TargetKey,
    size: (u32, u32),
    clear_color: Option<[f32; 4]>,
    clear_depth: Option<f32>,
    clear_stencil: Option<u32>,
    viewport: Option<Viewport>,
    uniforms: Vec<u8>,
    draws: Vec<DrawPacket>,
}

type TextureGroupKey = (ProgramHandle, SmallVec<[TextureHandle; 8]>);

/// [`GpuDevice`] on a wgpu device and queue.
pub struct WgpuDevice {
    instance: wgpu::Instance,
    device: wgpu::Device,
    queue: wgpu::Queue,
    lost: Arc<AtomicBool>,
    capabilities: DeviceCapabilities,
    uniform_alignment: usize,

    screen: Screen,
    buffers: SlotMap<BufferHandle, GpuBuffer>,
    textures: SlotMap<TextureHandle, GpuTexture>,
    framebuffers: SlotMap<FramebufferHandle, FramebufferDescriptor>,
    programs: SlotMap<ProgramHandle, GpuProgram>,

    samplers: FxHashMap<SamplerState, wgpu::Sampler>,
    texture_groups: FxHashMap<TextureGroupKey, wgpu::BindGroup>,
    pipelines: PipelineCache,
    mipmaps: MipmapGenerator,
    uniform_arena: wgpu::Buffer,

    // Immediate state
    state: RenderState,
    program: Option<ProgramHandle>,
    texture_units: SmallVec<[Option<TextureHandle>; 16]>,
    vertex_buffers: FxHashMap<u32, (BufferHandle, VertexBinding)>,
    index_buffer: Option<(BufferHandle, IndexFormat)>,
    pass: Option<PassRecording>,
}

async fn request_adapter(instance: &wgpu::Instance, surface: Option<&wgpu::Surface<'_>>) -> Result<wgpu::Adapter> {
    instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| KilnError::AdapterRequestFailed(e.to_string()))
}

async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
    let info = adapter.get_info();
    log::info!("Using adapter '{}' ({:?})", info.name, info.backend);
    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some("Kiln Device"),
            required_features: adapter.features() & wgpu::Features::FLOAT32_FILTERABLE,
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await?;
    device.on_uncaptured_error(Arc::new(|error: wgpu::Error| {
        log::error!("wgpu: {error}");
    }));
    Ok((device, queue))
}

fn watch_device_loss(device: &wgpu::Device) -> Arc<AtomicBool> {
    let lost = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&lost);
    device.set_device_lost_callback(move |reason, message| {
        log::error!("GPU device lost ({reason:?}): {message}");
        flag.store(true, Ordering::Release);
    });
    lost
}

fn capabilities(device: &wgpu::Device) -> DeviceCapabilities {
    let limits = device.limits();
    DeviceCapabilities {
        max_texture_size: limits.max_texture_dimension_2d,
        max_samples: 4,
        // Every attribute is fed from its own vertex buffer slot.
        max_vertex_attributes: limits.max_vertex_attributes.min(limits.max_vertex_buffers),
        max_texture_units: limits
            .max_sampled_textures_per_shader_stage
            .min(limits.max_samplers_per_shader_stage),
        npot_mipmaps: true,
        multisample_resolve: true,
        float_textures: true,
        float_filterable: device.features().contains(wgpu::Features::FLOAT32_FILTERABLE),
        float_render_targets: true,
    }
}

fn uniform_arena(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Uniform Arena"),
        size,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

impl WgpuDevice {
    /// Device rendering into an offscreen `width × height` color texture.
    pub async fn headless(width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = request_adapter(&instance, None).await?;
        let (device, queue) = request_device(&adapter).await?;
        let screen = Screen::headless(&device, width, height);
        Ok(Self::from_parts(instance, device, queue, screen))
    }

    /// Device presenting to a window surface.
    pub async fn with_surface(
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(target)
            .map_err(|e| KilnError::AdapterRequestFailed(e.to_string()))?;
        let adapter = request_adapter(&instance, Some(&surface)).await?;
        let (device, queue) = request_device(&adapter).await?;

        let mut config = surface
            .get_default_config(&adapter, width.max(1), height.max(1))
            .ok_or_else(|| KilnError::AdapterRequestFailed("Surface not supported by adapter".to_string()))?;
        config.present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };
        let screen = Screen::windowed(&device, surface, config);
        Ok(Self::from_parts(instance, device, queue, screen))
    }

    fn from_parts(instance: wgpu::Instance, device: wgpu::Device, queue: wgpu::Queue, screen: Screen) -> Self {
        let lost = watch_device_loss(&device);
        let capabilities = capabilities(&device);
        let uniform_alignment = device.limits().min_uniform_buffer_offset_alignment as usize;
        let mipmaps = MipmapGenerator::new(&device);
        let uniform_arena = uniform_arena(&device, INITIAL_ARENA_SIZE);
        Self {
            instance,
            device,
            queue,
            lost,
            capabilities,
            uniform_alignment,
            screen,
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            samplers: FxHashMap::default(),
            texture_groups: FxHashMap::default(),
            pipelines: PipelineCache::default(),
            mipmaps,
            uniform_arena,
            state: RenderState::default(),
            program: None,
            texture_units: SmallVec::new(),
            vertex_buffers: FxHashMap::default(),
            index_buffer: None,
            pass: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn wgpu_device(&self) -> &wgpu::Device {
        &self.device
    }

    #[inline]
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Number of pipelines built so far.
    #[must_use]
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Destroys the device. [`GpuDevice::is_context_lost`] reports `true`
    /// until [`restore`](Self::restore) succeeds.
    pub fn lose_context(&self) {
        self.lost.store(true, Ordering::Release);
        self.device.destroy();
    }

    /// Replaces a lost device with a fresh one. Every handle issued before
    /// is invalid afterwards.
    pub async fn restore(&mut self) -> Result<()> {
        let surface = self.screen.surface.as_ref().map(|(surface, _)| surface);
        let adapter = request_adapter(&self.instance, surface).await?;
        let (device, queue) = request_device(&adapter).await?;

        self.lost = watch_device_loss(&device);
        self.capabilities = capabilities(&device);
        self.uniform_alignment = device.limits().min_uniform_buffer_offset_alignment as usize;
        self.mipmaps = MipmapGenerator::new(&device);
        self.uniform_arena = uniform_arena(&device, INITIAL_ARENA_SIZE);

        self.screen.frame = None;
        if let Some((surface, config)) = &self.screen.surface {
            surface.configure(&device, config);
        }
        if self.screen.color.is_some() {
            self.screen.color = Some(offscreen_color(&device, self.screen.width, self.screen.height));
        }
        self.screen.depth = screen_depth(&device, self.screen.width, self.screen.height);

        self.buffers.clear();
        self.textures.clear();
        self.framebuffers.clear();
        self.programs.clear();
        self.samplers.clear();
        self.texture_groups.clear();
        self.pipelines.clear();
        self.reset_bindings();
        self.pass = None;

        self.device = device;
        self.queue = queue;
        log::info!("GPU device restored");
        Ok(())
    }

    fn reset_bindings(&mut self) {
        self.state = RenderState::default();
        self.program = None;
        self.texture_units.clear();
        self.vertex_buffers.clear();
        self.index_buffer = None;
    }

    /// Reads back the offscreen color image as tightly packed RGBA8 rows.
    pub fn read_pixels(&self) -> Result<Vec<u8>> {
        let texture = self
            .screen
            .color
            .as_ref()
            .ok_or_else(|| KilnError::UnsupportedCapability("read_pixels requires a headless device".into()))?;
        self.read_layer(texture, 0)
    }

    /// Reads back mip level 0 of one layer of a texture.
    pub fn read_texture(&self, texture: TextureHandle, layer: u32) -> Result<Vec<u8>> {
        let texture = self.textures.get(texture).ok_or_else(|| KilnError::ResourceCreation {
            kind: "readback",
            reason: "unknown texture".into(),
        })?;
        self.read_layer(&texture.texture, layer)
    }

    fn read_layer(&self, texture: &wgpu::Texture, layer: u32) -> Result<Vec<u8>> {
        let readback_error = |reason: String| KilnError::ResourceCreation { kind: "readback", reason };
        if texture.sample_count() > 1 {
            return Err(readback_error("multisampled textures cannot be copied".into()));
        }
        let format = texture.format();
        let block = format
            .block_copy_size(None)
            .ok_or_else(|| KilnError::UnsupportedFormat(format!("{format:?}")))?;
        let (width, height) = (texture.width(), texture.height());
        let unpadded = width * block;
        let padded = unpadded.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: u64::from(padded) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = flume::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| readback_error(e.to_string()))?;
        rx.recv()
            .map_err(|e| readback_error(e.to_string()))?
            .map_err(|e| readback_error(e.to_string()))?;

        let mut pixels = Vec::with_capacity((unpadded * height) as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks(padded as usize) {
                pixels.extend_from_slice(&row[..unpadded as usize]);
            }
        }
        buffer.unmap();
        Ok(pixels)
    }

    fn sampler(&mut self, state: &SamplerState) -> wgpu::Sampler {
        self.samplers
            .entry(*state)
            .or_insert_with(|| self.device.create_sampler(&convert::sampler_descriptor(state)))
            .clone()
    }

    /// Color and depth attachments of `target`, plus their shared sample
    /// count and size.
    #[allow(clippy::type_complexity)]
    fn attachments(
        &mut self,
        target: Option<FramebufferHandle>,
    ) -> Option<(
        Option<(wgpu::TextureView, wgpu::TextureFormat)>,
        Option<(wgpu::TextureView, wgpu::TextureFormat)>,
        u32,
        (u32, u32),
    )> {
        let Some(handle) = target else {
            let color = self.screen.color_view(&self.device)?;
            let depth = self.screen.depth.create_view(&wgpu::TextureViewDescriptor::default());
            return Some((
                Some((color, self.screen.format)),
                Some((depth, SCREEN_DEPTH_FORMAT)),
                1,
                (self.screen.width, self.screen.height),
            ));
        };

        let desc = self.framebuffers.get(handle)?;
        let color = desc.color.and_then(|h| self.textures.get(h));
        let depth = desc.depth.and_then(|h| self.textures.get(h));
        let reference = color.or(depth)?;
        let samples = reference.texture.sample_count();
        let size = (reference.texture.width(), reference.texture.height());
        Some((
            color.map(|t| (layer_view(&t.texture, desc.color_layer), t.texture.format())),
            depth.map(|t| (layer_view(&t.texture, 0), t.texture.format())),
            samples,
            size,
        ))
    }

    fn texture_group(&mut self, handle: ProgramHandle) -> std::result::Result<Option<wgpu::BindGroup>, String> {
        let Some(program) = self.programs.get(handle) else {
            return Err("unknown program".into());
        };
        let Some(layout) = &program.texture_layout else {
            return Ok(None);
        };

        let mut units: SmallVec<[TextureHandle; 8]> = SmallVec::new();
        for (unit, slot) in program.layout.textures.iter().enumerate() {
            let texture = self
                .texture_units
                .get(unit)
                .copied()
                .flatten()
                .filter(|h| self.textures.contains_key(*h))
                .ok_or_else(|| format!("texture unit {unit} ('{}') is unbound", slot.name))?;
            if self.textures[texture].dimension != slot.dimension {
                return Err(format!("texture unit {unit} ('{}') has the wrong dimension", slot.name));
            }
            units.push(texture);
        }

        let key = (handle, units);
        if let Some(group) = self.texture_groups.get(&key) {
            return Ok(Some(group.clone()));
        }
        let mut entries = Vec::with_capacity(key.1.len() * 2);
        for (unit, texture) in key.1.iter().enumerate() {
            let texture = &self.textures[*texture];
            entries.push(wgpu::BindGroupEntry {
                binding: unit as u32 * 2,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: unit as u32 * 2 + 1,
                resource: wgpu::BindingResource::Sampler(&texture.sampler),
            });
        }
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&program.label),
            layout,
            entries: &entries,
        });
        self.texture_groups.insert(key, group.clone());
        Ok(Some(group))
    }
}

fn program_layouts(
    device: &wgpu::Device,
    label: &str,
    layout: &ProgramLayout,
) -> (wgpu::BindGroupLayout, Option<wgpu::BindGroupLayout>, wgpu::PipelineLayout) {
    let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: NonZeroU64::new(u64::from(layout.uniform_block_size)),
            },
            count: None,
        }],
    });

    let texture_layout = (!layout.textures.is_empty()).then(|| {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = layout
            .textures
            .iter()
            .enumerate()
            .flat_map(|(unit, slot)| {
                let binding = unit as u32 * 2;
                [
                    wgpu::BindGroupLayoutEntry {
                        binding,
                        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Float { filterable: true },
                            view_dimension: convert::view_dimension(slot.dimension),
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: binding + 1,
                        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                        count: None,
                    },
                ]
            })
            .collect();
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        })
    });

    let mut groups = vec![Some(&uniform_layout)];
    if let Some(layout) = &texture_layout {
        groups.push(Some(layout));
    }
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &groups,
        immediate_size: 0,
    });
    (uniform_layout, texture_layout, pipeline_layout)
}

/// Parses and validates WGSL, returning the formatted diagnostic on failure.
fn validate_wgsl(source: &str) -> std::result::Result<(), String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
    naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
        .validate(&module)
        .map_err(|e| e.emit_to_string(source))?;
    for entry in ["vs_main", "fs_main"] {
        if !module.entry_points.iter().any(|ep| ep.name == entry) {
            return Err(format!("entry point '{entry}' not found"));
        }
    }
    Ok(())
}

impl GpuDevice for WgpuDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn drawing_buffer_size(&self) -> (u32, u32) {
        (self.screen.width, self.screen.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.screen.resize(&self.device, width, height);
    }

    fn screen_format(&self) -> DeviceFormat {
        device_format(self.screen.format).unwrap_or(if self.screen.format.is_srgb() {
            DeviceFormat::Rgba8UnormSrgb
        } else {
            DeviceFormat::Rgba8Unorm
        })
    }

    fn is_context_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    // ── Buffers ─────────────────────────────────────────────────────────────

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle> {
        let size = (desc.contents.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT).max(4);
        if size > self.device.limits().max_buffer_size {
            return Err(KilnError::ResourceCreation {
                kind: "buffer",
                reason: format!("'{}' needs {size} bytes", desc.label),
            });
        }
        let usage = match desc.usage {
            BufferUsage::Vertex => wgpu::BufferUsages::VERTEX,
            BufferUsage::Index => wgpu::BufferUsages::INDEX,
        } | wgpu::BufferUsages::COPY_DST;

        let mut shadow = desc.contents.to_vec();
        shadow.resize(size as usize, 0);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size,
            usage,
            mapped_at_creation: false,
        });
        self.queue.write_buffer(&buffer, 0, &shadow);
        Ok(self.buffers.insert(GpuBuffer { buffer, shadow }))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(gpu) = self.buffers.get_mut(buffer) else {
            log::warn!("write_buffer on an unknown buffer");
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > gpu.shadow.len() {
            log::warn!("write_buffer past the end of '{:?}' ({end} > {})", buffer, gpu.shadow.len());
            return;
        }
        gpu.shadow[start..end].copy_from_slice(data);

        let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
        let aligned_start = start - start % align;
        let aligned_end = end.next_multiple_of(align).min(gpu.shadow.len());
        self.queue
            .write_buffer(&gpu.buffer, aligned_start as u64, &gpu.shadow[aligned_start..aligned_end]);
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(gpu) = self.buffers.remove(buffer) {
            gpu.buffer.destroy();
        }
        self.vertex_buffers.retain(|_, (bound, _)| *bound != buffer);
        if self.index_buffer.is_some_and(|(bound, _)| bound == buffer) {
            self.index_buffer = None;
        }
    }

    // ── Textures ────────────────────────────────────────────────────────────

    fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> Result<TextureHandle> {
        let max = self.capabilities.max_texture_size;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(KilnError::ResourceCreation {
                kind: "texture",
                reason: format!("'{}' is {}×{} (max {max})", desc.label, desc.width, desc.height),
            });
        }
        if desc.dimension == TextureDimension::Cube && desc.width != desc.height {
            return Err(KilnError::ResourceCreation {
                kind: "texture",
                reason: format!("cube texture '{}' is not square", desc.label),
            });
        }

        let format = texture_format(desc.format);
        let multisampled = desc.sample_count > 1;
        let usage = if multisampled {
            wgpu::TextureUsages::RENDER_ATTACHMENT
        } else if desc.format.is_depth() {
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
        } else {
            let mut usage =
                wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC;
            if desc.render_attachment || desc.mip_level_count > 1 {
                usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
            }
            usage
        };
        let layers = match desc.dimension {
            TextureDimension::D2 => 1,
            TextureDimension::Cube => 6,
        };

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: layers,
            },
            mip_level_count: desc.mip_level_count.max(1),
            sample_count: desc.sample_count.max(1),
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(desc.label),
            dimension: Some(convert::view_dimension(desc.dimension)),
            ..Default::default()
        });
        let sampler = self.sampler(&SamplerState::default());
        Ok(self.textures.insert(GpuTexture {
            texture,
            view,
            dimension: desc.dimension,
            sampler,
        }))
    }

    fn write_texture(&mut self, texture: TextureHandle, layer: u32, mip_level: u32, width: u32, height: u32, data: &[u8]) {
        let Some(gpu) = self.textures.get(texture) else {
            log::warn!("write_texture on an unknown texture");
            return;
        };
        let format = gpu.texture.format();
        let Some(block) = format.block_copy_size(None) else {
            log::warn!("write_texture: {format:?} cannot be uploaded");
            return;
        };
        let needed = u64::from(width) * u64::from(height) * u64::from(block);
        if (data.len() as u64) < needed {
            log::warn!(
                "write_texture: {} bytes supplied for a {width}×{height} {format:?} image ({needed} needed)",
                data.len()
            );
            return;
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu.texture,
                mip_level,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            &data[..needed as usize],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * block),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn set_sampler(&mut self, texture: TextureHandle, sampler: &SamplerState) {
        if !self.textures.contains_key(texture) {
            return;
        }
        let sampler = self.sampler(sampler);
        if let Some(gpu) = self.textures.get_mut(texture) {
            gpu.sampler = sampler;
        }
        self.texture_groups.retain(|(_, units), _| !units.contains(&texture));
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        let Some(gpu) = self.textures.get(texture) else {
            return;
        };
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Mipmap Encoder"),
        });
        self.mipmaps.generate(&self.device, &mut encoder, &gpu.texture);
        self.queue.submit(Some(encoder.finish()));
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(gpu) = self.textures.remove(texture) {
            gpu.texture.destroy();
        }
        self.texture_groups.retain(|(_, units), _| !units.contains(&texture));
        for unit in &mut self.texture_units {
            if *unit == Some(texture) {
                *unit = None;
            }
        }
    }

    // ── Framebuffers ────────────────────────────────────────────────────────

    fn create_framebuffer(&mut self, desc: &FramebufferDescriptor) -> Result<FramebufferHandle> {
        let known = |handle: Option<TextureHandle>| handle.is_none_or(|h| self.textures.contains_key(h));
        if desc.color.is_none() && desc.depth.is_none() {
            return Err(KilnError::ResourceCreation {
                kind: "framebuffer",
                reason: "no attachments".into(),
            });
        }
        if !known(desc.color) || !known(desc.depth) || !known(desc.resolve) {
            return Err(KilnError::ResourceCreation {
                kind: "framebuffer",
                reason: "unknown attachment texture".into(),
            });
        }
        Ok(self.framebuffers.insert(*desc))
    }

    fn resolve_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        let Some(desc) = self.framebuffers.get(framebuffer) else {
            return;
        };
        let (Some(color), Some(resolve)) = (
            desc.color.and_then(|h| self.textures.get(h)),
            desc.resolve.and_then(|h| self.textures.get(h)),
        ) else {
            return;
        };
        let color_view = layer_view(&color.texture, desc.color_layer);
        let resolve_view = layer_view(&resolve.texture, desc.resolve_layer);

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Resolve Encoder"),
        });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Resolve Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color_view,
                    resolve_target: Some(&resolve_view),
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(framebuffer);
    }

    // ── Programs ────────────────────────────────────────────────────────────

    fn compile_program(&mut self, desc: &ProgramDescriptor<'_>) -> std::result::Result<ProgramHandle, String> {
        validate_wgsl(desc.source)?;

        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(desc.source.to_owned())),
        });
        let (uniform_layout, texture_layout, pipeline_layout) = program_layouts(&self.device, desc.label, desc.layout);
        Ok(self.programs.insert(GpuProgram {
            label: desc.label.to_owned(),
            module,
            layout: desc.layout.clone(),
            uniform_layout,
            texture_layout,
            pipeline_layout,
            uniforms: vec![0; desc.layout.uniform_block_size.max(16) as usize],
        }))
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(program);
        self.pipelines.evict_program(program);
        self.texture_groups.retain(|(owner, _), _| *owner != program);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    // ── Frame & passes ──────────────────────────────────────────────────────

    fn begin_frame(&mut self) {
        if self.pass.is_some() {
            log::warn!("Frame started with an open pass; submitting it");
            self.end_pass();
        }
        // An image acquired but never presented is dropped.
        self.screen.frame = None;
    }

    fn begin_pass(&mut self, desc: &PassDescriptor<'_>) {
        if let Some(open) = &self.pass {
            log::warn!("Pass '{}' begun while '{}' is open", desc.label, open.label);
            self.end_pass();
        }
        let Some((color, depth, samples, size)) = self.attachments(desc.target) else {
            log::warn!("Pass '{}' has no usable attachments; its draws are dropped", desc.label);
            return;
        };
        let target = TargetKey {
            color: color.as_ref().map(|(_, format)| *format),
            depth: depth.as_ref().map(|(_, format)| *format),
            samples,
        };
        self.pass = Some(PassRecording {
            label: desc.label.to_owned(),
            color: color.map(|(view, _)| view),
            depth,
            target,
            size,
            clear_color: desc.clear_color,
            clear_depth: desc.clear_depth,
            clear_stencil: desc.clear_stencil,
            viewport: desc.viewport,
            uniforms: Vec::new(),
            draws: Vec::new(),
        });
    }

    fn end_pass(&mut self) {
        let Some(pass) = self.pass.take() else {
            return;
        };

        let needed = pass.uniforms.len() as u64;
        if needed > self.uniform_arena.size() {
            self.uniform_arena = uniform_arena(&self.device, needed.next_power_of_two());
        }
        if needed > 0 {
            self.queue.write_buffer(&self.uniform_arena, 0, &pass.uniforms);
        }

        let mut uniform_groups: FxHashMap<ProgramHandle, wgpu::BindGroup> = FxHashMap::default();
        for draw in &pass.draws {
            if uniform_groups.contains_key(&draw.program) {
                continue;
            }
            let Some(program) = self.programs.get(draw.program) else {
                continue;
            };
            let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Uniforms"),
                layout: &program.uniform_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.uniform_arena,
                        offset: 0,
                        size: NonZeroU64::new(program.uniforms.len() as u64),
                    }),
                }],
            });
            uniform_groups.insert(draw.program, group);
        }

        let color_ops = wgpu::Operations {
            load: pass.clear_color.map_or(wgpu::LoadOp::Load, |[r, g, b, a]| {
                wgpu::LoadOp::Clear(wgpu::Color {
                    r: f64::from(r),
                    g: f64::from(g),
                    b: f64::from(b),
                    a: f64::from(a),
                })
            }),
            store: wgpu::StoreOp::Store,
        };
        let depth_attachment = pass.depth.as_ref().map(|(view, format)| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: pass.clear_depth.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: format.has_stencil_aspect().then(|| wgpu::Operations {
                load: pass.clear_stencil.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                store: wgpu::StoreOp::Store,
            }),
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(&pass.label),
        });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&pass.label),
                color_attachments: &[pass.color.as_ref().map(|view| wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: color_ops,
                    depth_slice: None,
                })],
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            if let Some(viewport) = pass.viewport {
                let (width, height) = (pass.size.0 as f32, pass.size.1 as f32);
                let x = viewport.x.clamp(0.0, width);
                let y = viewport.y.clamp(0.0, height);
                let w = viewport.width.clamp(0.0, width - x);
                let h = viewport.height.clamp(0.0, height - y);
                if w > 0.0 && h > 0.0 {
                    rpass.set_viewport(x, y, w, h, 0.0, 1.0);
                }
            }

            for draw in &pass.draws {
                let Some(uniforms) = uniform_groups.get(&draw.program) else {
                    continue;
                };
                rpass.set_pipeline(&draw.pipeline);
                rpass.set_bind_group(0, uniforms, &[draw.uniform_offset]);
                if let Some(textures) = &draw.textures {
                    rpass.set_bind_group(1, textures, &[]);
                }
                for (slot, (buffer, offset)) in draw.vertex_buffers.iter().enumerate() {
                    rpass.set_vertex_buffer(slot as u32, buffer.slice(*offset..));
                }
                let call = &draw.call;
                let range = call.first..call.first + call.count;
                match &draw.index {
                    Some((buffer, format)) => {
                        rpass.set_index_buffer(buffer.slice(..), *format);
                        rpass.draw_indexed(range, 0, 0..call.instance_count);
                    }
                    None => rpass.draw(range, 0..call.instance_count),
                }
            }
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn present(&mut self) {
        if self.pass.is_some() {
            self.end_pass();
        }
        if let Some(frame) = self.screen.frame.take() {
            frame.present();
        }
    }

    // ── State ───────────────────────────────────────────────────────────────

    fn set_render_state(&mut self, state: &RenderState) {
        self.state = *state;
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.program = self.programs.contains_key(program).then_some(program);
    }

    fn set_uniform(&mut self, slot: usize, value: &UniformValue) {
        let Some(program) = self.program.and_then(|h| self.programs.get_mut(h)) else {
            return;
        };
        let Some(uniform) = program.layout.uniforms.get(slot) else {
            log::warn!("Program '{}' has no uniform slot {slot}", program.label);
            return;
        };
        let offset = uniform.offset as usize;
        if offset >= program.uniforms.len() {
            return;
        }
        if !value.write_to(uniform.ty, &mut program.uniforms[offset..]) {
            log::warn!(
                "Uniform '{}' of '{}' expects {:?}, got {:?}",
                uniform.name,
                program.label,
                uniform.ty,
                value.ty()
            );
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        let unit = unit as usize;
        if self.texture_units.len() <= unit {
            self.texture_units.resize(unit + 1, None);
        }
        self.texture_units[unit] = Some(texture);
    }

    fn set_vertex_buffer(&mut self, location: u32, buffer: BufferHandle, binding: &VertexBinding) {
        self.vertex_buffers.insert(location, (buffer, *binding));
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat) {
        self.index_buffer = Some((buffer, format));
    }

    fn draw(&mut self, call: &DrawCall) {
        if call.count == 0 || call.instance_count == 0 {
            return;
        }
        let Some(target) = self.pass.as_ref().map(|pass| pass.target) else {
            log::warn!("Draw issued outside a pass");
            return;
        };
        let Some(handle) = self.program.filter(|h| self.programs.contains_key(*h)) else {
            log::warn!("Draw issued without a program");
            return;
        };

        let textures = match self.texture_group(handle) {
            Ok(textures) => textures,
            Err(reason) => {
                log::warn!("Draw with '{}' skipped: {reason}", self.programs[handle].label);
                return;
            }
        };

        let program = &self.programs[handle];
        let mut vertex_buffers = SmallVec::new();
        let mut vertex_keys = SmallVec::new();
        for attribute in &program.layout.attributes {
            let bound = self
                .vertex_buffers
                .get(&attribute.location)
                .and_then(|(buffer, binding)| self.buffers.get(*buffer).map(|gpu| (gpu, binding)));
            let Some((gpu, binding)) = bound else {
                log::warn!(
                    "Draw with '{}' skipped: no buffer at location {} ('{}')",
                    program.label,
                    attribute.location,
                    attribute.name
                );
                return;
            };
            let offset = u64::from(binding.offset);
            if offset >= gpu.buffer.size() {
                return;
            }
            vertex_buffers.push((gpu.buffer.clone(), offset));
            vertex_keys.push(VertexKey {
                location: attribute.location,
                format: binding.format,
                stride: binding.stride,
                step: binding.step,
            });
        }

        let index = if call.indexed {
            let Some(gpu) = self.index_buffer.and_then(|(buffer, format)| {
                self.buffers
                    .get(buffer)
                    .map(|gpu| (gpu.buffer.clone(), convert::index_format(format)))
            }) else {
                log::warn!("Indexed draw with '{}' skipped: no index buffer", program.label);
                return;
            };
            Some(gpu)
        } else {
            None
        };

        let key = PipelineKey {
            program: handle,
            state: self.state,
            topology: call.topology,
            vertex: vertex_keys,
            target,
        };
        let pipeline = self.pipelines.get_or_create(
            &self.device,
            &key,
            &ProgramModule {
                label: &program.label,
                module: &program.module,
                layout: &program.pipeline_layout,
            },
        );

        let Some(pass) = self.pass.as_mut() else {
            return;
        };
        let uniform_offset = pass.uniforms.len().next_multiple_of(self.uniform_alignment);
        pass.uniforms.resize(uniform_offset, 0);
        pass.uniforms.extend_from_slice(&program.uniforms);
        pass.draws.push(DrawPacket {
            pipeline,
            program: handle,
            uniform_offset: uniform_offset as u32,
            textures,
            vertex_buffers,
            index,
            call: *call,
        });
    }
}
