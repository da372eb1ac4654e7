//! Device boundary.
//!
//! [`GpuDevice`] is everything the rendering core needs from a graphics
//! context: buffer, texture, framebuffer and program lifetime, pass and
//! render-state control, uniform and texture binding, vertex binding, draw
//! issuance and presentation.
//!
//! The contract is stateful in the classic immediate style: a bound program,
//! its uniform values, texture units, render state and vertex bindings stay
//! in effect until changed. The renderer's state caches depend on that to
//! skip redundant calls. Uniform values are stored per program.
//!
//! [`WgpuDevice`](super::wgpu_backend::WgpuDevice) implements the trait on
//! wgpu; tests implement it with call-counting stubs.

use crate::errors::Result;
use crate::resources::{Blending, DepthFunc, UniformType, UniformValue};
use crate::scene::Topology;

slotmap::new_key_type! {
    pub struct BufferHandle;
    pub struct TextureHandle;
    pub struct FramebufferHandle;
    pub struct ProgramHandle;
}

// ─── Buffers ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor<'a> {
    pub label: &'a str,
    pub usage: BufferUsage,
    pub contents: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    #[must_use]
    pub const fn size(self) -> u32 {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }
}

/// Component layout of one vertex attribute in its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Uint32,
    Uint32x2,
    Uint32x3,
    Uint32x4,
    Sint32,
    Sint32x4,
    Uint16x2,
    Uint16x4,
    Sint16x2,
    Sint16x4,
    Unorm16x2,
    Unorm16x4,
    Uint8x4,
    Unorm8x4,
    Snorm8x4,
}

impl VertexFormat {
    /// Whether the shader sees the attribute as floating point.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(
            self,
            Self::Float32
                | Self::Float32x2
                | Self::Float32x3
                | Self::Float32x4
                | Self::Unorm16x2
                | Self::Unorm16x4
                | Self::Unorm8x4
                | Self::Snorm8x4
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepMode {
    Vertex,
    Instance,
}

/// How one shader location reads its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBinding {
    pub format: VertexFormat,
    pub stride: u32,
    pub offset: u32,
    pub step: StepMode,
}

// ─── Textures ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rg8Unorm,
    R8Unorm,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    Depth24Plus,
    Depth24PlusStencil8,
}

impl DeviceFormat {
    #[must_use]
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth24Plus | Self::Depth24PlusStencil8)
    }

    /// The hardware encodes linear shader output to sRGB on write.
    #[must_use]
    pub const fn is_srgb(self) -> bool {
        matches!(self, Self::Rgba8UnormSrgb | Self::Bgra8UnormSrgb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    D2,
    Cube,
}

#[derive(Debug, Clone, Copy)]
pub struct TextureDescriptor<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub dimension: TextureDimension,
    pub format: DeviceFormat,
    pub mip_level_count: u32,
    pub sample_count: u32,
    /// Usable as a framebuffer attachment.
    pub render_attachment: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Repeat,
    ClampToEdge,
    MirrorRepeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerState {
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mipmap_filter: Filter,
    pub anisotropy: u16,
}

impl Default for SamplerState {
    fn default() -> Self {
        Self {
            address_u: AddressMode::ClampToEdge,
            address_v: AddressMode::ClampToEdge,
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            mipmap_filter: Filter::Nearest,
            anisotropy: 1,
        }
    }
}

// ─── Framebuffers & passes ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferDescriptor {
    pub color: Option<TextureHandle>,
    /// Cube face (or array layer) of `color` to render into.
    pub color_layer: u32,
    pub depth: Option<TextureHandle>,
    /// Single-sample texture the multisampled color resolves into.
    pub resolve: Option<TextureHandle>,
    pub resolve_layer: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassDescriptor<'a> {
    pub label: &'a str,
    /// `None` renders to the screen.
    pub target: Option<FramebufferHandle>,
    pub clear_color: Option<[f32; 4]>,
    pub clear_depth: Option<f32>,
    pub clear_stencil: Option<u32>,
    pub viewport: Option<Viewport>,
}

// ─── Render state ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullFace {
    None,
    #[default]
    Back,
    Front,
}

/// Winding of front-facing triangles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    #[default]
    Ccw,
    Cw,
}

/// Fixed-function state applied to subsequent draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub blending: Blending,
    pub premultiplied_alpha: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: DepthFunc,
    pub cull: CullFace,
    pub front_face: FrontFace,
    pub color_write: bool,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            blending: Blending::None,
            premultiplied_alpha: false,
            depth_test: true,
            depth_write: true,
            depth_func: DepthFunc::LessEqual,
            cull: CullFace::Back,
            front_face: FrontFace::Ccw,
            color_write: true,
        }
    }
}

// ─── Programs ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformSlot {
    pub name: String,
    pub ty: UniformType,
    pub offset: u32,
}

/// A filterable float texture and its sampler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureSlot {
    pub name: String,
    pub dimension: TextureDimension,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSlot {
    pub name: String,
    pub location: u32,
    /// The shader expects a floating point input.
    pub float: bool,
}

/// Resource interface of a compiled program.
///
/// Uniforms live in one block at `@group(0) @binding(0)`. Texture slot `k`
/// binds texture unit `k` at `@group(1) @binding(2k)` with its sampler at
/// `@binding(2k + 1)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgramLayout {
    pub uniforms: Vec<UniformSlot>,
    pub uniform_block_size: u32,
    pub textures: Vec<TextureSlot>,
    pub attributes: Vec<AttributeSlot>,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgramDescriptor<'a> {
    pub label: &'a str,
    /// A complete WGSL module with `vs_main` and `fs_main`.
    pub source: &'a str,
    pub layout: &'a ProgramLayout,
}

// ─── Draws ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub topology: Topology,
    pub first: u32,
    pub count: u32,
    pub instance_count: u32,
    pub indexed: bool,
}

// ─── Capabilities ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub max_texture_size: u32,
    pub max_samples: u32,
    pub max_vertex_attributes: u32,
    pub max_texture_units: u32,
    pub npot_mipmaps: bool,
    pub multisample_resolve: bool,
    pub float_textures: bool,
    pub float_filterable: bool,
    pub float_render_targets: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_texture_size: 8192,
            max_samples: 4,
            max_vertex_attributes: 16,
            max_texture_units: 16,
            npot_mipmaps: true,
            multisample_resolve: true,
            float_textures: true,
            float_filterable: false,
            float_render_targets: true,
        }
    }
}

/// Graphics context used by the rendering core.
pub trait GpuDevice {
    fn capabilities(&self) -> DeviceCapabilities;

    /// Size of the default (screen) framebuffer in pixels.
    fn drawing_buffer_size(&self) -> (u32, u32);

    /// Resizes the default framebuffer.
    fn resize(&mut self, width: u32, height: u32);

    /// Color format of the default framebuffer.
    fn screen_format(&self) -> DeviceFormat;

    /// `true` after the device reset. Every handle is invalid until the
    /// context is restored.
    fn is_context_lost(&self) -> bool;

    // Buffers
    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle>;
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    // Textures
    fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> Result<TextureHandle>;
    /// Uploads one mip level of one layer (cube face).
    fn write_texture(&mut self, texture: TextureHandle, layer: u32, mip_level: u32, width: u32, height: u32, data: &[u8]);
    fn set_sampler(&mut self, texture: TextureHandle, sampler: &SamplerState);
    fn generate_mipmaps(&mut self, texture: TextureHandle);
    fn destroy_texture(&mut self, texture: TextureHandle);

    // Framebuffers
    fn create_framebuffer(&mut self, desc: &FramebufferDescriptor) -> Result<FramebufferHandle>;
    /// Resolves a multisampled framebuffer into its resolve texture.
    fn resolve_framebuffer(&mut self, framebuffer: FramebufferHandle);
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    // Programs
    /// Compiles and links. On failure the compiler log is returned.
    fn compile_program(&mut self, desc: &ProgramDescriptor<'_>) -> std::result::Result<ProgramHandle, String>;
    fn destroy_program(&mut self, program: ProgramHandle);

    // Frame & passes
    fn begin_frame(&mut self);
    fn begin_pass(&mut self, desc: &PassDescriptor<'_>);
    fn end_pass(&mut self);
    fn present(&mut self);

    // State
    fn set_render_state(&mut self, state: &RenderState);
    fn use_program(&mut self, program: ProgramHandle);
    /// Sets uniform `slot` (index into the layout's uniform list) of the bound program.
    fn set_uniform(&mut self, slot: usize, value: &UniformValue);
    fn bind_texture(&mut self, unit: u32, texture: TextureHandle);
    fn set_vertex_buffer(&mut self, location: u32, buffer: BufferHandle, binding: &VertexBinding);
    fn set_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat);

    fn draw(&mut self, call: &DrawCall);
}
