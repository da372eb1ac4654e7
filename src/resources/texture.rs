//! Textures: image data plus sampling state.
//!
//! Any change to the image, filtering or wrapping must go through
//! [`Texture::image_mut`], [`Texture::sampler_mut`] or
//! [`Texture::needs_update`], which bump the version the texture manager
//! compares against.

use serde::{Deserialize, Serialize};

use super::dispose::{DisposeEvent, DisposeSignal};
use super::version_tracker::{ChangeTracker, MutGuard};
use super::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorSpace {
    #[default]
    Srgb,
    Linear,
}

/// CPU-side pixel formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    #[default]
    Rgba8,
    Rg8,
    R8,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    Depth24,
    Depth24Stencil8,
}

impl TextureFormat {
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8 => 1,
            Self::Rg8 => 2,
            Self::Rgba8 | Self::R32Float | Self::Depth24 | Self::Depth24Stencil8 => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }

    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Rgba16Float | Self::Rgba32Float | Self::R32Float)
    }

    #[must_use]
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth24 | Self::Depth24Stencil8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Wrapping {
    Repeat,
    #[default]
    ClampToEdge,
    MirroredRepeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sampler {
    pub wrap_s: Wrapping,
    pub wrap_t: Wrapping,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub anisotropy: u16,
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            wrap_s: Wrapping::ClampToEdge,
            wrap_t: Wrapping::ClampToEdge,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
            anisotropy: 1,
        }
    }
}

/// How the shader looks the texture up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureMapping {
    #[default]
    Uv,
    CubeReflection,
    CubeRefraction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Image {
    #[must_use]
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// A single-colour RGBA8 image.
    #[must_use]
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba.repeat((width * height) as usize);
        Self::new(width, height, data)
    }

    #[must_use]
    pub fn is_power_of_two(&self) -> bool {
        self.width.is_power_of_two() && self.height.is_power_of_two()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TextureSource {
    Image(Image),
    /// Faces in `+X, -X, +Y, -Y, +Z, -Z` order.
    Cube(Box<[Image; 6]>),
    /// Storage allocated by a render target; there is nothing to upload.
    RenderTarget { width: u32, height: u32, cube: bool },
}

impl TextureSource {
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        match self {
            Self::Image(image) => (image.width, image.height),
            Self::Cube(faces) => (faces[0].width, faces[0].height),
            Self::RenderTarget { width, height, .. } => (*width, *height),
        }
    }

    #[must_use]
    pub fn is_cube(&self) -> bool {
        matches!(
            self,
            Self::Cube(_) | Self::RenderTarget { cube: true, .. }
        )
    }
}

#[derive(Debug)]
pub struct Texture {
    id: ResourceId,
    pub name: String,
    source: TextureSource,
    sampler: Sampler,
    pub format: TextureFormat,
    pub color_space: ColorSpace,
    pub generate_mipmaps: bool,
    pub mapping: TextureMapping,
    tracker: ChangeTracker,
    dispose: DisposeSignal,
}

impl Texture {
    #[must_use]
    pub fn new(source: TextureSource, format: TextureFormat) -> Self {
        Self {
            id: ResourceId::next(),
            name: String::new(),
            source,
            sampler: Sampler::default(),
            format,
            color_space: ColorSpace::Srgb,
            generate_mipmaps: true,
            mapping: TextureMapping::Uv,
            tracker: ChangeTracker::new(),
            dispose: DisposeSignal::new(),
        }
    }

    /// An RGBA8 sRGB texture from an image.
    #[must_use]
    pub fn from_image(image: Image) -> Self {
        Self::new(TextureSource::Image(image), TextureFormat::Rgba8)
    }

    /// An RGBA8 sRGB cube texture.
    #[must_use]
    pub fn from_cube(faces: [Image; 6]) -> Self {
        let mut texture = Self::new(TextureSource::Cube(Box::new(faces)), TextureFormat::Rgba8);
        texture.mapping = TextureMapping::CubeReflection;
        texture
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.tracker.version()
    }

    #[inline]
    #[must_use]
    pub fn source(&self) -> &TextureSource {
        &self.source
    }

    #[inline]
    #[must_use]
    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    #[must_use]
    pub fn is_cube(&self) -> bool {
        self.source.is_cube()
    }

    #[must_use]
    pub fn is_render_target(&self) -> bool {
        matches!(self.source, TextureSource::RenderTarget { .. })
    }

    /// Mutable access to the image data; bumps the version on drop.
    pub fn image_mut(&mut self) -> MutGuard<'_, TextureSource> {
        MutGuard::new(&mut self.source, &mut self.tracker)
    }

    /// Mutable access to filtering and wrapping; bumps the version on drop.
    pub fn sampler_mut(&mut self) -> MutGuard<'_, Sampler> {
        MutGuard::new(&mut self.sampler, &mut self.tracker)
    }

    /// Flags the texture for re-upload after direct field edits
    /// (`format`, `generate_mipmaps`, ...).
    pub fn needs_update(&mut self) {
        self.tracker.bump();
    }

    #[must_use]
    pub fn dispose_signal(&self) -> &DisposeSignal {
        &self.dispose
    }

    /// Frees the GPU texture in every renderer that uploaded it.
    /// Calling this twice is a no-op.
    pub fn dispose(&self) {
        self.dispose.fire(DisposeEvent::Texture(self.id));
    }

    pub(crate) fn set_render_target_size(&mut self, width: u32, height: u32) {
        if let TextureSource::RenderTarget {
            width: w, height: h, ..
        } = &mut self.source
            && (*w != width || *h != height)
        {
            *w = width;
            *h = height;
            self.tracker.bump();
        }
    }
}
