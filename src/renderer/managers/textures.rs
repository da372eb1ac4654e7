//! Texture uploads and binding.
//!
//! Textures are uploaded on first bind and re-uploaded when their version
//! changes. Anything the device cannot represent degrades instead of
//! failing the draw:
//! - images larger than `max_texture_size` are downscaled (nearest)
//! - mipmaps are skipped for NPOT images when the device cannot build them
//! - unsupported formats bind a 1×1 white placeholder
//!
//! Each degradation is logged once per distinct cause.

use std::borrow::Cow;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::errors::Result;
use crate::renderer::device::{
    AddressMode, DeviceCapabilities, DeviceFormat, Filter, GpuDevice, SamplerState, TextureDescriptor,
    TextureDimension, TextureHandle,
};
use crate::resources::{
    ColorSpace, FilterMode, Image, ResourceId, Sampler, Texture, TextureFormat, TextureSource, Wrapping,
};
use crate::utils::WarnOnce;

use super::DisposeHook;

/// Device copy of one texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuTexture {
    pub handle: TextureHandle,
    pub version: u64,
    pub dimension: TextureDimension,
    pub format: DeviceFormat,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub sampler: SamplerState,
}

#[derive(Debug)]
pub struct TextureManager {
    records: FxHashMap<ResourceId, GpuTexture>,
    placeholder_2d: Option<TextureHandle>,
    placeholder_cube: Option<TextureHandle>,
    hook: DisposeHook,
    warnings: WarnOnce,
}

impl TextureManager {
    #[must_use]
    pub fn new(hook: DisposeHook) -> Self {
        Self {
            records: FxHashMap::default(),
            placeholder_2d: None,
            placeholder_cube: None,
            hook,
            warnings: WarnOnce::new(),
        }
    }

    /// Device texture to bind for a `dimension` slot: `texture` when it
    /// fits, otherwise the placeholder.
    pub fn resolve<D: GpuDevice>(
        &mut self,
        device: &mut D,
        texture: Option<&Texture>,
        dimension: TextureDimension,
    ) -> Result<TextureHandle> {
        match texture {
            Some(texture) if dimension_of(texture) == dimension => self.update(device, texture),
            Some(texture) => {
                self.warnings.warn(format!(
                    "Texture {} bound to a {dimension:?} slot has the wrong dimension; using placeholder",
                    texture.id()
                ));
                self.placeholder(device, dimension)
            }
            None => self.placeholder(device, dimension),
        }
    }

    /// Creates or refreshes the device texture and returns the handle to
    /// sample. Falls back to the placeholder when the texture cannot be
    /// represented.
    pub fn update<D: GpuDevice>(&mut self, device: &mut D, texture: &Texture) -> Result<TextureHandle> {
        let dimension = dimension_of(texture);
        let id = texture.id();

        if texture.is_render_target() {
            return match self.records.get(&id) {
                Some(record) => Ok(record.handle),
                None => self.placeholder(device, dimension),
            };
        }
        if let Some(record) = self.records.get(&id)
            && record.version == texture.version()
        {
            return Ok(record.handle);
        }

        let caps = device.capabilities();
        let Some(format) = self.check_format(texture, &caps) else {
            return self.placeholder(device, dimension);
        };

        let faces: SmallVec<[&Image; 6]> = match texture.source() {
            TextureSource::Image(image) => SmallVec::from_slice(&[image]),
            TextureSource::Cube(faces) => faces.iter().collect(),
            TextureSource::RenderTarget { .. } => return self.placeholder(device, dimension),
        };
        let bpp = texture.format.bytes_per_pixel() as usize;
        if let Some(bad) = faces
            .iter()
            .find(|image| image.data.len() < image.width as usize * image.height as usize * bpp)
        {
            self.warnings.warn(format!(
                "Texture {id}: {}x{} image has only {} bytes; using placeholder",
                bad.width,
                bad.height,
                bad.data.len()
            ));
            return self.placeholder(device, dimension);
        }

        let (mut width, mut height) = (faces[0].width.max(1), faces[0].height.max(1));
        let faces: SmallVec<[Cow<'_, Image>; 6]> = if width > caps.max_texture_size || height > caps.max_texture_size {
            let scale = f64::from(caps.max_texture_size) / f64::from(width.max(height));
            let (w, h) = (
                ((f64::from(width) * scale) as u32).max(1),
                ((f64::from(height) * scale) as u32).max(1),
            );
            self.warnings.warn(format!(
                "Texture {id}: {width}x{height} exceeds the device limit {}; resized to {w}x{h}",
                caps.max_texture_size
            ));
            (width, height) = (w, h);
            faces
                .iter()
                .map(|image| Cow::Owned(resize_nearest(image, bpp, w, h)))
                .collect()
        } else {
            faces.into_iter().map(Cow::Borrowed).collect()
        };

        let pot = width.is_power_of_two() && height.is_power_of_two();
        let mipmappable = !matches!(texture.format, TextureFormat::Rgba32Float | TextureFormat::R32Float);
        let mip_levels = if texture.generate_mipmaps && mipmappable && (pot || caps.npot_mipmaps) {
            32 - width.max(height).leading_zeros()
        } else {
            if texture.generate_mipmaps && !pot && !caps.npot_mipmaps {
                self.warnings.warn(format!(
                    "Texture {id}: {width}x{height} is not a power of two; mipmaps disabled"
                ));
            }
            1
        };

        let mut sampler = sampler_state(texture.sampler());
        if mip_levels == 1 {
            sampler.mipmap_filter = Filter::Nearest;
        }
        if !pot && !caps.npot_mipmaps && (sampler.address_u != AddressMode::ClampToEdge || sampler.address_v != AddressMode::ClampToEdge) {
            self.warnings.warn(format!(
                "Texture {id}: {width}x{height} is not a power of two; wrapping clamped to edge"
            ));
            sampler.address_u = AddressMode::ClampToEdge;
            sampler.address_v = AddressMode::ClampToEdge;
        }

        let previous = self.records.get(&id).copied();
        let handle = match previous {
            Some(record)
                if record.width == width
                    && record.height == height
                    && record.format == format
                    && record.mip_levels == mip_levels
                    && record.dimension == dimension =>
            {
                record.handle
            }
            _ => {
                if let Some(record) = previous {
                    device.destroy_texture(record.handle);
                } else {
                    self.hook.watch(texture.dispose_signal());
                }
                device.create_texture(&TextureDescriptor {
                    label: &texture.name,
                    width,
                    height,
                    dimension,
                    format,
                    mip_level_count: mip_levels,
                    sample_count: 1,
                    render_attachment: mip_levels > 1,
                })?
            }
        };

        for (layer, image) in faces.iter().enumerate() {
            device.write_texture(handle, layer as u32, 0, width, height, &image.data);
        }
        if mip_levels > 1 {
            device.generate_mipmaps(handle);
        }
        if previous.is_none_or(|record| record.handle != handle || record.sampler != sampler) {
            device.set_sampler(handle, &sampler);
        }

        log::debug!("Uploaded texture {id} ({width}x{height}, {format:?}, {mip_levels} mips)");
        self.records.insert(
            id,
            GpuTexture {
                handle,
                version: texture.version(),
                dimension,
                format,
                width,
                height,
                mip_levels,
                sampler,
            },
        );
        Ok(handle)
    }

    fn check_format(&mut self, texture: &Texture, caps: &DeviceCapabilities) -> Option<DeviceFormat> {
        let format = texture.format;
        let reason = if format.is_depth() {
            Some("depth formats cannot be uploaded")
        } else if format.is_float() && !caps.float_textures {
            Some("float textures are not supported")
        } else if matches!(format, TextureFormat::Rgba32Float | TextureFormat::R32Float) && !caps.float_filterable {
            Some("32-bit float textures are not filterable")
        } else {
            None
        };
        match reason {
            Some(reason) => {
                self.warnings.warn(format!("Texture format {format:?}: {reason}; using placeholder"));
                None
            }
            None => Some(device_format(format, texture.color_space)),
        }
    }

    /// The 1×1 white texture bound in place of missing or unusable ones.
    pub fn placeholder<D: GpuDevice>(&mut self, device: &mut D, dimension: TextureDimension) -> Result<TextureHandle> {
        let slot = match dimension {
            TextureDimension::D2 => &mut self.placeholder_2d,
            TextureDimension::Cube => &mut self.placeholder_cube,
        };
        if let Some(handle) = *slot {
            return Ok(handle);
        }
        let handle = device.create_texture(&TextureDescriptor {
            label: "placeholder",
            width: 1,
            height: 1,
            dimension,
            format: DeviceFormat::Rgba8Unorm,
            mip_level_count: 1,
            sample_count: 1,
            render_attachment: false,
        })?;
        let layers = match dimension {
            TextureDimension::D2 => 1,
            TextureDimension::Cube => 6,
        };
        for layer in 0..layers {
            device.write_texture(handle, layer, 0, 1, 1, &[255; 4]);
        }
        device.set_sampler(handle, &SamplerState::default());
        *slot = Some(handle);
        Ok(handle)
    }

    /// Registers storage allocated by the render-target manager.
    pub fn insert_render_target(&mut self, id: ResourceId, texture: GpuTexture) {
        self.records.insert(id, texture);
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: ResourceId) -> Option<&GpuTexture> {
        self.records.get(&id)
    }

    /// Destroys the device texture. Returns `false` if none existed.
    pub fn release<D: GpuDevice>(&mut self, device: &mut D, id: ResourceId) -> bool {
        match self.records.remove(&id) {
            Some(record) => {
                device.destroy_texture(record.handle);
                true
            }
            None => false,
        }
    }

    /// Forgets every record (placeholders included) without calling the device.
    pub fn reset(&mut self) {
        self.records.clear();
        self.placeholder_2d = None;
        self.placeholder_cube = None;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn dimension_of(texture: &Texture) -> TextureDimension {
    if texture.is_cube() {
        TextureDimension::Cube
    } else {
        TextureDimension::D2
    }
}

/// Device format for a CPU format in the given color space. Only 8-bit
/// RGBA has an sRGB variant.
#[must_use]
pub fn device_format(format: TextureFormat, color_space: ColorSpace) -> DeviceFormat {
    match (format, color_space) {
        (TextureFormat::Rgba8, ColorSpace::Srgb) => DeviceFormat::Rgba8UnormSrgb,
        (TextureFormat::Rgba8, ColorSpace::Linear) => DeviceFormat::Rgba8Unorm,
        (TextureFormat::Rg8, _) => DeviceFormat::Rg8Unorm,
        (TextureFormat::R8, _) => DeviceFormat::R8Unorm,
        (TextureFormat::Rgba16Float, _) => DeviceFormat::Rgba16Float,
        (TextureFormat::Rgba32Float, _) => DeviceFormat::Rgba32Float,
        (TextureFormat::R32Float, _) => DeviceFormat::R32Float,
        (TextureFormat::Depth24, _) => DeviceFormat::Depth24Plus,
        (TextureFormat::Depth24Stencil8, _) => DeviceFormat::Depth24PlusStencil8,
    }
}

#[must_use]
pub fn sampler_state(sampler: &Sampler) -> SamplerState {
    let address = |wrap: Wrapping| match wrap {
        Wrapping::Repeat => AddressMode::Repeat,
        Wrapping::ClampToEdge => AddressMode::ClampToEdge,
        Wrapping::MirroredRepeat => AddressMode::MirrorRepeat,
    };
    let filter = |mode: FilterMode| match mode {
        FilterMode::Nearest => Filter::Nearest,
        FilterMode::Linear => Filter::Linear,
    };
    SamplerState {
        address_u: address(sampler.wrap_s),
        address_v: address(sampler.wrap_t),
        mag_filter: filter(sampler.mag_filter),
        min_filter: filter(sampler.min_filter),
        mipmap_filter: filter(sampler.mipmap_filter),
        anisotropy: sampler.anisotropy.max(1),
    }
}

/// Nearest-neighbour resample of a tightly packed image.
fn resize_nearest(image: &Image, bpp: usize, width: u32, height: u32) -> Image {
    let (src_w, src_h) = (image.width as usize, image.height as usize);
    let (dst_w, dst_h) = (width as usize, height as usize);
    let mut data = vec![0u8; dst_w * dst_h * bpp];
    for y in 0..dst_h {
        let sy = y * src_h / dst_h;
        for x in 0..dst_w {
            let sx = x * src_w / dst_w;
            let src = (sy * src_w + sx) * bpp;
            let dst = (y * dst_w + x) * bpp;
            data[dst..dst + bpp].copy_from_slice(&image.data[src..src + bpp]);
        }
    }
    Image::new(width, height, data)
}
