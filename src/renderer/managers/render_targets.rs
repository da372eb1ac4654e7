//! Off-screen render target storage.
//!
//! A target owns a color texture (registered with the [`TextureManager`] so
//! materials can sample it), an optional depth attachment, an optional
//! multisampled color buffer and one framebuffer per face.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::errors::{KilnError, Result};
use crate::renderer::device::{
    DeviceFormat, Filter, FramebufferDescriptor, FramebufferHandle, GpuDevice, TextureDescriptor, TextureDimension,
    TextureHandle,
};
use crate::resources::{RenderTarget, ResourceId};
use crate::utils::WarnOnce;

use super::textures::{device_format, sampler_state, GpuTexture, TextureManager};
use super::DisposeHook;

#[derive(Debug, Clone)]
pub struct GpuRenderTarget {
    pub version: u64,
    texture_version: u64,
    pub texture_id: ResourceId,
    pub color: TextureHandle,
    pub msaa_color: Option<TextureHandle>,
    pub depth: Option<TextureHandle>,
    /// One per cube face, or a single entry for 2D targets.
    pub framebuffers: SmallVec<[FramebufferHandle; 6]>,
    pub format: DeviceFormat,
    /// Effective sample count after capability fallback.
    pub samples: u32,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
}

#[derive(Debug)]
pub struct RenderTargetManager {
    records: FxHashMap<ResourceId, GpuRenderTarget>,
    hook: DisposeHook,
    warnings: WarnOnce,
}

impl RenderTargetManager {
    #[must_use]
    pub fn new(hook: DisposeHook) -> Self {
        Self {
            records: FxHashMap::default(),
            hook,
            warnings: WarnOnce::new(),
        }
    }

    /// Allocates (or re-allocates after a resize) the storage of `target`.
    pub fn setup<D: GpuDevice>(
        &mut self,
        device: &mut D,
        textures: &mut TextureManager,
        target: &RenderTarget,
    ) -> Result<&GpuRenderTarget> {
        let id = target.id();
        let texture_version = target.texture().read().version();
        let current = self
            .records
            .get(&id)
            .is_some_and(|r| {
                r.version == target.version()
                    && r.texture_version == texture_version
                    && textures.get(r.texture_id).is_some()
            });

        if !current {
            match self.records.remove(&id) {
                Some(old) => destroy_storage(device, textures, &old),
                None => self.hook.watch(target.dispose_signal()),
            }
            let record = self.allocate(device, textures, target)?;
            self.records.insert(id, record);
        }

        self.records
            .get(&id)
            .ok_or_else(|| KilnError::ResourceCreation {
                kind: "render target",
                reason: format!("target {id} has no storage"),
            })
    }

    fn allocate<D: GpuDevice>(
        &mut self,
        device: &mut D,
        textures: &mut TextureManager,
        target: &RenderTarget,
    ) -> Result<GpuRenderTarget> {
        let caps = device.capabilities();
        let texture = target.texture().read();
        let (width, height) = (target.width().max(1), target.height().max(1));
        let dimension = if target.is_cube() {
            TextureDimension::Cube
        } else {
            TextureDimension::D2
        };

        let mut format = device_format(texture.format, texture.color_space);
        if texture.format.is_depth() {
            self.warnings
                .warn(format!("Render target {}: depth color format replaced by Rgba8Unorm", target.id()));
            format = DeviceFormat::Rgba8Unorm;
        } else if texture.format.is_float() && !caps.float_render_targets {
            self.warnings.warn(format!(
                "Render target format {:?} is not renderable on this device; using Rgba8Unorm",
                texture.format
            ));
            format = DeviceFormat::Rgba8Unorm;
        }

        let mut samples = target.samples.max(1);
        if samples > 1 {
            if target.is_cube() {
                self.warnings.warn("Multisampled cube render targets are not supported; rendering single-sampled");
                samples = 1;
            } else if !caps.multisample_resolve {
                self.warnings
                    .warn("Multisample resolve is not supported by the device; rendering single-sampled");
                samples = 1;
            } else if samples > caps.max_samples {
                samples = caps.max_samples.max(1);
            }
        }

        let pot = width.is_power_of_two() && height.is_power_of_two();
        let mip_levels = if texture.generate_mipmaps && (pot || caps.npot_mipmaps) {
            32 - width.max(height).leading_zeros()
        } else {
            1
        };

        let mut storage = PendingStorage::default();
        let created = storage.create(device, target, &texture.name, dimension, format, samples, mip_levels);
        let (color, msaa_color, depth) = match created {
            Ok(handles) => handles,
            Err(err) => {
                storage.discard(device);
                return Err(err);
            }
        };

        let mut sampler = sampler_state(texture.sampler());
        if mip_levels == 1 {
            sampler.mipmap_filter = Filter::Nearest;
        }
        device.set_sampler(color, &sampler);
        // A stale record for this texture would otherwise lose its handle.
        textures.release(device, texture.id());
        textures.insert_render_target(
            texture.id(),
            GpuTexture {
                handle: color,
                version: texture.version(),
                dimension,
                format,
                width,
                height,
                mip_levels,
                sampler,
            },
        );
        let framebuffers = storage.framebuffers;

        log::debug!(
            "Allocated render target {} ({width}x{height}, {format:?}, {samples}x, {mip_levels} mips)",
            target.id()
        );
        Ok(GpuRenderTarget {
            version: target.version(),
            texture_version: texture.version(),
            texture_id: texture.id(),
            color,
            msaa_color,
            depth,
            framebuffers,
            format,
            samples,
            width,
            height,
            mip_levels,
        })
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: ResourceId) -> Option<&GpuRenderTarget> {
        self.records.get(&id)
    }

    #[must_use]
    pub fn framebuffer(&self, id: ResourceId, face: u32) -> Option<FramebufferHandle> {
        self.records
            .get(&id)
            .and_then(|r| r.framebuffers.get(face as usize).copied())
    }

    /// Resolves the multisampled color buffer into the sampled texture.
    /// Returns `false` for single-sampled targets.
    pub fn resolve_multisample<D: GpuDevice>(&self, device: &mut D, id: ResourceId) -> bool {
        match self.records.get(&id) {
            Some(record) if record.msaa_color.is_some() => {
                for framebuffer in &record.framebuffers {
                    device.resolve_framebuffer(*framebuffer);
                }
                true
            }
            _ => false,
        }
    }

    /// Rebuilds the mip chain of the color texture after rendering.
    pub fn update_mipmaps<D: GpuDevice>(&self, device: &mut D, id: ResourceId) -> bool {
        match self.records.get(&id) {
            Some(record) if record.mip_levels > 1 => {
                device.generate_mipmaps(record.color);
                true
            }
            _ => false,
        }
    }

    /// Destroys framebuffers, attachments and the color texture.
    pub fn release<D: GpuDevice>(&mut self, device: &mut D, textures: &mut TextureManager, id: ResourceId) -> bool {
        match self.records.remove(&id) {
            Some(record) => {
                destroy_storage(device, textures, &record);
                true
            }
            None => false,
        }
    }

    /// Forgets every record without calling the device.
    pub fn reset(&mut self) {
        self.records.clear();
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

/// Handles created so far by one allocation attempt.
#[derive(Default)]
struct PendingStorage {
    textures: SmallVec<[TextureHandle; 3]>,
    framebuffers: SmallVec<[FramebufferHandle; 6]>,
}

impl PendingStorage {
    /// Creates color, optional MSAA color, optional depth and one framebuffer
    /// per face. Every handle is recorded before the next step can fail.
    #[allow(clippy::too_many_arguments)]
    fn create<D: GpuDevice>(
        &mut self,
        device: &mut D,
        target: &RenderTarget,
        label: &str,
        dimension: TextureDimension,
        format: DeviceFormat,
        samples: u32,
        mip_levels: u32,
    ) -> Result<(TextureHandle, Option<TextureHandle>, Option<TextureHandle>)> {
        let (width, height) = (target.width().max(1), target.height().max(1));
        let attachment = |label, format, sample_count| TextureDescriptor {
            label,
            width,
            height,
            dimension: TextureDimension::D2,
            format,
            mip_level_count: 1,
            sample_count,
            render_attachment: true,
        };

        let color = device.create_texture(&TextureDescriptor {
            label,
            width,
            height,
            dimension,
            format,
            mip_level_count: mip_levels,
            sample_count: 1,
            render_attachment: true,
        })?;
        self.textures.push(color);

        let msaa_color = if samples > 1 {
            let handle = device.create_texture(&attachment("msaa color", format, samples))?;
            self.textures.push(handle);
            Some(handle)
        } else {
            None
        };

        let depth = if target.depth_buffer {
            let depth_format = if target.stencil_buffer {
                DeviceFormat::Depth24PlusStencil8
            } else {
                DeviceFormat::Depth24Plus
            };
            let handle = device.create_texture(&attachment("depth", depth_format, samples))?;
            self.textures.push(handle);
            Some(handle)
        } else {
            None
        };

        let faces = if target.is_cube() { 6 } else { 1 };
        for face in 0..faces {
            self.framebuffers.push(device.create_framebuffer(&FramebufferDescriptor {
                color: Some(msaa_color.unwrap_or(color)),
                color_layer: if msaa_color.is_some() { 0 } else { face },
                depth,
                resolve: msaa_color.map(|_| color),
                resolve_layer: face,
            })?);
        }
        Ok((color, msaa_color, depth))
    }

    fn discard<D: GpuDevice>(self, device: &mut D) {
        for framebuffer in self.framebuffers {
            device.destroy_framebuffer(framebuffer);
        }
        for texture in self.textures {
            device.destroy_texture(texture);
        }
    }
}

fn destroy_storage<D: GpuDevice>(device: &mut D, textures: &mut TextureManager, record: &GpuRenderTarget) {
    for framebuffer in &record.framebuffers {
        device.destroy_framebuffer(*framebuffer);
    }
    if let Some(msaa) = record.msaa_color {
        device.destroy_texture(msaa);
    }
    if let Some(depth) = record.depth {
        device.destroy_texture(depth);
    }
    // The color texture may already be gone if its texture was disposed on its own.
    if !textures.release(device, record.texture_id) {
        log::debug!("Render target color texture {} was already released", record.texture_id);
    }
}
