//! Off-screen render targets.
//!
//! A target owns the [`Texture`] that materials sample after rendering. The
//! texture has a [`TextureSource::RenderTarget`] source: its storage is
//! allocated by the render-target manager, not uploaded.

use super::dispose::{DisposeEvent, DisposeSignal};
use super::texture::{Texture, TextureFormat, TextureSource};
use super::version_tracker::ChangeTracker;
use super::{ResourceId, Shared, shared};

#[derive(Debug)]
pub struct RenderTarget {
    id: ResourceId,
    width: u32,
    height: u32,
    /// Requested MSAA sample count; 1 disables multisampling.
    pub samples: u32,
    pub depth_buffer: bool,
    pub stencil_buffer: bool,
    cube: bool,
    texture: Shared<Texture>,
    tracker: ChangeTracker,
    dispose: DisposeSignal,
}

impl RenderTarget {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_format(width, height, TextureFormat::Rgba8, false)
    }

    /// A cube target with six square faces.
    #[must_use]
    pub fn cube(size: u32) -> Self {
        Self::with_format(size, size, TextureFormat::Rgba8, true)
    }

    #[must_use]
    pub fn with_format(width: u32, height: u32, format: TextureFormat, cube: bool) -> Self {
        let mut texture = Texture::new(
            TextureSource::RenderTarget {
                width,
                height,
                cube,
            },
            format,
        );
        texture.generate_mipmaps = false;
        Self {
            id: ResourceId::next(),
            width,
            height,
            samples: 1,
            depth_buffer: true,
            stencil_buffer: false,
            cube,
            texture: shared(texture),
            tracker: ChangeTracker::new(),
            dispose: DisposeSignal::new(),
        }
    }

    #[must_use]
    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples.max(1);
        self
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Bumped on resize; the manager re-creates the backing storage.
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.tracker.version()
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    #[must_use]
    pub fn is_cube(&self) -> bool {
        self.cube
    }

    /// The color texture sampled by materials.
    #[inline]
    #[must_use]
    pub fn texture(&self) -> &Shared<Texture> {
        &self.texture
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        if self.width == width && self.height == height {
            return;
        }
        self.width = width;
        self.height = height;
        self.texture.write().set_render_target_size(width, height);
        self.tracker.bump();
    }

    #[must_use]
    pub fn dispose_signal(&self) -> &DisposeSignal {
        &self.dispose
    }

    /// Frees the framebuffers, depth storage and color texture.
    pub fn dispose(&self) {
        self.dispose.fire(DisposeEvent::RenderTarget(self.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_bumps_target_and_texture() {
        let mut target = RenderTarget::new(64, 64);
        let texture_version = target.texture().read().version();

        target.set_size(64, 64);
        assert_eq!(target.version(), 0);

        target.set_size(128, 32);
        assert_eq!(target.version(), 1);
        assert_eq!(target.texture().read().source().size(), (128, 32));
        assert_ne!(target.texture().read().version(), texture_version);
    }
}
