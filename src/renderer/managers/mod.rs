//! GPU resource managers
//!
//! Each manager maps CPU resources (by [`ResourceId`]) to device objects:
//! - [`AttributeManager`]: vertex and index buffers, with partial re-uploads
//! - [`GeometryManager`]: per-geometry buffer sets, wireframe indices, disposal
//! - [`TextureManager`]: textures, samplers, placeholders and format fallbacks
//! - [`RenderTargetManager`]: framebuffers, depth and multisample storage
//!
//! Managers upload lazily, compare versions to skip redundant work and
//! subscribe to resource dispose signals through a [`DisposeHook`]. `reset`
//! forgets every record without touching the device, for context loss.

pub mod attributes;
pub mod geometries;
pub mod render_targets;
pub mod textures;

pub use attributes::{AttributeManager, GpuBuffer};
pub use geometries::{GeometryManager, WireframeIndex};
pub use render_targets::{GpuRenderTarget, RenderTargetManager};
pub use textures::{GpuTexture, TextureManager};

use crate::resources::{DisposeEvent, DisposeSignal};

/// Subscription endpoint of one renderer.
///
/// Resources fire dispose events into the renderer's channel; the renderer
/// drains it at the start of each frame.
#[derive(Debug, Clone)]
pub struct DisposeHook {
    renderer_id: u64,
    sender: flume::Sender<DisposeEvent>,
}

impl DisposeHook {
    #[must_use]
    pub fn new(renderer_id: u64, sender: flume::Sender<DisposeEvent>) -> Self {
        Self {
            renderer_id,
            sender,
        }
    }

    /// Subscribes once per resource and renderer.
    pub fn watch(&self, signal: &DisposeSignal) {
        signal.subscribe(self.renderer_id, &self.sender);
    }

    #[must_use]
    pub fn renderer_id(&self) -> u64 {
        self.renderer_id
    }
}
