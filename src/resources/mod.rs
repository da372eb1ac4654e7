//! CPU-side resource definitions
//!
//! Everything here is plain data with no GPU knowledge:
//! - [`AttributeBuffer`]: typed vertex/index arrays with incremental update ranges
//! - [`Geometry`]: named attribute channels, index, groups and bounds
//! - [`Texture`] / [`RenderTarget`]: image data, sampler state and off-screen targets
//! - [`Material`]: a closed [`MaterialKind`] plus structural and uniform state
//! - [`ShaderDefines`]: interned preprocessor define sets
//!
//! Resources are shared between the application and the renderer through
//! [`Shared<T>`]. Each resource carries a stable [`ResourceId`], a version
//! counter and a [`DisposeSignal`]; GPU-side state is owned by the renderer
//! and keyed by the id.

pub mod buffer;
pub mod dispose;
pub mod geometry;
pub mod material;
pub mod primitives;
pub mod render_target;
pub mod shader_defines;
pub mod texture;
pub mod uniforms;
pub mod version_tracker;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

pub use buffer::{AttributeBuffer, AttributeElement, ElementType, UpdateRange};
pub use dispose::{DisposeEvent, DisposeSignal};
pub use geometry::{BoundingSphere, DrawRange, Geometry, GeometryGroup};
pub use material::{
    BasicParams, Blending, CustomShader, DepthFunc, DepthPacking, DistanceParams, LambertParams,
    MatcapParams, Material, MaterialData, MaterialEdit, MaterialKind, PhongParams, PhysicalParams, Side,
    StandardParams, ToonParams,
};
pub use render_target::RenderTarget;
pub use shader_defines::ShaderDefines;
pub use texture::{
    ColorSpace, FilterMode, Image, Sampler, Texture, TextureFormat, TextureMapping, TextureSource,
    Wrapping,
};
pub use uniforms::{UniformType, UniformValue};
pub use version_tracker::{ChangeTracker, MutGuard};

/// Shared, lockable handle to a CPU resource.
///
/// The application mutates resources between frames; the renderer takes read
/// locks while a frame is being built and submitted.
pub type Shared<T> = Arc<RwLock<T>>;

/// Wraps a value into a [`Shared`] handle.
#[inline]
pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(RwLock::new(value))
}

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a CPU-side resource.
///
/// Ids are process-unique and never reused, so a GPU record keyed by a
/// disposed resource can never be confused with a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    /// Allocates a fresh id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
