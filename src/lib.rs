//! # Kiln
//!
//! A retained-mode forward rendering core. Applications describe a scene of
//! meshes, materials, lights and cameras; [`Renderer`] turns it into GPU
//! work every frame while caching everything that did not change: vertex
//! buffers, textures, render targets and compiled shader programs.
//!
//! - [`resources`]: CPU-side geometry, textures, render targets and materials
//! - [`scene`]: nodes, cameras, lights, fog and background
//! - [`renderer`]: the frame driver, its managers and the device boundary
//!
//! The GPU is reached through [`GpuDevice`]; [`WgpuDevice`] implements it on
//! wgpu.
//!
//! ```rust,ignore
//! use kiln::{Renderer, RendererSettings, WgpuDevice};
//!
//! let device = pollster::block_on(WgpuDevice::headless(640, 480))?;
//! let mut renderer = Renderer::new(device, RendererSettings::default());
//! renderer.render(&scene, &camera);
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod errors;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod utils;

pub use errors::{KilnError, Result};
pub use renderer::Renderer;
pub use renderer::device::GpuDevice;
pub use renderer::settings::{RendererSettings, ToneMapping};
pub use renderer::wgpu_backend::WgpuDevice;
pub use resources::primitives::{cuboid, plane};
pub use resources::{
    AttributeBuffer, ColorSpace, Geometry, Material, MaterialKind, RenderTarget, Shared, Side, Texture, shared,
};
pub use scene::{Camera, Light, Mesh, Node, NodeHandle, Scene};
