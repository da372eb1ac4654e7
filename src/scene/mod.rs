//! Scene graph consumed by the renderer.
//!
//! The renderer treats the scene as read-only during a frame: it reads world
//! matrices, visibility, layers and render order, and the mesh/light
//! components attached to each node.

pub mod camera;
pub mod layers;
pub mod light;
pub mod node;
#[allow(clippy::module_inception)]
pub mod scene;

pub use camera::{Camera, Frustum, Projection};
pub use layers::Layers;
pub use light::{Light, LightKind, LightShadow};
pub use node::{Mesh, MeshMaterial, Node, NodeHandle, NodeKind, Skeleton, Topology};
pub use scene::{Background, Fog, Scene};
