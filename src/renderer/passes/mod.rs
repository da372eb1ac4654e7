//! Passes run around the main scene pass: shadow maps, the textured
//! background and cube-map captures.

pub mod background;
pub mod cube_camera;
pub mod shadow;

pub use cube_camera::{CubeCamera, cube_face_camera};
pub use shadow::ShadowMaps;
