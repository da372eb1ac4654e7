//! Six-face captures into cube render targets.

use glam::{Mat4, Vec3};

use crate::renderer::Renderer;
use crate::renderer::device::{FrontFace, GpuDevice};
use crate::resources::{RenderTarget, Shared};
use crate::scene::{Camera, Layers, Scene};

/// View direction and up vector of each cube face, in `+X, -X, +Y, -Y, +Z, -Z`
/// order.
const FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

/// 90° camera at `position` looking down cube face `face`.
///
/// The projection is mirrored vertically so face images land in the
/// texture's top-left origin; draws through it use [`FrontFace::Cw`].
#[must_use]
pub fn cube_face_camera(position: Vec3, face: u32, near: f32, far: f32) -> Camera {
    let (direction, up) = FACES[(face as usize).min(5)];
    let mut camera = Camera::perspective(90.0, 1.0, near, far);
    camera.set_projection_matrix(Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0)) * camera.projection_matrix());
    camera.look_at(position, position + direction, up);
    camera
}

/// Renders the scene around a point into a cube render target, e.g. for
/// dynamic environment maps.
#[derive(Debug, Clone)]
pub struct CubeCamera {
    pub position: Vec3,
    pub near: f32,
    pub far: f32,
    pub layers: Layers,
    target: Shared<RenderTarget>,
}

impl CubeCamera {
    #[must_use]
    pub fn new(near: f32, far: f32, target: Shared<RenderTarget>) -> Self {
        Self {
            position: Vec3::ZERO,
            near,
            far,
            layers: Layers::default(),
            target,
        }
    }

    #[inline]
    #[must_use]
    pub fn target(&self) -> &Shared<RenderTarget> {
        &self.target
    }

    /// Camera for face `face`.
    #[must_use]
    pub fn camera(&self, face: u32) -> Camera {
        let mut camera = cube_face_camera(self.position, face, self.near, self.far);
        camera.layers = self.layers;
        camera
    }

    /// Renders all six faces. Mipmaps of the target are generated once,
    /// after the last face. The renderer's previous target is restored.
    pub fn update<D: GpuDevice>(&self, renderer: &mut Renderer<D>, scene: &Scene) {
        if !self.target.read().is_cube() {
            log::warn!("CubeCamera target {} is not a cube target", self.target.read().id());
            return;
        }

        let previous = renderer.render_target();
        let skip_mipmaps = renderer.skip_target_mipmaps;
        for face in 0..6 {
            renderer.skip_target_mipmaps = face < 5;
            renderer.set_render_target(Some(self.target.clone()), face);
            renderer.render_view(scene, &self.camera(face), FrontFace::Cw);
        }
        renderer.skip_target_mipmaps = skip_mipmaps;
        match previous {
            Some((target, face)) => renderer.set_render_target(Some(target), face),
            None => renderer.set_render_target(None, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward(camera: &Camera) -> Vec3 {
        -camera.world_matrix().z_axis.truncate()
    }

    #[test]
    fn test_faces_look_down_axes() {
        let expected = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
        for (face, direction) in expected.into_iter().enumerate() {
            let camera = cube_face_camera(Vec3::new(1.0, 2.0, 3.0), face as u32, 0.1, 10.0);
            assert!(forward(&camera).abs_diff_eq(direction, 1e-5), "face {face}");
            assert!(camera.position().abs_diff_eq(Vec3::new(1.0, 2.0, 3.0), 1e-5));
        }
    }

    #[test]
    fn test_projection_is_mirrored_vertically() {
        let camera = cube_face_camera(Vec3::ZERO, 0, 0.1, 10.0);
        let reference = Camera::perspective(90.0, 1.0, 0.1, 10.0);
        let mirrored = camera.projection_matrix();
        assert!((mirrored.y_axis.y + reference.projection_matrix().y_axis.y).abs() < 1e-6);
        assert!((mirrored.x_axis.x - reference.projection_matrix().x_axis.x).abs() < 1e-6);
    }
}
