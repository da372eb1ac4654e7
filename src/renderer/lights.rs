//! Per-frame light state.
//!
//! Visible lights collected by the render list are flattened into uniform
//! arrays once per frame. Programs compare [`LightsState::version`] with the
//! version they last uploaded and skip the light uniforms when it matches.
//!
//! Within each light type, shadow-casting lights come first, so light `i`
//! has a shadow map exactly when `i < *_shadows`.

use std::hash::{BuildHasher, Hash, Hasher};

use glam::{Mat4, UVec2, Vec3, Vec4};
use smallvec::SmallVec;

use crate::resources::UniformValue;
use crate::scene::{Camera, Light, LightKind, NodeHandle};

/// A light found during the render-list walk.
#[derive(Debug, Clone)]
pub struct CollectedLight {
    pub node: NodeHandle,
    pub light: Light,
    pub world_matrix: Mat4,
    pub cast_shadow: bool,
}

impl CollectedLight {
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.world_matrix.w_axis.truncate()
    }
}

/// Light and shadow counts; part of the program cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LightCounts {
    pub directional: u32,
    pub point: u32,
    pub spot: u32,
    pub hemisphere: u32,
    pub directional_shadows: u32,
    pub point_shadows: u32,
    pub spot_shadows: u32,
}

impl LightCounts {
    #[must_use]
    pub fn shadows(&self) -> u32 {
        self.directional_shadows + self.point_shadows + self.spot_shadows
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowKind {
    Directional,
    Spot,
    Point,
}

/// Everything the shadow pass needs to render one shadow map.
#[derive(Debug, Clone)]
pub struct ShadowView {
    pub kind: ShadowKind,
    /// Index among the shadow casters of this kind.
    pub index: u32,
    pub node: NodeHandle,
    /// Light camera for directional and spot lights.
    pub camera: Camera,
    pub position: Vec3,
    pub map_size: UVec2,
    pub near: f32,
    pub far: f32,
}

type Vec4s = SmallVec<[Vec4; 8]>;

#[derive(Debug, Default)]
pub struct LightsState {
    pub counts: LightCounts,
    pub ambient: Vec3,
    /// `[direction, color]` per light.
    pub directional: Vec4s,
    /// `[position + distance, color + decay]` per light.
    pub point: Vec4s,
    /// `[position + distance, direction + cos(angle), color + decay, cos(penumbra angle)]` per light.
    pub spot: Vec4s,
    /// `[up, sky color, ground color]` per light.
    pub hemisphere: Vec4s,
    /// `(bias, normal bias, radius, map size)` per shadow.
    pub directional_shadow_params: Vec4s,
    pub directional_shadow_matrices: Vec<Mat4>,
    pub spot_shadow_params: Vec4s,
    pub spot_shadow_matrices: Vec<Mat4>,
    /// `[(bias, normal bias, radius, map size), (near, far, 0, 0)]` per shadow.
    pub point_shadow_params: Vec4s,
    pub shadow_views: Vec<ShadowView>,
    hash: u64,
    version: u64,
}

impl LightsState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumped whenever any light value or count changes.
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Rebuilds the uniform arrays from this frame's lights.
    pub fn setup(&mut self, lights: &[CollectedLight], shadows_enabled: bool) {
        let mut ordered: Vec<&CollectedLight> = lights.iter().collect();
        // Shadow casters first; the sort is stable so scene order is kept otherwise.
        ordered.sort_by_key(|l| !(shadows_enabled && l.cast_shadow && l.light.supports_shadow()));

        self.counts = LightCounts::default();
        self.ambient = Vec3::ZERO;
        self.directional.clear();
        self.point.clear();
        self.spot.clear();
        self.hemisphere.clear();
        self.directional_shadow_params.clear();
        self.directional_shadow_matrices.clear();
        self.spot_shadow_params.clear();
        self.spot_shadow_matrices.clear();
        self.point_shadow_params.clear();
        self.shadow_views.clear();

        for collected in ordered {
            let light = &collected.light;
            let color = light.color * light.intensity;
            let position = collected.position();
            let casts = shadows_enabled && collected.cast_shadow && light.supports_shadow();
            let shadow = &light.shadow;
            let shadow_params = Vec4::new(shadow.bias, shadow.normal_bias, shadow.radius, shadow.map_size.x as f32);

            match &light.kind {
                LightKind::Ambient => self.ambient += color,
                LightKind::Hemisphere { ground_color } => {
                    let up = collected.world_matrix.transform_vector3(Vec3::Y).normalize_or(Vec3::Y);
                    self.hemisphere.push(up.extend(0.0));
                    self.hemisphere.push(color.extend(0.0));
                    self.hemisphere.push((*ground_color * light.intensity).extend(0.0));
                    self.counts.hemisphere += 1;
                }
                LightKind::Directional { target } => {
                    let direction = (position - *target).normalize_or(Vec3::Y);
                    self.directional.push(direction.extend(0.0));
                    self.directional.push(color.extend(0.0));
                    if casts {
                        let mut camera = Camera::orthographic(
                            -shadow.extent,
                            shadow.extent,
                            shadow.extent,
                            -shadow.extent,
                            shadow.near,
                            shadow.far,
                        );
                        camera.look_at(position, *target, up_for(direction));
                        self.directional_shadow_params.push(shadow_params);
                        self.directional_shadow_matrices.push(camera.view_projection());
                        self.shadow_views.push(ShadowView {
                            kind: ShadowKind::Directional,
                            index: self.counts.directional_shadows,
                            node: collected.node,
                            camera,
                            position,
                            map_size: shadow.map_size,
                            near: shadow.near,
                            far: shadow.far,
                        });
                        self.counts.directional_shadows += 1;
                    }
                    self.counts.directional += 1;
                }
                LightKind::Point { distance, decay } => {
                    self.point.push(position.extend(*distance));
                    self.point.push(color.extend(*decay));
                    if casts {
                        self.point_shadow_params.push(shadow_params);
                        self.point_shadow_params.push(Vec4::new(shadow.near, shadow.far, 0.0, 0.0));
                        self.shadow_views.push(ShadowView {
                            kind: ShadowKind::Point,
                            index: self.counts.point_shadows,
                            node: collected.node,
                            camera: Camera::perspective(90.0, 1.0, shadow.near, shadow.far),
                            position,
                            map_size: shadow.map_size,
                            near: shadow.near,
                            far: shadow.far,
                        });
                        self.counts.point_shadows += 1;
                    }
                    self.counts.point += 1;
                }
                LightKind::Spot {
                    target,
                    distance,
                    angle,
                    penumbra,
                    decay,
                } => {
                    let direction = (position - *target).normalize_or(Vec3::Y);
                    self.spot.push(position.extend(*distance));
                    self.spot.push(direction.extend(angle.cos()));
                    self.spot.push(color.extend(*decay));
                    self.spot.push(Vec4::new((angle * (1.0 - penumbra)).cos(), 0.0, 0.0, 0.0));
                    if casts {
                        let aspect = shadow.map_size.x as f32 / shadow.map_size.y.max(1) as f32;
                        let fov = (angle * 2.0).to_degrees().clamp(1.0, 179.0);
                        let mut camera = Camera::perspective(fov, aspect, shadow.near, shadow.far);
                        camera.look_at(position, *target, up_for(direction));
                        self.spot_shadow_params.push(shadow_params);
                        self.spot_shadow_matrices.push(camera.view_projection());
                        self.shadow_views.push(ShadowView {
                            kind: ShadowKind::Spot,
                            index: self.counts.spot_shadows,
                            node: collected.node,
                            camera,
                            position,
                            map_size: shadow.map_size,
                            near: shadow.near,
                            far: shadow.far,
                        });
                        self.counts.spot_shadows += 1;
                    }
                    self.counts.spot += 1;
                }
            }
        }

        let hash = self.compute_hash();
        if hash != self.hash {
            self.hash = hash;
            self.version += 1;
        }
    }

    fn compute_hash(&self) -> u64 {
        let mut state = rustc_hash::FxBuildHasher.build_hasher();
        self.counts.hash(&mut state);
        hash_floats(&mut state, &self.ambient.to_array());
        for list in [
            &self.directional,
            &self.point,
            &self.spot,
            &self.hemisphere,
            &self.directional_shadow_params,
            &self.spot_shadow_params,
            &self.point_shadow_params,
        ] {
            for v in list {
                hash_floats(&mut state, &v.to_array());
            }
        }
        for m in self.directional_shadow_matrices.iter().chain(&self.spot_shadow_matrices) {
            hash_floats(&mut state, &m.to_cols_array());
        }
        state.finish()
    }

    /// Uniform value of one light array, for upload.
    #[must_use]
    pub fn uniform(&self, array: LightArray) -> UniformValue {
        match array {
            LightArray::Ambient => UniformValue::Vec3(self.ambient),
            LightArray::Directional => UniformValue::Vec4Array(self.directional.clone()),
            LightArray::Point => UniformValue::Vec4Array(self.point.clone()),
            LightArray::Spot => UniformValue::Vec4Array(self.spot.clone()),
            LightArray::Hemisphere => UniformValue::Vec4Array(self.hemisphere.clone()),
            LightArray::DirectionalShadowParams => UniformValue::Vec4Array(self.directional_shadow_params.clone()),
            LightArray::DirectionalShadowMatrices => UniformValue::Mat4Array(self.directional_shadow_matrices.clone()),
            LightArray::SpotShadowParams => UniformValue::Vec4Array(self.spot_shadow_params.clone()),
            LightArray::SpotShadowMatrices => UniformValue::Mat4Array(self.spot_shadow_matrices.clone()),
            LightArray::PointShadowParams => UniformValue::Vec4Array(self.point_shadow_params.clone()),
        }
    }
}

/// Light uniform arrays a program can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightArray {
    Ambient,
    Directional,
    Point,
    Spot,
    Hemisphere,
    DirectionalShadowParams,
    DirectionalShadowMatrices,
    SpotShadowParams,
    SpotShadowMatrices,
    PointShadowParams,
}

fn hash_floats<H: Hasher>(state: &mut H, values: &[f32]) {
    for v in values {
        v.to_bits().hash(state);
    }
}

/// An up vector that is not parallel to `direction`.
fn up_for(direction: Vec3) -> Vec3 {
    if direction.abs_diff_eq(Vec3::Y, 1e-4) || direction.abs_diff_eq(Vec3::NEG_Y, 1e-4) {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collected(light: Light, position: Vec3, cast_shadow: bool) -> CollectedLight {
        CollectedLight {
            node: NodeHandle::default(),
            light,
            world_matrix: Mat4::from_translation(position),
            cast_shadow,
        }
    }

    #[test]
    fn test_counts_and_ambient_sum() {
        let mut state = LightsState::new();
        state.setup(
            &[
                collected(Light::ambient(Vec3::ONE, 0.25), Vec3::ZERO, false),
                collected(Light::ambient(Vec3::ONE, 0.25), Vec3::ZERO, false),
                collected(Light::directional(Vec3::ONE, 1.0), Vec3::new(0.0, 5.0, 0.0), false),
                collected(Light::point(Vec3::ONE, 1.0, 0.0), Vec3::ZERO, false),
            ],
            false,
        );
        assert_eq!(state.counts.directional, 1);
        assert_eq!(state.counts.point, 1);
        assert_eq!(state.counts.shadows(), 0);
        assert!(state.ambient.abs_diff_eq(Vec3::splat(0.5), 1e-6));
        assert_eq!(state.directional.len(), 2);
        assert!(state.directional[0].truncate().abs_diff_eq(Vec3::Y, 1e-6));
    }

    #[test]
    fn test_shadow_casters_sorted_first() {
        let mut state = LightsState::new();
        state.setup(
            &[
                collected(Light::directional(Vec3::X, 1.0), Vec3::new(0.0, 1.0, 0.0), false),
                collected(Light::directional(Vec3::Y, 1.0), Vec3::new(1.0, 1.0, 0.0), true),
            ],
            true,
        );
        assert_eq!(state.counts.directional_shadows, 1);
        // The caster (green) is light 0.
        assert!(state.directional[1].truncate().abs_diff_eq(Vec3::Y, 1e-6));
        assert_eq!(state.shadow_views.len(), 1);
        assert_eq!(state.directional_shadow_matrices.len(), 1);
    }

    #[test]
    fn test_version_changes_only_with_values() {
        let mut state = LightsState::new();
        let lights = [collected(Light::point(Vec3::ONE, 1.0, 10.0), Vec3::ZERO, false)];
        state.setup(&lights, false);
        let version = state.version();
        state.setup(&lights, false);
        assert_eq!(state.version(), version);

        let moved = [collected(Light::point(Vec3::ONE, 1.0, 10.0), Vec3::X, false)];
        state.setup(&moved, false);
        assert_ne!(state.version(), version);
    }

    #[test]
    fn test_shadows_disabled_ignores_casters() {
        let mut state = LightsState::new();
        state.setup(&[collected(Light::spot(Vec3::ONE, 1.0, 0.5, 0.1), Vec3::Y, true)], false);
        assert_eq!(state.counts.spot, 1);
        assert_eq!(state.counts.spot_shadows, 0);
        assert!(state.shadow_views.is_empty());
    }
}
