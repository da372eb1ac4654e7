//! Uniform value resolution and the per-program upload cache.
//!
//! Each program slot names a [`UniformSource`]. [`resolve`] turns a source
//! into a value for the current draw. [`UniformCache`] remembers the last
//! value sent to every slot of one program, so unchanged values are never
//! re-uploaded. Light arrays are only resolved when the lights state version
//! differs from the one the program last saw.

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use smallvec::SmallVec;

use super::device::GpuDevice;
use super::lights::LightsState;
use super::program::UniformSource;
use crate::resources::{MaterialData, MaterialKind, UniformValue};
use crate::scene::Fog;

/// Everything a uniform value can be taken from for one draw.
#[derive(Debug, Clone, Copy)]
pub struct UniformInputs<'a> {
    pub view_matrix: Mat4,
    pub projection_matrix: Mat4,
    pub camera_position: Vec3,
    pub model_matrix: Mat4,
    pub bones: Option<&'a [Mat4]>,
    pub morph_influences: &'a [f32],
    pub material: &'a MaterialData,
    pub lights: &'a LightsState,
    pub fog: Option<&'a Fog>,
    /// Global planes followed by the material's local planes.
    pub clipping_planes: &'a [Vec4],
    pub exposure: f32,
    pub resolution: Vec2,
}

/// Inverse transpose of the upper 3×3 of `model`.
#[must_use]
pub fn normal_matrix(model: &Mat4) -> Mat3 {
    let m = Mat3::from_mat4(*model);
    if m.determinant().abs() <= f32::EPSILON {
        return Mat3::IDENTITY;
    }
    m.inverse().transpose()
}

/// Value of `source` for this draw; `None` when the material has no such
/// parameter.
#[must_use]
pub fn resolve(source: UniformSource, inputs: &UniformInputs<'_>) -> Option<UniformValue> {
    let material = inputs.material;
    let kind = &material.kind;
    let value = match source {
        UniformSource::ModelMatrix => UniformValue::Mat4(inputs.model_matrix),
        UniformSource::ViewMatrix => UniformValue::Mat4(inputs.view_matrix),
        UniformSource::ProjectionMatrix => UniformValue::Mat4(inputs.projection_matrix),
        UniformSource::NormalMatrix => UniformValue::Mat3(normal_matrix(&inputs.model_matrix)),
        UniformSource::CameraPosition => UniformValue::Vec3(inputs.camera_position),
        UniformSource::Diffuse => UniformValue::Vec4(material.color.extend(material.opacity)),
        UniformSource::Emissive => UniformValue::Vec3(match kind {
            MaterialKind::Lambert(p) => p.emissive,
            MaterialKind::Phong(p) => p.emissive,
            MaterialKind::Standard(p) => p.emissive,
            MaterialKind::Physical(p) => p.standard.emissive,
            MaterialKind::Toon(p) => p.emissive,
            _ => return None,
        }),
        UniformSource::Specular => match kind {
            MaterialKind::Phong(p) => UniformValue::Vec3(p.specular),
            _ => return None,
        },
        UniformSource::Shininess => match kind {
            MaterialKind::Phong(p) => UniformValue::F32(p.shininess),
            _ => return None,
        },
        UniformSource::Roughness => UniformValue::F32(match kind {
            MaterialKind::Standard(p) => p.roughness,
            MaterialKind::Physical(p) => p.standard.roughness,
            _ => return None,
        }),
        UniformSource::Metalness => UniformValue::F32(match kind {
            MaterialKind::Standard(p) => p.metalness,
            MaterialKind::Physical(p) => p.standard.metalness,
            _ => return None,
        }),
        UniformSource::EnvMapIntensity => UniformValue::F32(match kind {
            MaterialKind::Standard(p) => p.env_map_intensity,
            MaterialKind::Physical(p) => p.standard.env_map_intensity,
            _ => return None,
        }),
        UniformSource::Reflectivity => UniformValue::F32(match kind {
            MaterialKind::Basic(p) => p.reflectivity,
            MaterialKind::Phong(p) => p.reflectivity,
            _ => return None,
        }),
        UniformSource::Transmission | UniformSource::Ior | UniformSource::Thickness => {
            let MaterialKind::Physical(p) = kind else {
                return None;
            };
            UniformValue::F32(match source {
                UniformSource::Transmission => p.transmission,
                UniformSource::Ior => p.ior,
                _ => p.thickness,
            })
        }
        UniformSource::Resolution => UniformValue::Vec2(inputs.resolution),
        UniformSource::Bands => match kind {
            MaterialKind::Toon(p) => UniformValue::F32(p.bands),
            _ => return None,
        },
        UniformSource::AlphaTest => UniformValue::F32(material.alpha_test),
        UniformSource::ReferencePosition => match kind {
            MaterialKind::Distance(p) => UniformValue::Vec3(p.reference_position),
            _ => return None,
        },
        UniformSource::NearFar => match kind {
            MaterialKind::Distance(p) => UniformValue::Vec2(Vec2::new(p.near, p.far)),
            _ => return None,
        },
        UniformSource::Exposure => UniformValue::F32(inputs.exposure),
        UniformSource::Light(array) => inputs.lights.uniform(array),
        UniformSource::FogColor => UniformValue::Vec3(inputs.fog?.color()),
        UniformSource::FogParams => UniformValue::Vec4(match inputs.fog? {
            Fog::Linear { near, far, .. } => Vec4::new(*near, *far, 0.0, 0.0),
            Fog::Exp2 { density, .. } => Vec4::new(0.0, 0.0, *density, 0.0),
        }),
        UniformSource::ClippingPlanes => {
            UniformValue::Vec4Array(SmallVec::from_slice(inputs.clipping_planes))
        }
        UniformSource::Bones => UniformValue::Mat4Array(inputs.bones?.to_vec()),
        UniformSource::MorphInfluences => {
            let mut weights = [0.0; 4];
            for (dst, src) in weights.iter_mut().zip(inputs.morph_influences) {
                *dst = *src;
            }
            UniformValue::Vec4(Vec4::from_array(weights))
        }
        UniformSource::Custom(index) => match kind {
            MaterialKind::Custom(custom) => custom.uniforms.get(index)?.1.clone(),
            _ => return None,
        },
    };
    Some(value)
}

/// Last uploaded values of one program's uniform slots.
#[derive(Debug, Clone, Default)]
pub struct UniformCache {
    values: Vec<Option<UniformValue>>,
    lights_version: Option<u64>,
}

impl UniformCache {
    #[must_use]
    pub fn new(slots: usize) -> Self {
        Self {
            values: vec![None; slots],
            lights_version: None,
        }
    }

    /// Uploads `value` to `slot` unless it equals the cached value.
    /// Returns `true` when the device was called.
    pub fn set<D: GpuDevice>(&mut self, device: &mut D, slot: usize, value: UniformValue) -> bool {
        if slot >= self.values.len() {
            self.values.resize(slot + 1, None);
        }
        if self.values[slot].as_ref() == Some(&value) {
            return false;
        }
        device.set_uniform(slot, &value);
        self.values[slot] = Some(value);
        true
    }

    /// Whether light arrays must be re-resolved for `version`; records it.
    pub fn lights_changed(&mut self, version: u64) -> bool {
        if self.lights_version == Some(version) {
            return false;
        }
        self.lights_version = Some(version);
        true
    }

    /// Forgets every cached value.
    pub fn invalidate(&mut self) {
        self.values.iter_mut().for_each(|v| *v = None);
        self.lights_version = None;
    }
}

/// Resolves and uploads every uniform of a program for one draw.
/// Returns the number of device calls made.
pub fn upload<D: GpuDevice>(
    device: &mut D,
    cache: &mut UniformCache,
    sources: &[UniformSource],
    inputs: &UniformInputs<'_>,
) -> usize {
    let refresh_lights = cache.lights_changed(inputs.lights.version());
    let mut calls = 0;
    for (slot, &source) in sources.iter().enumerate() {
        if matches!(source, UniformSource::Light(_)) && !refresh_lights {
            continue;
        }
        if let Some(value) = resolve(source, inputs)
            && cache.set(device, slot, value)
        {
            calls += 1;
        }
    }
    calls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Material, ToonParams};

    fn inputs<'a>(material: &'a MaterialData, lights: &'a LightsState) -> UniformInputs<'a> {
        UniformInputs {
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
            model_matrix: Mat4::from_scale(Vec3::new(2.0, 2.0, 2.0)),
            bones: None,
            morph_influences: &[0.5, 0.25],
            material,
            lights,
            fog: None,
            clipping_planes: &[],
            exposure: 1.0,
            resolution: Vec2::new(640.0, 480.0),
        }
    }

    #[test]
    fn test_diffuse_packs_opacity() {
        let mut material = Material::basic(Vec3::new(1.0, 0.5, 0.25));
        material.edit().opacity = 0.5;
        let lights = LightsState::new();
        let value = resolve(UniformSource::Diffuse, &inputs(material.data(), &lights));
        assert_eq!(value, Some(UniformValue::Vec4(Vec4::new(1.0, 0.5, 0.25, 0.5))));
    }

    #[test]
    fn test_missing_parameters_resolve_to_none() {
        let material = Material::basic(Vec3::ONE);
        let lights = LightsState::new();
        let inputs = inputs(material.data(), &lights);
        assert!(resolve(UniformSource::Roughness, &inputs).is_none());
        assert!(resolve(UniformSource::FogColor, &inputs).is_none());

        let toon = Material::new(MaterialKind::Toon(ToonParams::default()));
        let toon_inputs = UniformInputs {
            material: toon.data(),
            ..inputs
        };
        assert_eq!(resolve(UniformSource::Bands, &toon_inputs), Some(UniformValue::F32(3.0)));
    }

    #[test]
    fn test_morph_influences_padded_to_four() {
        let material = Material::basic(Vec3::ONE);
        let lights = LightsState::new();
        let value = resolve(UniformSource::MorphInfluences, &inputs(material.data(), &lights));
        assert_eq!(value, Some(UniformValue::Vec4(Vec4::new(0.5, 0.25, 0.0, 0.0))));
    }

    #[test]
    fn test_normal_matrix_undoes_uniform_scale() {
        let m = normal_matrix(&Mat4::from_scale(Vec3::splat(2.0)));
        assert!((m.x_axis.x - 0.5).abs() < 1e-6);
        assert_eq!(normal_matrix(&Mat4::ZERO), Mat3::IDENTITY);
    }

    #[test]
    fn test_lights_version_tracking() {
        let mut cache = UniformCache::new(2);
        assert!(cache.lights_changed(3));
        assert!(!cache.lights_changed(3));
        assert!(cache.lights_changed(4));
        cache.invalidate();
        assert!(cache.lights_changed(4));
    }
}
