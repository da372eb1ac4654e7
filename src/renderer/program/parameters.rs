//! Program parameters and cache keys.
//!
//! [`ProgramParameters`] captures everything that changes the generated
//! shader for one draw: the material's shader family and structural
//! settings, per-object features (instancing, skinning, morphing, vertex
//! channels) and frame state (lights, shadows, fog, tone mapping, output
//! encoding, clipping). Two draws with equal parameters share one program.
//!
//! The cache key is a string built from five parts: shader identity, the
//! serialized defines, numeric parameters, feature bit masks, and the
//! output color space plus the material's custom key. Uniform values are
//! never part of it.

use std::fmt::Write as _;
use std::hash::{BuildHasher, Hash, Hasher};

use bitflags::bitflags;

use super::source_cache::source_id;
use crate::renderer::lights::LightCounts;
use crate::renderer::settings::{ShadowMapType, ToneMapping};
use crate::resources::{ColorSpace, CustomShader, MaterialData, MaterialKind, Side, TextureMapping};
use crate::scene::Fog;

bitflags! {
    /// Material and object features that select shader code paths.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MaterialFeatures: u32 {
        const MAP                 = 1 << 0;
        const MATCAP              = 1 << 1;
        const ENV_MAP             = 1 << 2;
        const ENV_REFRACTION      = 1 << 3;
        const ALPHA_TEST          = 1 << 4;
        const VERTEX_COLORS       = 1 << 5;
        const VERTEX_NORMALS      = 1 << 6;
        const VERTEX_UVS          = 1 << 7;
        const FLAT_SHADING        = 1 << 8;
        const DOUBLE_SIDED        = 1 << 9;
        const BACK_SIDE           = 1 << 10;
        const PREMULTIPLIED_ALPHA = 1 << 11;
        const DITHERING           = 1 << 12;
        const TRANSMISSION        = 1 << 13;
        const INSTANCING          = 1 << 14;
        const SKINNING            = 1 << 15;
        const INTEGER_SKIN_INDEX  = 1 << 16;
        const RECEIVE_SHADOW      = 1 << 17;
        const DEPTH_PACKING_RGBA  = 1 << 18;
    }
}

bitflags! {
    /// Frame-level features.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EnvironmentFeatures: u32 {
        const LIGHTS          = 1 << 0;
        const SHADOW_MAP      = 1 << 1;
        const SHADOW_PCF      = 1 << 2;
        const SHADOW_PCF_SOFT = 1 << 3;
        const FOG             = 1 << 4;
        const FOG_EXP2        = 1 << 5;
        const OUTPUT_SRGB     = 1 << 6;
    }
}

/// Shader identity: a built-in family, or the hashes of custom sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderId {
    Family(&'static str),
    Custom { vertex: u64, fragment: u64, interface: u64 },
}

/// Per-object inputs to program selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectFeatures {
    pub instanced: bool,
    pub morph_targets: u32,
    pub bones: u32,
    pub integer_skin_index: bool,
    pub receive_shadow: bool,
    pub has_normals: bool,
    pub has_uvs: bool,
    pub has_colors: bool,
}

/// Per-frame (or per-pass) inputs to program selection.
#[derive(Debug, Clone, Copy)]
pub struct FrameFeatures<'a> {
    pub lights: LightCounts,
    /// Shadow filtering when shadow maps are enabled.
    pub shadow_type: Option<ShadowMapType>,
    pub fog: Option<&'a Fog>,
    /// Scene-wide environment map, used by materials without their own.
    pub environment: Option<TextureMapping>,
    pub tone_mapping: ToneMapping,
    /// The shader must encode its output to sRGB.
    pub output_srgb: bool,
    pub output_color_space: ColorSpace,
    pub global_clipping_planes: u32,
    pub local_clipping_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramParameters {
    pub shader: ShaderId,
    pub material: MaterialFeatures,
    pub environment: EnvironmentFeatures,
    pub lights: LightCounts,
    pub tone_mapping: ToneMapping,
    pub output_color_space: ColorSpace,
    pub clipping_planes: u32,
    pub clip_intersection: u32,
    pub morph_targets: u32,
    pub bones: u32,
    pub defines: crate::resources::ShaderDefines,
    pub custom_key: Option<String>,
}

/// Most morph targets a program blends.
pub const MAX_MORPH_TARGETS: u32 = 4;

impl ProgramParameters {
    #[must_use]
    pub fn new(material: &MaterialData, object: &ObjectFeatures, frame: &FrameFeatures<'_>) -> Self {
        let mut features = MaterialFeatures::empty();
        features.set(MaterialFeatures::MAP, material.map.is_some());
        features.set(MaterialFeatures::ALPHA_TEST, material.alpha_test > 0.0);
        features.set(MaterialFeatures::VERTEX_COLORS, material.vertex_colors && object.has_colors);
        features.set(MaterialFeatures::VERTEX_NORMALS, object.has_normals);
        features.set(MaterialFeatures::VERTEX_UVS, object.has_uvs);
        features.set(MaterialFeatures::FLAT_SHADING, material.flat_shading);
        features.set(MaterialFeatures::DOUBLE_SIDED, material.side == Side::Double);
        features.set(MaterialFeatures::BACK_SIDE, material.side == Side::Back);
        features.set(MaterialFeatures::PREMULTIPLIED_ALPHA, material.premultiplied_alpha);
        features.set(MaterialFeatures::DITHERING, material.dithering);
        features.set(MaterialFeatures::TRANSMISSION, material.transmission() > 0.0);
        features.set(MaterialFeatures::INSTANCING, object.instanced);
        features.set(MaterialFeatures::SKINNING, object.bones > 0);
        features.set(MaterialFeatures::INTEGER_SKIN_INDEX, object.bones > 0 && object.integer_skin_index);

        let uses_lights = material.kind.uses_lights();
        let lights = if uses_lights { frame.lights } else { LightCounts::default() };

        let mut environment = EnvironmentFeatures::empty();
        environment.set(EnvironmentFeatures::LIGHTS, uses_lights);
        if let Some(shadow_type) = frame.shadow_type
            && uses_lights
            && lights.shadows() > 0
        {
            environment.insert(EnvironmentFeatures::SHADOW_MAP);
            match shadow_type {
                ShadowMapType::Basic => {}
                ShadowMapType::Pcf => environment.insert(EnvironmentFeatures::SHADOW_PCF),
                ShadowMapType::PcfSoft | ShadowMapType::Vsm => environment.insert(EnvironmentFeatures::SHADOW_PCF_SOFT),
            }
            features.set(MaterialFeatures::RECEIVE_SHADOW, object.receive_shadow);
        }
        if material.fog
            && let Some(fog) = frame.fog
        {
            environment.insert(EnvironmentFeatures::FOG);
            environment.set(EnvironmentFeatures::FOG_EXP2, matches!(fog, Fog::Exp2 { .. }));
        }
        environment.set(EnvironmentFeatures::OUTPUT_SRGB, frame.output_srgb);

        let shader = match &material.kind {
            MaterialKind::Custom(custom) => custom_shader_id(custom),
            kind => ShaderId::Family(kind.family().unwrap_or("basic")),
        };
        match &material.kind {
            MaterialKind::Matcap(params) => features.set(MaterialFeatures::MATCAP, params.matcap.is_some()),
            MaterialKind::Depth(packing) => features.set(
                MaterialFeatures::DEPTH_PACKING_RGBA,
                *packing == crate::resources::DepthPacking::Rgba,
            ),
            _ => {}
        }

        let env_mapping = match material.kind.env_map() {
            Some(texture) => Some(texture.read().mapping),
            None if matches!(material.kind, MaterialKind::Standard(_) | MaterialKind::Physical(_)) => frame.environment,
            None => None,
        };
        if let Some(mapping) = env_mapping {
            features.insert(MaterialFeatures::ENV_MAP);
            features.set(MaterialFeatures::ENV_REFRACTION, mapping == TextureMapping::CubeRefraction);
        }

        let local_planes = if frame.local_clipping_enabled {
            material.clipping_planes.len() as u32
        } else {
            0
        };

        Self {
            shader,
            material: features,
            environment,
            lights,
            tone_mapping: if material.tone_mapped {
                frame.tone_mapping
            } else {
                ToneMapping::None
            },
            output_color_space: frame.output_color_space,
            clipping_planes: frame.global_clipping_planes + local_planes,
            clip_intersection: if material.clip_intersection { local_planes } else { 0 },
            morph_targets: object.morph_targets.min(MAX_MORPH_TARGETS),
            bones: object.bones,
            defines: material.defines.clone(),
            custom_key: material.program_cache_key.clone(),
        }
    }

    /// Built-in family name, or `None` for custom shaders.
    #[must_use]
    pub fn family(&self) -> Option<&'static str> {
        match self.shader {
            ShaderId::Family(name) => Some(name),
            ShaderId::Custom { .. } => None,
        }
    }

    /// String key identifying the program.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut key = String::with_capacity(128);
        // 1. shader identity
        match self.shader {
            ShaderId::Family(name) => key.push_str(name),
            ShaderId::Custom {
                vertex,
                fragment,
                interface,
            } => {
                let _ = write!(key, "custom:{vertex:016x}:{fragment:016x}:{interface:016x}");
            }
        }
        // 2. defines
        key.push('|');
        key.push_str(&self.defines.serialize());
        // 3. numeric parameters
        let l = &self.lights;
        let _ = write!(
            key,
            "|{},{},{},{},{},{},{},{},{},{},{},{:?}",
            l.directional,
            l.point,
            l.spot,
            l.hemisphere,
            l.directional_shadows,
            l.point_shadows,
            l.spot_shadows,
            self.clipping_planes,
            self.clip_intersection,
            self.morph_targets,
            self.bones,
            self.tone_mapping,
        );
        // 4. feature masks
        let _ = write!(key, "|{:x},{:x}", self.material.bits(), self.environment.bits());
        // 5. color space and custom key
        let _ = write!(key, "|{:?}", self.output_color_space);
        if let Some(custom) = &self.custom_key {
            key.push('|');
            key.push_str(custom);
        }
        key
    }
}

/// Source ids of the custom stages plus a hash of their declared interface.
#[must_use]
pub fn custom_shader_id(custom: &CustomShader) -> ShaderId {
    let mut state = rustc_hash::FxBuildHasher.build_hasher();
    custom.attributes.hash(&mut state);
    custom.lights.hash(&mut state);
    for (name, value) in &custom.uniforms {
        name.hash(&mut state);
        value.ty().hash(&mut state);
    }
    for (name, texture) in &custom.textures {
        name.hash(&mut state);
        texture.as_ref().map(|t| t.read().is_cube()).hash(&mut state);
    }
    ShaderId::Custom {
        vertex: source_id(&custom.vertex),
        fragment: source_id(&custom.fragment),
        interface: state.finish(),
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::resources::{Material, PhongParams};

    fn frame() -> FrameFeatures<'static> {
        FrameFeatures {
            lights: LightCounts {
                directional: 2,
                ..LightCounts::default()
            },
            shadow_type: None,
            fog: None,
            environment: None,
            tone_mapping: ToneMapping::AcesFilmic,
            output_srgb: true,
            output_color_space: ColorSpace::Srgb,
            global_clipping_planes: 0,
            local_clipping_enabled: false,
        }
    }

    #[test]
    fn test_uniform_values_do_not_change_key() {
        let mut a = Material::phong(Vec3::ONE);
        let key_a = ProgramParameters::new(a.data(), &ObjectFeatures::default(), &frame()).cache_key();
        a.edit().color = Vec3::new(0.2, 0.3, 0.4);
        a.edit().opacity = 0.5;
        let key_b = ProgramParameters::new(a.data(), &ObjectFeatures::default(), &frame()).cache_key();
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn test_alpha_test_changes_key() {
        let mut material = Material::phong(Vec3::ONE);
        let before = ProgramParameters::new(material.data(), &ObjectFeatures::default(), &frame()).cache_key();
        material.edit().alpha_test = 0.5;
        let after = ProgramParameters::new(material.data(), &ObjectFeatures::default(), &frame()).cache_key();
        assert_ne!(before, after);
    }

    #[test]
    fn test_unlit_material_ignores_light_counts() {
        let basic = Material::basic(Vec3::ONE);
        let params = ProgramParameters::new(basic.data(), &ObjectFeatures::default(), &frame());
        assert_eq!(params.lights, LightCounts::default());
        assert!(!params.environment.contains(EnvironmentFeatures::LIGHTS));

        let phong = Material::new(MaterialKind::Phong(PhongParams::default()));
        let params = ProgramParameters::new(phong.data(), &ObjectFeatures::default(), &frame());
        assert_eq!(params.lights.directional, 2);
    }

    #[test]
    fn test_tone_mapping_respects_material_flag() {
        let mut material = Material::basic(Vec3::ONE);
        material.edit().tone_mapped = false;
        let params = ProgramParameters::new(material.data(), &ObjectFeatures::default(), &frame());
        assert_eq!(params.tone_mapping, ToneMapping::None);
    }

    #[test]
    fn test_custom_key_is_appended() {
        let mut material = Material::basic(Vec3::ONE);
        material.edit().program_cache_key = Some("variant-b".into());
        let key = ProgramParameters::new(material.data(), &ObjectFeatures::default(), &frame()).cache_key();
        assert!(key.starts_with("basic|"));
        assert!(key.ends_with("|variant-b"));
    }

    #[test]
    fn test_morph_targets_are_capped() {
        let material = Material::basic(Vec3::ONE);
        let object = ObjectFeatures {
            morph_targets: 9,
            ..ObjectFeatures::default()
        };
        let params = ProgramParameters::new(material.data(), &object, &frame());
        assert_eq!(params.morph_targets, MAX_MORPH_TARGETS);
    }
}
