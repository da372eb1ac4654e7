//! Material descriptors.
//!
//! A [`Material`] is a closed [`MaterialKind`] (one per built-in shader
//! family, plus `Custom` for caller-supplied WGSL) together with the settings
//! shared by all kinds.
//!
//! # Versioning
//!
//! Edits go through [`Material::edit`]. The guard compares the structural
//! signature (everything that changes generated shader text) before and after
//! the edit and bumps the version only when it differs. Changing a color or a
//! roughness value therefore never invalidates the cached program binding,
//! while enabling alpha test or adding a map does.

use std::hash::{BuildHasher, Hash, Hasher};

use glam::{Vec3, Vec4};

use super::dispose::{DisposeEvent, DisposeSignal};
use super::shader_defines::ShaderDefines;
use super::texture::Texture;
use super::uniforms::UniformValue;
use super::version_tracker::ChangeTracker;
use super::{ResourceId, Shared};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Side {
    #[default]
    Front,
    Back,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Blending {
    None,
    #[default]
    Normal,
    Additive,
    Subtractive,
    Multiply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DepthFunc {
    Never,
    Less,
    Equal,
    #[default]
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Output encoding of the depth material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DepthPacking {
    /// Grayscale depth.
    #[default]
    Basic,
    /// Depth packed into all four 8-bit channels (shadow maps).
    Rgba,
}

// ─── Per-kind parameters ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct BasicParams {
    pub env_map: Option<Shared<Texture>>,
    pub reflectivity: f32,
}

#[derive(Debug, Clone, Default)]
pub struct LambertParams {
    pub emissive: Vec3,
}

#[derive(Debug, Clone)]
pub struct PhongParams {
    pub emissive: Vec3,
    pub specular: Vec3,
    pub shininess: f32,
    pub env_map: Option<Shared<Texture>>,
    pub reflectivity: f32,
}

impl Default for PhongParams {
    fn default() -> Self {
        Self {
            emissive: Vec3::ZERO,
            specular: Vec3::splat(0.067),
            shininess: 30.0,
            env_map: None,
            reflectivity: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StandardParams {
    pub emissive: Vec3,
    pub roughness: f32,
    pub metalness: f32,
    pub env_map: Option<Shared<Texture>>,
    pub env_map_intensity: f32,
}

impl Default for StandardParams {
    fn default() -> Self {
        Self {
            emissive: Vec3::ZERO,
            roughness: 1.0,
            metalness: 0.0,
            env_map: None,
            env_map_intensity: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhysicalParams {
    pub standard: StandardParams,
    /// Fraction of light transmitted through the surface. Any non-zero value
    /// moves draws into the transmissive bucket.
    pub transmission: f32,
    pub ior: f32,
    pub thickness: f32,
}

impl Default for PhysicalParams {
    fn default() -> Self {
        Self {
            standard: StandardParams::default(),
            transmission: 0.0,
            ior: 1.5,
            thickness: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToonParams {
    pub emissive: Vec3,
    /// Number of discrete lighting bands.
    pub bands: f32,
}

impl Default for ToonParams {
    fn default() -> Self {
        Self {
            emissive: Vec3::ZERO,
            bands: 3.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatcapParams {
    pub matcap: Option<Shared<Texture>>,
}

#[derive(Debug, Clone)]
pub struct DistanceParams {
    pub reference_position: Vec3,
    pub near: f32,
    pub far: f32,
}

impl Default for DistanceParams {
    fn default() -> Self {
        Self {
            reference_position: Vec3::ZERO,
            near: 1.0,
            far: 1000.0,
        }
    }
}

/// Caller-supplied WGSL.
///
/// The renderer prepends a generated prelude declaring `VertexInput` (with
/// the requested `attributes`), the `Uniforms` struct bound as `u` (frame
/// uniforms plus `uniforms`), and one `t_<name>`/`s_<name>` pair per texture.
/// `vertex` must define `vs_main` and the `VertexOutput` struct, `fragment`
/// must define `fs_main`. Both sources may use `$$ if NAME` lines against the
/// material defines.
#[derive(Debug, Clone)]
pub struct CustomShader {
    pub name: String,
    pub vertex: String,
    pub fragment: String,
    pub uniforms: Vec<(String, UniformValue)>,
    pub textures: Vec<(String, Option<Shared<Texture>>)>,
    pub attributes: Vec<String>,
    /// Include the scene light uniforms in the prelude.
    pub lights: bool,
}

impl CustomShader {
    #[must_use]
    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            name: String::from("custom"),
            vertex: vertex.into(),
            fragment: fragment.into(),
            uniforms: Vec::new(),
            textures: Vec::new(),
            attributes: vec![String::from("position")],
            lights: false,
        }
    }

    #[must_use]
    pub fn with_uniform(mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        self.uniforms.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_texture(mut self, name: impl Into<String>, texture: Option<Shared<Texture>>) -> Self {
        self.textures.push((name.into(), texture));
        self
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: &[&str]) -> Self {
        self.attributes = attributes.iter().map(|a| (*a).to_string()).collect();
        self
    }

    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) {
        let value = value.into();
        if let Some(slot) = self.uniforms.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.uniforms.push((name.to_string(), value));
        }
    }
}

/// Closed set of shader families.
#[derive(Debug, Clone)]
pub enum MaterialKind {
    Basic(BasicParams),
    Lambert(LambertParams),
    Phong(PhongParams),
    Standard(StandardParams),
    Physical(PhysicalParams),
    Toon(ToonParams),
    Matcap(MatcapParams),
    Depth(DepthPacking),
    Distance(DistanceParams),
    Custom(CustomShader),
}

impl MaterialKind {
    /// Built-in shader family name; `None` for custom shaders.
    #[must_use]
    pub fn family(&self) -> Option<&'static str> {
        Some(match self {
            Self::Basic(_) => "basic",
            Self::Lambert(_) => "lambert",
            Self::Phong(_) => "phong",
            Self::Standard(_) => "standard",
            Self::Physical(_) => "physical",
            Self::Toon(_) => "toon",
            Self::Matcap(_) => "matcap",
            Self::Depth(_) => "depth",
            Self::Distance(_) => "distance",
            Self::Custom(_) => return None,
        })
    }

    /// Whether the family reads scene lights.
    #[must_use]
    pub fn uses_lights(&self) -> bool {
        match self {
            Self::Lambert(_) | Self::Phong(_) | Self::Standard(_) | Self::Physical(_) | Self::Toon(_) => true,
            Self::Custom(custom) => custom.lights,
            _ => false,
        }
    }

    #[must_use]
    pub fn env_map(&self) -> Option<&Shared<Texture>> {
        match self {
            Self::Basic(p) => p.env_map.as_ref(),
            Self::Phong(p) => p.env_map.as_ref(),
            Self::Standard(p) => p.env_map.as_ref(),
            Self::Physical(p) => p.standard.env_map.as_ref(),
            _ => None,
        }
    }

    fn hash_structure<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        self.env_map().map(|t| t.read().mapping).hash(state);
        match self {
            Self::Physical(p) => (p.transmission > 0.0).hash(state),
            Self::Matcap(p) => p.matcap.is_some().hash(state),
            Self::Depth(packing) => packing.hash(state),
            Self::Custom(c) => {
                c.vertex.hash(state);
                c.fragment.hash(state);
                c.lights.hash(state);
                c.attributes.hash(state);
                for (name, value) in &c.uniforms {
                    name.hash(state);
                    value.ty().hash(state);
                }
                for (name, texture) in &c.textures {
                    name.hash(state);
                    texture.as_ref().map(|t| t.read().is_cube()).hash(state);
                }
            }
            _ => {}
        }
    }
}

/// User-facing material settings.
#[derive(Debug, Clone)]
pub struct MaterialData {
    pub kind: MaterialKind,
    pub name: String,

    pub color: Vec3,
    pub opacity: f32,
    pub map: Option<Shared<Texture>>,

    pub transparent: bool,
    pub blending: Blending,
    pub premultiplied_alpha: bool,
    pub side: Side,
    /// Side rendered into shadow maps; defaults to the opposite of `side`.
    pub shadow_side: Option<Side>,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: DepthFunc,
    pub color_write: bool,

    /// Fragments with alpha below this value are discarded; 0 disables.
    pub alpha_test: f32,
    pub vertex_colors: bool,
    pub fog: bool,
    pub tone_mapped: bool,
    pub dithering: bool,
    pub flat_shading: bool,
    pub wireframe: bool,

    pub visible: bool,
    /// Draw double-sided transparent objects in one pass instead of
    /// back faces then front faces.
    pub force_single_pass: bool,

    /// Material-local clipping planes `(normal, constant)` in world space.
    pub clipping_planes: Vec<Vec4>,
    pub clip_intersection: bool,
    pub clip_shadows: bool,

    pub defines: ShaderDefines,
    /// Extra contribution to the program cache key.
    pub program_cache_key: Option<String>,
}

impl MaterialData {
    #[must_use]
    pub fn new(kind: MaterialKind) -> Self {
        Self {
            kind,
            name: String::new(),
            color: Vec3::ONE,
            opacity: 1.0,
            map: None,
            transparent: false,
            blending: Blending::Normal,
            premultiplied_alpha: false,
            side: Side::Front,
            shadow_side: None,
            depth_test: true,
            depth_write: true,
            depth_func: DepthFunc::LessEqual,
            color_write: true,
            alpha_test: 0.0,
            vertex_colors: false,
            fog: true,
            tone_mapped: true,
            dithering: false,
            flat_shading: false,
            wireframe: false,
            visible: true,
            force_single_pass: false,
            clipping_planes: Vec::new(),
            clip_intersection: false,
            clip_shadows: false,
            defines: ShaderDefines::new(),
            program_cache_key: None,
        }
    }

    /// Transmission factor; non-zero only for physical materials.
    #[must_use]
    pub fn transmission(&self) -> f32 {
        match &self.kind {
            MaterialKind::Physical(p) => p.transmission,
            _ => 0.0,
        }
    }

    /// Hash of every field that changes the generated shader.
    #[must_use]
    pub fn structural_signature(&self) -> u64 {
        let mut state = rustc_hash::FxBuildHasher.build_hasher();
        self.kind.hash_structure(&mut state);
        self.map.is_some().hash(&mut state);
        (self.alpha_test > 0.0).hash(&mut state);
        self.vertex_colors.hash(&mut state);
        self.fog.hash(&mut state);
        self.tone_mapped.hash(&mut state);
        self.dithering.hash(&mut state);
        self.flat_shading.hash(&mut state);
        self.premultiplied_alpha.hash(&mut state);
        self.side.hash(&mut state);
        self.clipping_planes.len().hash(&mut state);
        self.clip_intersection.hash(&mut state);
        self.defines.hash(&mut state);
        self.program_cache_key.hash(&mut state);
        state.finish()
    }
}

#[derive(Debug)]
pub struct Material {
    id: ResourceId,
    data: MaterialData,
    tracker: ChangeTracker,
    dispose: DisposeSignal,
}

impl Material {
    #[must_use]
    pub fn new(kind: MaterialKind) -> Self {
        Self::from_data(MaterialData::new(kind))
    }

    #[must_use]
    pub fn from_data(data: MaterialData) -> Self {
        Self {
            id: ResourceId::next(),
            data,
            tracker: ChangeTracker::new(),
            dispose: DisposeSignal::new(),
        }
    }

    #[must_use]
    pub fn basic(color: Vec3) -> Self {
        let mut data = MaterialData::new(MaterialKind::Basic(BasicParams::default()));
        data.color = color;
        Self::from_data(data)
    }

    #[must_use]
    pub fn lambert(color: Vec3) -> Self {
        let mut data = MaterialData::new(MaterialKind::Lambert(LambertParams::default()));
        data.color = color;
        Self::from_data(data)
    }

    #[must_use]
    pub fn phong(color: Vec3) -> Self {
        let mut data = MaterialData::new(MaterialKind::Phong(PhongParams::default()));
        data.color = color;
        Self::from_data(data)
    }

    #[must_use]
    pub fn standard(color: Vec3, roughness: f32, metalness: f32) -> Self {
        let mut data = MaterialData::new(MaterialKind::Standard(StandardParams {
            roughness,
            metalness,
            ..StandardParams::default()
        }));
        data.color = color;
        Self::from_data(data)
    }

    #[must_use]
    pub fn physical(params: PhysicalParams) -> Self {
        Self::new(MaterialKind::Physical(params))
    }

    #[must_use]
    pub fn custom(shader: CustomShader) -> Self {
        Self::new(MaterialKind::Custom(shader))
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Structural version; see the module docs.
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.tracker.version()
    }

    #[inline]
    #[must_use]
    pub fn data(&self) -> &MaterialData {
        &self.data
    }

    /// Mutable access; bumps the version on drop only if the structural
    /// signature changed.
    pub fn edit(&mut self) -> MaterialEdit<'_> {
        let signature = self.data.structural_signature();
        MaterialEdit {
            data: &mut self.data,
            tracker: &mut self.tracker,
            signature,
        }
    }

    /// Forces re-resolution of the program binding.
    pub fn needs_update(&mut self) {
        self.tracker.bump();
    }

    #[must_use]
    pub fn dispose_signal(&self) -> &DisposeSignal {
        &self.dispose
    }

    /// Releases this material's programs in every renderer that used it.
    pub fn dispose(&self) {
        self.dispose.fire(DisposeEvent::Material(self.id));
    }
}

impl std::ops::Deref for Material {
    type Target = MaterialData;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

pub struct MaterialEdit<'a> {
    data: &'a mut MaterialData,
    tracker: &'a mut ChangeTracker,
    signature: u64,
}

impl std::ops::Deref for MaterialEdit<'_> {
    type Target = MaterialData;

    fn deref(&self) -> &Self::Target {
        self.data
    }
}

impl std::ops::DerefMut for MaterialEdit<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data
    }
}

impl Drop for MaterialEdit<'_> {
    fn drop(&mut self) {
        if self.data.structural_signature() != self.signature {
            self.tracker.bump();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_edit_keeps_version() {
        let mut material = Material::basic(Vec3::ONE);
        material.edit().color = Vec3::new(1.0, 0.0, 0.0);
        material.edit().opacity = 0.5;
        assert_eq!(material.version(), 0);
    }

    #[test]
    fn test_structural_edit_bumps_version() {
        let mut material = Material::basic(Vec3::ONE);
        material.edit().alpha_test = 0.5;
        assert_eq!(material.version(), 1);

        // Changing the threshold value is not structural.
        material.edit().alpha_test = 0.25;
        assert_eq!(material.version(), 1);

        material.edit().defines.set("USE_GRADIENT", "1");
        assert_eq!(material.version(), 2);
    }

    #[test]
    fn test_transmission_only_on_physical() {
        let glass = Material::physical(PhysicalParams {
            transmission: 1.0,
            ..PhysicalParams::default()
        });
        assert_eq!(glass.transmission(), 1.0);
        assert_eq!(Material::lambert(Vec3::ONE).transmission(), 0.0);
    }
}
