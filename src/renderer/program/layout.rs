//! Program resource interface.
//!
//! A [`ProgramInterface`] lists the uniforms, textures and vertex attributes a
//! program reads and where the renderer takes each value from. The WGSL
//! declarations and the [`ProgramLayout`] handed to the device are both
//! produced from that one list, so offsets, binding slots and attribute
//! locations always agree.
//!
//! Attribute locations are handed out in declaration order.

use std::fmt::Write as _;

use crate::renderer::device::{AttributeSlot, ProgramLayout, TextureDimension, TextureSlot, UniformSlot};
use crate::renderer::lights::LightArray;
use crate::resources::uniforms::layout_offsets;
use crate::resources::{CustomShader, UniformType};

use super::parameters::{EnvironmentFeatures, MaterialFeatures, ProgramParameters};

/// Where a uniform value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformSource {
    ModelMatrix,
    ViewMatrix,
    ProjectionMatrix,
    NormalMatrix,
    CameraPosition,
    /// Material color and opacity.
    Diffuse,
    Emissive,
    Specular,
    Shininess,
    Roughness,
    Metalness,
    EnvMapIntensity,
    Reflectivity,
    Transmission,
    Ior,
    Thickness,
    /// Size of the current viewport in pixels.
    Resolution,
    Bands,
    AlphaTest,
    ReferencePosition,
    NearFar,
    Exposure,
    Light(LightArray),
    FogColor,
    FogParams,
    ClippingPlanes,
    Bones,
    MorphInfluences,
    /// Index into the custom shader's uniform list.
    Custom(usize),
}

impl UniformSource {
    /// Values that change per object rather than per material or frame.
    #[must_use]
    pub fn is_per_object(self) -> bool {
        matches!(
            self,
            Self::ModelMatrix | Self::NormalMatrix | Self::Bones | Self::MorphInfluences
        )
    }
}

/// What a texture unit samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureInput {
    Map,
    Matcap,
    EnvMap,
    DirectionalShadow(u32),
    SpotShadow(u32),
    PointShadow(u32),
    Transmission,
    /// Index into the custom shader's texture list.
    Custom(usize),
}

/// Which buffer feeds a vertex attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttributeInput {
    /// A named geometry channel.
    Geometry(String),
    /// Column `n` of the per-instance model matrix.
    InstanceColumn(u32),
    /// Position deltas of morph target `n`.
    MorphTarget(u32),
}

#[derive(Debug, Clone, Default)]
pub struct ProgramInterface {
    pub layout: ProgramLayout,
    pub uniform_sources: Vec<UniformSource>,
    pub texture_inputs: Vec<TextureInput>,
    pub attribute_inputs: Vec<AttributeInput>,
    /// `struct Uniforms` and its binding.
    pub uniforms_wgsl: String,
    /// Texture and sampler bindings.
    pub textures_wgsl: String,
    /// `struct VertexInput`.
    pub vertex_input_wgsl: String,
}

#[derive(Default)]
struct InterfaceBuilder {
    uniforms: Vec<(String, UniformType, UniformSource)>,
    textures: Vec<(String, TextureDimension, TextureInput)>,
    attributes: Vec<(String, &'static str, bool, AttributeInput)>,
}

impl InterfaceBuilder {
    fn uniform(&mut self, name: impl Into<String>, ty: UniformType, source: UniformSource) -> &mut Self {
        self.uniforms.push((name.into(), ty, source));
        self
    }

    fn texture(&mut self, name: impl Into<String>, dimension: TextureDimension, input: TextureInput) -> &mut Self {
        self.textures.push((name.into(), dimension, input));
        self
    }

    fn attribute(&mut self, name: impl Into<String>, wgsl: &'static str, input: AttributeInput) -> &mut Self {
        let float = wgsl.ends_with("<f32>");
        self.attributes.push((name.into(), wgsl, float, input));
        self
    }

    fn geometry_attribute(&mut self, name: &str, wgsl: &'static str) -> &mut Self {
        self.attribute(name, wgsl, AttributeInput::Geometry(name.to_string()))
    }

    fn build(self) -> ProgramInterface {
        let types: Vec<UniformType> = self.uniforms.iter().map(|(_, ty, _)| *ty).collect();
        let (offsets, block_size) = layout_offsets(&types);

        let mut uniforms_wgsl = String::from("struct Uniforms {\n");
        let mut uniform_slots = Vec::with_capacity(self.uniforms.len());
        let mut uniform_sources = Vec::with_capacity(self.uniforms.len());
        for ((name, ty, source), offset) in self.uniforms.into_iter().zip(offsets) {
            let _ = writeln!(uniforms_wgsl, "    {name}: {},", ty.wgsl());
            uniform_slots.push(UniformSlot { name, ty, offset });
            uniform_sources.push(source);
        }
        uniforms_wgsl.push_str("};\n\n@group(0) @binding(0) var<uniform> u: Uniforms;\n");

        let mut textures_wgsl = String::new();
        let mut texture_slots = Vec::with_capacity(self.textures.len());
        let mut texture_inputs = Vec::with_capacity(self.textures.len());
        for (unit, (name, dimension, input)) in self.textures.into_iter().enumerate() {
            let ty = match dimension {
                TextureDimension::D2 => "texture_2d<f32>",
                TextureDimension::Cube => "texture_cube<f32>",
            };
            let _ = writeln!(textures_wgsl, "@group(1) @binding({}) var t_{name}: {ty};", unit * 2);
            let _ = writeln!(textures_wgsl, "@group(1) @binding({}) var s_{name}: sampler;", unit * 2 + 1);
            texture_slots.push(TextureSlot { name, dimension });
            texture_inputs.push(input);
        }

        let mut vertex_input_wgsl = String::from("struct VertexInput {\n");
        let mut attribute_slots = Vec::with_capacity(self.attributes.len());
        let mut attribute_inputs = Vec::with_capacity(self.attributes.len());
        for (location, (name, wgsl, float, input)) in self.attributes.into_iter().enumerate() {
            let location = location as u32;
            let _ = writeln!(vertex_input_wgsl, "    @location({location}) {name}: {wgsl},");
            attribute_slots.push(AttributeSlot { name, location, float });
            attribute_inputs.push(input);
        }
        vertex_input_wgsl.push_str("};\n");

        ProgramInterface {
            layout: ProgramLayout {
                uniforms: uniform_slots,
                uniform_block_size: block_size,
                textures: texture_slots,
                attributes: attribute_slots,
            },
            uniform_sources,
            texture_inputs,
            attribute_inputs,
            uniforms_wgsl,
            textures_wgsl,
            vertex_input_wgsl,
        }
    }

    fn frame_uniforms(&mut self) {
        self.uniform("model_matrix", UniformType::Mat4, UniformSource::ModelMatrix)
            .uniform("view_matrix", UniformType::Mat4, UniformSource::ViewMatrix)
            .uniform("projection_matrix", UniformType::Mat4, UniformSource::ProjectionMatrix)
            .uniform("normal_matrix", UniformType::Mat3, UniformSource::NormalMatrix)
            .uniform("camera_position", UniformType::Vec3, UniformSource::CameraPosition);
    }

    fn light_uniforms(&mut self, params: &ProgramParameters) {
        let l = &params.lights;
        self.uniform("ambient", UniformType::Vec3, UniformSource::Light(LightArray::Ambient));
        if l.directional > 0 {
            self.uniform(
                "dir_lights",
                UniformType::Vec4Array(2 * l.directional),
                UniformSource::Light(LightArray::Directional),
            );
        }
        if l.point > 0 {
            self.uniform(
                "point_lights",
                UniformType::Vec4Array(2 * l.point),
                UniformSource::Light(LightArray::Point),
            );
        }
        if l.spot > 0 {
            self.uniform(
                "spot_lights",
                UniformType::Vec4Array(4 * l.spot),
                UniformSource::Light(LightArray::Spot),
            );
        }
        if l.hemisphere > 0 {
            self.uniform(
                "hemi_lights",
                UniformType::Vec4Array(3 * l.hemisphere),
                UniformSource::Light(LightArray::Hemisphere),
            );
        }

        if !receives_shadows(params) {
            return;
        }
        if l.directional_shadows > 0 {
            self.uniform(
                "dir_shadow_params",
                UniformType::Vec4Array(l.directional_shadows),
                UniformSource::Light(LightArray::DirectionalShadowParams),
            )
            .uniform(
                "dir_shadow_matrices",
                UniformType::Mat4Array(l.directional_shadows),
                UniformSource::Light(LightArray::DirectionalShadowMatrices),
            );
        }
        if l.spot_shadows > 0 {
            self.uniform(
                "spot_shadow_params",
                UniformType::Vec4Array(l.spot_shadows),
                UniformSource::Light(LightArray::SpotShadowParams),
            )
            .uniform(
                "spot_shadow_matrices",
                UniformType::Mat4Array(l.spot_shadows),
                UniformSource::Light(LightArray::SpotShadowMatrices),
            );
        }
        if l.point_shadows > 0 {
            self.uniform(
                "point_shadow_params",
                UniformType::Vec4Array(2 * l.point_shadows),
                UniformSource::Light(LightArray::PointShadowParams),
            );
        }
    }

    fn shadow_textures(&mut self, params: &ProgramParameters) {
        if !receives_shadows(params) {
            return;
        }
        let l = &params.lights;
        for i in 0..l.directional_shadows {
            self.texture(
                format!("dir_shadow_{i}"),
                TextureDimension::D2,
                TextureInput::DirectionalShadow(i),
            );
        }
        for i in 0..l.spot_shadows {
            self.texture(format!("spot_shadow_{i}"), TextureDimension::D2, TextureInput::SpotShadow(i));
        }
        for i in 0..l.point_shadows {
            self.texture(
                format!("point_shadow_{i}"),
                TextureDimension::Cube,
                TextureInput::PointShadow(i),
            );
        }
    }

    fn object_attributes(&mut self, params: &ProgramParameters) {
        let m = params.material;
        if m.contains(MaterialFeatures::SKINNING) {
            if m.contains(MaterialFeatures::INTEGER_SKIN_INDEX) {
                self.geometry_attribute("skin_index", "vec4<u32>");
            } else {
                self.geometry_attribute("skin_index", "vec4<f32>");
            }
            self.geometry_attribute("skin_weight", "vec4<f32>");
        }
        if m.contains(MaterialFeatures::INSTANCING) {
            for column in 0..4 {
                self.attribute(
                    format!("instance_matrix{column}"),
                    "vec4<f32>",
                    AttributeInput::InstanceColumn(column),
                );
            }
        }
        for target in 0..params.morph_targets {
            self.attribute(
                format!("morph_position{target}"),
                "vec3<f32>",
                AttributeInput::MorphTarget(target),
            );
        }
    }

    fn object_uniforms(&mut self, params: &ProgramParameters) {
        if params.material.contains(MaterialFeatures::SKINNING) {
            self.uniform("bones", UniformType::Mat4Array(params.bones.max(1)), UniformSource::Bones);
        }
        if params.morph_targets > 0 {
            self.uniform("morph_influences", UniformType::Vec4, UniformSource::MorphInfluences);
        }
        if params.clipping_planes > 0 {
            self.uniform(
                "clipping_planes",
                UniformType::Vec4Array(params.clipping_planes),
                UniformSource::ClippingPlanes,
            );
        }
    }
}

fn receives_shadows(params: &ProgramParameters) -> bool {
    params.environment.contains(EnvironmentFeatures::SHADOW_MAP)
        && params.material.contains(MaterialFeatures::RECEIVE_SHADOW)
}

/// Interface of a built-in shader family.
#[must_use]
pub fn mesh_interface(params: &ProgramParameters) -> ProgramInterface {
    let family = params.family().unwrap_or("basic");
    let m = params.material;
    let e = params.environment;
    let mut b = InterfaceBuilder::default();

    // Uniforms
    b.frame_uniforms();
    b.uniform("diffuse", UniformType::Vec4, UniformSource::Diffuse);
    match family {
        "lambert" | "standard" | "physical" | "toon" => {
            b.uniform("emissive", UniformType::Vec3, UniformSource::Emissive);
        }
        "phong" => {
            b.uniform("emissive", UniformType::Vec3, UniformSource::Emissive)
                .uniform("specular", UniformType::Vec3, UniformSource::Specular)
                .uniform("shininess", UniformType::F32, UniformSource::Shininess);
        }
        "distance" => {
            b.uniform("reference_position", UniformType::Vec3, UniformSource::ReferencePosition)
                .uniform("near_far", UniformType::Vec2, UniformSource::NearFar);
        }
        _ => {}
    }
    if matches!(family, "standard" | "physical") {
        b.uniform("roughness", UniformType::F32, UniformSource::Roughness)
            .uniform("metalness", UniformType::F32, UniformSource::Metalness);
        if m.contains(MaterialFeatures::ENV_MAP) {
            b.uniform("env_map_intensity", UniformType::F32, UniformSource::EnvMapIntensity);
        }
    }
    if matches!(family, "basic" | "phong") && m.contains(MaterialFeatures::ENV_MAP) {
        b.uniform("reflectivity", UniformType::F32, UniformSource::Reflectivity);
    }
    if family == "toon" {
        b.uniform("bands", UniformType::F32, UniformSource::Bands);
    }
    if m.contains(MaterialFeatures::TRANSMISSION) {
        b.uniform("transmission", UniformType::F32, UniformSource::Transmission)
            .uniform("ior", UniformType::F32, UniformSource::Ior)
            .uniform("thickness", UniformType::F32, UniformSource::Thickness)
            .uniform("resolution", UniformType::Vec2, UniformSource::Resolution);
    }
    if m.contains(MaterialFeatures::ALPHA_TEST) {
        b.uniform("alpha_test", UniformType::F32, UniformSource::AlphaTest);
    }
    if params.tone_mapping.function_name().is_some() {
        b.uniform("exposure", UniformType::F32, UniformSource::Exposure);
    }
    if e.contains(EnvironmentFeatures::LIGHTS) {
        b.light_uniforms(params);
    }
    if e.contains(EnvironmentFeatures::FOG) {
        b.uniform("fog_color", UniformType::Vec3, UniformSource::FogColor)
            .uniform("fog_params", UniformType::Vec4, UniformSource::FogParams);
    }
    b.object_uniforms(params);

    // Textures
    if m.contains(MaterialFeatures::MAP) {
        b.texture("map", TextureDimension::D2, TextureInput::Map);
    }
    if m.contains(MaterialFeatures::MATCAP) {
        b.texture("matcap", TextureDimension::D2, TextureInput::Matcap);
    }
    if m.contains(MaterialFeatures::ENV_MAP) {
        b.texture("env", TextureDimension::Cube, TextureInput::EnvMap);
    }
    if m.contains(MaterialFeatures::TRANSMISSION) {
        b.texture("transmission", TextureDimension::D2, TextureInput::Transmission);
    }
    b.shadow_textures(params);

    // Attributes
    b.geometry_attribute("position", "vec3<f32>");
    if m.contains(MaterialFeatures::VERTEX_NORMALS) {
        b.geometry_attribute("normal", "vec3<f32>");
    }
    if m.contains(MaterialFeatures::VERTEX_UVS) {
        b.geometry_attribute("uv", "vec2<f32>");
    }
    if m.contains(MaterialFeatures::VERTEX_COLORS) {
        b.geometry_attribute("color", "vec4<f32>");
    }
    b.object_attributes(params);

    b.build()
}

/// Interface of a custom shader: frame uniforms, optional lights, then the
/// shader's own uniforms, textures and attributes.
#[must_use]
pub fn custom_interface(params: &ProgramParameters, custom: &CustomShader) -> ProgramInterface {
    let mut b = InterfaceBuilder::default();

    b.frame_uniforms();
    b.uniform("diffuse", UniformType::Vec4, UniformSource::Diffuse);
    if params.material.contains(MaterialFeatures::ALPHA_TEST) {
        b.uniform("alpha_test", UniformType::F32, UniformSource::AlphaTest);
    }
    if params.tone_mapping.function_name().is_some() {
        b.uniform("exposure", UniformType::F32, UniformSource::Exposure);
    }
    if params.environment.contains(EnvironmentFeatures::LIGHTS) {
        b.light_uniforms(params);
    }
    if params.environment.contains(EnvironmentFeatures::FOG) {
        b.uniform("fog_color", UniformType::Vec3, UniformSource::FogColor)
            .uniform("fog_params", UniformType::Vec4, UniformSource::FogParams);
    }
    b.object_uniforms(params);
    for (index, (name, value)) in custom.uniforms.iter().enumerate() {
        b.uniform(name.clone(), value.ty(), UniformSource::Custom(index));
    }

    for (index, (name, texture)) in custom.textures.iter().enumerate() {
        let dimension = if texture.as_ref().is_some_and(|t| t.read().is_cube()) {
            TextureDimension::Cube
        } else {
            TextureDimension::D2
        };
        b.texture(name.clone(), dimension, TextureInput::Custom(index));
    }
    b.shadow_textures(params);

    for name in &custom.attributes {
        let wgsl = match name.as_str() {
            "position" | "normal" => "vec3<f32>",
            "uv" => "vec2<f32>",
            _ => "vec4<f32>",
        };
        b.geometry_attribute(name, wgsl);
    }
    b.object_attributes(params);

    b.build()
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::renderer::lights::LightCounts;
    use crate::renderer::program::parameters::{FrameFeatures, ObjectFeatures};
    use crate::renderer::settings::ToneMapping;
    use crate::resources::{ColorSpace, Material};

    fn params(material: &Material, lights: LightCounts) -> ProgramParameters {
        let frame = FrameFeatures {
            lights,
            shadow_type: None,
            fog: None,
            environment: None,
            tone_mapping: ToneMapping::None,
            output_srgb: false,
            output_color_space: ColorSpace::Linear,
            global_clipping_planes: 0,
            local_clipping_enabled: false,
        };
        let object = ObjectFeatures {
            has_normals: true,
            has_uvs: true,
            ..ObjectFeatures::default()
        };
        ProgramParameters::new(material.data(), &object, &frame)
    }

    #[test]
    fn test_light_arrays_follow_counts() {
        let lights = LightCounts {
            directional: 2,
            spot: 1,
            ..LightCounts::default()
        };
        let interface = mesh_interface(&params(&Material::phong(Vec3::ONE), lights));
        let find = |name: &str| interface.layout.uniforms.iter().find(|u| u.name == name).map(|u| u.ty);

        assert_eq!(find("dir_lights"), Some(UniformType::Vec4Array(4)));
        assert_eq!(find("spot_lights"), Some(UniformType::Vec4Array(4)));
        assert_eq!(find("point_lights"), None);
        assert!(interface.uniforms_wgsl.contains("dir_lights: array<vec4<f32>, 4>,"));
    }

    #[test]
    fn test_offsets_are_aligned_and_sources_parallel() {
        let interface = mesh_interface(&params(&Material::standard(Vec3::ONE, 0.5, 0.0), LightCounts::default()));
        assert_eq!(interface.uniform_sources.len(), interface.layout.uniforms.len());
        for slot in &interface.layout.uniforms {
            assert_eq!(slot.offset % slot.ty.align(), 0, "{} misaligned", slot.name);
        }
        assert_eq!(interface.layout.uniform_block_size % 16, 0);
    }

    #[test]
    fn test_attribute_locations_are_sequential() {
        let interface = mesh_interface(&params(&Material::lambert(Vec3::ONE), LightCounts::default()));
        let names: Vec<_> = interface.layout.attributes.iter().map(|a| (a.name.as_str(), a.location)).collect();
        assert_eq!(names, vec![("position", 0), ("normal", 1), ("uv", 2)]);
        assert!(interface.vertex_input_wgsl.contains("@location(2) uv: vec2<f32>,"));
    }

    #[test]
    fn test_custom_interface_declares_user_inputs() {
        let custom = crate::resources::CustomShader::new("", "")
            .with_uniform("time", 0.0_f32)
            .with_texture("noise", None)
            .with_attributes(&["position", "tangent"]);
        let material = Material::custom(custom.clone());
        let interface = custom_interface(&params(&material, LightCounts::default()), &custom);

        assert_eq!(interface.uniform_sources.last(), Some(&UniformSource::Custom(0)));
        assert_eq!(interface.texture_inputs, vec![TextureInput::Custom(0)]);
        assert!(interface.textures_wgsl.contains("var t_noise: texture_2d<f32>;"));
        assert!(interface.textures_wgsl.contains("@group(1) @binding(1) var s_noise: sampler;"));
        assert!(interface.vertex_input_wgsl.contains("@location(1) tangent: vec4<f32>,"));
    }
}
