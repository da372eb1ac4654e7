//! Shader Template Expansion
//!
//! Programs are expanded from WGSL templates with minijinja. Templates use
//! `$$` line statements and `{$ ... $}` blocks so they stay readable as WGSL:
//!
//! ```wgsl
//! $$ for i in range(num_dir_lights)
//!     color += direct_light(dir_light({{ i }}), surface);
//! $$ endfor
//! ```
//!
//! `include` resolves names against `chunks/`. In debug builds templates are
//! read from disk first so they can be edited without rebuilding; release
//! builds use the embedded copies.
//!
//! | Template | Used for |
//! |----------|----------|
//! | `mesh`   | every built-in family |
//! | `custom` | prelude wrapped around caller-supplied WGSL |

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use minijinja::{Environment, Error, ErrorKind, syntax::SyntaxConfig};
use rust_embed::RustEmbed;
use serde::Serialize;

use crate::errors::{KilnError, Result};
use crate::resources::CustomShader;

use super::layout::ProgramInterface;
use super::parameters::{EnvironmentFeatures, MaterialFeatures, ProgramParameters};

static SHADER_ENV: OnceLock<Environment<'static>> = OnceLock::new();

#[derive(RustEmbed)]
#[folder = "src/renderer/program/shaders"]
struct ShaderAssets;

pub fn get_env() -> &'static Environment<'static> {
    SHADER_ENV.get_or_init(|| {
        let mut env = Environment::new();

        match SyntaxConfig::builder()
            .block_delimiters("{$", "$}")
            .variable_delimiters("{{", "}}")
            .line_statement_prefix("$$")
            .build()
        {
            Ok(syntax) => env.set_syntax(syntax),
            Err(err) => log::error!("Invalid shader template syntax: {err}"),
        }
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_undefined_behavior(minijinja::UndefinedBehavior::SemiStrict);

        env.set_loader(shader_loader);
        env.set_path_join_callback(|name, _parent| format!("chunks/{name}").into());

        env
    })
}

fn shader_loader(name: &str) -> std::result::Result<Option<String>, Error> {
    let filename = if std::path::Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wgsl"))
    {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("{name}.wgsl"))
    };

    #[cfg(all(debug_assertions, not(target_arch = "wasm32")))]
    {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("src/renderer/program/shaders")
            .join(filename.as_ref());
        if path.exists() {
            return match std::fs::read_to_string(&path) {
                Ok(source) => Ok(Some(source)),
                Err(e) => Err(Error::new(
                    ErrorKind::TemplateNotFound,
                    format!("Failed to read file: {e}"),
                )),
            };
        }
    }

    if let Some(file) = ShaderAssets::get(&filename)
        && let Ok(source) = std::str::from_utf8(file.data.as_ref())
    {
        return Ok(Some(source.to_string()));
    }

    Ok(None)
}

/// Template context. Material defines are flattened in, so `$$ if USE_FOO`
/// works in both built-in templates and custom sources.
#[derive(Serialize)]
struct ShaderContext<'a> {
    #[serde(flatten)]
    defines: BTreeMap<String, String>,

    family: &'a str,
    uniforms: &'a str,
    textures: &'a str,
    vertex_input: &'a str,

    use_map: bool,
    use_matcap: bool,
    use_env_map: bool,
    env_refraction: bool,
    alpha_test: bool,
    vertex_colors: bool,
    vertex_normals: bool,
    vertex_uvs: bool,
    flat_shading: bool,
    double_sided: bool,
    back_side: bool,
    premultiplied_alpha: bool,
    dithering: bool,
    transmission: bool,
    instancing: bool,
    skinning: bool,
    receive_shadow: bool,
    depth_packing_rgba: bool,

    lights: bool,
    shadow_map: bool,
    shadow_type: &'static str,
    fog: bool,
    fog_exp2: bool,
    output_srgb: bool,
    tone_mapping: Option<&'static str>,

    num_dir_lights: u32,
    num_point_lights: u32,
    num_spot_lights: u32,
    num_hemi_lights: u32,
    num_dir_shadows: u32,
    num_point_shadows: u32,
    num_spot_shadows: u32,
    num_clipping_planes: u32,
    num_clip_intersection: u32,
    num_morph_targets: u32,

    vertex_source: &'a str,
    fragment_source: &'a str,
}

impl<'a> ShaderContext<'a> {
    fn new(params: &'a ProgramParameters, interface: &'a ProgramInterface) -> Self {
        let m = params.material;
        let e = params.environment;
        let receive_shadow =
            e.contains(EnvironmentFeatures::SHADOW_MAP) && m.contains(MaterialFeatures::RECEIVE_SHADOW);
        let shadow_type = if e.contains(EnvironmentFeatures::SHADOW_PCF_SOFT) {
            "pcf_soft"
        } else if e.contains(EnvironmentFeatures::SHADOW_PCF) {
            "pcf"
        } else {
            "basic"
        };
        Self {
            defines: params.defines.to_map(),
            family: params.family().unwrap_or("custom"),
            uniforms: &interface.uniforms_wgsl,
            textures: &interface.textures_wgsl,
            vertex_input: &interface.vertex_input_wgsl,
            use_map: m.contains(MaterialFeatures::MAP),
            use_matcap: m.contains(MaterialFeatures::MATCAP),
            use_env_map: m.contains(MaterialFeatures::ENV_MAP),
            env_refraction: m.contains(MaterialFeatures::ENV_REFRACTION),
            alpha_test: m.contains(MaterialFeatures::ALPHA_TEST),
            vertex_colors: m.contains(MaterialFeatures::VERTEX_COLORS),
            vertex_normals: m.contains(MaterialFeatures::VERTEX_NORMALS),
            vertex_uvs: m.contains(MaterialFeatures::VERTEX_UVS),
            flat_shading: m.contains(MaterialFeatures::FLAT_SHADING),
            double_sided: m.contains(MaterialFeatures::DOUBLE_SIDED),
            back_side: m.contains(MaterialFeatures::BACK_SIDE),
            premultiplied_alpha: m.contains(MaterialFeatures::PREMULTIPLIED_ALPHA),
            dithering: m.contains(MaterialFeatures::DITHERING),
            transmission: m.contains(MaterialFeatures::TRANSMISSION),
            instancing: m.contains(MaterialFeatures::INSTANCING),
            skinning: m.contains(MaterialFeatures::SKINNING),
            receive_shadow,
            depth_packing_rgba: m.contains(MaterialFeatures::DEPTH_PACKING_RGBA),
            lights: e.contains(EnvironmentFeatures::LIGHTS),
            shadow_map: e.contains(EnvironmentFeatures::SHADOW_MAP),
            shadow_type,
            fog: e.contains(EnvironmentFeatures::FOG),
            fog_exp2: e.contains(EnvironmentFeatures::FOG_EXP2),
            output_srgb: e.contains(EnvironmentFeatures::OUTPUT_SRGB),
            tone_mapping: params.tone_mapping.function_name(),
            num_dir_lights: params.lights.directional,
            num_point_lights: params.lights.point,
            num_spot_lights: params.lights.spot,
            num_hemi_lights: params.lights.hemisphere,
            num_dir_shadows: if receive_shadow { params.lights.directional_shadows } else { 0 },
            num_point_shadows: if receive_shadow { params.lights.point_shadows } else { 0 },
            num_spot_shadows: if receive_shadow { params.lights.spot_shadows } else { 0 },
            num_clipping_planes: params.clipping_planes,
            num_clip_intersection: params.clip_intersection,
            num_morph_targets: params.morph_targets,
            vertex_source: "",
            fragment_source: "",
        }
    }
}

fn template_error(template: &str, err: &Error) -> KilnError {
    // The alternate form includes the failing line of the template.
    KilnError::ShaderTemplate {
        template: template.to_string(),
        reason: format!("{err:#}"),
    }
}

fn render(template_name: &str, ctx: &ShaderContext<'_>) -> Result<String> {
    let env = get_env();
    let template = env
        .get_template(template_name)
        .map_err(|e| template_error(template_name, &e))?;
    let source = template.render(ctx).map_err(|e| template_error(template_name, &e))?;
    log::trace!("Generated shader '{template_name}':\n{source}");
    Ok(format!("// === Generated by kiln: {template_name} ===\n{source}"))
}

/// Expands the `mesh` template for a built-in family.
pub fn generate_mesh(params: &ProgramParameters, interface: &ProgramInterface) -> Result<String> {
    render("mesh", &ShaderContext::new(params, interface))
}

/// Expands a custom shader: both user sources are rendered against the
/// defines first, then placed after the generated prelude.
pub fn generate_custom(
    params: &ProgramParameters,
    interface: &ProgramInterface,
    custom: &CustomShader,
) -> Result<String> {
    let env = get_env();
    let mut ctx = ShaderContext::new(params, interface);
    let vertex = env
        .render_str(&custom.vertex, &ctx)
        .map_err(|e| template_error(&format!("{} (vertex)", custom.name), &e))?;
    let fragment = env
        .render_str(&custom.fragment, &ctx)
        .map_err(|e| template_error(&format!("{} (fragment)", custom.name), &e))?;
    ctx.vertex_source = &vertex;
    ctx.fragment_source = &fragment;
    render("custom", &ctx)
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::renderer::lights::LightCounts;
    use crate::renderer::program::layout::{custom_interface, mesh_interface};
    use crate::renderer::program::parameters::{FrameFeatures, ObjectFeatures};
    use crate::renderer::settings::ToneMapping;
    use crate::resources::{ColorSpace, Material};

    fn frame(lights: LightCounts) -> FrameFeatures<'static> {
        FrameFeatures {
            lights,
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

    fn object() -> ObjectFeatures {
        ObjectFeatures {
            has_normals: true,
            has_uvs: true,
            ..ObjectFeatures::default()
        }
    }

    #[test]
    fn test_light_loops_are_unrolled() {
        let lights = LightCounts {
            directional: 2,
            point: 1,
            ..LightCounts::default()
        };
        let params = ProgramParameters::new(Material::phong(Vec3::ONE).data(), &object(), &frame(lights));
        let source = generate_mesh(&params, &mesh_interface(&params)).unwrap();

        assert!(source.contains("dir_light(0u)"));
        assert!(source.contains("dir_light(1u)"));
        assert!(!source.contains("dir_light(2u)"));
        assert!(source.contains("point_light(0u"));
        assert!(source.contains("tone_map_aces("));
        assert!(!source.contains("$$"));
    }

    #[test]
    fn test_custom_sources_see_defines() {
        let custom = CustomShader::new(
            "struct VertexOutput { @builtin(position) clip: vec4<f32> };\n\
             @vertex fn vs_main(in: VertexInput) -> VertexOutput {\n\
                 var out: VertexOutput;\n\
                 out.clip = u.projection_matrix * u.view_matrix * u.model_matrix * vec4<f32>(in.position, 1.0);\n\
                 return out;\n\
             }\n",
            "@fragment fn fs_main() -> @location(0) vec4<f32> {\n\
             $$ if USE_RED\n\
                 return vec4<f32>(1.0, 0.0, 0.0, 1.0);\n\
             $$ else\n\
                 return vec4<f32>(1.0);\n\
             $$ endif\n\
             }\n",
        );
        let mut material = Material::custom(custom.clone());
        material.edit().defines.set("USE_RED", "1");

        let params = ProgramParameters::new(material.data(), &object(), &frame(LightCounts::default()));
        let interface = custom_interface(&params, &custom);
        let source = generate_custom(&params, &interface, &custom).unwrap();

        assert!(source.contains("struct Uniforms"));
        assert!(source.contains("return vec4<f32>(1.0, 0.0, 0.0, 1.0);"));
        assert!(!source.contains("return vec4<f32>(1.0);"));
    }

    #[test]
    fn test_template_error_is_reported() {
        let custom = CustomShader::new("$$ if\n", "");
        let material = Material::custom(custom.clone());
        let params = ProgramParameters::new(material.data(), &object(), &frame(LightCounts::default()));
        let interface = custom_interface(&params, &custom);

        let err = generate_custom(&params, &interface, &custom).unwrap_err();
        assert!(matches!(err, KilnError::ShaderTemplate { .. }));
    }
}
