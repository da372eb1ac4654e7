//! Renderer Integration Tests
//!
//! Tests for:
//! - Upload caching: buffers, programs and uniform values are sent once and reused
//! - Partial buffer updates from recorded update ranges
//! - Program sharing between materials and feature-driven program splits
//! - Render list: visibility, frustum culling, render order, blending order
//! - Multi-material meshes and shadow passes
//! - Shader failures skip draws without rebuilding every frame

mod common;

use glam::Vec3;
use kiln::resources::Blending;
use kiln::resources::texture::Image;
use kiln::{AttributeBuffer, Geometry, Light, Material, Mesh, Node, Renderer, RendererSettings, Scene, Texture, cuboid, plane, shared};

use common::{RecordingDevice, camera, init_logging};

fn renderer() -> Renderer<RecordingDevice> {
    init_logging();
    Renderer::new(RecordingDevice::new(), RendererSettings::default())
}

fn triangle() -> Geometry {
    Geometry::new()
        .with_attribute(
            "position",
            AttributeBuffer::new(&[-1.0_f32, -1.0, 0.0, 1.0, -1.0, 0.0, 0.0, 1.0, 0.0], 3),
        )
        .with_index(AttributeBuffer::indices(&[0_u32, 1, 2]))
}

fn single_mesh_scene(material: Material) -> Scene {
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(shared(plane(1.0, 1.0)), shared(material))));
    scene.update_world_matrices();
    scene
}

// ============================================================================
// Upload Caching
// ============================================================================

#[test]
fn second_frame_reuses_uploads() {
    let mut renderer = renderer();
    let scene = single_mesh_scene(Material::basic(Vec3::ONE));
    let camera = camera();

    renderer.render(&scene, &camera);
    let first = renderer.device().calls;
    assert!(first.create_buffer > 0);
    assert_eq!(first.compile_program, 1);
    assert_eq!(first.draw, 1);

    renderer.device_mut().clear_log();
    renderer.render(&scene, &camera);
    let second = renderer.device().calls;
    assert_eq!(second.create_buffer, 0);
    assert_eq!(second.write_buffer, 0);
    assert_eq!(second.compile_program, 0);
    assert_eq!(second.draw, 1);
    assert_eq!(renderer.info().render.frame, 2);
}

#[test]
fn frame_counters_report_triangles() {
    let mut renderer = renderer();
    let scene = single_mesh_scene(Material::basic(Vec3::ONE));

    renderer.render(&scene, &camera());
    let info = renderer.info();
    assert_eq!(info.render.calls, 1);
    assert_eq!(info.render.triangles, 2);
    assert_eq!(info.memory.geometries, 1);
    assert_eq!(renderer.device().calls.present, 1);
}

#[test]
fn update_range_writes_only_the_changed_span() {
    let mut renderer = renderer();
    let geometry = shared(triangle());
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(geometry.clone(), shared(Material::basic(Vec3::ONE)))));
    scene.update_world_matrices();
    let camera = camera();

    renderer.render(&scene, &camera);
    renderer.device_mut().clear_log();

    // Second vertex: components 3..6, bytes 12..24.
    geometry
        .write()
        .attribute_mut("position")
        .expect("position attribute")
        .write(3, &[0.5_f32, -0.5, 0.0]);
    renderer.render(&scene, &camera);

    let device = renderer.device();
    assert_eq!(device.calls.create_buffer, 0);
    assert_eq!(device.buffer_writes.len(), 1);
    let (buffer, offset, len) = device.buffer_writes[0];
    assert_eq!((offset, len), (12, 12));

    let contents = &device.buffers[buffer];
    let written: &[f32] = bytemuck::cast_slice(&contents[12..24]);
    assert_eq!(written, &[0.5, -0.5, 0.0]);
}

#[test]
fn resized_attribute_reallocates() {
    let mut renderer = renderer();
    let geometry = shared(triangle());
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(geometry.clone(), shared(Material::basic(Vec3::ONE)))));
    scene.update_world_matrices();
    let camera = camera();

    renderer.render(&scene, &camera);
    renderer.device_mut().clear_log();

    geometry
        .write()
        .attribute_mut("position")
        .expect("position attribute")
        .set_data(&[-1.0_f32, -1.0, 0.0, 1.0, -1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 2.0, 0.0]);
    renderer.render(&scene, &camera);

    let calls = renderer.device().calls;
    assert_eq!(calls.destroy_buffer, 1);
    assert_eq!(calls.create_buffer, 1);
}

#[test]
fn only_changed_uniforms_are_resent() {
    let mut renderer = renderer();
    let material = shared(Material::basic(Vec3::ONE));
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(shared(plane(1.0, 1.0)), material.clone())));
    scene.update_world_matrices();
    let camera = camera();

    renderer.render(&scene, &camera);
    assert!(renderer.device().calls.set_uniform > 0);

    renderer.device_mut().clear_log();
    renderer.render(&scene, &camera);
    assert_eq!(renderer.device().calls.set_uniform, 0);

    material.write().edit().color = Vec3::X;
    renderer.device_mut().clear_log();
    renderer.render(&scene, &camera);
    let calls = renderer.device().calls;
    assert_eq!(calls.set_uniform, 1);
    assert_eq!(calls.compile_program, 0);
    assert_eq!(calls.draw, 1);
}

#[test]
fn shared_program_is_bound_once_per_pass() {
    let mut renderer = renderer();
    let geometry = shared(plane(1.0, 1.0));
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(geometry.clone(), shared(Material::basic(Vec3::X)))));
    scene.add(Node::mesh(Mesh::new(geometry, shared(Material::basic(Vec3::Y)))).with_position(Vec3::X));
    scene.update_world_matrices();

    renderer.render(&scene, &camera());
    let calls = renderer.device().calls;
    assert_eq!(calls.draw, 2);
    assert_eq!(calls.use_program, 1);
}

// ============================================================================
// Programs
// ============================================================================

#[test]
fn same_kind_materials_share_one_program() {
    let mut renderer = renderer();
    let geometry = shared(plane(1.0, 1.0));
    let red = shared(Material::basic(Vec3::X));
    let green = shared(Material::basic(Vec3::Y));
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(geometry.clone(), red.clone())));
    scene.add(Node::mesh(Mesh::new(geometry, green.clone())));
    scene.update_world_matrices();

    renderer.render(&scene, &camera());

    assert_eq!(renderer.device().calls.compile_program, 1);
    assert_eq!(renderer.device().calls.draw, 2);
    assert_eq!(renderer.material_program_count(red.read().id()), 1);
    assert_eq!(renderer.material_program_count(green.read().id()), 1);

    let programs = &renderer.info().programs;
    assert_eq!(programs.len(), 1);
    assert_eq!(programs[0].label, "basic");
    assert_eq!(programs[0].used_times, 2);
}

#[test]
fn alpha_test_selects_a_separate_program() {
    let mut renderer = renderer();
    let geometry = shared(plane(1.0, 1.0));
    let mut cutout = Material::basic(Vec3::ONE);
    cutout.edit().alpha_test = 0.5;

    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(geometry.clone(), shared(Material::basic(Vec3::ONE)))));
    scene.add(Node::mesh(Mesh::new(geometry, shared(cutout))));
    scene.update_world_matrices();

    renderer.render(&scene, &camera());

    assert_eq!(renderer.device().calls.compile_program, 2);
    let keys: Vec<&str> = renderer.info().programs.iter().map(|p| p.key.as_str()).collect();
    assert_eq!(keys.len(), 2);
    assert_ne!(keys[0], keys[1]);
}

#[test]
fn structural_edit_switches_program() {
    let mut renderer = renderer();
    let material = shared(Material::basic(Vec3::ONE));
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(shared(plane(1.0, 1.0)), material.clone())));
    scene.update_world_matrices();
    let camera = camera();

    renderer.render(&scene, &camera);
    material.write().edit().vertex_colors = false;
    renderer.render(&scene, &camera);
    assert_eq!(renderer.device().calls.compile_program, 1);

    material.write().edit().map = Some(shared(Texture::from_image(Image::solid(4, 4, [255; 4]))));
    renderer.render(&scene, &camera);
    assert_eq!(renderer.device().calls.compile_program, 2);
    assert_eq!(renderer.material_program_count(material.read().id()), 2);
}

#[test]
fn env_mapping_change_switches_program() {
    use kiln::resources::{MaterialKind, TextureMapping};

    let cube = |mapping| {
        let mut texture = Texture::from_cube(std::array::from_fn(|_| Image::solid(1, 1, [200; 4])));
        texture.mapping = mapping;
        shared(texture)
    };
    let set_env = |material: &mut Material, env| {
        if let MaterialKind::Standard(params) = &mut material.edit().kind {
            params.env_map = Some(env);
        }
    };

    let mut renderer = renderer();
    let mut standard = Material::standard(Vec3::ONE, 0.5, 0.0);
    let env = cube(TextureMapping::CubeReflection);
    set_env(&mut standard, env.clone());
    let material = shared(standard);
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(shared(plane(1.0, 1.0)), material.clone())));
    scene.update_world_matrices();
    let camera = camera();

    renderer.render(&scene, &camera);
    assert_eq!(renderer.device().calls.compile_program, 1);

    // Flipping the mapping on the bound texture needs the refraction variant.
    env.write().mapping = TextureMapping::CubeRefraction;
    renderer.render(&scene, &camera);
    assert_eq!(renderer.device().calls.compile_program, 2);
    assert_eq!(renderer.material_program_count(material.read().id()), 2);

    // Swapping the env map for a reflection cube is a program-affecting edit.
    let version = material.read().version();
    set_env(&mut *material.write(), cube(TextureMapping::CubeReflection));
    assert_ne!(material.read().version(), version);
    renderer.render(&scene, &camera);
    assert_eq!(renderer.device().calls.compile_program, 2);

    let keys: Vec<&str> = renderer.info().programs.iter().map(|p| p.key.as_str()).collect();
    assert_eq!(keys.len(), 2);
    assert_ne!(keys[0], keys[1]);
}

#[test]
fn failed_compile_skips_draw_and_is_not_retried() {
    let mut renderer = renderer();
    renderer.device_mut().fail_compile = Some(String::from("lambert"));

    let geometry = shared(plane(1.0, 1.0));
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(geometry.clone(), shared(Material::lambert(Vec3::ONE)))));
    scene.add(Node::mesh(Mesh::new(geometry, shared(Material::basic(Vec3::ONE)))));
    scene.update_world_matrices();
    let camera = camera();

    renderer.render(&scene, &camera);
    renderer.render(&scene, &camera);

    let device = renderer.device();
    assert_eq!(device.calls.compile_program, 2);
    assert!(device.draws.iter().all(|d| d.program == "basic"));
    assert_eq!(device.draws.len(), 2);

    let lambert = renderer
        .info()
        .programs
        .iter()
        .find(|p| p.label == "lambert")
        .expect("lambert program record");
    assert!(!lambert.valid);
}

#[test]
fn custom_shader_is_labelled_by_name() {
    use kiln::resources::CustomShader;

    let mut renderer = renderer();
    let mut shader = CustomShader::new(
        "struct VertexOutput { @builtin(position) clip: vec4<f32> }
@vertex fn vs_main(@location(0) position: vec3<f32>) -> VertexOutput {
    return VertexOutput(vec4<f32>(position, 1.0));
}",
        "@fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }",
    );
    shader.name = String::from("flat");
    let scene = single_mesh_scene(Material::custom(shader));

    renderer.render(&scene, &camera());
    assert_eq!(renderer.device().programs.values().next().map(String::as_str), Some("custom:flat"));
}

#[test]
fn out_of_range_index_skips_draw_in_every_mode() {
    let mut renderer = renderer();
    let geometry = Geometry::new()
        .with_attribute(
            "position",
            AttributeBuffer::new(&[-1.0_f32, -1.0, 0.0, 1.0, -1.0, 0.0, 0.0, 1.0, 0.0], 3),
        )
        .with_index(AttributeBuffer::indices(&[0_u32, 1, 5]));
    let geometry = shared(geometry);
    let mut wireframe = Material::basic(Vec3::ONE);
    wireframe.edit().wireframe = true;

    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(geometry.clone(), shared(Material::basic(Vec3::ONE)))));
    scene.add(Node::mesh(Mesh::new(geometry, shared(wireframe))));
    scene.update_world_matrices();

    renderer.render(&scene, &camera());
    let device = renderer.device();
    assert_eq!(device.calls.draw, 0);
    assert_eq!(device.calls.present, 1);
}

// ============================================================================
// Render List
// ============================================================================

#[test]
fn invisible_parent_hides_subtree() {
    let mut renderer = renderer();
    let geometry = shared(plane(1.0, 1.0));
    let material = shared(Material::basic(Vec3::ONE));

    let mut scene = Scene::new();
    let mut parent = Node::group();
    parent.visible = false;
    let parent = scene.add(parent);
    scene.add_child(parent, Node::mesh(Mesh::new(geometry, material)));
    scene.update_world_matrices();

    renderer.render(&scene, &camera());
    assert_eq!(renderer.device().calls.draw, 0);
    assert_eq!(renderer.device().calls.present, 1);
}

#[test]
fn objects_outside_the_frustum_are_culled() {
    let mut renderer = renderer();
    let geometry = shared(plane(1.0, 1.0));
    let material = shared(Material::basic(Vec3::ONE));

    let mut scene = Scene::new();
    // Behind the camera.
    let culled = scene.add(Node::mesh(Mesh::new(geometry, material)).with_position(Vec3::new(0.0, 0.0, 20.0)));
    scene.update_world_matrices();
    let camera = camera();

    renderer.render(&scene, &camera);
    assert_eq!(renderer.device().calls.draw, 0);

    scene.get_mut(culled).expect("node").frustum_culled = false;
    renderer.render(&scene, &camera);
    assert_eq!(renderer.device().calls.draw, 1);
}

#[test]
fn removed_meshes_are_not_kept_alive_by_the_list() {
    let mut renderer = renderer();
    let geometry = shared(plane(1.0, 1.0));
    let material = shared(Material::basic(Vec3::ONE));
    let mut scene = Scene::new();
    let node = scene.add(Node::mesh(Mesh::new(geometry.clone(), material.clone())));
    scene.add(Node::mesh(Mesh::new(shared(plane(1.0, 1.0)), shared(Material::basic(Vec3::ONE)))));
    scene.update_world_matrices();
    let camera = camera();

    renderer.render(&scene, &camera);
    drop(scene.remove(node));
    renderer.render(&scene, &camera);

    assert_eq!(renderer.render_list().len(), 1);
    assert_eq!(std::sync::Arc::strong_count(&geometry), 1);
    assert_eq!(std::sync::Arc::strong_count(&material), 1);
}

#[test]
fn render_order_overrides_material_grouping() {
    let mut renderer = renderer();
    let geometry = shared(plane(1.0, 1.0));

    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(geometry.clone(), shared(Material::basic(Vec3::ONE)))));
    let mut last = Node::mesh(Mesh::new(geometry, shared(Material::phong(Vec3::ONE))));
    last.render_order = -1;
    scene.add(last);
    scene.update_world_matrices();

    renderer.render(&scene, &camera());
    let order: Vec<&str> = renderer.device().draws.iter().map(|d| d.program.as_str()).collect();
    assert_eq!(order, ["phong", "basic"]);
}

#[test]
fn transparent_draws_back_to_front_after_opaque() {
    let mut renderer = renderer();
    let geometry = shared(plane(1.0, 1.0));
    let transparent = |mut material: Material| {
        material.edit().transparent = true;
        material.edit().opacity = 0.5;
        shared(material)
    };

    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(geometry.clone(), transparent(Material::basic(Vec3::ONE)))));
    scene.add(
        Node::mesh(Mesh::new(geometry.clone(), transparent(Material::lambert(Vec3::ONE))))
            .with_position(Vec3::new(0.0, 0.0, -2.0)),
    );
    scene.add(
        Node::mesh(Mesh::new(geometry, shared(Material::phong(Vec3::ONE)))).with_position(Vec3::new(0.0, 0.0, -4.0)),
    );
    scene.update_world_matrices();

    renderer.render(&scene, &camera());
    let order: Vec<&str> = renderer.device().draws_in("main").iter().map(|d| d.program.as_str()).collect();
    assert_eq!(order, ["phong", "lambert", "basic"]);

    let draws = renderer.device().draws_in("main");
    assert_eq!(draws[0].state.blending, Blending::None);
    assert_eq!(draws[2].state.blending, Blending::Normal);
}

#[test]
fn unsorted_lists_keep_traversal_order() {
    init_logging();
    let settings = RendererSettings {
        sort_objects: false,
        ..RendererSettings::default()
    };
    let mut renderer = Renderer::new(RecordingDevice::new(), settings);
    let geometry = shared(plane(1.0, 1.0));

    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(geometry.clone(), shared(Material::basic(Vec3::ONE)))));
    let mut early = Node::mesh(Mesh::new(geometry, shared(Material::phong(Vec3::ONE))));
    early.render_order = -10;
    scene.add(early);
    scene.update_world_matrices();

    renderer.render(&scene, &camera());
    let order: Vec<&str> = renderer.device().draws.iter().map(|d| d.program.as_str()).collect();
    assert_eq!(order, ["basic", "phong"]);
}

// ============================================================================
// Multi-Material & Shadows
// ============================================================================

#[test]
fn multi_material_draws_each_group() {
    let mut renderer = renderer();
    let materials: Vec<_> = (0..6)
        .map(|i| shared(Material::basic(Vec3::splat(i as f32 / 6.0))))
        .collect();
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::multi(shared(cuboid(1.0, 1.0, 1.0)), materials)));
    scene.update_world_matrices();

    renderer.render(&scene, &camera());

    let device = renderer.device();
    assert_eq!(device.calls.compile_program, 1);
    let draws = device.draws_in("main");
    assert_eq!(draws.len(), 6);
    assert!(draws.iter().all(|d| d.call.count == 6 && d.call.indexed));
    let mut firsts: Vec<u32> = draws.iter().map(|d| d.call.first).collect();
    firsts.sort_unstable();
    assert_eq!(firsts, [0, 6, 12, 18, 24, 30]);
}

#[test]
fn single_material_ignores_groups() {
    let mut renderer = renderer();
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(
        shared(cuboid(1.0, 1.0, 1.0)),
        shared(Material::basic(Vec3::ONE)),
    )));
    scene.update_world_matrices();

    renderer.render(&scene, &camera());
    let draws = renderer.device().draws_in("main");
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].call.count, 36);
}

#[test]
fn shadow_pass_draws_only_casters() {
    init_logging();
    let mut settings = RendererSettings::default();
    settings.shadow_map.enabled = true;
    let mut renderer = Renderer::new(RecordingDevice::new(), settings);

    let geometry = shared(cuboid(1.0, 1.0, 1.0));
    let mut scene = Scene::new();
    let mut light = Node::light(Light::directional(Vec3::ONE, 1.0)).with_position(Vec3::new(3.0, 5.0, 2.0));
    light.cast_shadow = true;
    scene.add(light);

    let mut caster = Node::mesh(Mesh::new(geometry.clone(), shared(Material::standard(Vec3::ONE, 0.5, 0.0))));
    caster.cast_shadow = true;
    scene.add(caster);
    scene.add(
        Node::mesh(Mesh::new(geometry, shared(Material::standard(Vec3::ONE, 0.5, 0.0))))
            .with_position(Vec3::new(2.0, 0.0, 0.0)),
    );
    scene.update_world_matrices();

    renderer.render(&scene, &camera());

    let device = renderer.device();
    assert_eq!(device.draws_in("shadow").len(), 1);
    assert_eq!(device.draws_in("main").len(), 2);
    let shadow_index = device.passes.iter().position(|p| p == "shadow").expect("shadow pass");
    let main_index = device.passes.iter().position(|p| p == "main").expect("main pass");
    assert!(shadow_index < main_index);
}
