//! Resource Lifetime Integration Tests
//!
//! Tests for:
//! - Dispose: geometries, textures, materials and render targets release
//!   their device state exactly once
//! - Program reference counting across materials
//! - Render targets: multisampling and its fallbacks
//! - Texture fallbacks: placeholders and resizing for device limits
//! - Context loss and recovery

mod common;

use glam::Vec3;
use kiln::renderer::DeviceCapabilities;
use kiln::resources::texture::{Image, TextureFormat, TextureSource};
use kiln::{Material, Mesh, Node, RenderTarget, Renderer, RendererSettings, Scene, Texture, plane, shared};

use common::{RecordingDevice, camera, init_logging};

fn renderer_with(device: RecordingDevice) -> Renderer<RecordingDevice> {
    init_logging();
    Renderer::new(device, RendererSettings::default())
}

fn renderer() -> Renderer<RecordingDevice> {
    renderer_with(RecordingDevice::new())
}

// ============================================================================
// Dispose
// ============================================================================

#[test]
fn geometry_dispose_destroys_its_buffers() {
    let mut renderer = renderer();
    let geometry = shared(plane(1.0, 1.0));
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(geometry.clone(), shared(Material::basic(Vec3::ONE)))));
    scene.update_world_matrices();

    renderer.render(&scene, &camera());
    let created = renderer.device().calls.create_buffer;
    assert!(created > 0);

    geometry.read().dispose();
    assert_eq!(renderer.process_disposals(), 1);
    assert_eq!(renderer.device().calls.destroy_buffer, created);
    assert!(renderer.device().buffers.is_empty());
}

#[test]
fn texture_dispose_twice_destroys_once() {
    let mut renderer = renderer();
    let texture = shared(Texture::from_image(Image::solid(4, 4, [200, 100, 50, 255])));
    let mut material = Material::basic(Vec3::ONE);
    material.edit().map = Some(texture.clone());
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(shared(plane(1.0, 1.0)), shared(material))));
    scene.update_world_matrices();

    renderer.render(&scene, &camera());
    let calls = renderer.device().calls;
    assert_eq!(calls.create_texture, 1);
    assert_eq!(calls.write_texture, 1);
    assert_eq!(calls.set_sampler, 1);
    assert_eq!(renderer.info().memory.textures, 1);

    texture.read().dispose();
    texture.read().dispose();
    assert_eq!(renderer.process_disposals(), 1);
    assert_eq!(renderer.device().calls.destroy_texture, 1);
    assert_eq!(renderer.process_disposals(), 0);
}

#[test]
fn unused_resource_dispose_is_a_no_op() {
    let mut renderer = renderer();
    let texture = Texture::from_image(Image::solid(2, 2, [0; 4]));
    texture.dispose();
    assert_eq!(renderer.process_disposals(), 0);
    assert_eq!(renderer.device().calls.destroy_texture, 0);
}

#[test]
fn texture_edit_reuploads_in_place() {
    let mut renderer = renderer();
    let texture = shared(Texture::from_image(Image::solid(4, 4, [0; 4])));
    let mut material = Material::basic(Vec3::ONE);
    material.edit().map = Some(texture.clone());
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(shared(plane(1.0, 1.0)), shared(material))));
    scene.update_world_matrices();
    let camera = camera();

    renderer.render(&scene, &camera);
    renderer.device_mut().clear_log();

    texture.write().needs_update();
    renderer.render(&scene, &camera);
    let calls = renderer.device().calls;
    assert_eq!(calls.create_texture, 0);
    assert_eq!(calls.write_texture, 1);
}

// ============================================================================
// Program Reference Counting
// ============================================================================

#[test]
fn program_outlives_all_but_last_material() {
    let mut renderer = renderer();
    let geometry = shared(plane(1.0, 1.0));
    let first = shared(Material::basic(Vec3::X));
    let second = shared(Material::basic(Vec3::Y));
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(geometry.clone(), first.clone())));
    scene.add(Node::mesh(Mesh::new(geometry, second.clone())));
    scene.update_world_matrices();

    renderer.render(&scene, &camera());
    assert_eq!(renderer.programs().len(), 1);

    first.read().dispose();
    renderer.process_disposals();
    assert_eq!(renderer.device().calls.destroy_program, 0);
    assert_eq!(renderer.programs().len(), 1);
    assert_eq!(renderer.material_program_count(first.read().id()), 0);

    second.read().dispose();
    renderer.process_disposals();
    assert_eq!(renderer.device().calls.destroy_program, 1);
    assert!(renderer.programs().is_empty());
    assert!(renderer.device().programs.is_empty());
}

#[test]
fn material_releases_every_program_it_used() {
    let mut renderer = renderer();
    let material = shared(Material::basic(Vec3::ONE));
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(shared(plane(1.0, 1.0)), material.clone())));
    scene.update_world_matrices();
    let camera = camera();

    renderer.render(&scene, &camera);
    material.write().edit().alpha_test = 0.25;
    renderer.render(&scene, &camera);
    assert_eq!(renderer.material_program_count(material.read().id()), 2);

    material.read().dispose();
    renderer.process_disposals();
    assert_eq!(renderer.device().calls.destroy_program, 2);
}

// ============================================================================
// Render Targets
// ============================================================================

fn render_into(renderer: &mut Renderer<RecordingDevice>, target: RenderTarget) -> kiln::Shared<RenderTarget> {
    let target = shared(target);
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(shared(plane(1.0, 1.0)), shared(Material::basic(Vec3::ONE)))));
    scene.update_world_matrices();
    renderer.set_render_target(Some(target.clone()), 0);
    renderer.render(&scene, &camera());
    target
}

#[test]
fn multisampled_target_resolves_each_frame() {
    let mut renderer = renderer();
    render_into(&mut renderer, RenderTarget::new(64, 64).with_samples(4));

    let device = renderer.device();
    assert!(device.textures.values().any(|t| t.sample_count == 4));
    assert_eq!(device.calls.resolve_framebuffer, 1);
    assert_eq!(device.calls.present, 0);
}

#[test]
fn multisampling_falls_back_without_resolve_support() {
    let caps = DeviceCapabilities {
        multisample_resolve: false,
        ..DeviceCapabilities::default()
    };
    let mut renderer = renderer_with(RecordingDevice::with_caps(caps));
    render_into(&mut renderer, RenderTarget::new(64, 64).with_samples(4));

    let device = renderer.device();
    assert!(device.textures.values().all(|t| t.sample_count == 1));
    assert_eq!(device.calls.resolve_framebuffer, 0);
    assert_eq!(device.draws.len(), 1);
}

#[test]
fn sample_count_is_clamped_to_device_limit() {
    let caps = DeviceCapabilities {
        max_samples: 2,
        ..DeviceCapabilities::default()
    };
    let mut renderer = renderer_with(RecordingDevice::with_caps(caps));
    render_into(&mut renderer, RenderTarget::new(64, 64).with_samples(8));

    let samples: Vec<u32> = renderer.device().textures.values().map(|t| t.sample_count).collect();
    assert!(samples.contains(&2));
    assert!(samples.iter().all(|&s| s <= 2));
}

#[test]
fn render_target_dispose_releases_storage() {
    let mut renderer = renderer();
    let target = render_into(&mut renderer, RenderTarget::new(32, 32));
    let created = renderer.device().calls.create_texture;
    assert_eq!(renderer.device().calls.create_framebuffer, 1);

    renderer.set_render_target(None, 0);
    target.read().dispose();
    renderer.process_disposals();

    let calls = renderer.device().calls;
    assert_eq!(calls.destroy_framebuffer, 1);
    assert_eq!(calls.destroy_texture, created);
    assert!(renderer.device().framebuffers.is_empty());
}

#[test]
fn failed_target_allocation_leaks_nothing() {
    let mut renderer = renderer();
    renderer.device_mut().fail_framebuffers = true;
    let target = render_into(&mut renderer, RenderTarget::new(64, 64).with_samples(4));
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(shared(plane(1.0, 1.0)), shared(Material::basic(Vec3::ONE)))));
    scene.update_world_matrices();
    for _ in 0..4 {
        renderer.render(&scene, &camera());
    }

    let device = renderer.device();
    assert!(device.calls.create_texture > 0);
    assert_eq!(device.calls.destroy_texture, device.calls.create_texture);
    assert!(device.textures.is_empty());
    assert_eq!(device.calls.draw, 0);

    // Once the device accepts framebuffers the target allocates normally and
    // dispose frees all of it.
    renderer.device_mut().fail_framebuffers = false;
    renderer.render(&scene, &camera());
    assert_eq!(renderer.device().textures.len(), 3);
    assert_eq!(renderer.device().calls.resolve_framebuffer, 1);

    renderer.set_render_target(None, 0);
    target.read().dispose();
    renderer.process_disposals();
    assert!(renderer.device().textures.is_empty());
    assert!(renderer.device().framebuffers.is_empty());
}

// ============================================================================
// Texture Fallbacks
// ============================================================================

fn textured_scene(texture: Texture) -> Scene {
    let mut material = Material::basic(Vec3::ONE);
    material.edit().map = Some(shared(texture));
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(shared(plane(1.0, 1.0)), shared(material))));
    scene.update_world_matrices();
    scene
}

#[test]
fn unsupported_format_draws_with_placeholder() {
    let caps = DeviceCapabilities {
        float_textures: false,
        ..DeviceCapabilities::default()
    };
    let mut renderer = renderer_with(RecordingDevice::with_caps(caps));
    let texture = Texture::new(TextureSource::Image(Image::new(1, 1, vec![0; 16])), TextureFormat::Rgba32Float);
    let scene = textured_scene(texture);
    let camera = camera();

    renderer.render(&scene, &camera);
    renderer.render(&scene, &camera);

    let device = renderer.device();
    assert_eq!(device.calls.draw, 2);
    assert_eq!(device.calls.create_texture, 1);
    let placeholder = device.textures.values().next().expect("placeholder texture");
    assert_eq!(placeholder.label, "placeholder");
    assert_eq!((placeholder.width, placeholder.height), (1, 1));
    assert_eq!(renderer.info().memory.textures, 0);
}

#[test]
fn oversized_image_is_resized_to_device_limit() {
    let caps = DeviceCapabilities {
        max_texture_size: 4,
        ..DeviceCapabilities::default()
    };
    let mut renderer = renderer_with(RecordingDevice::with_caps(caps));
    let scene = textured_scene(Texture::from_image(Image::solid(16, 8, [255, 0, 0, 255])));
    let camera = camera();

    renderer.render(&scene, &camera);
    renderer.render(&scene, &camera);

    let device = renderer.device();
    assert_eq!(device.calls.draw, 2);
    assert_eq!(device.calls.create_texture, 1);
    let uploaded = device.textures.values().next().expect("uploaded texture");
    assert_eq!((uploaded.width, uploaded.height), (4, 2));
    assert_eq!(renderer.info().memory.textures, 1);
}

#[test]
fn set_size_applies_pixel_ratio() {
    init_logging();
    let settings = RendererSettings {
        pixel_ratio: 2.0,
        ..RendererSettings::default()
    };
    let mut renderer = Renderer::new(RecordingDevice::new(), settings);
    renderer.set_size(100, 50);
    assert_eq!(renderer.device().size, (200, 100));
}

// ============================================================================
// Context Loss
// ============================================================================

#[test]
fn lost_context_skips_frames_and_recovers() {
    let mut renderer = renderer();
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(shared(plane(1.0, 1.0)), shared(Material::basic(Vec3::ONE)))));
    scene.update_world_matrices();
    let camera = camera();

    renderer.render(&scene, &camera);
    let buffers = renderer.device().calls.create_buffer;

    renderer.device_mut().lost = true;
    renderer.device_mut().clear_log();
    renderer.render(&scene, &camera);
    renderer.render(&scene, &camera);
    let calls = renderer.device().calls;
    assert_eq!(calls.begin_frame, 0);
    assert_eq!(calls.draw, 0);
    assert_eq!(calls.present, 0);

    renderer.device_mut().restore();
    renderer.render(&scene, &camera);
    let calls = renderer.device().calls;
    assert_eq!(calls.create_buffer, buffers);
    assert_eq!(calls.compile_program, 1);
    assert_eq!(calls.destroy_buffer, 0);
    assert_eq!(calls.destroy_program, 0);
    assert_eq!(calls.draw, 1);
    assert_eq!(renderer.programs().len(), 1);
}

#[test]
fn disposal_after_recovery_is_delivered_once() {
    let mut renderer = renderer();
    let material = shared(Material::basic(Vec3::ONE));
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(shared(plane(1.0, 1.0)), material.clone())));
    scene.update_world_matrices();
    let camera = camera();

    renderer.render(&scene, &camera);
    renderer.device_mut().lost = true;
    renderer.render(&scene, &camera);
    renderer.device_mut().restore();
    renderer.render(&scene, &camera);

    assert_eq!(material.read().dispose_signal().subscriber_count(), 1);
    material.read().dispose();
    assert_eq!(renderer.process_disposals(), 1);
    assert_eq!(renderer.device().calls.destroy_program, 1);
}
