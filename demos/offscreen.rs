//! Offscreen Rendering Example
//!
//! Renders a lit, shadowed box over a ground plane with the headless wgpu
//! device, reads the frame back and prints a few pixels.
//!
//! Run with `RUST_LOG=kiln=debug` to follow resource uploads and program
//! compilation.

use anyhow::Context;
use glam::{Quat, Vec3};
use kiln::renderer::CubeCamera;
use kiln::scene::Fog;
use kiln::{Camera, Light, Material, Mesh, Node, RenderTarget, Renderer, RendererSettings, Scene, ToneMapping, WgpuDevice, cuboid, plane, shared};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let device = pollster::block_on(WgpuDevice::headless(WIDTH, HEIGHT)).context("no usable GPU adapter")?;
    let mut settings = RendererSettings {
        tone_mapping: ToneMapping::AcesFilmic,
        ..RendererSettings::default()
    };
    settings.shadow_map.enabled = true;
    let mut renderer = Renderer::new(device, settings);

    let mut scene = Scene::new();
    scene.fog = Some(Fog::Exp2 {
        color: Vec3::splat(0.05),
        density: 0.02,
    });
    scene.add(Node::light(Light::ambient(Vec3::ONE, 0.2)));

    let mut sun = Node::light(Light::directional(Vec3::new(1.0, 0.95, 0.9), 2.5)).with_position(Vec3::new(4.0, 6.0, 3.0));
    sun.cast_shadow = true;
    scene.add(sun);

    let mut ground = Node::mesh(Mesh::new(
        shared(plane(10.0, 10.0)),
        shared(Material::standard(Vec3::splat(0.8), 0.9, 0.0)),
    ));
    ground.rotation = Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2);
    ground.receive_shadow = true;
    scene.add(ground);

    let mut cube = Node::mesh(Mesh::new(
        shared(cuboid(1.0, 1.0, 1.0)),
        shared(Material::standard(Vec3::new(0.8, 0.2, 0.1), 0.4, 0.1)),
    ))
    .with_position(Vec3::new(0.0, 0.5, 0.0))
    .with_name("cube");
    cube.rotation = Quat::from_rotation_y(0.6);
    cube.cast_shadow = true;
    scene.add(cube);
    scene.update_world_matrices();

    // Reflection probe above the cube; its cube map feeds the scene environment.
    let mut probe = CubeCamera::new(0.1, 50.0, shared(RenderTarget::cube(64)));
    probe.position = Vec3::new(0.0, 2.0, 0.0);
    probe.update(&mut renderer, &scene);
    scene.environment = Some(probe.target().read().texture().clone());

    let mut camera = Camera::perspective(50.0, WIDTH as f32 / HEIGHT as f32, 0.1, 100.0);
    camera.look_at(Vec3::new(3.0, 2.5, 4.0), Vec3::new(0.0, 0.5, 0.0), Vec3::Y);

    renderer.render(&scene, &camera);
    let pixels = renderer.device().read_pixels()?;

    let info = renderer.info();
    log::info!(
        "frame {}: {} draw calls, {} triangles, {} programs",
        info.render.frame,
        info.render.calls,
        info.render.triangles,
        info.programs.len()
    );

    for (x, y) in [(WIDTH / 2, HEIGHT / 2), (10, 10), (WIDTH / 2, HEIGHT - 10)] {
        let offset = ((y * WIDTH + x) * 4) as usize;
        let rgba = &pixels[offset..offset + 4];
        println!("pixel ({x:>3}, {y:>3}) = {rgba:?}");
    }
    Ok(())
}
