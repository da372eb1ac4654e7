//! Scene and Camera Integration Tests
//!
//! Tests for:
//! - Hierarchy: add, attach, detach, subtree removal
//! - World matrix propagation
//! - Camera projection and frustum-sphere intersection
//! - Layer masks between cameras and nodes

mod common;

use glam::{Mat4, Quat, Vec3, Vec4};
use kiln::resources::BoundingSphere;
use kiln::scene::{Camera, Layers};
use kiln::{Material, Mesh, Node, Renderer, RendererSettings, Scene, plane, shared};

use common::{RecordingDevice, camera, init_logging};

const EPSILON: f32 = 1e-4;

fn approx_vec(a: Vec3, b: Vec3) -> bool {
    (a - b).length() < EPSILON
}

// ============================================================================
// Hierarchy
// ============================================================================

#[test]
fn child_inherits_parent_transform() {
    let mut scene = Scene::new();
    let mut parent = Node::group().with_position(Vec3::new(1.0, 0.0, 0.0));
    parent.rotation = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
    let parent = scene.add(parent);
    let child = scene.add_child(parent, Node::group().with_position(Vec3::new(0.0, 0.0, 1.0)));
    scene.update_world_matrices();

    // +Z rotated a quarter turn about Y becomes +X.
    let position = scene.get(child).expect("child").world_position();
    assert!(approx_vec(position, Vec3::new(2.0, 0.0, 0.0)), "got {position}");
}

#[test]
fn manual_world_matrix_is_kept() {
    let mut scene = Scene::new();
    let mut fixed = Node::group();
    fixed.matrix_auto_update = false;
    fixed.set_world_matrix(Mat4::from_translation(Vec3::new(0.0, 3.0, 0.0)));
    let fixed = scene.add(fixed);
    let child = scene.add_child(fixed, Node::group().with_position(Vec3::X));
    scene.update_world_matrices();

    assert!(approx_vec(scene.get(fixed).expect("fixed").world_position(), Vec3::new(0.0, 3.0, 0.0)));
    assert!(approx_vec(scene.get(child).expect("child").world_position(), Vec3::new(1.0, 3.0, 0.0)));
}

#[test]
fn attach_moves_node_and_rejects_cycles() {
    let mut scene = Scene::new();
    let a = scene.add(Node::group().with_name("a"));
    let b = scene.add(Node::group().with_name("b"));
    scene.attach(b, a);

    assert_eq!(scene.roots(), &[a]);
    assert_eq!(scene.get(b).and_then(Node::parent), Some(a));

    // `a` is an ancestor of `b`; the move would create a cycle.
    scene.attach(a, b);
    assert_eq!(scene.get(a).and_then(Node::parent), None);
    assert_eq!(scene.get(a).map(|n| n.children().to_vec()), Some(vec![b]));

    scene.detach(b);
    assert_eq!(scene.roots(), &[a, b]);
    assert!(scene.get(a).expect("a").children().is_empty());
}

#[test]
fn remove_drops_whole_subtree() {
    let mut scene = Scene::new();
    let root = scene.add(Node::group());
    let child = scene.add_child(root, Node::group());
    let grandchild = scene.add_child(child, Node::group());
    let other = scene.add(Node::group());

    let removed = scene.remove(child);
    assert_eq!(removed.len(), 2);
    assert!(scene.get(child).is_none());
    assert!(scene.get(grandchild).is_none());
    assert!(scene.get(root).expect("root").children().is_empty());
    assert_eq!(scene.len(), 2);
    assert!(scene.get(other).is_some());
}

// ============================================================================
// Camera & Frustum
// ============================================================================

#[test]
fn perspective_maps_near_and_far_to_unit_depth() {
    let camera = Camera::perspective(60.0, 1.0, 0.5, 50.0);
    let projection = camera.projection_matrix();

    let near = projection * Vec4::new(0.0, 0.0, -0.5, 1.0);
    let far = projection * Vec4::new(0.0, 0.0, -50.0, 1.0);
    assert!((near.z / near.w).abs() < EPSILON);
    assert!((far.z / far.w - 1.0).abs() < EPSILON);
}

#[test]
fn look_at_places_camera() {
    let camera = camera();
    assert!(approx_vec(camera.position(), Vec3::new(0.0, 0.0, 5.0)));

    let origin = camera.view_matrix().transform_point3(Vec3::ZERO);
    assert!(approx_vec(origin, Vec3::new(0.0, 0.0, -5.0)));
}

#[test]
fn frustum_tests_spheres_against_all_planes() {
    let frustum = camera().frustum();
    let sphere = |center: Vec3, radius: f32| BoundingSphere { center, radius };

    assert!(frustum.intersects_sphere(&sphere(Vec3::ZERO, 1.0)));
    // Behind the camera.
    assert!(!frustum.intersects_sphere(&sphere(Vec3::new(0.0, 0.0, 10.0), 1.0)));
    // Far off to the side, but large enough to reach in.
    assert!(!frustum.intersects_sphere(&sphere(Vec3::new(50.0, 0.0, 0.0), 1.0)));
    assert!(frustum.intersects_sphere(&sphere(Vec3::new(50.0, 0.0, 0.0), 50.0)));
    // Beyond the far plane.
    assert!(!frustum.intersects_sphere(&sphere(Vec3::new(0.0, 0.0, -200.0), 1.0)));
    assert!(!frustum.intersects_sphere(&BoundingSphere::EMPTY));
}

#[test]
fn orthographic_frustum_contains_box_interior() {
    let mut camera = Camera::orthographic(-2.0, 2.0, 2.0, -2.0, 0.1, 10.0);
    camera.look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
    let frustum = camera.frustum();

    assert!(frustum.contains_point(Vec3::new(1.9, -1.9, 0.0)));
    assert!(!frustum.contains_point(Vec3::new(2.1, 0.0, 0.0)));
    assert!(!frustum.contains_point(Vec3::new(0.0, 0.0, -6.0)));
}

// ============================================================================
// Layers
// ============================================================================

#[test]
fn camera_layers_filter_draws() {
    init_logging();
    let mut renderer = Renderer::new(RecordingDevice::new(), RendererSettings::default());
    let geometry = shared(plane(1.0, 1.0));
    let mut scene = Scene::new();
    scene.add(Node::mesh(Mesh::new(geometry.clone(), shared(Material::basic(Vec3::ONE)))));
    let mut overlay = Node::mesh(Mesh::new(geometry, shared(Material::basic(Vec3::ONE))));
    overlay.layers = Layers::only(3);
    scene.add(overlay);
    scene.update_world_matrices();

    let mut camera = camera();
    renderer.render(&scene, &camera);
    assert_eq!(renderer.device().calls.draw, 1);

    camera.layers.enable(3);
    renderer.device_mut().clear_log();
    renderer.render(&scene, &camera);
    assert_eq!(renderer.device().calls.draw, 2);

    camera.layers = Layers::only(3);
    renderer.device_mut().clear_log();
    renderer.render(&scene, &camera);
    assert_eq!(renderer.device().calls.draw, 1);
}
