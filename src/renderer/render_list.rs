//! Render-list builder.
//!
//! Each frame the scene is walked depth-first from its roots. Visible,
//! layer-matching drawables become [`DrawRecord`]s in one of three buckets:
//!
//! | Bucket        | Condition                  | Default order                                        |
//! |---------------|----------------------------|------------------------------------------------------|
//! | opaque        | neither of the below       | group order, render order, material id, depth asc    |
//! | transmissive  | material transmission > 0  | group order, render order, depth desc, material id   |
//! | transparent   | material `transparent`     | group order, render order, depth desc, material id   |
//!
//! Records live in a pooled arena. Buckets hold indices into it. Every frame
//! the arena is emptied, which drops the geometry and material handles of
//! the previous frame while its allocation is kept. All sorts are stable, so
//! equal keys keep traversal order.
//!
//! Walk rules:
//! - an invisible node hides its whole subtree;
//! - a layer mismatch hides only the node itself;
//! - drawables are frustum-tested with their world bounding sphere unless
//!   `frustum_culled` is off;
//! - a group node with a non-zero `render_order` sets the group order of its
//!   descendants.

use std::cmp::Ordering;

use glam::{Mat4, Vec3};

use crate::renderer::lights::CollectedLight;
use crate::resources::{BoundingSphere, Geometry, GeometryGroup, Material, ResourceId, Shared};
use crate::scene::{Camera, Frustum, Mesh, MeshMaterial, NodeHandle, NodeKind, Scene};

/// One drawable: a node drawn with one material over an optional group range.
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub node: NodeHandle,
    pub geometry: Shared<Geometry>,
    pub material: Shared<Material>,
    pub material_id: ResourceId,
    pub group: Option<GeometryGroup>,
    pub group_order: i32,
    pub render_order: i32,
    /// Clip-space depth of the bounding-sphere center.
    pub z: f32,
    pub world_matrix: Mat4,
}

/// Comparator for one bucket.
pub type SortFn = fn(&DrawRecord, &DrawRecord) -> Ordering;

/// Front-to-back order for opaque draws, grouping equal materials.
#[must_use]
pub fn painter_sort_stable(a: &DrawRecord, b: &DrawRecord) -> Ordering {
    a.group_order
        .cmp(&b.group_order)
        .then(a.render_order.cmp(&b.render_order))
        .then(a.material_id.cmp(&b.material_id))
        .then(a.z.total_cmp(&b.z))
}

/// Back-to-front order for blended draws.
#[must_use]
pub fn reverse_painter_sort_stable(a: &DrawRecord, b: &DrawRecord) -> Ordering {
    a.group_order
        .cmp(&b.group_order)
        .then(a.render_order.cmp(&b.render_order))
        .then(b.z.total_cmp(&a.z))
        .then(a.material_id.cmp(&b.material_id))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Opaque,
    Transmissive,
    Transparent,
}

#[derive(Debug)]
pub struct RenderList {
    records: Vec<DrawRecord>,
    opaque: Vec<usize>,
    transmissive: Vec<usize>,
    transparent: Vec<usize>,
    lights: Vec<CollectedLight>,
    opaque_sort: SortFn,
    transparent_sort: SortFn,
}

impl Default for RenderList {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderList {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            opaque: Vec::new(),
            transmissive: Vec::new(),
            transparent: Vec::new(),
            lights: Vec::new(),
            opaque_sort: painter_sort_stable,
            transparent_sort: reverse_painter_sort_stable,
        }
    }

    /// Starts a new frame. The record storage is kept for reuse; the
    /// records themselves are dropped.
    pub fn init(&mut self) {
        self.records.clear();
        self.opaque.clear();
        self.transmissive.clear();
        self.transparent.clear();
        self.lights.clear();
    }

    /// Adds a record to the bucket its material selects.
    pub fn push(&mut self, record: DrawRecord) {
        let bucket = {
            let material = record.material.read();
            if material.transmission() > 0.0 {
                Bucket::Transmissive
            } else if material.transparent {
                Bucket::Transparent
            } else {
                Bucket::Opaque
            }
        };

        let index = self.records.len();
        self.records.push(record);

        match bucket {
            Bucket::Opaque => self.opaque.push(index),
            Bucket::Transmissive => self.transmissive.push(index),
            Bucket::Transparent => self.transparent.push(index),
        }
    }

    pub fn push_light(&mut self, light: CollectedLight) {
        self.lights.push(light);
    }

    /// Replaces the opaque comparator; `None` restores the default.
    pub fn set_opaque_sort(&mut self, sort: Option<SortFn>) {
        self.opaque_sort = sort.unwrap_or(painter_sort_stable);
    }

    /// Replaces the comparator of the transparent and transmissive buckets;
    /// `None` restores the default.
    pub fn set_transparent_sort(&mut self, sort: Option<SortFn>) {
        self.transparent_sort = sort.unwrap_or(reverse_painter_sort_stable);
    }

    pub fn sort(&mut self) {
        let records = &self.records;
        let opaque = self.opaque_sort;
        let transparent = self.transparent_sort;
        self.opaque.sort_by(|&a, &b| opaque(&records[a], &records[b]));
        self.transmissive.sort_by(|&a, &b| transparent(&records[a], &records[b]));
        self.transparent.sort_by(|&a, &b| transparent(&records[a], &records[b]));
    }

    /// Records of one bucket in draw order.
    pub fn bucket(&self, bucket: Bucket) -> impl Iterator<Item = &DrawRecord> {
        let indices = match bucket {
            Bucket::Opaque => &self.opaque,
            Bucket::Transmissive => &self.transmissive,
            Bucket::Transparent => &self.transparent,
        };
        indices.iter().map(|&i| &self.records[i])
    }

    #[must_use]
    pub fn bucket_len(&self, bucket: Bucket) -> usize {
        match bucket {
            Bucket::Opaque => self.opaque.len(),
            Bucket::Transmissive => self.transmissive.len(),
            Bucket::Transparent => self.transparent.len(),
        }
    }

    #[must_use]
    pub fn lights(&self) -> &[CollectedLight] {
        &self.lights
    }

    /// Records produced this frame.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records the pool can hold without reallocating.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.records.capacity()
    }

    /// Walks `scene` for `camera` and fills the buckets and light list.
    pub fn build(&mut self, scene: &Scene, camera: &Camera) {
        self.init();
        let frustum = camera.frustum();
        let view_projection = camera.view_projection();

        let mut stack: Vec<(NodeHandle, i32)> = scene.roots().iter().rev().map(|&root| (root, 0)).collect();
        while let Some((handle, group_order)) = stack.pop() {
            let Some(node) = scene.get(handle) else {
                continue;
            };
            if !node.visible {
                continue;
            }

            let child_group_order = match node.kind {
                NodeKind::Group if node.render_order != 0 => node.render_order,
                _ => group_order,
            };
            stack.extend(node.children().iter().rev().map(|&child| (child, child_group_order)));

            if !node.layers.test(camera.layers) {
                continue;
            }

            match &node.kind {
                NodeKind::Group => {}
                NodeKind::Light(light) => self.push_light(CollectedLight {
                    node: handle,
                    light: light.clone(),
                    world_matrix: node.world_matrix(),
                    cast_shadow: node.cast_shadow,
                }),
                NodeKind::Mesh(mesh) => {
                    let world_matrix = node.world_matrix();
                    let sphere = world_bounding_sphere(mesh, &world_matrix);
                    if node.frustum_culled && !frustum.intersects_sphere(&sphere) {
                        continue;
                    }
                    let z = view_projection.project_point3(sphere.center).z;
                    self.push_mesh(handle, mesh, world_matrix, node.render_order, group_order, z);
                }
            }
        }
    }

    fn push_mesh(
        &mut self,
        node: NodeHandle,
        mesh: &Mesh,
        world_matrix: Mat4,
        render_order: i32,
        group_order: i32,
        z: f32,
    ) {
        let record = |material: &Shared<Material>, group: Option<GeometryGroup>| DrawRecord {
            node,
            geometry: mesh.geometry.clone(),
            material: material.clone(),
            material_id: material.read().id(),
            group,
            group_order,
            render_order,
            z,
            world_matrix,
        };

        match &mesh.material {
            MeshMaterial::Single(material) => {
                if material.read().visible {
                    self.push(record(material, None));
                }
            }
            MeshMaterial::Multi(materials) => {
                let groups = mesh.geometry.read().groups.clone();
                if groups.is_empty() {
                    if let Some(material) = materials.first()
                        && material.read().visible
                    {
                        self.push(record(material, None));
                    }
                    return;
                }
                for group in groups {
                    let Some(material) = materials.get(group.material_index) else {
                        continue;
                    };
                    if material.read().visible {
                        self.push(record(material, Some(group)));
                    }
                }
            }
        }
    }
}

/// World-space bounds of a mesh, covering every instance when instanced.
#[must_use]
pub fn world_bounding_sphere(mesh: &Mesh, world_matrix: &Mat4) -> BoundingSphere {
    let local = mesh.geometry.read().bounding_sphere();
    let (Some(matrices), Some(count)) = (&mesh.instance_matrices, mesh.instance_count) else {
        return local.transformed(world_matrix);
    };
    let mut bounds = BoundingSphere::EMPTY;
    for instance in 0..count.min(matrices.count()) as usize {
        let mut cols = [0.0; 16];
        for (component, value) in cols.iter_mut().enumerate() {
            *value = matrices.get_f32(instance, component);
        }
        let sphere = local.transformed(&(*world_matrix * Mat4::from_cols_array(&cols)));
        bounds = union(bounds, sphere);
    }
    bounds
}

fn union(a: BoundingSphere, b: BoundingSphere) -> BoundingSphere {
    if a.is_empty() {
        return b;
    }
    if b.is_empty() {
        return a;
    }
    let offset = b.center - a.center;
    let distance = offset.length();
    if distance + b.radius <= a.radius {
        return a;
    }
    if distance + a.radius <= b.radius {
        return b;
    }
    let radius = (a.radius + distance + b.radius) * 0.5;
    let direction = if distance > 0.0 { offset / distance } else { Vec3::ZERO };
    BoundingSphere {
        center: a.center + direction * (radius - a.radius),
        radius,
    }
}

/// Tests a sphere against a frustum, treating empty bounds as visible.
/// Used by passes that cull against light cameras.
#[must_use]
pub fn sphere_visible(frustum: &Frustum, sphere: &BoundingSphere) -> bool {
    sphere.is_empty() || frustum.intersects_sphere(sphere)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::Vec3;

    use super::*;
    use crate::resources::{AttributeBuffer, shared};
    use crate::scene::{Layers, Node};

    fn triangle() -> Shared<Geometry> {
        shared(Geometry::new().with_attribute(
            "position",
            AttributeBuffer::new(&[0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0], 3),
        ))
    }

    fn record(material: &Shared<Material>, z: f32) -> DrawRecord {
        DrawRecord {
            node: NodeHandle::default(),
            geometry: triangle(),
            material: material.clone(),
            material_id: material.read().id(),
            group: None,
            group_order: 0,
            render_order: 0,
            z,
            world_matrix: Mat4::IDENTITY,
        }
    }

    fn camera() -> Camera {
        let mut camera = Camera::perspective(60.0, 1.0, 0.1, 100.0);
        camera.look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        camera
    }

    #[test]
    fn test_opaque_sorted_front_to_back() {
        let material = shared(Material::basic(Vec3::ONE));
        let mut list = RenderList::new();
        for z in [1.0, 5.0, 2.0, 4.0, 3.0] {
            list.push(record(&material, z));
        }
        list.sort();
        let order: Vec<f32> = list.bucket(Bucket::Opaque).map(|r| r.z).collect();
        assert_eq!(order, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_transparent_sorted_back_to_front() {
        let material = shared(Material::basic(Vec3::ONE));
        material.write().edit().transparent = true;
        let mut list = RenderList::new();
        for z in [1.0, 5.0, 2.0, 4.0, 3.0] {
            list.push(record(&material, z));
        }
        list.sort();
        let order: Vec<f32> = list.bucket(Bucket::Transparent).map(|r| r.z).collect();
        assert_eq!(order, vec![5.0, 4.0, 3.0, 2.0, 1.0]);
        assert_eq!(list.bucket_len(Bucket::Opaque), 0);
    }

    #[test]
    fn test_render_order_beats_depth() {
        let material = shared(Material::basic(Vec3::ONE));
        let mut list = RenderList::new();
        let mut late = record(&material, 0.1);
        late.render_order = 1;
        list.push(late);
        list.push(record(&material, 0.9));
        list.sort();
        let order: Vec<i32> = list.bucket(Bucket::Opaque).map(|r| r.render_order).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn test_custom_comparator_and_reset() {
        let material = shared(Material::basic(Vec3::ONE));
        let mut list = RenderList::new();
        list.set_opaque_sort(Some(|a, b| b.z.total_cmp(&a.z)));
        for z in [1.0, 3.0, 2.0] {
            list.push(record(&material, z));
        }
        list.sort();
        let order: Vec<f32> = list.bucket(Bucket::Opaque).map(|r| r.z).collect();
        assert_eq!(order, vec![3.0, 2.0, 1.0]);

        list.set_opaque_sort(None);
        list.sort();
        let order: Vec<f32> = list.bucket(Bucket::Opaque).map(|r| r.z).collect();
        assert_eq!(order, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_pool_is_reused_across_frames() {
        let material = shared(Material::basic(Vec3::ONE));
        let mut list = RenderList::new();
        for z in [1.0, 2.0, 3.0] {
            list.push(record(&material, z));
        }
        let capacity = list.capacity();
        list.init();
        list.push(record(&material, 4.0));
        assert_eq!(list.len(), 1);
        assert_eq!(list.capacity(), capacity);
        assert!(capacity >= 3);
    }

    #[test]
    fn test_init_drops_previous_frame_handles() {
        let material = shared(Material::basic(Vec3::ONE));
        let geometry = triangle();
        let mut list = RenderList::new();
        list.push(DrawRecord {
            geometry: geometry.clone(),
            ..record(&material, 1.0)
        });
        assert_eq!(Arc::strong_count(&geometry), 2);
        assert_eq!(Arc::strong_count(&material), 2);

        list.init();
        assert_eq!(Arc::strong_count(&geometry), 1);
        assert_eq!(Arc::strong_count(&material), 1);
    }

    #[test]
    fn test_invisible_parent_hides_subtree_layer_mismatch_does_not() {
        let material = shared(Material::basic(Vec3::ONE));
        let mut scene = Scene::new();

        let hidden = scene.add(Node::group());
        scene.get_mut(hidden).unwrap().visible = false;
        scene.add_child(hidden, Node::mesh(Mesh::new(triangle(), material.clone())));

        let mut other_layer = Node::group();
        other_layer.layers = Layers::only(3);
        let masked = scene.add(other_layer);
        scene.add_child(masked, Node::mesh(Mesh::new(triangle(), material.clone())));
        scene.update_world_matrices();

        let mut list = RenderList::new();
        list.build(&scene, &camera());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_frustum_culling_respects_flag() {
        let material = shared(Material::basic(Vec3::ONE));
        let mut scene = Scene::new();
        let far_away = Node::mesh(Mesh::new(triangle(), material.clone())).with_position(Vec3::new(1000.0, 0.0, 0.0));
        let culled = scene.add(far_away.clone());
        let mut kept = far_away;
        kept.frustum_culled = false;
        scene.add(kept);
        scene.update_world_matrices();

        let mut list = RenderList::new();
        list.build(&scene, &camera());
        assert_eq!(list.len(), 1);
        assert_ne!(list.bucket(Bucket::Opaque).next().map(|r| r.node), Some(culled));
    }

    #[test]
    fn test_multi_material_emits_one_record_per_group() {
        let a = shared(Material::basic(Vec3::X));
        let b = shared(Material::basic(Vec3::Y));
        b.write().edit().visible = false;
        let geometry = triangle();
        geometry.write().add_group(0, 3, 0);
        geometry.write().add_group(0, 3, 1);
        geometry.write().add_group(0, 3, 7);

        let mut scene = Scene::new();
        scene.add(Node::mesh(Mesh::multi(geometry, vec![a.clone(), b])));
        scene.update_world_matrices();

        let mut list = RenderList::new();
        list.build(&scene, &camera());
        assert_eq!(list.len(), 1);
        let record = list.bucket(Bucket::Opaque).next().unwrap();
        assert_eq!(record.material_id, a.read().id());
        assert_eq!(record.group.map(|g| g.material_index), Some(0));
    }

    #[test]
    fn test_group_render_order_applies_to_descendants() {
        let material = shared(Material::basic(Vec3::ONE));
        let mut scene = Scene::new();
        let mut group = Node::group();
        group.render_order = -1;
        let group = scene.add(group);
        let inner = scene.add_child(group, Node::mesh(Mesh::new(triangle(), material.clone())));
        scene.add(Node::mesh(Mesh::new(triangle(), material)));
        scene.update_world_matrices();

        let mut list = RenderList::new();
        list.build(&scene, &camera());
        list.sort();
        let first = list.bucket(Bucket::Opaque).next().unwrap();
        assert_eq!(first.node, inner);
        assert_eq!(first.group_order, -1);
    }
}
