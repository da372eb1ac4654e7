//! Geometry: named attribute channels plus index, groups and bounds.
//!
//! Channel names follow the shader-facing convention used by the program
//! layouts: `position`, `normal`, `uv`, `color`, `skin_index`, `skin_weight`.
//! Morph targets are stored separately as position deltas.

use std::collections::BTreeMap;

use glam::{Mat4, Vec3};
use parking_lot::Mutex;

use super::buffer::AttributeBuffer;
use super::dispose::{DisposeEvent, DisposeSignal};
use super::version_tracker::ChangeTracker;
use super::ResourceId;

/// A contiguous span of the index (or vertex) range drawn with one material.
///
/// Groups may overlap; multi-pass materials rely on that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryGroup {
    pub start: u32,
    pub count: u32,
    pub material_index: usize,
}

/// Limits drawing to a sub-range; `count == None` means "to the end".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawRange {
    pub start: u32,
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub const EMPTY: Self = Self {
        center: Vec3::ZERO,
        radius: -1.0,
    };

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.radius < 0.0
    }

    /// Transforms the sphere; the radius scales by the largest axis scale.
    #[must_use]
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let center = matrix.transform_point3(self.center);
        let sx = matrix.x_axis.truncate().length_squared();
        let sy = matrix.y_axis.truncate().length_squared();
        let sz = matrix.z_axis.truncate().length_squared();
        let scale = sx.max(sy).max(sz).sqrt();
        Self {
            center,
            radius: self.radius * scale,
        }
    }
}

#[derive(Debug)]
pub struct Geometry {
    id: ResourceId,
    pub name: String,
    attributes: BTreeMap<String, AttributeBuffer>,
    index: Option<AttributeBuffer>,
    morph_positions: Vec<AttributeBuffer>,
    pub groups: Vec<GeometryGroup>,
    pub draw_range: DrawRange,
    // Structural changes: channels added or removed, index replaced.
    tracker: ChangeTracker,
    // Lazily computed; invalidated on mutable access to positions.
    bounding_sphere: Mutex<Option<BoundingSphere>>,
    dispose: DisposeSignal,
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new()
    }
}

impl Geometry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ResourceId::next(),
            name: String::new(),
            attributes: BTreeMap::new(),
            index: None,
            morph_positions: Vec::new(),
            groups: Vec::new(),
            draw_range: DrawRange::default(),
            tracker: ChangeTracker::new(),
            bounding_sphere: Mutex::new(None),
            dispose: DisposeSignal::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Structural version (attribute set or index changed).
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.tracker.version()
    }

    // ─── Attributes ──────────────────────────────────────────────────────────

    pub fn set_attribute(&mut self, name: impl Into<String>, buffer: AttributeBuffer) {
        let name = name.into();
        if name == "position" {
            *self.bounding_sphere.get_mut() = None;
        }
        self.attributes.insert(name, buffer);
        self.tracker.bump();
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, buffer: AttributeBuffer) -> Self {
        self.set_attribute(name, buffer);
        self
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<AttributeBuffer> {
        let removed = self.attributes.remove(name);
        if removed.is_some() {
            if name == "position" {
                *self.bounding_sphere.get_mut() = None;
            }
            self.tracker.bump();
        }
        removed
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeBuffer> {
        self.attributes.get(name)
    }

    /// Mutable access for in-place edits. Editing positions invalidates the
    /// cached bounds.
    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut AttributeBuffer> {
        if name == "position" {
            *self.bounding_sphere.get_mut() = None;
        }
        self.attributes.get_mut(name)
    }

    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeBuffer)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Vertex count of the shortest channel, or 0 without attributes.
    #[must_use]
    pub fn vertex_count(&self) -> u32 {
        self.attributes
            .values()
            .map(AttributeBuffer::count)
            .min()
            .unwrap_or(0)
    }

    // ─── Index ───────────────────────────────────────────────────────────────

    pub fn set_index(&mut self, index: Option<AttributeBuffer>) {
        self.index = index;
        self.tracker.bump();
    }

    #[must_use]
    pub fn with_index(mut self, index: AttributeBuffer) -> Self {
        self.set_index(Some(index));
        self
    }

    #[must_use]
    pub fn index(&self) -> Option<&AttributeBuffer> {
        self.index.as_ref()
    }

    pub fn index_mut(&mut self) -> Option<&mut AttributeBuffer> {
        self.index.as_mut()
    }

    // ─── Morph targets ───────────────────────────────────────────────────────

    pub fn set_morph_positions(&mut self, targets: Vec<AttributeBuffer>) {
        self.morph_positions = targets;
        self.tracker.bump();
    }

    #[must_use]
    pub fn morph_positions(&self) -> &[AttributeBuffer] {
        &self.morph_positions
    }

    // ─── Groups ──────────────────────────────────────────────────────────────

    pub fn add_group(&mut self, start: u32, count: u32, material_index: usize) {
        self.groups.push(GeometryGroup {
            start,
            count,
            material_index,
        });
    }

    pub fn clear_groups(&mut self) {
        self.groups.clear();
    }

    // ─── Bounds ──────────────────────────────────────────────────────────────

    /// Object-space bounding sphere, computed on first use and cached.
    pub fn bounding_sphere(&self) -> BoundingSphere {
        let mut cached = self.bounding_sphere.lock();
        if let Some(sphere) = *cached {
            return sphere;
        }
        let sphere = self.compute_bounding_sphere();
        *cached = Some(sphere);
        sphere
    }

    fn compute_bounding_sphere(&self) -> BoundingSphere {
        let Some(position) = self.attributes.get("position") else {
            return BoundingSphere::EMPTY;
        };
        let count = position.count() as usize;
        if count == 0 || position.item_size() < 3 {
            return BoundingSphere::EMPTY;
        }
        let point = |i: usize| {
            Vec3::new(
                position.get_f32(i, 0),
                position.get_f32(i, 1),
                position.get_f32(i, 2),
            )
        };

        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for i in 0..count {
            let p = point(i);
            min = min.min(p);
            max = max.max(p);
        }
        let center = (min + max) * 0.5;
        let mut max_sq = 0.0_f32;
        for i in 0..count {
            max_sq = max_sq.max(center.distance_squared(point(i)));
        }
        // Morph targets can push vertices outside the rest pose.
        for target in &self.morph_positions {
            for i in 0..(target.count() as usize).min(count) {
                let delta = Vec3::new(target.get_f32(i, 0), target.get_f32(i, 1), target.get_f32(i, 2));
                max_sq = max_sq.max(center.distance_squared(point(i) + delta));
            }
        }
        BoundingSphere {
            center,
            radius: max_sq.sqrt(),
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    #[must_use]
    pub fn dispose_signal(&self) -> &DisposeSignal {
        &self.dispose
    }

    /// Releases GPU state in every renderer that uploaded this geometry.
    pub fn dispose(&self) {
        self.dispose.fire(DisposeEvent::Geometry(self.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_sphere_is_cached_and_invalidated() {
        let mut geometry = Geometry::new().with_attribute(
            "position",
            AttributeBuffer::new(&[-1.0_f32, 0.0, 0.0, 1.0, 0.0, 0.0], 3),
        );
        let sphere = geometry.bounding_sphere();
        assert_eq!(sphere.center, Vec3::ZERO);
        assert!((sphere.radius - 1.0).abs() < 1e-6);

        if let Some(position) = geometry.attribute_mut("position") {
            position.write(3, &[3.0_f32]);
        }
        let sphere = geometry.bounding_sphere();
        assert!((sphere.center.x - 1.0).abs() < 1e-6);
        assert!((sphere.radius - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_vertex_count_uses_shortest_channel() {
        let geometry = Geometry::new()
            .with_attribute("position", AttributeBuffer::new(&[0.0_f32; 9], 3))
            .with_attribute("uv", AttributeBuffer::new(&[0.0_f32; 4], 2));
        assert_eq!(geometry.vertex_count(), 2);
    }
}
