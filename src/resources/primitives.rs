//! Minimal geometry builders used by passes, demos and tests.

use glam::Vec3;

use super::buffer::AttributeBuffer;
use super::geometry::Geometry;

#[derive(Default)]
struct Builder {
    positions: Vec<f32>,
    normals: Vec<f32>,
    uvs: Vec<f32>,
    indices: Vec<u32>,
}

impl Builder {
    /// Appends one grid face spanned by `u_axis` and `v_axis` around `center`.
    /// Returns the number of indices written.
    fn face(
        &mut self,
        center: Vec3,
        u_axis: Vec3,
        v_axis: Vec3,
        segments_u: u32,
        segments_v: u32,
    ) -> u32 {
        let normal = u_axis.cross(v_axis).normalize_or_zero();
        let base = (self.positions.len() / 3) as u32;
        for iy in 0..=segments_v {
            let v = iy as f32 / segments_v as f32;
            for ix in 0..=segments_u {
                let u = ix as f32 / segments_u as f32;
                let p = center + u_axis * (u - 0.5) + v_axis * (0.5 - v);
                self.positions.extend_from_slice(&p.to_array());
                self.normals.extend_from_slice(&normal.to_array());
                self.uvs.extend_from_slice(&[u, 1.0 - v]);
            }
        }
        let row = segments_u + 1;
        let start = self.indices.len();
        for iy in 0..segments_v {
            for ix in 0..segments_u {
                let a = base + ix + row * iy;
                let b = base + ix + row * (iy + 1);
                let c = base + ix + 1 + row * (iy + 1);
                let d = base + ix + 1 + row * iy;
                self.indices.extend_from_slice(&[a, b, d, b, c, d]);
            }
        }
        (self.indices.len() - start) as u32
    }

    fn finish(self) -> Geometry {
        Geometry::new()
            .with_attribute("position", AttributeBuffer::new(&self.positions, 3))
            .with_attribute("normal", AttributeBuffer::new(&self.normals, 3))
            .with_attribute("uv", AttributeBuffer::new(&self.uvs, 2))
            .with_index(AttributeBuffer::indices(&self.indices))
    }
}

/// A `width` × `height` plane in the XY plane facing +Z.
#[must_use]
pub fn plane(width: f32, height: f32) -> Geometry {
    let mut builder = Builder::default();
    builder.face(Vec3::ZERO, Vec3::X * width, Vec3::Y * height, 1, 1);
    builder.finish()
}

/// An axis-aligned box centered on the origin.
///
/// Each face is its own group (`+X, -X, +Y, -Y, +Z, -Z`, material indices
/// 0..6), so the box can be drawn with a per-face material array.
#[must_use]
pub fn cuboid(width: f32, height: f32, depth: f32) -> Geometry {
    let (w, h, d) = (width * 0.5, height * 0.5, depth * 0.5);
    let faces = [
        (Vec3::X * w, Vec3::NEG_Z * depth, Vec3::Y * height),
        (Vec3::NEG_X * w, Vec3::Z * depth, Vec3::Y * height),
        (Vec3::Y * h, Vec3::X * width, Vec3::NEG_Z * depth),
        (Vec3::NEG_Y * h, Vec3::X * width, Vec3::Z * depth),
        (Vec3::Z * d, Vec3::X * width, Vec3::Y * height),
        (Vec3::NEG_Z * d, Vec3::NEG_X * width, Vec3::Y * height),
    ];

    let mut builder = Builder::default();
    let mut groups = Vec::with_capacity(6);
    let mut start = 0;
    for (material_index, (center, u_axis, v_axis)) in faces.into_iter().enumerate() {
        let count = builder.face(center, u_axis, v_axis, 1, 1);
        groups.push((start, count, material_index));
        start += count;
    }

    let mut geometry = builder.finish();
    for (start, count, material_index) in groups {
        geometry.add_group(start, count, material_index);
    }
    geometry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_layout() {
        let geometry = plane(2.0, 2.0);
        assert_eq!(geometry.vertex_count(), 4);
        assert_eq!(geometry.index().map(AttributeBuffer::count), Some(6));
        let sphere = geometry.bounding_sphere();
        assert!((sphere.radius - 2.0_f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_cuboid_groups_cover_all_faces() {
        let geometry = cuboid(1.0, 1.0, 1.0);
        assert_eq!(geometry.groups.len(), 6);
        assert_eq!(geometry.vertex_count(), 24);
        let total: u32 = geometry.groups.iter().map(|g| g.count).sum();
        assert_eq!(total, 36);
        assert_eq!(geometry.index().and_then(AttributeBuffer::max_index), Some(23));
    }
}
