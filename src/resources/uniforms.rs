//! Uniform values and their WGSL uniform-buffer layout.
//!
//! Alignment and size follow the WGSL uniform address space rules, so a
//! generated `struct` and the byte offsets computed here always agree.

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    F32,
    I32,
    U32,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
    Vec4Array(u32),
    Mat4Array(u32),
}

impl UniformType {
    #[must_use]
    pub fn wgsl(self) -> String {
        match self {
            Self::F32 => "f32".into(),
            Self::I32 => "i32".into(),
            Self::U32 => "u32".into(),
            Self::Vec2 => "vec2<f32>".into(),
            Self::Vec3 => "vec3<f32>".into(),
            Self::Vec4 => "vec4<f32>".into(),
            Self::Mat3 => "mat3x3<f32>".into(),
            Self::Mat4 => "mat4x4<f32>".into(),
            Self::Vec4Array(n) => format!("array<vec4<f32>, {n}>"),
            Self::Mat4Array(n) => format!("array<mat4x4<f32>, {n}>"),
        }
    }

    #[must_use]
    pub const fn align(self) -> u32 {
        match self {
            Self::F32 | Self::I32 | Self::U32 => 4,
            Self::Vec2 => 8,
            _ => 16,
        }
    }

    #[must_use]
    pub const fn size(self) -> u32 {
        match self {
            Self::F32 | Self::I32 | Self::U32 => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 => 16,
            Self::Mat3 => 48,
            Self::Mat4 => 64,
            Self::Vec4Array(n) => 16 * n,
            Self::Mat4Array(n) => 64 * n,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    F32(f32),
    I32(i32),
    U32(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
    Vec4Array(SmallVec<[Vec4; 8]>),
    Mat4Array(Vec<Mat4>),
}

impl UniformValue {
    /// Writes the value into `dst` using the uniform-buffer layout of `ty`.
    ///
    /// Arrays shorter than the declared length leave the tail untouched;
    /// longer arrays are truncated. A value whose kind does not match `ty`
    /// writes nothing and returns `false`.
    pub fn write_to(&self, ty: UniformType, dst: &mut [u8]) -> bool {
        match (self, ty) {
            (Self::F32(v), UniformType::F32) => copy(dst, bytemuck::bytes_of(v)),
            (Self::I32(v), UniformType::I32) => copy(dst, bytemuck::bytes_of(v)),
            (Self::U32(v), UniformType::U32) => copy(dst, bytemuck::bytes_of(v)),
            (Self::Vec2(v), UniformType::Vec2) => copy(dst, bytemuck::bytes_of(v)),
            (Self::Vec3(v), UniformType::Vec3) => copy(dst, bytemuck::bytes_of(v)),
            (Self::Vec4(v), UniformType::Vec4) => copy(dst, bytemuck::bytes_of(v)),
            (Self::Mat4(m), UniformType::Mat4) => copy(dst, bytemuck::bytes_of(m)),
            (Self::Mat3(m), UniformType::Mat3) => {
                // Each column is padded to 16 bytes.
                for (i, col) in [m.x_axis, m.y_axis, m.z_axis].iter().enumerate() {
                    copy(&mut dst[i * 16..], bytemuck::bytes_of(col));
                }
                true
            }
            (Self::Vec4Array(items), UniformType::Vec4Array(n)) => {
                let len = items.len().min(n as usize);
                copy(dst, bytemuck::cast_slice(&items[..len]))
            }
            (Self::Mat4Array(items), UniformType::Mat4Array(n)) => {
                let len = items.len().min(n as usize);
                copy(dst, bytemuck::cast_slice(&items[..len]))
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn ty(&self) -> UniformType {
        match self {
            Self::F32(_) => UniformType::F32,
            Self::I32(_) => UniformType::I32,
            Self::U32(_) => UniformType::U32,
            Self::Vec2(_) => UniformType::Vec2,
            Self::Vec3(_) => UniformType::Vec3,
            Self::Vec4(_) => UniformType::Vec4,
            Self::Mat3(_) => UniformType::Mat3,
            Self::Mat4(_) => UniformType::Mat4,
            Self::Vec4Array(items) => UniformType::Vec4Array(items.len() as u32),
            Self::Mat4Array(items) => UniformType::Mat4Array(items.len() as u32),
        }
    }
}

fn copy(dst: &mut [u8], src: &[u8]) -> bool {
    let len = src.len().min(dst.len());
    dst[..len].copy_from_slice(&src[..len]);
    true
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<u32> for UniformValue {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        Self::Vec2(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        Self::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        Self::Vec4(v)
    }
}

impl From<Mat3> for UniformValue {
    fn from(v: Mat3) -> Self {
        Self::Mat3(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        Self::Mat4(v)
    }
}

/// Computes std-layout offsets for a list of members, returning each offset
/// and the padded struct size.
#[must_use]
pub fn layout_offsets(types: &[UniformType]) -> (Vec<u32>, u32) {
    let mut offsets = Vec::with_capacity(types.len());
    let mut cursor = 0_u32;
    let mut struct_align = 16_u32;
    for ty in types {
        let align = ty.align();
        struct_align = struct_align.max(align);
        cursor = cursor.next_multiple_of(align);
        offsets.push(cursor);
        cursor += ty.size();
    }
    (offsets, cursor.next_multiple_of(struct_align).max(16))
}
