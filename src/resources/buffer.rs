//! Typed attribute arrays.
//!
//! An [`AttributeBuffer`] is the CPU mirror of one vertex or index buffer: raw
//! bytes tagged with an [`ElementType`] and an item size (components per
//! vertex). Mutations bump the version; [`AttributeBuffer::write`] additionally
//! records an [`UpdateRange`] so the uploader can send only the changed span.

use parking_lot::Mutex;

use super::ResourceId;
use super::version_tracker::ChangeTracker;

/// Scalar type of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    U32,
    I32,
    U16,
    I16,
    U8,
    I8,
}

impl ElementType {
    #[inline]
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::F32 | Self::U32 | Self::I32 => 4,
            Self::U16 | Self::I16 => 2,
            Self::U8 | Self::I8 => 1,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32)
    }
}

/// Rust scalar types that can back an attribute.
pub trait AttributeElement: bytemuck::Pod {
    const TYPE: ElementType;
}

macro_rules! impl_attribute_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl AttributeElement for $ty {
            const TYPE: ElementType = ElementType::$variant;
        })*
    };
}

impl_attribute_element! {
    f32 => F32,
    u32 => U32,
    i32 => I32,
    u16 => U16,
    i16 => I16,
    u8 => U8,
    i8 => I8,
}

/// A dirty span, in elements (not items, not bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRange {
    pub start: usize,
    pub count: usize,
}

#[derive(Debug)]
pub struct AttributeBuffer {
    id: ResourceId,
    data: Vec<u8>,
    element_type: ElementType,
    item_size: u32,
    normalized: bool,
    tracker: ChangeTracker,
    // Drained by the uploader, which only holds a shared reference.
    update_ranges: Mutex<Vec<UpdateRange>>,
}

impl AttributeBuffer {
    /// Creates a buffer from a typed slice. `item_size` is the number of
    /// components per vertex (3 for positions, 1 for indices).
    #[must_use]
    pub fn new<T: AttributeElement>(data: &[T], item_size: u32) -> Self {
        debug_assert!(item_size > 0);
        Self {
            id: ResourceId::next(),
            data: bytemuck::cast_slice(data).to_vec(),
            element_type: T::TYPE,
            item_size,
            normalized: false,
            tracker: ChangeTracker::new(),
            update_ranges: Mutex::new(Vec::new()),
        }
    }

    /// Convenience for `u32` index arrays.
    #[must_use]
    pub fn indices(data: &[u32]) -> Self {
        Self::new(data, 1)
    }

    /// Marks integer data as normalized (`Unorm8x4` vertex colors etc.).
    #[must_use]
    pub fn with_normalized(mut self, normalized: bool) -> Self {
        self.normalized = normalized;
        self
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.tracker.version()
    }

    #[inline]
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    #[inline]
    #[must_use]
    pub fn item_size(&self) -> u32 {
        self.item_size
    }

    #[inline]
    #[must_use]
    pub fn normalized(&self) -> bool {
        self.normalized
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of items (vertices, or indices for an index buffer).
    #[must_use]
    pub fn count(&self) -> u32 {
        (self.data.len() / (self.element_type.size() * self.item_size as usize)) as u32
    }

    /// Item stride in bytes.
    #[must_use]
    pub fn stride(&self) -> u32 {
        (self.element_type.size() as u32) * self.item_size
    }

    /// Reinterprets the data as `T`. Returns `None` on a type mismatch.
    #[must_use]
    pub fn as_slice<T: AttributeElement>(&self) -> Option<&[T]> {
        if T::TYPE != self.element_type {
            return None;
        }
        bytemuck::try_cast_slice(&self.data).ok()
    }

    /// Reads item `index`, component `component` as `f32`.
    #[must_use]
    pub fn get_f32(&self, index: usize, component: usize) -> f32 {
        let i = index * self.item_size as usize + component;
        let size = self.element_type.size();
        let bytes = &self.data[i * size..(i + 1) * size];
        match self.element_type {
            ElementType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            ElementType::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
            ElementType::I32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32,
            ElementType::U16 => f32::from(u16::from_le_bytes([bytes[0], bytes[1]])),
            ElementType::I16 => f32::from(i16::from_le_bytes([bytes[0], bytes[1]])),
            ElementType::U8 => f32::from(bytes[0]),
            ElementType::I8 => f32::from(bytes[0] as i8),
        }
    }

    /// Largest value in an integer buffer, used to validate index ranges.
    #[must_use]
    pub fn max_index(&self) -> Option<u32> {
        match self.element_type {
            ElementType::U32 => self
                .data
                .chunks_exact(4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .max(),
            ElementType::U16 => self
                .data
                .chunks_exact(2)
                .map(|b| u32::from(u16::from_le_bytes([b[0], b[1]])))
                .max(),
            ElementType::U8 => self.data.iter().map(|&i| u32::from(i)).max(),
            _ => None,
        }
    }

    /// Integer contents widened to `u32`; `None` for float buffers.
    #[must_use]
    pub fn to_u32_vec(&self) -> Option<Vec<u32>> {
        match self.element_type {
            ElementType::U32 => Some(
                self.data
                    .chunks_exact(4)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
            ),
            ElementType::U16 => Some(
                self.data
                    .chunks_exact(2)
                    .map(|b| u32::from(u16::from_le_bytes([b[0], b[1]])))
                    .collect(),
            ),
            ElementType::U8 => Some(self.data.iter().map(|&i| u32::from(i)).collect()),
            _ => None,
        }
    }

    /// Replaces the whole contents. Pending update ranges are discarded
    /// because the next upload must send everything.
    pub fn set_data<T: AttributeElement>(&mut self, data: &[T]) {
        self.data.clear();
        self.data.extend_from_slice(bytemuck::cast_slice(data));
        self.element_type = T::TYPE;
        self.update_ranges.get_mut().clear();
        self.tracker.bump();
    }

    /// Overwrites `values` starting at element `start` and records the span.
    ///
    /// Writes past the end are clamped.
    pub fn write<T: AttributeElement>(&mut self, start: usize, values: &[T]) {
        if T::TYPE != self.element_type {
            log::warn!(
                "AttributeBuffer {}: write of {:?} into {:?} buffer ignored",
                self.id,
                T::TYPE,
                self.element_type
            );
            return;
        }
        let total = self.data.len() / self.element_type.size();
        if start >= total {
            return;
        }
        let count = values.len().min(total - start);
        let size = self.element_type.size();
        let src: &[u8] = bytemuck::cast_slice(&values[..count]);
        self.data[start * size..(start + count) * size].copy_from_slice(src);
        self.add_update_range(start, count);
    }

    /// Records a dirty span after in-place edits and bumps the version.
    pub fn add_update_range(&mut self, start: usize, count: usize) {
        self.update_ranges.get_mut().push(UpdateRange { start, count });
        self.tracker.bump();
    }

    /// Marks the whole buffer dirty.
    pub fn needs_update(&mut self) {
        self.update_ranges.get_mut().clear();
        self.tracker.bump();
    }

    #[must_use]
    pub fn has_update_ranges(&self) -> bool {
        !self.update_ranges.lock().is_empty()
    }

    /// Takes the pending ranges. Called by the uploader after it has decided
    /// to perform a partial upload.
    pub fn take_update_ranges(&self) -> Vec<UpdateRange> {
        std::mem::take(&mut *self.update_ranges.lock())
    }
}

impl Clone for AttributeBuffer {
    /// Cloning produces a distinct buffer with its own id.
    fn clone(&self) -> Self {
        Self {
            id: ResourceId::next(),
            data: self.data.clone(),
            element_type: self.element_type,
            item_size: self.item_size,
            normalized: self.normalized,
            tracker: ChangeTracker::new(),
            update_ranges: Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_and_stride() {
        let positions = AttributeBuffer::new(&[0.0_f32; 12], 3);
        assert_eq!(positions.count(), 4);
        assert_eq!(positions.stride(), 12);
        assert_eq!(positions.element_type(), ElementType::F32);
    }

    #[test]
    fn test_write_records_range_and_bumps_version() {
        let mut buffer = AttributeBuffer::new(&[0.0_f32; 8], 2);
        let before = buffer.version();

        buffer.write(2, &[1.0_f32, 2.0]);

        assert_ne!(buffer.version(), before);
        assert_eq!(buffer.get_f32(1, 0), 1.0);
        assert_eq!(buffer.get_f32(1, 1), 2.0);
        assert_eq!(
            buffer.take_update_ranges(),
            vec![UpdateRange { start: 2, count: 2 }]
        );
        assert!(!buffer.has_update_ranges());
    }

    #[test]
    fn test_write_clamps_and_rejects_type_mismatch() {
        let mut buffer = AttributeBuffer::new(&[0_u16; 4], 1);
        buffer.write(3, &[9_u16, 9, 9]);
        assert_eq!(buffer.get_f32(3, 0), 9.0);
        assert_eq!(buffer.get_f32(2, 0), 0.0);

        let version = buffer.version();
        buffer.write(0, &[1.0_f32]);
        assert_eq!(buffer.version(), version);
    }

    #[test]
    fn test_max_index() {
        let index = AttributeBuffer::new(&[0_u16, 7, 3], 1);
        assert_eq!(index.max_index(), Some(7));
        let empty = AttributeBuffer::indices(&[]);
        assert_eq!(empty.max_index(), None);
    }
}
