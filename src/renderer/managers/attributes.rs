//! Vertex and index buffer uploads.
//!
//! One device buffer per [`AttributeBuffer`]. Records remember the uploaded
//! version; a newer version re-uploads either the recorded update ranges or,
//! when there are none, the whole buffer. A size change reallocates.

use rustc_hash::FxHashMap;

use crate::errors::Result;
use crate::renderer::device::{BufferDescriptor, BufferHandle, BufferUsage, GpuDevice, VertexFormat};
use crate::resources::{AttributeBuffer, ElementType, ResourceId, UpdateRange};

/// Device copy of one attribute buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBuffer {
    pub handle: BufferHandle,
    pub element_type: ElementType,
    pub item_size: u32,
    pub byte_size: usize,
    pub version: u64,
    pub usage: BufferUsage,
}

#[derive(Debug, Default)]
pub struct AttributeManager {
    records: FxHashMap<ResourceId, GpuBuffer>,
}

impl AttributeManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or refreshes the device buffer for `buffer`.
    ///
    /// Returns `None` for empty buffers, which are never uploaded.
    pub fn update<D: GpuDevice>(
        &mut self,
        device: &mut D,
        buffer: &AttributeBuffer,
        usage: BufferUsage,
    ) -> Result<Option<GpuBuffer>> {
        if buffer.is_empty() {
            return Ok(None);
        }

        let id = buffer.id();
        if let Some(record) = self.records.get_mut(&id) {
            if record.version == buffer.version() {
                return Ok(Some(*record));
            }

            let ranges = buffer.take_update_ranges();
            if record.byte_size != buffer.byte_len() {
                log::debug!("Reallocating buffer {id}: {} -> {} bytes", record.byte_size, buffer.byte_len());
                device.destroy_buffer(record.handle);
                record.handle = create(device, buffer, usage)?;
                record.byte_size = buffer.byte_len();
            } else if ranges.is_empty() {
                device.write_buffer(record.handle, 0, buffer.as_bytes());
            } else {
                let element_size = buffer.element_type().size();
                for (start, end) in coalesce(&ranges, element_size, buffer.byte_len()) {
                    device.write_buffer(record.handle, start as u64, &buffer.as_bytes()[start..end]);
                }
            }
            record.version = buffer.version();
            record.element_type = buffer.element_type();
            record.item_size = buffer.item_size();
            return Ok(Some(*record));
        }

        let handle = create(device, buffer, usage)?;
        // The full upload covers anything queued before the first frame.
        buffer.take_update_ranges();
        let record = GpuBuffer {
            handle,
            element_type: buffer.element_type(),
            item_size: buffer.item_size(),
            byte_size: buffer.byte_len(),
            version: buffer.version(),
            usage,
        };
        self.records.insert(id, record);
        Ok(Some(record))
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: ResourceId) -> Option<&GpuBuffer> {
        self.records.get(&id)
    }

    /// Destroys the device buffer. Returns `false` if none existed.
    pub fn release<D: GpuDevice>(&mut self, device: &mut D, id: ResourceId) -> bool {
        match self.records.remove(&id) {
            Some(record) => {
                device.destroy_buffer(record.handle);
                true
            }
            None => false,
        }
    }

    /// Forgets every record without calling the device.
    pub fn reset(&mut self) {
        self.records.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn create<D: GpuDevice>(device: &mut D, buffer: &AttributeBuffer, usage: BufferUsage) -> Result<BufferHandle> {
    let label = match usage {
        BufferUsage::Vertex => "vertex",
        BufferUsage::Index => "index",
    };
    device.create_buffer(&BufferDescriptor {
        label,
        usage,
        contents: buffer.as_bytes(),
    })
}

/// Converts element ranges to byte ranges aligned to 4 bytes, sorted and
/// merged where they touch.
fn coalesce(ranges: &[UpdateRange], element_size: usize, byte_len: usize) -> Vec<(usize, usize)> {
    let mut spans: Vec<(usize, usize)> = ranges
        .iter()
        .filter(|r| r.count > 0)
        .map(|r| {
            let start = (r.start * element_size) & !3;
            let end = ((r.start + r.count) * element_size).next_multiple_of(4).min(byte_len);
            (start, end)
        })
        .filter(|(start, end)| start < end)
        .collect();
    spans.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Device vertex format for an attribute buffer, or `None` when the
/// element type and item size have no vertex format.
#[must_use]
pub fn vertex_format(buffer: &AttributeBuffer) -> Option<VertexFormat> {
    use VertexFormat as F;
    let normalized = buffer.normalized();
    Some(match (buffer.element_type(), buffer.item_size()) {
        (ElementType::F32, 1) => F::Float32,
        (ElementType::F32, 2) => F::Float32x2,
        (ElementType::F32, 3) => F::Float32x3,
        (ElementType::F32, 4) => F::Float32x4,
        (ElementType::U32, 1) => F::Uint32,
        (ElementType::U32, 2) => F::Uint32x2,
        (ElementType::U32, 3) => F::Uint32x3,
        (ElementType::U32, 4) => F::Uint32x4,
        (ElementType::I32, 1) => F::Sint32,
        (ElementType::I32, 4) => F::Sint32x4,
        (ElementType::U16, 2) if normalized => F::Unorm16x2,
        (ElementType::U16, 4) if normalized => F::Unorm16x4,
        (ElementType::U16, 2) => F::Uint16x2,
        (ElementType::U16, 4) => F::Uint16x4,
        (ElementType::I16, 2) => F::Sint16x2,
        (ElementType::I16, 4) => F::Sint16x4,
        (ElementType::U8, 4) if normalized => F::Unorm8x4,
        (ElementType::U8, 4) => F::Uint8x4,
        (ElementType::I8, 4) if normalized => F::Snorm8x4,
        _ => return None,
    })
}
