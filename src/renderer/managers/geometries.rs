//! Per-geometry GPU state.
//!
//! A record lists the attribute buffers uploaded for one geometry so the
//! whole set can be released when the geometry is disposed. The manager also
//! derives wireframe line indices and caches the largest index value used to
//! validate draws.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::errors::Result;
use crate::renderer::device::{BufferUsage, GpuDevice};
use crate::resources::{AttributeBuffer, Geometry, ResourceId};

use super::attributes::{AttributeManager, GpuBuffer};
use super::DisposeHook;

#[derive(Debug, Default)]
struct GeometryRecord {
    buffers: SmallVec<[ResourceId; 8]>,
    version: u64,
    // (index buffer id, index version, max value)
    max_index: Option<(ResourceId, u64, Option<u32>)>,
}

/// Line-list index derived from a triangle geometry.
#[derive(Debug)]
pub struct WireframeIndex {
    pub buffer: AttributeBuffer,
    geometry_version: u64,
    index_version: Option<(ResourceId, u64)>,
    vertex_count: u32,
}

#[derive(Debug)]
pub struct GeometryManager {
    records: FxHashMap<ResourceId, GeometryRecord>,
    wireframes: FxHashMap<ResourceId, WireframeIndex>,
    hook: DisposeHook,
}

impl GeometryManager {
    #[must_use]
    pub fn new(hook: DisposeHook) -> Self {
        Self {
            records: FxHashMap::default(),
            wireframes: FxHashMap::default(),
            hook,
        }
    }

    /// Uploads every channel, the index and morph targets of `geometry`.
    ///
    /// The first call subscribes to the geometry's dispose signal. Buffers
    /// dropped from the geometry since the last call are released.
    pub fn update<D: GpuDevice>(
        &mut self,
        device: &mut D,
        attributes: &mut AttributeManager,
        geometry: &Geometry,
    ) -> Result<()> {
        let id = geometry.id();
        let record = self.records.entry(id).or_insert_with(|| {
            self.hook.watch(geometry.dispose_signal());
            GeometryRecord {
                version: u64::MAX,
                ..GeometryRecord::default()
            }
        });

        if record.version != geometry.version() {
            let current: SmallVec<[ResourceId; 8]> = geometry
                .attributes()
                .map(|(_, buffer)| buffer.id())
                .chain(geometry.index().map(AttributeBuffer::id))
                .chain(geometry.morph_positions().iter().map(AttributeBuffer::id))
                .collect();
            for stale in record.buffers.iter().filter(|b| !current.contains(b)) {
                attributes.release(device, *stale);
            }
            record.buffers = current;
            record.version = geometry.version();
        }

        for (_, buffer) in geometry.attributes() {
            attributes.update(device, buffer, BufferUsage::Vertex)?;
        }
        for target in geometry.morph_positions() {
            attributes.update(device, target, BufferUsage::Vertex)?;
        }
        if let Some(index) = geometry.index() {
            attributes.update(device, index, BufferUsage::Index)?;
        }
        Ok(())
    }

    /// Uploads (building on first use) the wireframe index of a triangle
    /// geometry. Returns the buffer and its index count.
    pub fn wireframe<D: GpuDevice>(
        &mut self,
        device: &mut D,
        attributes: &mut AttributeManager,
        geometry: &Geometry,
    ) -> Result<Option<(GpuBuffer, u32)>> {
        let index_version = geometry.index().map(|i| (i.id(), i.version()));
        let vertex_count = geometry.vertex_count();

        let stale = self.wireframes.get(&geometry.id()).is_none_or(|w| {
            w.geometry_version != geometry.version()
                || w.index_version != index_version
                || w.vertex_count != vertex_count
        });
        if stale {
            let lines = build_wireframe(geometry);
            let fresh = WireframeIndex {
                buffer: AttributeBuffer::indices(&lines),
                geometry_version: geometry.version(),
                index_version,
                vertex_count,
            };
            if let Some(old) = self.wireframes.insert(geometry.id(), fresh) {
                attributes.release(device, old.buffer.id());
            }
        }

        let Some(wireframe) = self.wireframes.get(&geometry.id()) else {
            return Ok(None);
        };
        let count = wireframe.buffer.count();
        Ok(attributes
            .update(device, &wireframe.buffer, BufferUsage::Index)?
            .map(|gpu| (gpu, count)))
    }

    /// Largest index value of the geometry's index buffer, cached per index
    /// version.
    pub fn max_index(&mut self, geometry: &Geometry) -> Option<u32> {
        let index = geometry.index()?;
        let record = self.records.get_mut(&geometry.id())?;
        match record.max_index {
            Some((id, version, max)) if id == index.id() && version == index.version() => max,
            _ => {
                let max = index.max_index();
                record.max_index = Some((index.id(), index.version(), max));
                max
            }
        }
    }

    /// Releases every buffer of the geometry. Returns `false` when the
    /// geometry had no GPU state.
    pub fn release<D: GpuDevice>(&mut self, device: &mut D, attributes: &mut AttributeManager, id: ResourceId) -> bool {
        let Some(record) = self.records.remove(&id) else {
            return false;
        };
        for buffer in record.buffers {
            attributes.release(device, buffer);
        }
        if let Some(wireframe) = self.wireframes.remove(&id) {
            attributes.release(device, wireframe.buffer.id());
        }
        true
    }

    /// Forgets every record without calling the device.
    pub fn reset(&mut self) {
        self.records.clear();
        self.wireframes.clear();
    }

    #[must_use]
    pub fn contains(&self, id: ResourceId) -> bool {
        self.records.contains_key(&id)
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

/// Three edges per triangle, in index order. Shared edges are emitted twice.
fn build_wireframe(geometry: &Geometry) -> Vec<u32> {
    let triangles: Vec<u32> = match geometry.index() {
        Some(index) => index.to_u32_vec().unwrap_or_default(),
        None => (0..geometry.vertex_count()).collect(),
    };
    let mut lines = Vec::with_capacity(triangles.len() * 2);
    for tri in triangles.chunks_exact(3) {
        let (a, b, c) = (tri[0], tri[1], tri[2]);
        lines.extend_from_slice(&[a, b, b, c, c, a]);
    }
    lines
}
