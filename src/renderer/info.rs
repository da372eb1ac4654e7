//! Frame statistics.

use crate::scene::Topology;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryInfo {
    pub geometries: usize,
    pub textures: usize,
}

/// Counters reset at the start of every `render` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// Frames rendered since the renderer was created.
    pub frame: u64,
    pub calls: u32,
    pub triangles: u64,
    pub points: u64,
    pub lines: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramInfo {
    pub key: String,
    pub label: String,
    pub used_times: u32,
    pub valid: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RenderInfo {
    pub memory: MemoryInfo,
    pub render: FrameInfo,
    pub programs: Vec<ProgramInfo>,
    /// Reset the frame counters automatically on every `render`.
    pub auto_reset: bool,
}

impl RenderInfo {
    #[must_use]
    pub fn new() -> Self {
        Self {
            auto_reset: true,
            ..Self::default()
        }
    }

    /// Accounts one draw of `count` vertices (or indices) × `instances`.
    pub fn update(&mut self, topology: Topology, count: u32, instances: u32) {
        let count = u64::from(count) * u64::from(instances.max(1));
        self.render.calls += 1;
        match topology {
            Topology::Triangles => self.render.triangles += count / 3,
            Topology::TriangleStrip => self.render.triangles += count.saturating_sub(2),
            Topology::Lines => self.render.lines += count / 2,
            Topology::LineStrip => self.render.lines += count.saturating_sub(1),
            Topology::Points => self.render.points += count,
        }
    }

    pub fn reset(&mut self) {
        self.render.calls = 0;
        self.render.triangles = 0;
        self.render.points = 0;
        self.render.lines = 0;
    }
}
