//! Tracked device state.
//!
//! The device keeps program, render-state, texture and vertex bindings until
//! they change. These caches remember what was last set so redundant calls
//! are skipped. Both are reset at the start of every pass.

use smallvec::SmallVec;

use super::device::{
    BufferHandle, CullFace, FrontFace, GpuDevice, ProgramHandle, RenderState, TextureHandle,
};
use super::program::ProgramId;
use crate::resources::{Blending, MaterialData, ResourceId, Side};

#[derive(Debug, Default)]
pub struct StateCache {
    program: Option<ProgramHandle>,
    render_state: Option<RenderState>,
    textures: SmallVec<[Option<TextureHandle>; 16]>,
}

impl StateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `program` unless it is already bound. Returns `true` if bound now.
    pub fn use_program<D: GpuDevice>(&mut self, device: &mut D, program: ProgramHandle) -> bool {
        if self.program == Some(program) {
            return false;
        }
        device.use_program(program);
        self.program = Some(program);
        true
    }

    pub fn set_render_state<D: GpuDevice>(&mut self, device: &mut D, state: &RenderState) -> bool {
        if self.render_state.as_ref() == Some(state) {
            return false;
        }
        device.set_render_state(state);
        self.render_state = Some(*state);
        true
    }

    pub fn bind_texture<D: GpuDevice>(&mut self, device: &mut D, unit: u32, texture: TextureHandle) -> bool {
        let slot = unit as usize;
        if self.textures.len() <= slot {
            self.textures.resize(slot + 1, None);
        }
        if self.textures[slot] == Some(texture) {
            return false;
        }
        device.bind_texture(unit, texture);
        self.textures[slot] = Some(texture);
        true
    }

    #[must_use]
    pub fn current_program(&self) -> Option<ProgramHandle> {
        self.program
    }

    pub fn reset(&mut self) {
        self.program = None;
        self.render_state = None;
        self.textures.clear();
    }
}

/// Fixed-function state for drawing `material` with `side` faces visible.
///
/// `front_face` is [`FrontFace::Cw`] when the projection mirrors the image
/// (cube-map faces).
#[must_use]
pub fn material_render_state(material: &MaterialData, side: Side, front_face: FrontFace) -> RenderState {
    let blending = if material.blending == Blending::Normal && !material.transparent {
        Blending::None
    } else {
        material.blending
    };
    RenderState {
        blending,
        premultiplied_alpha: material.premultiplied_alpha,
        depth_test: material.depth_test,
        depth_write: material.depth_write,
        depth_func: material.depth_func,
        cull: match side {
            Side::Front => CullFace::Back,
            Side::Back => CullFace::Front,
            Side::Double => CullFace::None,
        },
        front_face,
        color_write: material.color_write,
    }
}

/// Identity of the vertex bindings of one draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexStateKey {
    pub geometry: ResourceId,
    pub program: ProgramId,
    pub wireframe: bool,
    pub index: Option<BufferHandle>,
    pub buffers: SmallVec<[BufferHandle; 16]>,
}

#[derive(Debug, Default)]
pub struct VertexStateCache {
    current: Option<VertexStateKey>,
}

impl VertexStateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` (and remembers `key`) when the bindings differ from
    /// the last draw.
    pub fn needs_update(&mut self, key: &VertexStateKey) -> bool {
        if self.current.as_ref() == Some(key) {
            return false;
        }
        self.current = Some(key.clone());
        true
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}
