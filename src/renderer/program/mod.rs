//! Shader programs: parameter capture, cache keys, template expansion,
//! resource interfaces and the reference-counted program cache.

pub mod cache;
pub mod layout;
pub mod parameters;
pub mod shader_gen;
pub mod source_cache;

pub use cache::{Program, ProgramCache, ProgramId};
pub use layout::{AttributeInput, ProgramInterface, TextureInput, UniformSource, custom_interface, mesh_interface};
pub use parameters::{
    EnvironmentFeatures, FrameFeatures, MAX_MORPH_TARGETS, MaterialFeatures, ObjectFeatures, ProgramParameters,
    ShaderId,
};
pub use source_cache::{ShaderSourceCache, source_id};
