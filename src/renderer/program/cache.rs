//! Shader program cache.
//!
//! Programs are shared between every material whose [`ProgramParameters`]
//! produce the same cache key. Each material holds one reference per
//! distinct key it has drawn with; a program is destroyed once its last
//! reference is released.
//!
//! Generation or compilation failures do not propagate. The program is kept
//! with its diagnostics and no device handle so that it is not rebuilt every
//! frame, and the renderer skips draws that resolve to it.

use slotmap::SlotMap;

use super::layout::{ProgramInterface, custom_interface, mesh_interface};
use super::parameters::{ProgramParameters, ShaderId};
use super::shader_gen::{generate_custom, generate_mesh};
use super::source_cache::ShaderSourceCache;
use crate::errors::KilnError;
use crate::renderer::device::{GpuDevice, ProgramDescriptor, ProgramHandle};
use crate::renderer::uniforms::UniformCache;
use crate::resources::{MaterialData, MaterialKind};

slotmap::new_key_type! {
    pub struct ProgramId;
}

#[derive(Debug)]
pub struct Program {
    pub key: String,
    pub label: String,
    /// `None` when generation or compilation failed.
    pub handle: Option<ProgramHandle>,
    pub interface: ProgramInterface,
    pub diagnostics: Option<String>,
    pub used_times: u32,
    /// Last values uploaded to each uniform slot.
    pub uniforms: UniformCache,
    custom_sources: Option<(u64, u64)>,
}

impl Program {
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }
}

#[derive(Debug, Default)]
pub struct ProgramCache {
    programs: SlotMap<ProgramId, Program>,
    sources: ShaderSourceCache,
}

impl ProgramCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the program for `params`, building it on first use.
    /// Every call adds one reference.
    pub fn acquire<D: GpuDevice>(
        &mut self,
        device: &mut D,
        params: &ProgramParameters,
        material: &MaterialData,
    ) -> ProgramId {
        let key = params.cache_key();
        if let Some((id, program)) = self.programs.iter_mut().find(|(_, p)| p.key == key) {
            program.used_times += 1;
            return id;
        }
        let program = self.build(device, params, material, key);
        self.programs.insert(program)
    }

    fn build<D: GpuDevice>(
        &mut self,
        device: &mut D,
        params: &ProgramParameters,
        material: &MaterialData,
        key: String,
    ) -> Program {
        let custom = match (&params.shader, &material.kind) {
            (ShaderId::Custom { .. }, MaterialKind::Custom(custom)) => Some(custom),
            _ => None,
        };
        let label = match custom {
            Some(custom) => format!("custom:{}", custom.name),
            None => params.family().unwrap_or("basic").to_string(),
        };

        let (interface, source) = match custom {
            Some(custom) => {
                let interface = custom_interface(params, custom);
                let source = generate_custom(params, &interface, custom);
                (interface, source)
            }
            None => {
                let interface = mesh_interface(params);
                let source = generate_mesh(params, &interface);
                (interface, source)
            }
        };
        let custom_sources = custom.map(|c| (self.sources.acquire(&c.vertex), self.sources.acquire(&c.fragment)));

        let (handle, diagnostics) = match source {
            Ok(source) => {
                let desc = ProgramDescriptor {
                    label: &label,
                    source: &source,
                    layout: &interface.layout,
                };
                match device.compile_program(&desc) {
                    Ok(handle) => {
                        log::info!("Compiled program '{label}' ({} live)", self.programs.len() + 1);
                        (Some(handle), None)
                    }
                    Err(diagnostic) => {
                        let err = KilnError::ShaderCompile {
                            key: key.clone(),
                            diagnostic,
                        };
                        log::error!("{err}");
                        (None, Some(err.to_string()))
                    }
                }
            }
            Err(err) => {
                log::error!("Program '{label}': {err}");
                (None, Some(err.to_string()))
            }
        };

        let uniforms = UniformCache::new(interface.layout.uniforms.len());
        Program {
            key,
            label,
            handle,
            interface,
            diagnostics,
            used_times: 1,
            uniforms,
            custom_sources,
        }
    }

    /// Drops one reference. At zero the program is removed and its device
    /// program destroyed. Returns `true` when the program was destroyed.
    pub fn release<D: GpuDevice>(&mut self, device: &mut D, id: ProgramId) -> bool {
        let Some(program) = self.programs.get_mut(id) else {
            return false;
        };
        program.used_times = program.used_times.saturating_sub(1);
        if program.used_times > 0 {
            return false;
        }
        let Some(program) = self.programs.remove(id) else {
            return false;
        };
        if let Some(handle) = program.handle {
            device.destroy_program(handle);
        }
        if let Some((vertex, fragment)) = program.custom_sources {
            self.sources.release(vertex);
            self.sources.release(fragment);
        }
        log::debug!("Destroyed program '{}'", program.label);
        true
    }

    #[inline]
    #[must_use]
    pub fn get(&self, id: ProgramId) -> Option<&Program> {
        self.programs.get(id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: ProgramId) -> Option<&mut Program> {
        self.programs.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProgramId, &Program)> {
        self.programs.iter()
    }

    /// Forgets every program without touching the device.
    pub fn reset(&mut self) {
        self.programs.clear();
        self.sources.clear();
    }

    #[must_use]
    pub fn sources(&self) -> &ShaderSourceCache {
        &self.sources
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}
