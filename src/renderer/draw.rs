//! Per-draw preparation and issuance.
//!
//! For every render-list record the renderer:
//! 1. uploads the geometry (and instance matrices),
//! 2. selects the program for material × object × frame,
//! 3. binds program, fixed-function state, uniforms and textures,
//! 4. binds vertex and index buffers when they differ from the last draw,
//! 5. clips the draw to the geometry draw range and the record's group and
//!    issues it.
//!
//! Any failure skips the draw with a one-time warning.

use glam::{Mat4, Vec4};
use smallvec::SmallVec;

use super::device::{
    BufferHandle, BufferUsage, DrawCall, GpuDevice, IndexFormat, StepMode, TextureDimension, TextureHandle,
    VertexBinding, VertexFormat,
};
use super::lights::ShadowKind;
use super::managers::attributes::vertex_format;
use super::managers::{GpuBuffer, TextureManager};
use super::passes::shadow::ShadowMaps;
use super::program::{
    AttributeInput, MAX_MORPH_TARGETS, ObjectFeatures, ProgramId, ProgramParameters, TextureInput,
};
use super::render_list::DrawRecord;
use super::state::{VertexStateKey, material_render_state};
use super::uniforms::{self, UniformInputs};
use super::{MaterialPrograms, PassState, ProgramChoice, Renderer};
use crate::errors::{KilnError, Result};
use crate::resources::{ElementType, Geometry, GeometryGroup, Material, MaterialData, MaterialKind, Side};
use crate::scene::{Mesh, Topology};

/// One draw of one mesh with one material over an optional group range.
#[derive(Debug, Clone, Copy)]
pub struct DrawItem<'a> {
    pub mesh: &'a Mesh,
    pub geometry: &'a Geometry,
    pub material: &'a Material,
    pub group: Option<GeometryGroup>,
    pub world_matrix: Mat4,
    pub receive_shadow: bool,
    /// Faces to rasterize for this draw.
    pub side: Side,
}

/// Half-open element range `[start, start + count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementRange {
    pub start: u32,
    pub count: u32,
}

/// Intersects the geometry draw range, the group and the available data.
///
/// `factor` scales triangle-index ranges to the wireframe line-index space.
#[must_use]
pub fn draw_range(geometry: &Geometry, group: Option<GeometryGroup>, data_count: u32, factor: u32) -> ElementRange {
    let range = geometry.draw_range;
    let range_start = u64::from(range.start) * u64::from(factor);
    let range_end = range
        .count
        .map_or(u64::MAX, |count| range_start + u64::from(count) * u64::from(factor));

    let (group_start, group_end) = match group {
        Some(group) => {
            let start = u64::from(group.start) * u64::from(factor);
            (start, start + u64::from(group.count) * u64::from(factor))
        }
        None => (0, u64::MAX),
    };

    let start = range_start.max(group_start);
    let end = u64::from(data_count).min(range_end).min(group_end);
    if end <= start {
        return ElementRange { start: 0, count: 0 };
    }
    ElementRange {
        start: start as u32,
        count: (end - start) as u32,
    }
}

impl<D: GpuDevice> Renderer<D> {
    /// Draws one render-list record. Transparent double-sided materials are
    /// drawn back faces first, then front faces, unless `force_single_pass`.
    pub(crate) fn render_record(&mut self, record: &DrawRecord, pass: &PassState<'_>) {
        let Some(mesh) = pass.scene.get(record.node).and_then(|node| node.as_mesh()) else {
            return;
        };
        let receive_shadow = pass.scene.get(record.node).is_some_and(|node| node.receive_shadow);
        let material = record.material.read();
        let geometry = record.geometry.read();

        let item = DrawItem {
            mesh,
            geometry: &geometry,
            material: &material,
            group: record.group,
            world_matrix: record.world_matrix,
            receive_shadow,
            side: material.side,
        };
        if material.transparent && material.side == Side::Double && !material.force_single_pass {
            self.draw(DrawItem { side: Side::Back, ..item }, pass);
            self.draw(DrawItem { side: Side::Front, ..item }, pass);
        } else {
            self.draw(item, pass);
        }
    }

    pub(crate) fn draw(&mut self, item: DrawItem<'_>, pass: &PassState<'_>) {
        if let Err(err) = self.setup_draw(item, pass) {
            self.warnings.warn(format!("Draw skipped: {err}"));
        }
    }

    /// Program for drawing `material` with these object and frame features.
    ///
    /// Each material keeps one program reference per distinct cache key. The
    /// last choice is reused while the material version, frame signature and
    /// object features are unchanged.
    pub(crate) fn program_for(&mut self, material: &Material, object: &ObjectFeatures, pass: &PassState<'_>) -> ProgramId {
        let record = self.materials.entry(material.id()).or_insert_with(|| {
            self.hook.watch(material.dispose_signal());
            MaterialPrograms::default()
        });

        let env_mapping = material.kind.env_map().map(|t| t.read().mapping);
        if let Some(last) = record.last
            && last.material_version == material.version()
            && last.env_mapping == env_mapping
            && last.frame_signature == pass.signature
            && last.object == *object
            && self.programs.get(last.program).is_some()
        {
            return last.program;
        }

        let params = ProgramParameters::new(material.data(), object, &pass.frame);
        let key = params.cache_key();
        let program = match record.programs.get(&key) {
            Some(&id) => id,
            None => {
                let id = self.programs.acquire(&mut self.device, &params, material.data());
                record.programs.insert(key, id);
                id
            }
        };
        record.last = Some(ProgramChoice {
            material_version: material.version(),
            env_mapping,
            frame_signature: pass.signature,
            object: *object,
            program,
        });
        program
    }

    fn setup_draw(&mut self, item: DrawItem<'_>, pass: &PassState<'_>) -> Result<()> {
        let DrawItem {
            mesh,
            geometry,
            material,
            ..
        } = item;
        if !material.visible {
            return Ok(());
        }

        self.geometries.update(&mut self.device, &mut self.attributes, geometry)?;

        let instance_buffer = match (&mesh.instance_matrices, mesh.is_instanced()) {
            (Some(matrices), true) => {
                let gpu = self.attributes.update(&mut self.device, matrices, BufferUsage::Vertex)?;
                self.instance_buffers.insert(matrices.id(), self.info.render.frame);
                gpu
            }
            _ => None,
        };
        let instance_count = match mesh.instance_count {
            Some(count) if instance_buffer.is_some() => count,
            Some(_) => 0,
            None => 1,
        };

        let skeleton = mesh
            .skeleton
            .as_ref()
            .filter(|_| geometry.has_attribute("skin_index") && geometry.has_attribute("skin_weight"));
        let object = object_features(mesh, geometry, instance_buffer.is_some(), skeleton.is_some(), item.receive_shadow);

        let program_id = self.program_for(material, &object, pass);
        let Some(program) = self.programs.get_mut(program_id) else {
            return Ok(());
        };
        let Some(handle) = program.handle else {
            return Err(KilnError::ShaderCompile {
                key: program.key.clone(),
                diagnostic: program.diagnostics.clone().unwrap_or_default(),
            });
        };

        self.state.use_program(&mut self.device, handle);
        let render_state = material_render_state(material.data(), item.side, pass.front_face);
        self.state.set_render_state(&mut self.device, &render_state);

        // Uniforms
        let mut planes: SmallVec<[Vec4; 8]> = SmallVec::from_slice(&pass.clipping_planes);
        if pass.frame.local_clipping_enabled {
            planes.extend_from_slice(&material.clipping_planes);
        }
        let inputs = UniformInputs {
            view_matrix: pass.camera.view_matrix(),
            projection_matrix: pass.camera.projection_matrix(),
            camera_position: pass.camera.position(),
            model_matrix: item.world_matrix,
            bones: skeleton.map(|s| s.bone_matrices.as_slice()),
            morph_influences: &mesh.morph_influences,
            material: material.data(),
            lights: &self.lights,
            fog: pass.frame.fog,
            clipping_planes: &planes,
            exposure: pass.exposure,
            resolution: pass.resolution,
        };
        uniforms::upload(&mut self.device, &mut program.uniforms, &program.interface.uniform_sources, &inputs);

        // Textures
        let interface = &program.interface;
        for (unit, (input, slot)) in interface.texture_inputs.iter().zip(&interface.layout.textures).enumerate() {
            let texture = resolve_texture(
                &mut self.device,
                &mut self.textures,
                &self.shadows,
                *input,
                slot.dimension,
                material.data(),
                pass,
            )?;
            self.state.bind_texture(&mut self.device, unit as u32, texture);
        }

        // Vertex buffers
        let geometry_id = geometry.id().get();
        let missing = |name: &str| KilnError::MissingAttribute {
            geometry: geometry_id,
            name: name.to_string(),
        };
        let mut bindings: SmallVec<[(u32, BufferHandle, VertexBinding); 16]> = SmallVec::new();
        let mut vertex_limit = u32::MAX;
        for (input, slot) in interface.attribute_inputs.iter().zip(&interface.layout.attributes) {
            match input {
                AttributeInput::Geometry(name) => {
                    let buffer = geometry.attribute(name).ok_or_else(|| missing(name))?;
                    let format = vertex_format(buffer)
                        .filter(|format| format.is_float() == slot.float)
                        .ok_or_else(|| KilnError::IncompatibleAttribute {
                            geometry: geometry_id,
                            name: name.clone(),
                        })?;
                    let gpu = self.attributes.get(buffer.id()).ok_or_else(|| missing(name))?;
                    vertex_limit = vertex_limit.min(buffer.count());
                    bindings.push((slot.location, gpu.handle, vertex_binding(format, buffer.stride(), 0, StepMode::Vertex)));
                }
                AttributeInput::InstanceColumn(column) => {
                    let gpu = instance_buffer.ok_or_else(|| missing(&slot.name))?;
                    bindings.push((
                        slot.location,
                        gpu.handle,
                        vertex_binding(VertexFormat::Float32x4, 64, 16 * column, StepMode::Instance),
                    ));
                }
                AttributeInput::MorphTarget(target) => {
                    let buffer = geometry
                        .morph_positions()
                        .get(*target as usize)
                        .ok_or_else(|| missing(&slot.name))?;
                    let gpu = self.attributes.get(buffer.id()).ok_or_else(|| missing(&slot.name))?;
                    vertex_limit = vertex_limit.min(buffer.count());
                    bindings.push((
                        slot.location,
                        gpu.handle,
                        vertex_binding(VertexFormat::Float32x3, buffer.stride(), 0, StepMode::Vertex),
                    ));
                }
            }
        }
        if vertex_limit == u32::MAX {
            vertex_limit = geometry.vertex_count();
        }

        // Index and topology
        if let Some(max) = self.geometries.max_index(geometry)
            && max >= vertex_limit
        {
            return Err(KilnError::IndexOutOfRange {
                geometry: geometry_id,
                index: max,
                vertex_count: vertex_limit,
            });
        }
        let wireframe = material.wireframe && mesh.topology == Topology::Triangles;
        let (index, data_count, factor): (Option<(GpuBuffer, IndexFormat)>, u32, u32) = if wireframe {
            match self.geometries.wireframe(&mut self.device, &mut self.attributes, geometry)? {
                Some((gpu, count)) => (Some((gpu, IndexFormat::Uint32)), count, 2),
                None => return Ok(()),
            }
        } else if let Some(index) = geometry.index() {
            let format = match index.element_type() {
                ElementType::U16 => IndexFormat::Uint16,
                _ => IndexFormat::Uint32,
            };
            match self.attributes.get(index.id()) {
                Some(gpu) => (Some((*gpu, format)), index.count(), 1),
                None => return Ok(()),
            }
        } else {
            (None, vertex_limit, 1)
        };
        let topology = if wireframe { Topology::Lines } else { mesh.topology };

        let key = VertexStateKey {
            geometry: geometry.id(),
            program: program_id,
            wireframe,
            index: index.map(|(gpu, _)| gpu.handle),
            buffers: bindings.iter().map(|(_, handle, _)| *handle).collect(),
        };
        if self.vertex_state.needs_update(&key) {
            for (location, handle, binding) in &bindings {
                self.device.set_vertex_buffer(*location, *handle, binding);
            }
            if let Some((gpu, format)) = index {
                self.device.set_index_buffer(gpu.handle, format);
            }
        }

        let range = draw_range(geometry, item.group, data_count, factor);
        if range.count == 0 || instance_count == 0 {
            return Ok(());
        }
        self.device.draw(&DrawCall {
            topology,
            first: range.start,
            count: range.count,
            instance_count,
            indexed: index.is_some(),
        });
        self.info.update(topology, range.count, instance_count);
        Ok(())
    }
}

fn vertex_binding(format: VertexFormat, stride: u32, offset: u32, step: StepMode) -> VertexBinding {
    VertexBinding {
        format,
        stride,
        offset,
        step,
    }
}

fn object_features(
    mesh: &Mesh,
    geometry: &Geometry,
    instanced: bool,
    skinned: bool,
    receive_shadow: bool,
) -> ObjectFeatures {
    ObjectFeatures {
        instanced,
        morph_targets: (geometry.morph_positions().len() as u32).min(MAX_MORPH_TARGETS),
        bones: match (&mesh.skeleton, skinned) {
            (Some(skeleton), true) => skeleton.bone_matrices.len() as u32,
            _ => 0,
        },
        integer_skin_index: geometry
            .attribute("skin_index")
            .and_then(vertex_format)
            .is_some_and(|format| !format.is_float()),
        receive_shadow,
        has_normals: geometry.has_attribute("normal"),
        has_uvs: geometry.has_attribute("uv"),
        has_colors: geometry.has_attribute("color"),
    }
}

/// Device texture feeding one program texture slot.
fn resolve_texture<D: GpuDevice>(
    device: &mut D,
    textures: &mut TextureManager,
    shadows: &ShadowMaps,
    input: TextureInput,
    dimension: TextureDimension,
    material: &MaterialData,
    pass: &PassState<'_>,
) -> Result<TextureHandle> {
    let shadow = match input {
        TextureInput::DirectionalShadow(i) => Some((ShadowKind::Directional, i)),
        TextureInput::SpotShadow(i) => Some((ShadowKind::Spot, i)),
        TextureInput::PointShadow(i) => Some((ShadowKind::Point, i)),
        _ => None,
    };
    if let Some((kind, index)) = shadow {
        let map = shadows
            .texture_id(kind, index)
            .and_then(|id| textures.get(id))
            .filter(|texture| texture.dimension == dimension)
            .map(|texture| texture.handle);
        return match map {
            Some(handle) => Ok(handle),
            None => textures.placeholder(device, dimension),
        };
    }

    let source = match input {
        TextureInput::Map => material.map.clone(),
        TextureInput::Matcap => match &material.kind {
            MaterialKind::Matcap(params) => params.matcap.clone(),
            _ => None,
        },
        TextureInput::EnvMap => material.kind.env_map().cloned().or_else(|| pass.environment.clone()),
        TextureInput::Custom(index) => match &material.kind {
            MaterialKind::Custom(custom) => custom.textures.get(index).and_then(|(_, texture)| texture.clone()),
            _ => None,
        },
        TextureInput::Transmission => {
            return match pass.transmission {
                Some(handle) => Ok(handle),
                None => textures.placeholder(device, dimension),
            };
        }
        TextureInput::DirectionalShadow(_) | TextureInput::SpotShadow(_) | TextureInput::PointShadow(_) => None,
    };
    let texture = source.as_ref().map(|texture| texture.read());
    textures.resolve(device, texture.as_deref(), dimension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{AttributeBuffer, DrawRange};

    fn geometry(vertices: usize) -> Geometry {
        let positions = vec![0.0f32; vertices * 3];
        Geometry::new().with_attribute("position", AttributeBuffer::new(&positions, 3))
    }

    #[test]
    fn test_full_range_without_limits() {
        let g = geometry(6);
        assert_eq!(draw_range(&g, None, 6, 1), ElementRange { start: 0, count: 6 });
    }

    #[test]
    fn test_range_intersects_group_and_draw_range() {
        let mut g = geometry(12);
        g.draw_range = DrawRange {
            start: 3,
            count: Some(6),
        };
        let group = GeometryGroup {
            start: 6,
            count: 6,
            material_index: 0,
        };
        assert_eq!(draw_range(&g, Some(group), 12, 1), ElementRange { start: 6, count: 3 });
    }

    #[test]
    fn test_wireframe_factor_scales_ranges() {
        let mut g = geometry(6);
        g.draw_range = DrawRange {
            start: 0,
            count: Some(3),
        };
        assert_eq!(draw_range(&g, None, 12, 2), ElementRange { start: 0, count: 6 });
    }

    #[test]
    fn test_disjoint_ranges_are_empty() {
        let mut g = geometry(6);
        g.draw_range = DrawRange {
            start: 0,
            count: Some(3),
        };
        let group = GeometryGroup {
            start: 3,
            count: 3,
            material_index: 1,
        };
        assert_eq!(draw_range(&g, Some(group), 6, 1).count, 0);
        g.draw_range = DrawRange { start: 9, count: None };
        assert_eq!(draw_range(&g, None, 6, 1).count, 0);
    }
}
