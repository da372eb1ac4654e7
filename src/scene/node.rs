//! Scene nodes and drawable components.

use glam::{Mat4, Quat, Vec3};

use crate::resources::{AttributeBuffer, Geometry, Material, Shared};

use super::layers::Layers;
use super::light::Light;

slotmap::new_key_type! {
    /// Handle to a node stored in a [`Scene`](super::Scene).
    pub struct NodeHandle;
}

/// Primitive assembly for a drawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Topology {
    #[default]
    Triangles,
    TriangleStrip,
    Lines,
    LineStrip,
    Points,
}

impl Topology {
    #[must_use]
    pub fn is_lines(self) -> bool {
        matches!(self, Self::Lines | Self::LineStrip)
    }
}

/// Single material, or one material per geometry group.
#[derive(Debug, Clone)]
pub enum MeshMaterial {
    Single(Shared<Material>),
    Multi(Vec<Shared<Material>>),
}

/// Bone palette for skinned meshes.
///
/// `bone_matrices` are final skinning matrices (bone world matrix times
/// inverse bind matrix), computed by the animation system.
#[derive(Debug, Clone, Default)]
pub struct Skeleton {
    pub bone_matrices: Vec<Mat4>,
}

#[derive(Debug, Clone)]
pub struct Mesh {
    pub geometry: Shared<Geometry>,
    pub material: MeshMaterial,
    pub topology: Topology,
    /// Per-instance model matrices (16 floats per instance).
    pub instance_matrices: Option<AttributeBuffer>,
    /// Number of instances; `None` draws a single non-instanced copy.
    pub instance_count: Option<u32>,
    /// Morph target weights, one per target in the geometry.
    pub morph_influences: Vec<f32>,
    pub skeleton: Option<Skeleton>,
}

impl Mesh {
    #[must_use]
    pub fn new(geometry: Shared<Geometry>, material: Shared<Material>) -> Self {
        Self::with_material(geometry, MeshMaterial::Single(material))
    }

    /// One material per geometry group, indexed by `material_index`.
    #[must_use]
    pub fn multi(geometry: Shared<Geometry>, materials: Vec<Shared<Material>>) -> Self {
        Self::with_material(geometry, MeshMaterial::Multi(materials))
    }

    #[must_use]
    pub fn with_material(geometry: Shared<Geometry>, material: MeshMaterial) -> Self {
        Self {
            geometry,
            material,
            topology: Topology::Triangles,
            instance_matrices: None,
            instance_count: None,
            morph_influences: Vec::new(),
            skeleton: None,
        }
    }

    /// Turns the mesh into an instanced mesh drawing one copy per matrix.
    pub fn set_instances(&mut self, matrices: &[Mat4]) {
        let floats: Vec<f32> = matrices.iter().flat_map(Mat4::to_cols_array).collect();
        match &mut self.instance_matrices {
            Some(buffer) if buffer.count() as usize == matrices.len() => buffer.write(0, &floats),
            _ => self.instance_matrices = Some(AttributeBuffer::new(&floats, 16)),
        }
        self.instance_count = Some(matrices.len() as u32);
    }

    #[must_use]
    pub fn is_instanced(&self) -> bool {
        self.instance_count.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub enum NodeKind {
    #[default]
    Group,
    Mesh(Mesh),
    Light(Light),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub(crate) parent: Option<NodeHandle>,
    pub(crate) children: Vec<NodeHandle>,

    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    /// Skip recomputing the world matrix from the TRS fields.
    pub matrix_auto_update: bool,
    pub(crate) world_matrix: Mat4,

    pub visible: bool,
    pub layers: Layers,
    pub render_order: i32,
    pub frustum_culled: bool,
    pub cast_shadow: bool,
    pub receive_shadow: bool,

    pub kind: NodeKind,
}

impl Default for Node {
    fn default() -> Self {
        Self::new(NodeKind::Group)
    }
}

impl Node {
    #[must_use]
    pub fn new(kind: NodeKind) -> Self {
        Self {
            name: String::new(),
            parent: None,
            children: Vec::new(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            matrix_auto_update: true,
            world_matrix: Mat4::IDENTITY,
            visible: true,
            layers: Layers::default(),
            render_order: 0,
            frustum_culled: true,
            cast_shadow: false,
            receive_shadow: false,
            kind,
        }
    }

    #[must_use]
    pub fn group() -> Self {
        Self::new(NodeKind::Group)
    }

    #[must_use]
    pub fn mesh(mesh: Mesh) -> Self {
        Self::new(NodeKind::Mesh(mesh))
    }

    #[must_use]
    pub fn light(light: Light) -> Self {
        Self::new(NodeKind::Light(light))
    }

    #[must_use]
    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// World matrix as of the last transform update.
    #[inline]
    #[must_use]
    pub fn world_matrix(&self) -> Mat4 {
        self.world_matrix
    }

    /// Sets the world matrix directly (for externally driven transforms).
    pub fn set_world_matrix(&mut self, matrix: Mat4) {
        self.world_matrix = matrix;
    }

    #[inline]
    #[must_use]
    pub fn world_position(&self) -> Vec3 {
        self.world_matrix.w_axis.truncate()
    }

    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    #[inline]
    #[must_use]
    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    #[must_use]
    pub fn as_mesh(&self) -> Option<&Mesh> {
        match &self.kind {
            NodeKind::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    pub fn as_mesh_mut(&mut self) -> Option<&mut Mesh> {
        match &mut self.kind {
            NodeKind::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_light(&self) -> Option<&Light> {
        match &self.kind {
            NodeKind::Light(light) => Some(light),
            _ => None,
        }
    }

    pub fn as_light_mut(&mut self) -> Option<&mut Light> {
        match &mut self.kind {
            NodeKind::Light(light) => Some(light),
            _ => None,
        }
    }
}
