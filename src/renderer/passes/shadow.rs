//! Shadow map rendering.
//!
//! Every shadow-casting light owns an RGBA8 render target holding packed
//! depth: a 2D map for directional and spot lights, a cube map of packed
//! light distances for point lights. Maps are cleared to white (farthest)
//! and casters are drawn with their material's `shadow_side`, or the
//! opposite of `side` when unset.

use rustc_hash::FxHashMap;

use super::cube_camera::cube_face_camera;
use crate::renderer::device::{FramebufferHandle, FrontFace, GpuDevice, PassDescriptor};
use crate::renderer::draw::DrawItem;
use crate::renderer::lights::{LightCounts, ShadowKind, ShadowView};
use crate::renderer::program::FrameFeatures;
use crate::renderer::render_list::{sphere_visible, world_bounding_sphere};
use crate::renderer::settings::ToneMapping;
use crate::renderer::{PassState, Renderer};
use crate::resources::{
    ColorSpace, DepthPacking, DistanceParams, FilterMode, GeometryGroup, Material, MaterialKind, RenderTarget, ResourceId,
    Shared, Side, TextureFormat, shared,
};
use crate::scene::{Camera, MeshMaterial, NodeHandle, Scene};

/// Shadow targets and the override materials drawn into them.
pub struct ShadowMaps {
    depth_material: Shared<Material>,
    distance_material: Shared<Material>,
    targets: FxHashMap<(ShadowKind, u32), Shared<RenderTarget>>,
}

impl Default for ShadowMaps {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowMaps {
    #[must_use]
    pub fn new() -> Self {
        let mut depth = Material::new(MaterialKind::Depth(DepthPacking::Rgba));
        depth.edit().name = String::from("shadow-depth");
        let mut distance = Material::new(MaterialKind::Distance(DistanceParams::default()));
        distance.edit().name = String::from("shadow-distance");
        Self {
            depth_material: shared(depth),
            distance_material: shared(distance),
            targets: FxHashMap::default(),
        }
    }

    /// Texture id of the map for the `index`-th shadow of `kind`, once rendered.
    #[must_use]
    pub fn texture_id(&self, kind: ShadowKind, index: u32) -> Option<ResourceId> {
        self.targets
            .get(&(kind, index))
            .map(|target| target.read().texture().read().id())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn target(&mut self, view: &ShadowView) -> Shared<RenderTarget> {
        let cube = view.kind == ShadowKind::Point;
        let width = view.map_size.x.max(1);
        let height = if cube { width } else { view.map_size.y.max(1) };

        let target = self.targets.entry((view.kind, view.index)).or_insert_with(|| {
            let target = RenderTarget::with_format(width, height, TextureFormat::Rgba8, cube);
            {
                let mut texture = target.texture().write();
                texture.name = format!("shadow-{:?}-{}", view.kind, view.index);
                texture.color_space = ColorSpace::Linear;
                let mut sampler = texture.sampler_mut();
                sampler.mag_filter = FilterMode::Nearest;
                sampler.min_filter = FilterMode::Nearest;
                sampler.mipmap_filter = FilterMode::Nearest;
            }
            shared(target)
        });
        {
            let mut target = target.write();
            if target.width() != width || target.height() != height {
                target.set_size(width, height);
            }
        }
        target.clone()
    }
}

/// Faces rasterized into a shadow map for a material drawn with `side`.
#[must_use]
pub fn shadow_side(side: Side, shadow_side: Option<Side>) -> Side {
    shadow_side.unwrap_or(match side {
        Side::Front => Side::Back,
        Side::Back => Side::Front,
        Side::Double => Side::Double,
    })
}

/// Visible shadow casters in the light camera's frustum, depth-first.
fn shadow_casters(scene: &Scene, camera: &Camera) -> Vec<NodeHandle> {
    let frustum = camera.frustum();
    let mut casters = Vec::new();
    let mut stack: Vec<NodeHandle> = scene.roots().iter().rev().copied().collect();
    while let Some(handle) = stack.pop() {
        let Some(node) = scene.get(handle) else {
            continue;
        };
        if !node.visible {
            continue;
        }
        stack.extend(node.children().iter().rev().copied());

        let Some(mesh) = node.as_mesh() else {
            continue;
        };
        if !node.cast_shadow || !node.layers.test(camera.layers) {
            continue;
        }
        if node.frustum_culled && !sphere_visible(&frustum, &world_bounding_sphere(mesh, &node.world_matrix())) {
            continue;
        }
        casters.push(handle);
    }
    casters
}

fn shadow_frame<'a>() -> FrameFeatures<'a> {
    FrameFeatures {
        lights: LightCounts::default(),
        shadow_type: None,
        fog: None,
        environment: None,
        tone_mapping: ToneMapping::None,
        output_srgb: false,
        output_color_space: ColorSpace::Linear,
        global_clipping_planes: 0,
        local_clipping_enabled: false,
    }
}

impl<D: GpuDevice> Renderer<D> {
    /// Renders the map of every shadow view produced by the lights setup.
    pub(crate) fn render_shadow_maps(&mut self, scene: &Scene) {
        let views = self.lights.shadow_views.clone();
        for view in &views {
            let target = self.shadows.target(view);
            let framebuffers = {
                let target = target.read();
                match self.render_targets.setup(&mut self.device, &mut self.textures, &target) {
                    Ok(record) => record.framebuffers.clone(),
                    Err(err) => {
                        self.warnings.warn(format!("Shadow map {:?} {} skipped: {err}", view.kind, view.index));
                        continue;
                    }
                }
            };

            if view.kind == ShadowKind::Point {
                {
                    let mut material = self.shadows.distance_material.write();
                    if let MaterialKind::Distance(params) = &mut material.edit().kind {
                        params.reference_position = view.position;
                        params.near = view.near;
                        params.far = view.far;
                    }
                }
                let material = self.shadows.distance_material.clone();
                for (face, framebuffer) in framebuffers.iter().enumerate().take(6) {
                    let camera = cube_face_camera(view.position, face as u32, view.near, view.far);
                    self.render_shadow_view(scene, &camera, &material, *framebuffer, view, FrontFace::Cw);
                }
            } else if let Some(framebuffer) = framebuffers.first() {
                let material = self.shadows.depth_material.clone();
                self.render_shadow_view(scene, &view.camera, &material, *framebuffer, view, FrontFace::Ccw);
            }
        }
    }

    fn render_shadow_view(
        &mut self,
        scene: &Scene,
        camera: &Camera,
        material: &Shared<Material>,
        framebuffer: FramebufferHandle,
        view: &ShadowView,
        front_face: FrontFace,
    ) {
        let mut pass = PassState::new(scene, camera, shadow_frame(), front_face);
        pass.resolution = view.map_size.as_vec2();

        self.begin_pass(&PassDescriptor {
            label: "shadow",
            target: Some(framebuffer),
            clear_color: Some([1.0; 4]),
            clear_depth: Some(1.0),
            clear_stencil: None,
            viewport: None,
        });

        let material = material.read();
        for handle in shadow_casters(scene, camera) {
            let Some(node) = scene.get(handle) else {
                continue;
            };
            let Some(mesh) = node.as_mesh() else {
                continue;
            };
            let geometry = mesh.geometry.read();
            let world_matrix = node.world_matrix();

            let draws: Vec<(Shared<Material>, Option<GeometryGroup>)> = match &mesh.material {
                MeshMaterial::Single(source) => vec![(source.clone(), None)],
                MeshMaterial::Multi(sources) if geometry.groups.is_empty() => {
                    sources.first().map(|source| (source.clone(), None)).into_iter().collect()
                }
                MeshMaterial::Multi(sources) => geometry
                    .groups
                    .iter()
                    .filter_map(|group| sources.get(group.material_index).map(|source| (source.clone(), Some(*group))))
                    .collect(),
            };

            for (source, group) in draws {
                let (visible, side) = {
                    let source = source.read();
                    (source.visible, shadow_side(source.side, source.shadow_side))
                };
                if !visible {
                    continue;
                }
                self.draw(
                    DrawItem {
                        mesh,
                        geometry: &geometry,
                        material: &material,
                        group,
                        world_matrix,
                        receive_shadow: false,
                        side,
                    },
                    &pass,
                );
            }
        }
        self.device.end_pass();
    }
}
