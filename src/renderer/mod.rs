//! Rendering Core
//!
//! [`Renderer`] is the frame driver. It owns every GPU-side cache and
//! manager and turns a [`Scene`] seen through a [`Camera`] into device calls:
//!
//! 1. **Begin frame**: context-loss check, disposal drain, counter reset
//! 2. **Render list**: visible drawables and lights, bucketed and sorted
//! 3. **Lights**: uniform arrays and shadow views
//! 4. **Shadow maps**: one packed-depth target per shadow-casting light
//! 5. **Main pass**: background, opaque, transmissive, transparent
//! 6. **End frame**: MSAA resolve and mipmaps for render targets, present
//!    for the screen
//!
//! Per-draw work lives in [`draw`]: program selection, uniform and texture
//! binding, vertex state and draw issuance. A draw that cannot be prepared is
//! logged and skipped; nothing fails the frame.
//!
//! The device is reached only through the [`GpuDevice`] trait.
//! [`wgpu_backend::WgpuDevice`] is the wgpu implementation.

pub mod device;
pub mod draw;
pub mod info;
pub mod lights;
pub mod managers;
pub mod passes;
pub mod program;
pub mod render_list;
pub mod settings;
pub mod state;
pub mod uniforms;
pub mod wgpu_backend;

use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Vec2, Vec4};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::errors::{KilnError, Result};
use crate::resources::{
    ColorSpace, DisposeEvent, RenderTarget, ResourceId, Shared, Texture, TextureFormat, TextureMapping, shared,
};
use crate::scene::{Background, Camera, Scene};
use crate::utils::WarnOnce;

use self::device::{FramebufferHandle, FrontFace, GpuDevice, PassDescriptor, TextureHandle, Viewport};
use self::info::{ProgramInfo, RenderInfo};
use self::lights::LightsState;
use self::managers::{AttributeManager, DisposeHook, GeometryManager, RenderTargetManager, TextureManager};
use self::passes::background::BackgroundQuad;
use self::passes::shadow::ShadowMaps;
use self::program::{FrameFeatures, ProgramCache, ProgramId};
use self::render_list::{Bucket, RenderList, SortFn};
use self::settings::{RendererSettings, ToneMapping};
use self::state::{StateCache, VertexStateCache};

pub use self::device::{DeviceCapabilities, DeviceFormat};
pub use self::info::{FrameInfo, MemoryInfo};
pub use self::passes::cube_camera::CubeCamera;
pub use self::settings::ShadowMapType;

static NEXT_RENDERER_ID: AtomicU64 = AtomicU64::new(1);

/// Instance matrix buffers unused for this many frames are released.
const INSTANCE_BUFFER_TTL: u64 = 60;

/// Programs one material has drawn with, by cache key.
#[derive(Debug, Default)]
struct MaterialPrograms {
    programs: FxHashMap<String, ProgramId>,
    /// Fast path: the program chosen by the last draw and what it depended on.
    last: Option<ProgramChoice>,
}

#[derive(Debug, Clone, Copy)]
struct ProgramChoice {
    material_version: u64,
    /// Env textures can switch mapping without an edit of the material.
    env_mapping: Option<TextureMapping>,
    frame_signature: u64,
    object: program::ObjectFeatures,
    program: ProgramId,
}

/// Where the current pass writes to.
#[derive(Debug, Clone, Copy)]
struct Output {
    framebuffer: Option<FramebufferHandle>,
    width: u32,
    height: u32,
    color_space: ColorSpace,
    /// The shader encodes sRGB itself (the attachment does not).
    encode_srgb: bool,
    tone_mapping: ToneMapping,
    viewport: Option<Viewport>,
}

/// Frame-wide inputs shared by every draw of one pass.
pub struct PassState<'a> {
    pub scene: &'a Scene,
    pub camera: &'a Camera,
    pub frame: FrameFeatures<'a>,
    /// Hash of the fields of `frame` that affect program selection.
    pub signature: u64,
    pub front_face: FrontFace,
    /// Size of the render area in pixels.
    pub resolution: Vec2,
    pub exposure: f32,
    pub clipping_planes: SmallVec<[Vec4; 4]>,
    pub environment: Option<Shared<Texture>>,
    /// Opaque scene color for transmissive materials.
    pub transmission: Option<TextureHandle>,
}

impl<'a> PassState<'a> {
    #[must_use]
    pub fn new(scene: &'a Scene, camera: &'a Camera, frame: FrameFeatures<'a>, front_face: FrontFace) -> Self {
        Self {
            scene,
            camera,
            signature: frame_signature(&frame),
            frame,
            front_face,
            resolution: Vec2::ONE,
            exposure: 1.0,
            clipping_planes: SmallVec::new(),
            environment: None,
            transmission: None,
        }
    }
}

/// Hash of every frame-level input to program selection.
#[must_use]
pub fn frame_signature(frame: &FrameFeatures<'_>) -> u64 {
    let mut state = rustc_hash::FxBuildHasher.build_hasher();
    frame.lights.hash(&mut state);
    frame.shadow_type.hash(&mut state);
    frame
        .fog
        .map(|fog| matches!(fog, crate::scene::Fog::Exp2 { .. }))
        .hash(&mut state);
    frame.environment.hash(&mut state);
    frame.tone_mapping.hash(&mut state);
    frame.output_srgb.hash(&mut state);
    frame.output_color_space.hash(&mut state);
    frame.global_clipping_planes.hash(&mut state);
    frame.local_clipping_enabled.hash(&mut state);
    state.finish()
}

/// Forward renderer over a [`GpuDevice`].
pub struct Renderer<D: GpuDevice> {
    device: D,
    settings: RendererSettings,
    hook: DisposeHook,
    disposals: flume::Receiver<DisposeEvent>,

    attributes: AttributeManager,
    geometries: GeometryManager,
    textures: TextureManager,
    render_targets: RenderTargetManager,
    programs: ProgramCache,
    materials: FxHashMap<ResourceId, MaterialPrograms>,
    instance_buffers: FxHashMap<ResourceId, u64>,

    state: StateCache,
    vertex_state: VertexStateCache,
    lights: LightsState,
    render_list: RenderList,
    shadows: ShadowMaps,
    background: BackgroundQuad,
    transmission_target: Option<Shared<RenderTarget>>,

    render_target: Option<(Shared<RenderTarget>, u32)>,
    viewport: Option<Viewport>,
    /// Set by the cube camera so mipmaps are built once, after the last face.
    pub(crate) skip_target_mipmaps: bool,
    info: RenderInfo,
    warnings: WarnOnce,
    context_lost: bool,
}

impl<D: GpuDevice> Renderer<D> {
    #[must_use]
    pub fn new(device: D, settings: RendererSettings) -> Self {
        let id = NEXT_RENDERER_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, disposals) = flume::unbounded();
        let hook = DisposeHook::new(id, sender);
        log::info!("Renderer {id} created ({:?})", device.capabilities());

        Self {
            device,
            settings,
            attributes: AttributeManager::new(),
            geometries: GeometryManager::new(hook.clone()),
            textures: TextureManager::new(hook.clone()),
            render_targets: RenderTargetManager::new(hook.clone()),
            hook,
            disposals,
            programs: ProgramCache::new(),
            materials: FxHashMap::default(),
            instance_buffers: FxHashMap::default(),
            state: StateCache::new(),
            vertex_state: VertexStateCache::new(),
            lights: LightsState::new(),
            render_list: RenderList::new(),
            shadows: ShadowMaps::new(),
            background: BackgroundQuad::new(),
            transmission_target: None,
            render_target: None,
            viewport: None,
            skip_target_mipmaps: false,
            info: RenderInfo::new(),
            warnings: WarnOnce::new(),
            context_lost: false,
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[inline]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    #[inline]
    pub fn settings_mut(&mut self) -> &mut RendererSettings {
        &mut self.settings
    }

    #[inline]
    pub fn info(&self) -> &RenderInfo {
        &self.info
    }

    #[inline]
    pub fn info_mut(&mut self) -> &mut RenderInfo {
        &mut self.info
    }

    #[inline]
    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    #[inline]
    pub fn lights(&self) -> &LightsState {
        &self.lights
    }

    /// The list built by the last `render` call.
    #[inline]
    pub fn render_list(&self) -> &RenderList {
        &self.render_list
    }

    pub fn set_opaque_sort(&mut self, sort: Option<SortFn>) {
        self.render_list.set_opaque_sort(sort);
    }

    pub fn set_transparent_sort(&mut self, sort: Option<SortFn>) {
        self.render_list.set_transparent_sort(sort);
    }

    /// Number of distinct programs `material` currently holds.
    #[must_use]
    pub fn material_program_count(&self, material: ResourceId) -> usize {
        self.materials.get(&material).map_or(0, |m| m.programs.len())
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    /// Resizes the screen framebuffer; the size is scaled by the pixel ratio.
    pub fn set_size(&mut self, width: u32, height: u32) {
        let ratio = self.settings.pixel_ratio.max(0.0);
        let scaled = |v: u32| ((v as f32 * ratio).floor() as u32).max(1);
        self.device.resize(scaled(width), scaled(height));
    }

    /// Restricts screen rendering to a rectangle in logical pixels; `None`
    /// covers the whole framebuffer.
    pub fn set_viewport(&mut self, viewport: Option<Viewport>) {
        let ratio = self.settings.pixel_ratio;
        self.viewport = viewport.map(|v| Viewport {
            x: v.x * ratio,
            y: v.y * ratio,
            width: v.width * ratio,
            height: v.height * ratio,
        });
    }

    /// Renders into `target` (face `face` for cube targets) until reset with
    /// `None`.
    pub fn set_render_target(&mut self, target: Option<Shared<RenderTarget>>, face: u32) {
        self.render_target = target.map(|t| (t, face));
    }

    #[must_use]
    pub fn render_target(&self) -> Option<(Shared<RenderTarget>, u32)> {
        self.render_target.clone()
    }

    // ------------------------------------------------------------------------
    // Resource lifetime
    // ------------------------------------------------------------------------

    /// Releases GPU state of every resource disposed since the last call.
    /// Returns the number of events handled.
    pub fn process_disposals(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.disposals.try_recv() {
            handled += 1;
            match event {
                DisposeEvent::Geometry(id) => {
                    if self.geometries.release(&mut self.device, &mut self.attributes, id) {
                        log::debug!("Released geometry {id}");
                    }
                }
                DisposeEvent::Material(id) => {
                    if let Some(record) = self.materials.remove(&id) {
                        for program in record.programs.into_values() {
                            self.programs.release(&mut self.device, program);
                        }
                        log::debug!("Released material {id}");
                    }
                }
                DisposeEvent::Texture(id) => {
                    if self.textures.release(&mut self.device, id) {
                        log::debug!("Released texture {id}");
                    }
                }
                DisposeEvent::RenderTarget(id) => {
                    if self.render_targets.release(&mut self.device, &mut self.textures, id) {
                        log::debug!("Released render target {id}");
                    }
                }
            }
        }
        if handled > 0 {
            self.state.reset();
            self.vertex_state.reset();
        }
        handled
    }

    /// Forgets every GPU record without calling the device. Used after a
    /// context loss, when every handle is already invalid; the next frame
    /// re-creates what it needs from the CPU resources.
    pub fn reset_gpu_state(&mut self) {
        self.attributes.reset();
        self.geometries.reset();
        self.textures.reset();
        self.render_targets.reset();
        self.programs.reset();
        self.materials.clear();
        self.instance_buffers.clear();
        self.state.reset();
        self.vertex_state.reset();
        log::info!("GPU state reset");
    }

    // ------------------------------------------------------------------------
    // Frame
    // ------------------------------------------------------------------------

    /// Renders `scene` from `camera` into the current render target, or the
    /// screen.
    pub fn render(&mut self, scene: &Scene, camera: &Camera) {
        self.render_view(scene, camera, FrontFace::Ccw);
    }

    pub(crate) fn render_view(&mut self, scene: &Scene, camera: &Camera, front_face: FrontFace) {
        if !self.begin_frame() {
            return;
        }

        let mut list = std::mem::take(&mut self.render_list);
        list.build(scene, camera);
        if self.settings.sort_objects {
            list.sort();
        }

        let shadow_map = self.settings.shadow_map;
        self.lights.setup(list.lights(), shadow_map.enabled);
        if shadow_map.enabled && (shadow_map.auto_update || shadow_map.needs_update) {
            self.render_shadow_maps(scene);
            self.settings.shadow_map.needs_update = false;
        }

        match self.prepare_output() {
            Ok(output) => self.render_scene(&list, scene, camera, front_face, &output),
            Err(err) => {
                self.warnings.warn(format!("Frame skipped: {err}"));
            }
        }

        self.render_list = list;
        self.end_frame();
    }

    fn begin_frame(&mut self) -> bool {
        if self.device.is_context_lost() {
            if !self.context_lost {
                log::warn!("{}", KilnError::ContextLost);
                self.context_lost = true;
            }
            return false;
        }
        if self.context_lost {
            log::info!("GPU context restored; rebuilding resources");
            self.context_lost = false;
            self.reset_gpu_state();
        }

        self.process_disposals();
        if self.info.auto_reset {
            self.info.reset();
        }
        self.info.render.frame += 1;
        self.prune_instance_buffers();
        self.device.begin_frame();
        true
    }

    fn end_frame(&mut self) {
        match &self.render_target {
            Some((target, _)) => {
                let id = target.read().id();
                self.render_targets.resolve_multisample(&mut self.device, id);
                if !self.skip_target_mipmaps {
                    self.render_targets.update_mipmaps(&mut self.device, id);
                }
            }
            None => self.device.present(),
        }

        self.info.memory.geometries = self.geometries.len();
        self.info.memory.textures = self.textures.len();
        self.info.programs = self
            .programs
            .iter()
            .map(|(_, p)| ProgramInfo {
                key: p.key.clone(),
                label: p.label.clone(),
                used_times: p.used_times,
                valid: p.is_valid(),
            })
            .collect();
    }

    fn prune_instance_buffers(&mut self) {
        let frame = self.info.render.frame;
        let attributes = &mut self.attributes;
        let device = &mut self.device;
        self.instance_buffers.retain(|id, last_used| {
            let keep = frame.saturating_sub(*last_used) <= INSTANCE_BUFFER_TTL;
            if !keep {
                attributes.release(device, *id);
            }
            keep
        });
    }

    fn prepare_output(&mut self) -> Result<Output> {
        let tone_mapping = self.settings.tone_mapping;
        let Some((target, face)) = self.render_target.clone() else {
            let (width, height) = self.device.drawing_buffer_size();
            return Ok(Output {
                framebuffer: None,
                width,
                height,
                color_space: self.settings.output_color_space,
                encode_srgb: self.settings.output_color_space == ColorSpace::Srgb
                    && !self.device.screen_format().is_srgb(),
                tone_mapping,
                viewport: self.viewport,
            });
        };

        let target = target.read();
        let color_space = target.texture().read().color_space;
        let record = self.render_targets.setup(&mut self.device, &mut self.textures, &target)?;
        let framebuffer = record.framebuffers.get(face as usize).copied().ok_or_else(|| {
            KilnError::ResourceCreation {
                kind: "framebuffer",
                reason: format!("render target {} has no face {face}", target.id()),
            }
        })?;
        Ok(Output {
            framebuffer: Some(framebuffer),
            width: record.width,
            height: record.height,
            color_space,
            encode_srgb: color_space == ColorSpace::Srgb && !record.format.is_srgb(),
            tone_mapping: ToneMapping::None,
            viewport: None,
        })
    }

    fn frame_features<'s>(&self, scene: &'s Scene, output: &Output) -> FrameFeatures<'s> {
        let shadows = &self.settings.shadow_map;
        FrameFeatures {
            lights: self.lights.counts,
            shadow_type: shadows.enabled.then(|| self.settings.effective_shadow_type()),
            fog: scene.fog.as_ref(),
            environment: scene.environment.as_ref().map(|t| t.read().mapping),
            tone_mapping: output.tone_mapping,
            output_srgb: output.encode_srgb,
            output_color_space: output.color_space,
            global_clipping_planes: self.settings.clipping_planes.len() as u32,
            local_clipping_enabled: self.settings.local_clipping_enabled,
        }
    }

    fn pass_state<'s>(
        &self,
        scene: &'s Scene,
        camera: &'s Camera,
        front_face: FrontFace,
        output: &Output,
    ) -> PassState<'s> {
        let mut pass = PassState::new(scene, camera, self.frame_features(scene, output), front_face);
        pass.resolution = match output.viewport {
            Some(viewport) => Vec2::new(viewport.width, viewport.height),
            None => Vec2::new(output.width as f32, output.height as f32),
        };
        pass.exposure = self.settings.tone_mapping_exposure;
        pass.clipping_planes = SmallVec::from_slice(&self.settings.clipping_planes);
        pass.environment = scene.environment.clone();
        pass
    }

    pub(crate) fn begin_pass(&mut self, desc: &PassDescriptor<'_>) {
        self.device.begin_pass(desc);
        self.state.reset();
        self.vertex_state.reset();
    }

    fn clear_color(&self, scene: &Scene) -> [f32; 4] {
        match &scene.background {
            Some(Background::Color(color)) => [color.x, color.y, color.z, 1.0],
            _ => self.settings.clear_rgba(),
        }
    }

    fn render_scene(&mut self, list: &RenderList, scene: &Scene, camera: &Camera, front_face: FrontFace, output: &Output) {
        let mut pass = self.pass_state(scene, camera, front_face, output);
        if list.bucket_len(Bucket::Transmissive) > 0 {
            pass.transmission = self.render_transmission(list, scene, camera, front_face, output);
        }

        let clear = self.settings.auto_clear;
        let clear_color = self.clear_color(scene);
        self.begin_pass(&PassDescriptor {
            label: "main",
            target: output.framebuffer,
            clear_color: clear.then_some(clear_color),
            clear_depth: clear.then_some(1.0),
            clear_stencil: clear.then_some(0),
            viewport: output.viewport,
        });
        if let Some(Background::Texture(texture)) = &scene.background {
            self.render_background(texture, &pass);
        }
        for bucket in [Bucket::Opaque, Bucket::Transmissive, Bucket::Transparent] {
            for record in list.bucket(bucket) {
                self.render_record(record, &pass);
            }
        }
        self.device.end_pass();
    }

    /// Renders the opaque bucket into the mip-mapped transmission target and
    /// returns its texture.
    fn render_transmission(
        &mut self,
        list: &RenderList,
        scene: &Scene,
        camera: &Camera,
        front_face: FrontFace,
        output: &Output,
    ) -> Option<TextureHandle> {
        let scale = self.settings.transmission_resolution_scale.max(0.01);
        let width = ((output.width as f32 * scale) as u32).max(1);
        let height = ((output.height as f32 * scale) as u32).max(1);

        let target = self
            .transmission_target
            .get_or_insert_with(|| {
                let target = RenderTarget::with_format(width, height, TextureFormat::Rgba16Float, false);
                {
                    let mut texture = target.texture().write();
                    texture.name = String::from("transmission");
                    texture.color_space = ColorSpace::Linear;
                    texture.generate_mipmaps = true;
                }
                shared(target)
            })
            .clone();
        {
            let mut target = target.write();
            if target.width() != width || target.height() != height {
                target.set_size(width, height);
            }
        }

        let (framebuffer, texture_id) = {
            let target = target.read();
            match self.render_targets.setup(&mut self.device, &mut self.textures, &target) {
                Ok(record) => (record.framebuffers.first().copied()?, record.texture_id),
                Err(err) => {
                    self.warnings.warn(format!("Transmission pass skipped: {err}"));
                    return None;
                }
            }
        };

        let linear = Output {
            framebuffer: Some(framebuffer),
            width,
            height,
            color_space: ColorSpace::Linear,
            encode_srgb: false,
            tone_mapping: ToneMapping::None,
            viewport: None,
        };
        let pass = self.pass_state(scene, camera, front_face, &linear);
        let clear_color = self.clear_color(scene);
        self.begin_pass(&PassDescriptor {
            label: "transmission",
            target: Some(framebuffer),
            clear_color: Some(clear_color),
            clear_depth: Some(1.0),
            clear_stencil: Some(0),
            viewport: None,
        });
        for record in list.bucket(Bucket::Opaque) {
            self.render_record(record, &pass);
        }
        self.device.end_pass();

        let id = target.read().id();
        self.render_targets.resolve_multisample(&mut self.device, id);
        self.render_targets.update_mipmaps(&mut self.device, id);
        self.textures.get(texture_id).map(|t| t.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::lights::LightCounts;
    use crate::renderer::settings::ShadowMapType;
    use crate::scene::Fog;
    use glam::Vec3;

    fn frame() -> FrameFeatures<'static> {
        FrameFeatures {
            lights: LightCounts::default(),
            shadow_type: None,
            fog: None,
            environment: None,
            tone_mapping: ToneMapping::None,
            output_srgb: true,
            output_color_space: ColorSpace::Srgb,
            global_clipping_planes: 0,
            local_clipping_enabled: false,
        }
    }

    #[test]
    fn test_signature_tracks_program_inputs() {
        let base = frame_signature(&frame());
        assert_eq!(base, frame_signature(&frame()));

        let lit = FrameFeatures {
            lights: LightCounts {
                point: 1,
                ..LightCounts::default()
            },
            ..frame()
        };
        assert_ne!(base, frame_signature(&lit));

        let shadowed = FrameFeatures {
            shadow_type: Some(ShadowMapType::Pcf),
            ..frame()
        };
        assert_ne!(base, frame_signature(&shadowed));
    }

    #[test]
    fn test_signature_ignores_fog_values() {
        let near = Fog::Linear {
            color: Vec3::ONE,
            near: 1.0,
            far: 10.0,
        };
        let far = Fog::Linear {
            color: Vec3::ZERO,
            near: 5.0,
            far: 50.0,
        };
        let a = FrameFeatures { fog: Some(&near), ..frame() };
        let b = FrameFeatures { fog: Some(&far), ..frame() };
        assert_eq!(frame_signature(&a), frame_signature(&b));

        let exp = Fog::Exp2 {
            color: Vec3::ONE,
            density: 0.1,
        };
        let c = FrameFeatures { fog: Some(&exp), ..frame() };
        assert_ne!(frame_signature(&a), frame_signature(&c));
    }
}
