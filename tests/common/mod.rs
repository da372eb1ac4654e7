//! Shared fixtures for integration tests.
//!
//! [`RecordingDevice`] implements `GpuDevice` without a GPU: it hands out
//! handles, keeps buffer contents and records every call so tests can assert
//! on what the renderer asked for.

#![allow(dead_code)]

use glam::Vec3;
use slotmap::SlotMap;

use kiln::errors::{KilnError, Result};
use kiln::renderer::device::{
    BufferDescriptor, BufferHandle, DeviceCapabilities, DeviceFormat, DrawCall, FramebufferDescriptor,
    FramebufferHandle, GpuDevice, IndexFormat, PassDescriptor, ProgramDescriptor, ProgramHandle, RenderState,
    SamplerState, TextureDescriptor, TextureHandle, VertexBinding,
};
use kiln::resources::UniformValue;
use kiln::scene::Camera;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub create_buffer: usize,
    pub write_buffer: usize,
    pub destroy_buffer: usize,
    pub create_texture: usize,
    pub write_texture: usize,
    pub set_sampler: usize,
    pub generate_mipmaps: usize,
    pub destroy_texture: usize,
    pub create_framebuffer: usize,
    pub resolve_framebuffer: usize,
    pub destroy_framebuffer: usize,
    pub compile_program: usize,
    pub destroy_program: usize,
    pub begin_frame: usize,
    pub begin_pass: usize,
    pub end_pass: usize,
    pub present: usize,
    pub set_render_state: usize,
    pub use_program: usize,
    pub set_uniform: usize,
    pub bind_texture: usize,
    pub set_vertex_buffer: usize,
    pub set_index_buffer: usize,
    pub draw: usize,
}

#[derive(Debug, Clone)]
pub struct RecordedTexture {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: DeviceFormat,
    pub mip_level_count: u32,
    pub sample_count: u32,
}

#[derive(Debug, Clone)]
pub struct RecordedDraw {
    pub pass: String,
    pub program: String,
    pub state: RenderState,
    pub call: DrawCall,
}

pub struct RecordingDevice {
    pub caps: DeviceCapabilities,
    pub size: (u32, u32),
    pub format: DeviceFormat,
    pub lost: bool,
    /// Programs whose label contains this text fail to compile.
    pub fail_compile: Option<String>,
    /// Every `create_framebuffer` call fails.
    pub fail_framebuffers: bool,

    pub calls: Calls,
    pub buffers: SlotMap<BufferHandle, Vec<u8>>,
    /// `(buffer, offset, len)` of every partial or full rewrite.
    pub buffer_writes: Vec<(BufferHandle, u64, usize)>,
    pub textures: SlotMap<TextureHandle, RecordedTexture>,
    pub framebuffers: SlotMap<FramebufferHandle, FramebufferDescriptor>,
    pub programs: SlotMap<ProgramHandle, String>,
    pub sources: Vec<String>,
    pub passes: Vec<String>,
    pub draws: Vec<RecordedDraw>,

    current_pass: Option<String>,
    current_program: Option<ProgramHandle>,
    current_state: RenderState,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self {
            caps: DeviceCapabilities::default(),
            size: (320, 240),
            format: DeviceFormat::Bgra8UnormSrgb,
            lost: false,
            fail_compile: None,
            fail_framebuffers: false,
            calls: Calls::default(),
            buffers: SlotMap::with_key(),
            buffer_writes: Vec::new(),
            textures: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            sources: Vec::new(),
            passes: Vec::new(),
            draws: Vec::new(),
            current_pass: None,
            current_program: None,
            current_state: RenderState::default(),
        }
    }

    pub fn with_caps(caps: DeviceCapabilities) -> Self {
        Self {
            caps,
            ..Self::new()
        }
    }

    /// Clears call counters and recorded draws, keeping live resources.
    pub fn clear_log(&mut self) {
        self.calls = Calls::default();
        self.buffer_writes.clear();
        self.passes.clear();
        self.draws.clear();
    }

    /// Simulates a fresh context after a loss: every handle is gone.
    pub fn restore(&mut self) {
        self.lost = false;
        self.buffers.clear();
        self.textures.clear();
        self.framebuffers.clear();
        self.programs.clear();
        self.current_program = None;
    }

    pub fn draws_in(&self, pass: &str) -> Vec<&RecordedDraw> {
        self.draws.iter().filter(|d| d.pass == pass).collect()
    }
}

impl GpuDevice for RecordingDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.caps
    }

    fn drawing_buffer_size(&self) -> (u32, u32) {
        self.size
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    fn screen_format(&self) -> DeviceFormat {
        self.format
    }

    fn is_context_lost(&self) -> bool {
        self.lost
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle> {
        self.calls.create_buffer += 1;
        if desc.contents.is_empty() {
            return Err(KilnError::ResourceCreation {
                kind: "buffer",
                reason: "empty".into(),
            });
        }
        Ok(self.buffers.insert(desc.contents.to_vec()))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        self.calls.write_buffer += 1;
        self.buffer_writes.push((buffer, offset, data.len()));
        if let Some(contents) = self.buffers.get_mut(buffer) {
            let start = offset as usize;
            let end = (start + data.len()).min(contents.len());
            contents[start..end].copy_from_slice(&data[..end - start]);
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.calls.destroy_buffer += 1;
        self.buffers.remove(buffer);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor<'_>) -> Result<TextureHandle> {
        self.calls.create_texture += 1;
        Ok(self.textures.insert(RecordedTexture {
            label: desc.label.to_string(),
            width: desc.width,
            height: desc.height,
            format: desc.format,
            mip_level_count: desc.mip_level_count,
            sample_count: desc.sample_count,
        }))
    }

    fn write_texture(&mut self, _texture: TextureHandle, _layer: u32, _mip: u32, _w: u32, _h: u32, _data: &[u8]) {
        self.calls.write_texture += 1;
    }

    fn set_sampler(&mut self, _texture: TextureHandle, _sampler: &SamplerState) {
        self.calls.set_sampler += 1;
    }

    fn generate_mipmaps(&mut self, _texture: TextureHandle) {
        self.calls.generate_mipmaps += 1;
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.calls.destroy_texture += 1;
        self.textures.remove(texture);
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDescriptor) -> Result<FramebufferHandle> {
        self.calls.create_framebuffer += 1;
        if self.fail_framebuffers {
            return Err(KilnError::ResourceCreation {
                kind: "framebuffer",
                reason: "rejected".into(),
            });
        }
        Ok(self.framebuffers.insert(*desc))
    }

    fn resolve_framebuffer(&mut self, _framebuffer: FramebufferHandle) {
        self.calls.resolve_framebuffer += 1;
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.calls.destroy_framebuffer += 1;
        self.framebuffers.remove(framebuffer);
    }

    fn compile_program(&mut self, desc: &ProgramDescriptor<'_>) -> std::result::Result<ProgramHandle, String> {
        self.calls.compile_program += 1;
        if let Some(marker) = &self.fail_compile
            && desc.label.contains(marker.as_str())
        {
            return Err(format!("error: '{}' rejected", desc.label));
        }
        self.sources.push(desc.source.to_string());
        Ok(self.programs.insert(desc.label.to_string()))
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.calls.destroy_program += 1;
        self.programs.remove(program);
    }

    fn begin_frame(&mut self) {
        self.calls.begin_frame += 1;
    }

    fn begin_pass(&mut self, desc: &PassDescriptor<'_>) {
        self.calls.begin_pass += 1;
        self.passes.push(desc.label.to_string());
        self.current_pass = Some(desc.label.to_string());
    }

    fn end_pass(&mut self) {
        self.calls.end_pass += 1;
        self.current_pass = None;
    }

    fn present(&mut self) {
        self.calls.present += 1;
    }

    fn set_render_state(&mut self, state: &RenderState) {
        self.calls.set_render_state += 1;
        self.current_state = *state;
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.calls.use_program += 1;
        self.current_program = Some(program);
    }

    fn set_uniform(&mut self, _slot: usize, _value: &UniformValue) {
        self.calls.set_uniform += 1;
    }

    fn bind_texture(&mut self, _unit: u32, _texture: TextureHandle) {
        self.calls.bind_texture += 1;
    }

    fn set_vertex_buffer(&mut self, _location: u32, _buffer: BufferHandle, _binding: &VertexBinding) {
        self.calls.set_vertex_buffer += 1;
    }

    fn set_index_buffer(&mut self, _buffer: BufferHandle, _format: IndexFormat) {
        self.calls.set_index_buffer += 1;
    }

    fn draw(&mut self, call: &DrawCall) {
        self.calls.draw += 1;
        let program = self
            .current_program
            .and_then(|p| self.programs.get(p))
            .cloned()
            .unwrap_or_default();
        self.draws.push(RecordedDraw {
            pass: self.current_pass.clone().unwrap_or_default(),
            program,
            state: self.current_state,
            call: *call,
        });
    }
}

/// Camera at `(0, 0, 5)` looking at the origin.
pub fn camera() -> Camera {
    let mut camera = Camera::perspective(60.0, 4.0 / 3.0, 0.1, 100.0);
    camera.look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
    camera
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
