//! Textured scene background.
//!
//! Drawn first in the main pass as a full-screen triangle, without depth
//! test or write, through an internal custom material.

use glam::Mat4;

use crate::renderer::device::GpuDevice;
use crate::renderer::draw::DrawItem;
use crate::renderer::{PassState, Renderer};
use crate::resources::{
    AttributeBuffer, CustomShader, Geometry, Material, MaterialKind, Shared, Side, Texture, shared,
};
use crate::scene::Mesh;

const VERTEX: &str = r"
struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip = vec4<f32>(in.position.xy, 1.0, 1.0);
    out.uv = vec2<f32>(in.position.x * 0.5 + 0.5, 0.5 - in.position.y * 0.5);
    return out;
}
";

const FRAGMENT: &str = r"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    var color = textureSample(t_background, s_background, in.uv);
$$ if output_srgb
    color = vec4<f32>(linear_to_srgb(color.rgb), color.a);
$$ endif
    return color;
}
";

pub struct BackgroundQuad {
    material: Shared<Material>,
    geometry: Shared<Geometry>,
    mesh: Mesh,
}

impl Default for BackgroundQuad {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundQuad {
    #[must_use]
    pub fn new() -> Self {
        let mut shader = CustomShader::new(VERTEX, FRAGMENT).with_texture("background", None);
        shader.name = String::from("background");

        let mut material = Material::custom(shader);
        {
            let mut data = material.edit();
            data.name = String::from("background");
            data.depth_test = false;
            data.depth_write = false;
            data.side = Side::Double;
            data.fog = false;
            data.tone_mapped = false;
        }

        let positions: [f32; 9] = [-1.0, -1.0, 0.0, 3.0, -1.0, 0.0, -1.0, 3.0, 0.0];
        let geometry = shared(Geometry::new().with_attribute("position", AttributeBuffer::new(&positions, 3)));
        let material = shared(material);
        let mesh = Mesh::new(geometry.clone(), material.clone());
        Self {
            material,
            geometry,
            mesh,
        }
    }
}

impl<D: GpuDevice> Renderer<D> {
    pub(crate) fn render_background(&mut self, texture: &Shared<Texture>, pass: &PassState<'_>) {
        if texture.read().is_cube() {
            self.warnings.warn("Cube-map scene backgrounds are not supported; background skipped");
            return;
        }

        {
            let mut material = self.background.material.write();
            if let MaterialKind::Custom(shader) = &mut material.edit().kind
                && let Some(slot) = shader.textures.first_mut()
            {
                slot.1 = Some(texture.clone());
            }
        }

        let mesh = self.background.mesh.clone();
        let material = self.background.material.clone();
        let geometry = self.background.geometry.clone();
        let material = material.read();
        let geometry = geometry.read();
        self.draw(
            DrawItem {
                mesh: &mesh,
                geometry: &geometry,
                material: &material,
                group: None,
                world_matrix: Mat4::IDENTITY,
                receive_shadow: false,
                side: Side::Double,
            },
            pass,
        );
    }
}
