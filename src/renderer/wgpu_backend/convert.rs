//! Device-neutral descriptions to wgpu types.

use crate::renderer::device::{
    AddressMode, CullFace, DeviceFormat, Filter, FrontFace, IndexFormat, RenderState, SamplerState, StepMode,
    TextureDimension, VertexFormat,
};
use crate::resources::{Blending, DepthFunc};
use crate::scene::Topology;

#[must_use]
pub fn texture_format(format: DeviceFormat) -> wgpu::TextureFormat {
    match format {
        DeviceFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        DeviceFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        DeviceFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        DeviceFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        DeviceFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        DeviceFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        DeviceFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        DeviceFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        DeviceFormat::R32Float => wgpu::TextureFormat::R32Float,
        DeviceFormat::Depth24Plus => wgpu::TextureFormat::Depth24Plus,
        DeviceFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

/// Inverse of [`texture_format`] for surface formats.
#[must_use]
pub fn device_format(format: wgpu::TextureFormat) -> Option<DeviceFormat> {
    Some(match format {
        wgpu::TextureFormat::Rgba8Unorm => DeviceFormat::Rgba8Unorm,
        wgpu::TextureFormat::Rgba8UnormSrgb => DeviceFormat::Rgba8UnormSrgb,
        wgpu::TextureFormat::Bgra8Unorm => DeviceFormat::Bgra8Unorm,
        wgpu::TextureFormat::Bgra8UnormSrgb => DeviceFormat::Bgra8UnormSrgb,
        wgpu::TextureFormat::Rgba16Float => DeviceFormat::Rgba16Float,
        _ => return None,
    })
}

#[must_use]
pub fn view_dimension(dimension: TextureDimension) -> wgpu::TextureViewDimension {
    match dimension {
        TextureDimension::D2 => wgpu::TextureViewDimension::D2,
        TextureDimension::Cube => wgpu::TextureViewDimension::Cube,
    }
}

#[must_use]
pub fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    use wgpu::VertexFormat as W;
    match format {
        VertexFormat::Float32 => W::Float32,
        VertexFormat::Float32x2 => W::Float32x2,
        VertexFormat::Float32x3 => W::Float32x3,
        VertexFormat::Float32x4 => W::Float32x4,
        VertexFormat::Uint32 => W::Uint32,
        VertexFormat::Uint32x2 => W::Uint32x2,
        VertexFormat::Uint32x3 => W::Uint32x3,
        VertexFormat::Uint32x4 => W::Uint32x4,
        VertexFormat::Sint32 => W::Sint32,
        VertexFormat::Sint32x4 => W::Sint32x4,
        VertexFormat::Uint16x2 => W::Uint16x2,
        VertexFormat::Uint16x4 => W::Uint16x4,
        VertexFormat::Sint16x2 => W::Sint16x2,
        VertexFormat::Sint16x4 => W::Sint16x4,
        VertexFormat::Unorm16x2 => W::Unorm16x2,
        VertexFormat::Unorm16x4 => W::Unorm16x4,
        VertexFormat::Uint8x4 => W::Uint8x4,
        VertexFormat::Unorm8x4 => W::Unorm8x4,
        VertexFormat::Snorm8x4 => W::Snorm8x4,
    }
}

#[must_use]
pub fn step_mode(step: StepMode) -> wgpu::VertexStepMode {
    match step {
        StepMode::Vertex => wgpu::VertexStepMode::Vertex,
        StepMode::Instance => wgpu::VertexStepMode::Instance,
    }
}

#[must_use]
pub fn index_format(format: IndexFormat) -> wgpu::IndexFormat {
    match format {
        IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
        IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
    }
}

#[must_use]
pub fn topology(topology: Topology) -> wgpu::PrimitiveTopology {
    match topology {
        Topology::Triangles => wgpu::PrimitiveTopology::TriangleList,
        Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        Topology::Lines => wgpu::PrimitiveTopology::LineList,
        Topology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        Topology::Points => wgpu::PrimitiveTopology::PointList,
    }
}

#[must_use]
pub fn compare_function(func: DepthFunc) -> wgpu::CompareFunction {
    match func {
        DepthFunc::Never => wgpu::CompareFunction::Never,
        DepthFunc::Less => wgpu::CompareFunction::Less,
        DepthFunc::Equal => wgpu::CompareFunction::Equal,
        DepthFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        DepthFunc::Greater => wgpu::CompareFunction::Greater,
        DepthFunc::NotEqual => wgpu::CompareFunction::NotEqual,
        DepthFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        DepthFunc::Always => wgpu::CompareFunction::Always,
    }
}

#[must_use]
pub fn primitive_state(topology: Topology, state: &RenderState) -> wgpu::PrimitiveState {
    wgpu::PrimitiveState {
        topology: self::topology(topology),
        strip_index_format: None,
        front_face: match state.front_face {
            FrontFace::Ccw => wgpu::FrontFace::Ccw,
            FrontFace::Cw => wgpu::FrontFace::Cw,
        },
        cull_mode: match state.cull {
            CullFace::None => None,
            CullFace::Back => Some(wgpu::Face::Back),
            CullFace::Front => Some(wgpu::Face::Front),
        },
        ..Default::default()
    }
}

fn component(src: wgpu::BlendFactor, dst: wgpu::BlendFactor, operation: wgpu::BlendOperation) -> wgpu::BlendComponent {
    wgpu::BlendComponent {
        src_factor: src,
        dst_factor: dst,
        operation,
    }
}

/// Blend equation for a material blending mode.
#[must_use]
pub fn blend_state(blending: Blending, premultiplied_alpha: bool) -> Option<wgpu::BlendState> {
    use wgpu::BlendFactor as F;
    use wgpu::BlendOperation::Add;

    let (color, alpha) = match (blending, premultiplied_alpha) {
        (Blending::None, _) => return None,
        (Blending::Normal, true) => (
            component(F::One, F::OneMinusSrcAlpha, Add),
            component(F::One, F::OneMinusSrcAlpha, Add),
        ),
        (Blending::Normal, false) => (
            component(F::SrcAlpha, F::OneMinusSrcAlpha, Add),
            component(F::One, F::OneMinusSrcAlpha, Add),
        ),
        (Blending::Additive, true) => (component(F::One, F::One, Add), component(F::One, F::One, Add)),
        (Blending::Additive, false) => (component(F::SrcAlpha, F::One, Add), component(F::One, F::One, Add)),
        (Blending::Subtractive, true) => (
            component(F::Zero, F::OneMinusSrc, Add),
            component(F::Zero, F::OneMinusSrcAlpha, Add),
        ),
        (Blending::Subtractive, false) => (component(F::Zero, F::OneMinusSrc, Add), component(F::Zero, F::One, Add)),
        (Blending::Multiply, _) => (component(F::Zero, F::Src, Add), component(F::Zero, F::SrcAlpha, Add)),
    };
    Some(wgpu::BlendState { color, alpha })
}

fn address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

fn filter_mode(filter: Filter) -> wgpu::FilterMode {
    match filter {
        Filter::Nearest => wgpu::FilterMode::Nearest,
        Filter::Linear => wgpu::FilterMode::Linear,
    }
}

#[must_use]
pub fn sampler_descriptor(state: &SamplerState) -> wgpu::SamplerDescriptor<'static> {
    let all_linear =
        state.mag_filter == Filter::Linear && state.min_filter == Filter::Linear && state.mipmap_filter == Filter::Linear;
    wgpu::SamplerDescriptor {
        label: Some("Texture Sampler"),
        address_mode_u: address_mode(state.address_u),
        address_mode_v: address_mode(state.address_v),
        address_mode_w: address_mode(state.address_v),
        mag_filter: filter_mode(state.mag_filter),
        min_filter: filter_mode(state.min_filter),
        mipmap_filter: match state.mipmap_filter {
            Filter::Nearest => wgpu::MipmapFilterMode::Nearest,
            Filter::Linear => wgpu::MipmapFilterMode::Linear,
        },
        // Anisotropic filtering requires linear filtering everywhere.
        anisotropy_clamp: if all_linear { state.anisotropy.clamp(1, 16) } else { 1 },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_has_no_blend() {
        assert!(blend_state(Blending::None, false).is_none());
        let normal = blend_state(Blending::Normal, false).unwrap();
        assert_eq!(normal.color.src_factor, wgpu::BlendFactor::SrcAlpha);
        let premultiplied = blend_state(Blending::Normal, true).unwrap();
        assert_eq!(premultiplied.color.src_factor, wgpu::BlendFactor::One);
    }

    #[test]
    fn test_anisotropy_needs_linear_filters() {
        let state = SamplerState {
            anisotropy: 8,
            ..SamplerState::default()
        };
        assert_eq!(sampler_descriptor(&state).anisotropy_clamp, 1);
        let state = SamplerState {
            mipmap_filter: Filter::Linear,
            ..state
        };
        assert_eq!(sampler_descriptor(&state).anisotropy_clamp, 8);
    }

    #[test]
    fn test_surface_formats_round_trip() {
        for format in [DeviceFormat::Bgra8UnormSrgb, DeviceFormat::Rgba8Unorm] {
            assert_eq!(device_format(texture_format(format)), Some(format));
        }
        assert_eq!(device_format(wgpu::TextureFormat::Depth32Float), None);
    }
}
