//! Light components.
//!
//! Position comes from the owning node's world matrix; directional and spot
//! lights additionally aim at a world-space `target`.

use glam::{UVec2, Vec3};

#[derive(Debug, Clone, PartialEq)]
pub struct LightShadow {
    pub bias: f32,
    pub normal_bias: f32,
    /// PCF kernel radius in texels.
    pub radius: f32,
    pub map_size: UVec2,
    pub near: f32,
    pub far: f32,
    /// Half extent of the orthographic shadow camera (directional lights).
    pub extent: f32,
}

impl Default for LightShadow {
    fn default() -> Self {
        Self {
            bias: 0.0,
            normal_bias: 0.0,
            radius: 1.0,
            map_size: UVec2::splat(512),
            near: 0.5,
            far: 500.0,
            extent: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LightKind {
    Ambient,
    Hemisphere {
        ground_color: Vec3,
    },
    Directional {
        target: Vec3,
    },
    Point {
        /// Cutoff distance; 0 means unlimited.
        distance: f32,
        decay: f32,
    },
    Spot {
        target: Vec3,
        distance: f32,
        /// Half-angle of the cone in radians.
        angle: f32,
        /// Fraction of the cone that fades out, 0..1.
        penumbra: f32,
        decay: f32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub color: Vec3,
    pub intensity: f32,
    pub kind: LightKind,
    pub shadow: LightShadow,
}

impl Light {
    #[must_use]
    pub fn ambient(color: Vec3, intensity: f32) -> Self {
        Self::new(color, intensity, LightKind::Ambient)
    }

    #[must_use]
    pub fn hemisphere(sky: Vec3, ground: Vec3, intensity: f32) -> Self {
        Self::new(sky, intensity, LightKind::Hemisphere { ground_color: ground })
    }

    #[must_use]
    pub fn directional(color: Vec3, intensity: f32) -> Self {
        Self::new(color, intensity, LightKind::Directional { target: Vec3::ZERO })
    }

    #[must_use]
    pub fn point(color: Vec3, intensity: f32, distance: f32) -> Self {
        Self::new(color, intensity, LightKind::Point { distance, decay: 2.0 })
    }

    #[must_use]
    pub fn spot(color: Vec3, intensity: f32, angle: f32, penumbra: f32) -> Self {
        Self::new(
            color,
            intensity,
            LightKind::Spot {
                target: Vec3::ZERO,
                distance: 0.0,
                angle,
                penumbra,
                decay: 2.0,
            },
        )
    }

    fn new(color: Vec3, intensity: f32, kind: LightKind) -> Self {
        Self {
            color,
            intensity,
            kind,
            shadow: LightShadow::default(),
        }
    }

    /// Whether this light type can render a shadow map.
    #[must_use]
    pub fn supports_shadow(&self) -> bool {
        matches!(
            self.kind,
            LightKind::Directional { .. } | LightKind::Point { .. } | LightKind::Spot { .. }
        )
    }
}
