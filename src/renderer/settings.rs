//! Renderer Settings
//!
//! Runtime configuration of the frame driver: clearing, sorting, tone
//! mapping, output encoding, shadow maps, transmission and clipping.
//!
//! Settings are plain data (`serde`), so they can live in a JSON config file:
//!
//! ```rust,ignore
//! use kiln::renderer::RendererSettings;
//!
//! let settings = RendererSettings::from_json(r#"{
//!     "tone_mapping": "AcesFilmic",
//!     "shadow_map": { "enabled": true, "kind": "PcfSoft" }
//! }"#)?;
//! ```
//!
//! Missing fields take their [`Default`] values.

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::resources::ColorSpace;

// ---------------------------------------------------------------------------
// Tone mapping
// ---------------------------------------------------------------------------

/// Operator applied to lit colors before output encoding.
///
/// Only applied when rendering to the screen and only for materials with
/// `tone_mapped` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ToneMapping {
    #[default]
    None,
    Linear,
    Reinhard,
    Cineon,
    AcesFilmic,
    Neutral,
}

impl ToneMapping {
    /// Name of the WGSL function implementing the operator.
    #[must_use]
    pub fn function_name(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Linear => Some("tone_map_linear"),
            Self::Reinhard => Some("tone_map_reinhard"),
            Self::Cineon => Some("tone_map_cineon"),
            Self::AcesFilmic => Some("tone_map_aces"),
            Self::Neutral => Some("tone_map_neutral"),
        }
    }
}

// ---------------------------------------------------------------------------
// Shadows
// ---------------------------------------------------------------------------

/// Shadow map filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShadowMapType {
    /// Single depth comparison.
    Basic,
    /// 3×3 percentage-closer filtering.
    #[default]
    Pcf,
    /// PCF with a radius-scaled, bilinear-weighted kernel.
    PcfSoft,
    /// Variance shadow maps. Not implemented; rendered as [`PcfSoft`](Self::PcfSoft).
    Vsm,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowMapSettings {
    pub enabled: bool,
    pub kind: ShadowMapType,
    /// Re-render shadow maps every frame. When `false`, maps are rendered
    /// only after [`ShadowMapSettings::needs_update`] is set.
    pub auto_update: bool,
    pub needs_update: bool,
}

impl Default for ShadowMapSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: ShadowMapType::Pcf,
            auto_update: true,
            needs_update: false,
        }
    }
}

// ---------------------------------------------------------------------------
// RendererSettings
// ---------------------------------------------------------------------------

/// Frame-driver configuration.
///
/// | Field                           | Default            |
/// |---------------------------------|--------------------|
/// | `sort_objects`                  | `true`             |
/// | `auto_clear`                    | `true`             |
/// | `clear_color` / `clear_alpha`   | black / `1.0`      |
/// | `tone_mapping`                  | `None`             |
/// | `tone_mapping_exposure`         | `1.0`              |
/// | `output_color_space`            | `Srgb`             |
/// | `shadow_map.enabled`            | `false`            |
/// | `transmission_resolution_scale` | `1.0`              |
/// | `local_clipping_enabled`        | `false`            |
/// | `clipping_planes`               | empty              |
/// | `pixel_ratio`                   | `1.0`              |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// Sort render lists before drawing. Disabling keeps traversal order.
    pub sort_objects: bool,
    /// Clear color, depth and stencil at the start of every render.
    pub auto_clear: bool,
    pub clear_color: Vec3,
    pub clear_alpha: f32,

    pub tone_mapping: ToneMapping,
    pub tone_mapping_exposure: f32,
    /// Encoding of the screen output. sRGB output on a non-sRGB surface is
    /// encoded in the shader.
    pub output_color_space: ColorSpace,

    pub shadow_map: ShadowMapSettings,

    /// Size of the transmission target relative to the drawing buffer.
    pub transmission_resolution_scale: f32,

    /// Honor material-local clipping planes.
    pub local_clipping_enabled: bool,
    /// Global clipping planes `(normal, constant)` in world space, applied to
    /// every material.
    pub clipping_planes: Vec<Vec4>,

    /// Device pixels per logical pixel; scales viewports passed to
    /// [`Renderer::set_viewport`](super::Renderer::set_viewport).
    pub pixel_ratio: f32,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            sort_objects: true,
            auto_clear: true,
            clear_color: Vec3::ZERO,
            clear_alpha: 1.0,
            tone_mapping: ToneMapping::None,
            tone_mapping_exposure: 1.0,
            output_color_space: ColorSpace::Srgb,
            shadow_map: ShadowMapSettings::default(),
            transmission_resolution_scale: 1.0,
            local_clipping_enabled: false,
            clipping_planes: Vec::new(),
            pixel_ratio: 1.0,
        }
    }
}

impl RendererSettings {
    /// Parses settings from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the settings to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Effective shadow filtering; variance shadow maps fall back to soft PCF.
    #[must_use]
    pub fn effective_shadow_type(&self) -> ShadowMapType {
        match self.shadow_map.kind {
            ShadowMapType::Vsm => ShadowMapType::PcfSoft,
            kind => kind,
        }
    }

    /// Clear color as RGBA.
    #[must_use]
    pub fn clear_rgba(&self) -> [f32; 4] {
        [self.clear_color.x, self.clear_color.y, self.clear_color.z, self.clear_alpha]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings = RendererSettings::from_json(
            r#"{ "tone_mapping": "AcesFilmic", "shadow_map": { "enabled": true } }"#,
        )
        .unwrap();
        assert_eq!(settings.tone_mapping, ToneMapping::AcesFilmic);
        assert!(settings.shadow_map.enabled);
        assert_eq!(settings.shadow_map.kind, ShadowMapType::Pcf);
        assert!(settings.sort_objects);
        assert!((settings.tone_mapping_exposure - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = RendererSettings::from_json("{ \"sort_objects\": 3 }").unwrap_err();
        assert!(matches!(err, crate::errors::KilnError::Config(_)));
    }

    #[test]
    fn test_vsm_falls_back_to_soft_pcf() {
        let mut settings = RendererSettings::default();
        settings.shadow_map.kind = ShadowMapType::Vsm;
        assert_eq!(settings.effective_shadow_type(), ShadowMapType::PcfSoft);
    }

    #[test]
    fn test_json_roundtrip_preserves_planes() {
        let settings = RendererSettings {
            clipping_planes: vec![Vec4::new(0.0, 1.0, 0.0, 0.5)],
            ..RendererSettings::default()
        };
        let parsed = RendererSettings::from_json(&settings.to_json().unwrap()).unwrap();
        assert_eq!(parsed, settings);
    }
}
