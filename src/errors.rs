//! Error Types
//!
//! This module defines the error types used throughout the renderer.
//!
//! # Overview
//!
//! The main error type [`KilnError`] covers every recoverable failure that can
//! occur while preparing or issuing a draw:
//! - Shader program compilation failures
//! - Missing device capabilities (texture formats, MSAA resolve)
//! - Malformed geometry (missing attributes, out-of-range indices)
//! - Device context loss
//!
//! # Propagation
//!
//! Internal per-draw steps return [`Result<T>`]. The frame driver absorbs
//! these errors, logs them and skips the offending draw, so nothing crosses
//! the `Renderer::render` boundary.
//!
//! ```rust,ignore
//! use kiln::errors::{KilnError, Result};
//!
//! fn prepare() -> Result<()> {
//!     Err(KilnError::MissingAttribute { geometry: 7, name: "normal".into() })
//! }
//! ```

use thiserror::Error;

/// The main error type for the Kiln renderer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KilnError {
    // ========================================================================
    // Program Errors
    // ========================================================================
    /// A shader program failed to compile or link. The diagnostic is the
    /// compiler log as reported by the device.
    #[error("Shader program '{key}' failed to compile: {diagnostic}")]
    ShaderCompile {
        /// Cache key of the failed program
        key: String,
        /// Compiler output
        diagnostic: String,
    },

    /// A shader template could not be expanded.
    #[error("Shader template '{template}' failed to expand: {reason}")]
    ShaderTemplate {
        /// Template name
        template: String,
        /// Template engine message
        reason: String,
    },

    // ========================================================================
    // Capability Errors
    // ========================================================================
    /// The device cannot sample or render the requested format.
    #[error("Unsupported texture format: {0}")]
    UnsupportedFormat(String),

    /// The device lacks a feature the resource asked for.
    #[error("Unsupported device capability: {0}")]
    UnsupportedCapability(String),

    // ========================================================================
    // Malformed Input
    // ========================================================================
    /// A program requires a vertex attribute the geometry does not carry.
    #[error("Geometry {geometry} is missing required attribute '{name}'")]
    MissingAttribute {
        /// Geometry id
        geometry: u64,
        /// Attribute channel name
        name: String,
    },

    /// An attribute's component type does not match the program input
    /// (integer data bound to a float input or the reverse).
    #[error("Geometry {geometry}: attribute '{name}' has an incompatible format")]
    IncompatibleAttribute {
        /// Geometry id
        geometry: u64,
        /// Attribute channel name
        name: String,
    },

    /// An index references a vertex past the end of the attribute arrays.
    #[error("Geometry {geometry}: index {index} out of range (vertex count {vertex_count})")]
    IndexOutOfRange {
        /// Geometry id
        geometry: u64,
        /// Largest index referenced
        index: u32,
        /// Number of vertices available
        vertex_count: u32,
    },

    // ========================================================================
    // Device Errors
    // ========================================================================
    /// The device context was lost; every handle is invalid.
    #[error("GPU context lost")]
    ContextLost,

    /// The device refused to create a resource.
    #[error("Failed to create {kind}: {reason}")]
    ResourceCreation {
        /// Resource kind ("buffer", "texture", ...)
        kind: &'static str,
        /// Device message
        reason: String,
    },

    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(String),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Renderer settings could not be parsed.
    #[error("Invalid renderer settings: {0}")]
    Config(String),
}

// ============================================================================
// Convenient conversion implementations
// ============================================================================

impl From<wgpu::RequestDeviceError> for KilnError {
    fn from(err: wgpu::RequestDeviceError) -> Self {
        KilnError::DeviceCreateFailed(err.to_string())
    }
}

impl From<serde_json::Error> for KilnError {
    fn from(err: serde_json::Error) -> Self {
        KilnError::Config(err.to_string())
    }
}

/// Alias for `Result<T, KilnError>`.
pub type Result<T> = std::result::Result<T, KilnError>;
