//! Utility Module
//!
//! - [`interner`]: String interning for define names and values
//! - [`WarnOnce`]: Deduplicated warnings for capability gaps
//!
//! ```rust,ignore
//! use kiln::utils::interner;
//!
//! let sym1 = interner::intern("USE_MAP");
//! let sym2 = interner::intern("USE_MAP");
//! assert_eq!(sym1, sym2);
//! ```

pub mod interner;
pub mod warn_once;

pub use interner::Symbol;
pub use warn_once::WarnOnce;
