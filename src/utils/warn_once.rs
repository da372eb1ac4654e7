//! Deduplicated warnings for capability gaps.
//!
//! A missing texture format or an unsupported MSAA resolve would otherwise log
//! on every frame. [`WarnOnce`] remembers which messages were already emitted.
//! Only message hashes are kept, and the set is bounded: once it holds
//! [`WarnOnce::CAPACITY`] entries it starts over, so churning resources whose
//! ids appear in messages cannot grow it forever.

use std::hash::BuildHasher;

use rustc_hash::{FxBuildHasher, FxHashSet};

#[derive(Debug, Default)]
pub struct WarnOnce {
    seen: FxHashSet<u64>,
}

impl WarnOnce {
    pub const CAPACITY: usize = 256;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs `message` at warn level the first time it is seen.
    /// Returns `true` if the message was emitted.
    pub fn warn(&mut self, message: impl AsRef<str>) -> bool {
        let message = message.as_ref();
        let key = FxBuildHasher.hash_one(message);
        if self.seen.contains(&key) {
            return false;
        }
        if self.seen.len() >= Self::CAPACITY {
            self.seen.clear();
        }
        log::warn!("{message}");
        self.seen.insert(key);
        true
    }

    /// Forgets every emitted message.
    pub fn reset(&mut self) {
        self.seen.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
