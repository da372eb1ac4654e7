//! Reference-counted custom shader sources.
//!
//! Custom materials are identified in program keys by the ids of their
//! vertex and fragment sources. The cache keeps one copy of each distinct
//! source while at least one live program uses it.

use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_64;

/// Content id of a shader source.
#[must_use]
pub fn source_id(source: &str) -> u64 {
    xxh3_64(source.as_bytes())
}

#[derive(Debug)]
struct SourceEntry {
    source: String,
    used_times: u32,
}

#[derive(Debug, Default)]
pub struct ShaderSourceCache {
    entries: FxHashMap<u64, SourceEntry>,
}

impl ShaderSourceCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one more user of `source` and returns its id.
    pub fn acquire(&mut self, source: &str) -> u64 {
        let id = source_id(source);
        self.entries
            .entry(id)
            .and_modify(|entry| entry.used_times += 1)
            .or_insert_with(|| SourceEntry {
                source: source.to_string(),
                used_times: 1,
            });
        id
    }

    /// Drops one user. Returns `true` when the source was evicted.
    pub fn release(&mut self, id: u64) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        entry.used_times = entry.used_times.saturating_sub(1);
        if entry.used_times == 0 {
            self.entries.remove(&id);
            return true;
        }
        false
    }

    #[must_use]
    pub fn get(&self, id: u64) -> Option<&str> {
        self.entries.get(&id).map(|entry| entry.source.as_str())
    }

    #[must_use]
    pub fn used_times(&self, id: u64) -> u32 {
        self.entries.get(&id).map_or(0, |entry| entry.used_times)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
