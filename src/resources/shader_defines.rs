//! Preprocessor define sets.
//!
//! Defines are stored as interned `(name, value)` symbol pairs kept sorted by
//! symbol, so two sets with the same content compare and hash equally no
//! matter the insertion order.
//!
//! ```rust,ignore
//! use kiln::resources::ShaderDefines;
//!
//! let mut defines = ShaderDefines::new();
//! defines.set("USE_GRADIENT", "1");
//! defines.set("BAND_COUNT", "4");
//! assert_eq!(defines.serialize(), "BAND_COUNT=4,USE_GRADIENT=1");
//! ```

use std::collections::BTreeMap;
use std::hash::BuildHasher;

use crate::utils::interner::{self, Symbol};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ShaderDefines {
    entries: Vec<(Symbol, Symbol)>,
}

impl ShaderDefines {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: Symbol) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&key, |&(k, _)| k)
    }

    /// Sets a define, replacing any previous value.
    pub fn set(&mut self, key: &str, value: &str) {
        let (key, value) = (interner::intern(key), interner::intern(value));
        match self.slot(key) {
            Ok(at) => self.entries[at].1 = value,
            Err(at) => self.entries.insert(at, (key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let found = interner::get(key).and_then(|key| self.slot(key).ok());
        if let Some(at) = found {
            self.entries.remove(at);
        }
        found.is_some()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        interner::get(key).is_some_and(|key| self.slot(key).is_ok())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&'static str> {
        let at = self.slot(interner::get(key)?).ok()?;
        Some(interner::resolve(self.entries[at].1))
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(name, value)` pairs in symbol order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.entries
            .iter()
            .map(|&(k, v)| (interner::resolve(k), interner::resolve(v)))
    }

    /// Name-sorted map, used as template context.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Overlays `other`; its values win on conflicts.
    pub fn merge(&mut self, other: &ShaderDefines) {
        for (key, value) in other.iter() {
            self.set(key, value);
        }
    }

    /// Canonical `NAME=value,...` form, sorted by name. This is the define
    /// section of a program cache key.
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut pairs: Vec<_> = self.iter().collect();
        pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));
        let mut out = String::new();
        for (i, (k, v)) in pairs.into_iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(k);
            out.push('=');
            out.push_str(v);
        }
        out
    }

    #[must_use]
    pub fn compute_hash(&self) -> u64 {
        rustc_hash::FxBuildHasher.hash_one(self)
    }
}

impl From<&[(&str, &str)]> for ShaderDefines {
    fn from(pairs: &[(&str, &str)]) -> Self {
        pairs.iter().fold(Self::new(), |mut set, (k, v)| {
            set.set(k, v);
            set
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let mut set = ShaderDefines::new();
        set.set("USE_RAMP", "1");
        set.set("USE_RAMP", "2");

        assert_eq!(set.len(), 1);
        assert_eq!(set.get("USE_RAMP"), Some("2"));
        assert!(set.remove("USE_RAMP"));
        assert!(!set.contains("USE_RAMP"));
        assert!(!set.remove("NEVER_SEEN_DEFINE_NAME"));
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let a = ShaderDefines::from(&[("B", "1"), ("A", "2")][..]);
        let b = ShaderDefines::from(&[("A", "2"), ("B", "1")][..]);

        assert_eq!(a, b);
        assert_eq!(a.compute_hash(), b.compute_hash());
        assert_eq!(a.serialize(), "A=2,B=1");
    }

    #[test]
    fn test_merge_overrides() {
        let mut base = ShaderDefines::from(&[("A", "1"), ("B", "2")][..]);
        base.merge(&ShaderDefines::from(&[("B", "3"), ("C", "4")][..]));

        assert_eq!(base.serialize(), "A=1,B=3,C=4");
    }
}
