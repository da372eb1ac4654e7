//! Global string interner
//!
//! Define names and values are interned to [`Symbol`]s so that define sets
//! compare and hash as integers.

use std::sync::LazyLock;

use lasso::{Spur, ThreadedRodeo};

static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::new);

/// Compact integer identifier for an interned string.
pub type Symbol = Spur;

/// Interns a string, returning the existing symbol if it is already known.
#[inline]
pub fn intern(s: &str) -> Symbol {
    INTERNER.get_or_intern(s)
}

/// Looks up a string without interning it.
#[inline]
pub fn get(s: &str) -> Option<Symbol> {
    INTERNER.get(s)
}

/// Resolves a symbol back to its string.
#[inline]
pub fn resolve(sym: Symbol) -> &'static str {
    let interner: &'static ThreadedRodeo = &INTERNER;
    interner.resolve(&sym)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_and_resolve() {
        let s1 = intern("USE_MAP");
        let s2 = intern("USE_MAP");
        let s3 = intern("USE_FOG");

        assert_eq!(s1, s2);
        assert_ne!(s1, s3);
        assert_eq!(resolve(s1), "USE_MAP");
        assert_eq!(resolve(s3), "USE_FOG");
    }

    #[test]
    fn test_get_does_not_intern() {
        let _ = intern("existing_define");

        assert!(get("existing_define").is_some());
        assert!(get("never_interned_define").is_none());
    }
}
