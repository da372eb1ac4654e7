/// Version counter used to mark resource changes.
///
/// GPU records mirror the version they last uploaded; a newer CPU version
/// means the record is stale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeTracker {
    version: u64,
}

impl ChangeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns `true` when `seen` is older than the current version.
    #[inline]
    #[must_use]
    pub fn is_newer_than(&self, seen: u64) -> bool {
        self.version != seen
    }
}

/// Write access to a tracked field. The tracker is bumped once when the
/// guard goes out of scope, however many writes happened through it.
pub struct MutGuard<'a, T> {
    value: &'a mut T,
    owner: &'a mut ChangeTracker,
}

impl<'a, T> MutGuard<'a, T> {
    pub fn new(value: &'a mut T, owner: &'a mut ChangeTracker) -> Self {
        Self { value, owner }
    }
}

impl<T> std::ops::Deref for MutGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

impl<T> std::ops::DerefMut for MutGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
    }
}

impl<T> Drop for MutGuard<'_, T> {
    fn drop(&mut self) {
        self.owner.bump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_bumps_on_drop() {
        let mut value = 1_u32;
        let mut tracker = ChangeTracker::new();
        {
            let mut guard = MutGuard::new(&mut value, &mut tracker);
            *guard = 2;
        }
        assert_eq!(value, 2);
        assert_eq!(tracker.version(), 1);
        assert!(tracker.is_newer_than(0));
        assert!(!tracker.is_newer_than(1));
    }
}
