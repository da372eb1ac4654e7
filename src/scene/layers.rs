/// 32-bit layer mask. A node is drawn by a camera only if their masks share
/// at least one bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Layers(u32);

impl Default for Layers {
    fn default() -> Self {
        Self(1)
    }
}

impl Layers {
    pub const ALL: Self = Self(u32::MAX);
    pub const NONE: Self = Self(0);

    /// Mask with only `layer` enabled.
    #[must_use]
    pub const fn only(layer: u32) -> Self {
        Self(1 << layer)
    }

    pub fn set(&mut self, layer: u32) {
        self.0 = 1 << layer;
    }

    pub fn enable(&mut self, layer: u32) {
        self.0 |= 1 << layer;
    }

    pub fn disable(&mut self, layer: u32) {
        self.0 &= !(1 << layer);
    }

    #[must_use]
    pub const fn test(self, other: Layers) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn is_enabled(self, layer: u32) -> bool {
        self.0 & (1 << layer) != 0
    }

    #[must_use]
    pub const fn mask(self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_masks() {
        let mut layers = Layers::default();
        assert!(layers.is_enabled(0));
        layers.enable(3);
        layers.disable(0);
        assert!(!layers.test(Layers::only(0)));
        assert!(layers.test(Layers::only(3)));
        assert!(!Layers::NONE.test(Layers::ALL));
    }
}
