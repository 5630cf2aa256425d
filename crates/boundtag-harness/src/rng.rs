//! Deterministic pseudo-random source for reproducible runs.

#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Zero is not a valid xorshift state; it is remapped to a fixed constant.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    pub fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = (high_inclusive - low).wrapping_add(1);
        if span == 0 {
            return self.next_u64() as usize;
        }
        low + (self.next_u64() as usize % span)
    }

    /// Seed for worker `index` derived from a root seed.
    #[must_use]
    pub fn fork(root: u64, index: u64) -> Self {
        Self::new(root ^ index.wrapping_mul(0xA076_1D64_78BD_642F))
    }
}
