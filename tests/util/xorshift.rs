use std::time::{SystemTime, UNIX_EPOCH};

/// The 32-bit variant of the Xorshift PRNG algorithm.
#[repr(transparent)]
#[derive(Copy, Clone, Debug)]
pub struct Xorshift32(pub u32);
impl Xorshift32 {
    /// Seeds from the test's identifier mixed with the clock, so that concurrently running tests
    /// draw from different sequences.
    pub fn from_id(id: &str) -> Self {
        let hash = id
            .bytes()
            .fold(0x811c_9dc5_u32, |h, b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193));
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|e| e.duration())
            .subsec_nanos();
        Self((hash ^ nanos) | 1)
    }
    pub fn next(&mut self) -> u32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0
    }
}
