//! Small xorshift generator for victim selection and select-arm shuffling.
//!
//! Not cryptographic. Seeds come from the OS once per thread so two workers
//! never walk their victims in the same order.

use std::cell::Cell;

/// xorshift64* generator.
#[derive(Debug, Clone)]
pub(crate) struct DetRng {
    state: u64,
}

impl DetRng {
    /// Creates a generator from a fixed seed. A zero seed is remapped.
    pub(crate) const fn new(seed: u64) -> Self {
        let state = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self { state }
    }

    /// Creates a generator seeded from OS entropy.
    ///
    /// Falls back to a clock-derived seed if the OS source is unavailable.
    pub(crate) fn from_entropy() -> Self {
        let mut buf = [0u8; 8];
        if getrandom::fill(&mut buf).is_err() {
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map_or(0, |d| d.as_nanos() as u64);
            let marker = 0u8;
            let salt = std::ptr::addr_of!(marker) as usize as u64;
            return Self::new(nanos ^ salt.rotate_left(17));
        }
        Self::new(u64::from_le_bytes(buf))
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform-ish value in `0..bound`. `bound` must be non-zero.
    pub(crate) fn next_usize(&mut self, bound: usize) -> usize {
        debug_assert!(bound > 0);
        (self.next_u64() % bound as u64) as usize
    }

    /// Fisher-Yates shuffle.
    pub(crate) fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_usize(i + 1);
            items.swap(i, j);
        }
    }
}

thread_local! {
    static THREAD_RNG: Cell<Option<DetRng>> = const { Cell::new(None) };
}

/// Runs `f` with this thread's generator, seeding it on first use.
pub(crate) fn with_thread_rng<R>(f: impl FnOnce(&mut DetRng) -> R) -> R {
    THREAD_RNG.with(|cell| {
        let mut rng = cell.take().unwrap_or_else(DetRng::from_entropy);
        let out = f(&mut rng);
        cell.set(Some(rng));
        out
    })
}
