//! Deterministic random number generation for synthetic markets.
//!
//! RULE: nothing in this crate calls a platform RNG. Synthetic data is a
//! pure function of its seed, so tests and runner output are reproducible.
//!
//! Each concern (geography layout, sale timing, price noise) draws from its
//! own stream, seeded from (master_seed XOR stream_index). Adding a stream
//! never perturbs the existing ones.

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// A named, deterministic RNG stream.
pub struct MarketRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl MarketRng {
    /// Create a stream from the master seed and a stable stream index.
    /// The index must never change once assigned.
    pub fn new(master_seed: u64, stream_index: u64) -> Self {
        let derived_seed = master_seed ^ (stream_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn for_stream(master_seed: u64, stream: Stream) -> Self {
        Self::new(master_seed, stream as u64).with_name(stream.name())
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        use rand::RngCore;
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a u64 in [0, n).
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        use rand::RngCore;
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }

    /// Standard normal draw (Box-Muller).
    pub fn standard_normal(&mut self) -> f64 {
        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

/// Stable stream assignments.
/// NEVER reorder or remove entries. Only append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum Stream {
    Layout = 0,
    SaleTiming = 1,
    PriceNoise = 2,
    BasePrice = 3,
}

impl Stream {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Layout     => "layout",
            Self::SaleTiming => "sale_timing",
            Self::PriceNoise => "price_noise",
            Self::BasePrice  => "base_price",
        }
    }
}
