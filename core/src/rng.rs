//! Deterministic random number generation.
//!
//! RULE: Nothing on the desk may call a platform RNG.
//! Forecast noise and demo data flow through `DeskRng` streams derived
//! from one configured seed.
//!
//! Each consumer gets its own stream, seeded from
//! (seed XOR stream_index × golden ratio). Adding a stream never changes
//! the numbers an existing stream produces.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// A named, deterministic RNG stream.
pub struct DeskRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl DeskRng {
    /// The index must never change once assigned.
    pub fn new(seed: u64, stream_index: u64) -> Self {
        let derived_seed = seed ^ (stream_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a u64 in [0, n). Zero when `n` is zero.
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        self.inner.next_u64() % n
    }

    /// Uniform float in [-spread, spread).
    pub fn symmetric(&mut self, spread: f64) -> f64 {
        (self.next_f64() * 2.0 - 1.0) * spread
    }

    /// Bernoulli trial: returns true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Simplified Pareto draw. `alpha` is the shape (higher = less skewed).
    pub fn pareto(&mut self, x_min: f64, alpha: f64) -> f64 {
        let u = self.next_f64().max(1e-10);
        x_min * u.powf(-1.0 / alpha)
    }

    /// Pick one element, or `None` from an empty slice.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        let i = self.next_u64_below(items.len() as u64) as usize;
        items.get(i)
    }
}

/// Hands out streams for one seed, indexed by stable slot.
pub struct RngBank {
    seed: u64,
}

impl RngBank {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn stream(&self, slot: StreamSlot) -> DeskRng {
        DeskRng::new(self.seed, slot as u64).with_name(slot.name())
    }
}

/// Stable stream assignments.
/// NEVER reorder or remove entries, only append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum StreamSlot {
    Forecast = 0,
    DemoClients = 1,
    DemoOperations = 2,
    // Add new streams here, append only.
}

impl StreamSlot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Forecast => "forecast",
            Self::DemoClients => "demo_clients",
            Self::DemoOperations => "demo_operations",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_and_slot_give_the_same_stream() {
        let bank = RngBank::new(42);
        let a: Vec<u64> = (0..5).map(|_| bank.stream(StreamSlot::Forecast).next_u64_below(1000)).collect();
        let mut first = bank.stream(StreamSlot::Forecast);
        let mut second = bank.stream(StreamSlot::Forecast);
        for _ in 0..20 {
            assert_eq!(first.next_f64().to_bits(), second.next_f64().to_bits());
        }
        assert!(a.iter().all(|v| *v == a[0]), "a fresh stream restarts from the same draw");
    }

    #[test]
    fn slots_are_independent() {
        let bank = RngBank::new(42);
        let mut forecast = bank.stream(StreamSlot::Forecast);
        let mut demo = bank.stream(StreamSlot::DemoOperations);
        let f: Vec<u64> = (0..8).map(|_| forecast.next_u64_below(u64::MAX)).collect();
        let d: Vec<u64> = (0..8).map(|_| demo.next_u64_below(u64::MAX)).collect();
        assert_ne!(f, d);
    }

    #[test]
    fn symmetric_stays_inside_the_spread() {
        let mut rng = DeskRng::new(7, 0);
        for _ in 0..1000 {
            let v = rng.symmetric(0.15);
            assert!((-0.15..0.15).contains(&v), "{v} escaped ±0.15");
        }
    }
}
