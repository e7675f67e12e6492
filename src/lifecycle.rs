//! Per-city outbreak lifecycle with a reproducible draw stream.
//!
//! Every city walks the cycle Baseline -> Growth -> Peak -> Decay -> Baseline.
//! Each advance emits an admissions delta drawn from the current phase, which
//! gives every city a bounded rise-and-fall curve.
//!
//! ## Draw stream contract
//!
//! ```text
//! seed        = u64::from_be_bytes(sha256(city)[0..8])
//! generator   = ChaCha8Rng::seed_from_u64(seed)
//! unit()      = (next_u64() >> 11) * 2^-53            in [0, 1)
//! int(lo, hi) = lo + floor(unit() * (hi - lo + 1))    inclusive
//! uniform(lo, hi) = lo + unit() * (hi - lo)
//! ```
//!
//! Every draw consumes exactly one `next_u64`, so a draw index maps to a
//! fixed position in the ChaCha8 stream.

use std::collections::BTreeMap;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::logging::{log, obj, v_num, v_str, Domain, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Baseline,
    Growth,
    Peak,
    Decay,
}

impl Phase {
    pub const CYCLE: [Phase; 4] = [Phase::Baseline, Phase::Growth, Phase::Peak, Phase::Decay];

    pub fn next(self) -> Phase {
        match self {
            Phase::Baseline => Phase::Growth,
            Phase::Growth => Phase::Peak,
            Phase::Peak => Phase::Decay,
            Phase::Decay => Phase::Baseline,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Baseline => "baseline",
            Phase::Growth => "growth",
            Phase::Peak => "peak",
            Phase::Decay => "decay",
        }
    }

    /// Growth and Peak drive water indicators upward.
    pub fn is_outbreak(self) -> bool {
        matches!(self, Phase::Growth | Phase::Peak)
    }

    /// Inclusive duration range sampled when entering this phase.
    fn duration_range(self) -> (i64, i64) {
        match self {
            Phase::Baseline => (2, 4),
            Phase::Growth => (5, 8),
            Phase::Peak => (6, 10),
            Phase::Decay => (3, 6),
        }
    }

    fn draw_delta(self, stream: &mut DrawStream) -> i64 {
        match self {
            Phase::Baseline => stream.int(0, 2),
            Phase::Growth => stream.int(8, 18),
            Phase::Peak => stream.int(25, 45),
            Phase::Decay => -stream.int(8, 20),
        }
    }
}

/// Stable seed for a city name.
pub fn city_seed(city: &str) -> u64 {
    let digest = Sha256::digest(city.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

const UNIT_SCALE: f64 = 1.0 / (1u64 << 53) as f64;

#[derive(Debug, Clone)]
pub struct DrawStream {
    rng: ChaCha8Rng,
    draws: u64,
}

impl DrawStream {
    pub fn for_city(city: &str) -> Self {
        Self::from_seed(city_seed(city))
    }

    pub fn from_seed(seed: u64) -> Self {
        Self { rng: ChaCha8Rng::seed_from_u64(seed), draws: 0 }
    }

    pub fn unit(&mut self) -> f64 {
        self.draws += 1;
        (self.rng.next_u64() >> 11) as f64 * UNIT_SCALE
    }

    pub fn int(&mut self, lo: i64, hi: i64) -> i64 {
        let span = (hi - lo + 1) as f64;
        (lo + (self.unit() * span).floor() as i64).min(hi)
    }

    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + self.unit() * (hi - lo)
    }

    /// Number of draws consumed so far.
    pub fn draws(&self) -> u64 {
        self.draws
    }
}

/// Outcome of one lifecycle advance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Advance {
    pub phase: Phase,
    pub delta: i64,
    pub transitioned: bool,
}

/// Debug view of a city's lifecycle position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    pub phase: Phase,
    pub step: u32,
    pub duration: u32,
}

#[derive(Debug, Clone)]
pub struct CityLifecycle {
    city: String,
    phase: Phase,
    step: u32,
    duration: u32,
    stream: DrawStream,
}

impl CityLifecycle {
    /// Staggered start so cities do not move in lockstep.
    pub fn new(city: &str) -> Self {
        let mut stream = DrawStream::for_city(city);
        let phase = Phase::CYCLE[stream.int(0, 3) as usize];
        let ceiling = stream.int(0, 2);
        let step = stream.int(0, ceiling) as u32;
        let duration = stream.int(3, 6) as u32;
        Self { city: city.to_string(), phase, step, duration, stream }
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn duration(&self) -> u32 {
        self.duration
    }

    pub fn snapshot(&self) -> PhaseSnapshot {
        PhaseSnapshot { phase: self.phase, step: self.step, duration: self.duration }
    }

    /// Draw stream shared with the feature engine's water drift.
    pub fn stream_mut(&mut self) -> &mut DrawStream {
        &mut self.stream
    }

    pub fn advance(&mut self) -> Advance {
        self.step += 1;
        let mut transitioned = false;
        if self.step >= self.duration {
            let from = self.phase;
            self.phase = self.phase.next();
            self.step = 0;
            let (lo, hi) = self.phase.duration_range();
            self.duration = self.stream.int(lo, hi) as u32;
            transitioned = true;
            log(
                Level::Debug,
                Domain::Lifecycle,
                "phase_transition",
                obj(&[
                    ("city", v_str(&self.city)),
                    ("from", v_str(from.as_str())),
                    ("to", v_str(self.phase.as_str())),
                    ("duration", v_num(self.duration as f64)),
                ]),
            );
        }
        let delta = self.phase.draw_delta(&mut self.stream);
        Advance { phase: self.phase, delta, transitioned }
    }

    #[cfg(test)]
    pub(crate) fn force_position(&mut self, phase: Phase, step: u32, duration: u32) {
        self.phase = phase;
        self.step = step;
        self.duration = duration;
    }
}

/// Owned map of per-city lifecycles. Cities are created on first reference.
#[derive(Debug, Clone, Default)]
pub struct CityRegistry {
    cities: BTreeMap<String, CityLifecycle>,
}

impl CityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&mut self, city: &str) -> &mut CityLifecycle {
        self.cities
            .entry(city.to_string())
            .or_insert_with(|| CityLifecycle::new(city))
    }

    pub fn get(&self, city: &str) -> Option<&CityLifecycle> {
        self.cities.get(city)
    }

    pub fn phase_of(&self, city: &str) -> Option<Phase> {
        self.cities.get(city).map(|c| c.phase())
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    pub fn debug_view(&self) -> BTreeMap<String, PhaseSnapshot> {
        self.cities
            .iter()
            .map(|(city, lc)| (city.clone(), lc.snapshot()))
            .collect()
    }
}
