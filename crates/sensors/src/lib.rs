//! Stochastic measurement model for simulated environmental sensors.
//!
//! Each [`Sensor`] evolves its value with a bounded random walk whose step
//! size and direction come from the sensor's current [`Trend`].  Trends are
//! held for [`REROLL_INTERVAL`] and then re-rolled to one of the other four
//! classes, which gives sustained drift punctuated by regime changes.
//!
//! Randomness is injected through the [`Entropy`] trait so callers can seed
//! a run or script exact draws in tests.

mod kind;
mod sensor;
mod trend;

use thiserror::Error;

pub use kind::{DeltaTable, KindProfile, SensorKind};
pub use sensor::{round_to, Sensor, SensorSettings};
pub use trend::{Trend, TrendModel, REROLL_INTERVAL};

// ---------------------------------------------------------------------------
// Random source
// ---------------------------------------------------------------------------

/// Source of the two kinds of draws the model needs.
pub trait Entropy {
    /// Uniform draw from `[lo, hi]`.
    fn uniform(&mut self, lo: f64, hi: f64) -> f64;

    /// Uniform index in `0..n`.  `n` is always non-zero.
    fn index(&mut self, n: usize) -> usize;
}

impl Entropy for fastrand::Rng {
    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.f64()
    }

    fn index(&mut self, n: usize) -> usize {
        self.usize(..n)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("unknown sensor kind '{0}' (known kinds: {})", known_kinds())]
    UnknownKind(String),

    #[error("unknown trend '{0}' (expected fast_decrease, decrease, normal, increase or fast_increase)")]
    UnknownTrend(String),

    #[error("{kind}: min_value ({min}) must be less than max_value ({max})")]
    InvalidBounds { kind: SensorKind, min: f64, max: f64 },

    #[error("{kind}: no value with {precision} decimals lies within [{min}, {max}]")]
    NoValueAtPrecision {
        kind: SensorKind,
        min: f64,
        max: f64,
        precision: u8,
    },

    #[error("{kind}: start_value ({start}) is outside [{min}, {max}]")]
    StartOutOfBounds {
        kind: SensorKind,
        start: f64,
        min: f64,
        max: f64,
    },
}

fn known_kinds() -> String {
    SensorKind::ALL.map(SensorKind::as_str).join(", ")
}
