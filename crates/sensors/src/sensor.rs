//! Per-sensor state and the bounded, trend-biased random walk.

use std::time::Instant;

use serde::Deserialize;
use tracing::debug;

use crate::{Entropy, SensorError, SensorKind, Trend, TrendModel};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Per-sensor overrides from a bot-farm config.  Anything left unset falls
/// back to the kind's [`KindProfile`](crate::KindProfile).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SensorSettings {
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub start_value: Option<f64>,
    /// Initial trend.
    #[serde(default)]
    pub tend: Option<Trend>,
}

// ---------------------------------------------------------------------------
// Sensor
// ---------------------------------------------------------------------------

/// One simulated physical quantity.
#[derive(Debug, Clone)]
pub struct Sensor {
    kind: SensorKind,
    value: f64,
    min_value: f64,
    max_value: f64,
    /// Bounds rounded inward to the kind's precision; the walk stays in here.
    floor: f64,
    ceiling: f64,
    start_value: f64,
    trend: TrendModel,
}

impl Sensor {
    /// Build a sensor of `kind`, applying `settings` over the kind defaults.
    /// The trend clock starts at `now`.
    pub fn new(kind: SensorKind, settings: &SensorSettings, now: Instant) -> Result<Self, SensorError> {
        let profile = kind.profile();
        let min = settings.min_value.unwrap_or(profile.min_value);
        let max = settings.max_value.unwrap_or(profile.max_value);
        let start = settings.start_value.unwrap_or(profile.start_value);

        // `!(a < b)` also rejects NaN.
        if !(min < max) {
            return Err(SensorError::InvalidBounds { kind, min, max });
        }
        if !(min..=max).contains(&start) {
            return Err(SensorError::StartOutOfBounds {
                kind,
                start,
                min,
                max,
            });
        }

        let (floor, ceiling) = inward_bounds(min, max, profile.precision);
        if floor > ceiling {
            return Err(SensorError::NoValueAtPrecision {
                kind,
                min,
                max,
                precision: profile.precision,
            });
        }

        Ok(Self {
            kind,
            value: round_to(start, profile.precision).clamp(floor, ceiling),
            min_value: min,
            max_value: max,
            floor,
            ceiling,
            start_value: start,
            trend: TrendModel::new(settings.tend.unwrap_or_default(), now),
        })
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min_value, self.max_value)
    }

    pub fn start_value(&self) -> f64 {
        self.start_value
    }

    pub fn trend(&self) -> &TrendModel {
        &self.trend
    }

    pub fn precision(&self) -> u8 {
        self.kind.profile().precision
    }

    /// Advance one step: re-roll the trend if it is due, draw a delta from
    /// the trend's range, then clamp and round the new value.
    pub fn measure<E: Entropy + ?Sized>(&mut self, now: Instant, rng: &mut E) {
        if self.trend.reroll(now, rng) {
            debug!(kind = %self.kind, trend = %self.trend.trend(), "trend rerolled");
        }

        let (lo, hi) = self.kind.profile().deltas.range(self.trend.trend());
        let delta = rng.uniform(lo, hi);
        self.step(delta);
    }

    /// Apply a single delta.  The result always lies within the bounds, no
    /// matter how large the delta.
    fn step(&mut self, delta: f64) {
        let candidate = self.value + delta;
        if candidate.is_nan() {
            return;
        }
        let clamped = candidate.clamp(self.floor, self.ceiling);
        // `floor` and `ceiling` are already at the kind's precision, so the
        // second clamp only absorbs float noise from rounding.
        self.value = round_to(clamped, self.precision()).clamp(self.floor, self.ceiling);
    }

    /// Current value with exactly the kind's number of decimal digits.
    pub fn formatted(&self) -> String {
        format!("{:.*}", self.precision() as usize, self.value)
    }
}

/// The smallest and largest values with `precision` decimals that still lie
/// within `[min, max]`.
fn inward_bounds(min: f64, max: f64, precision: u8) -> (f64, f64) {
    let unit = 10_f64.powi(-(precision as i32));
    let mut floor = round_to(min, precision);
    if floor < min {
        floor = round_to(floor + unit, precision);
    }
    let mut ceiling = round_to(max, precision);
    if ceiling > max {
        ceiling = round_to(ceiling - unit, precision);
    }
    (floor, ceiling)
}

/// Round `value` to `precision` decimal digits, half away from zero.
pub fn round_to(value: f64, precision: u8) -> f64 {
    let scale = 10_f64.powi(precision as i32);
    (value * scale).round() / scale
}

// ===========================================================================
// Tests
// ===========================================================================
