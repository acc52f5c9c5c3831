use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::{Entropy, SensorError};

/// How long a trend is held before it may be re-rolled (8 hours).
pub const REROLL_INTERVAL: Duration = Duration::from_secs(28_800);

// ---------------------------------------------------------------------------
// Trend classes
// ---------------------------------------------------------------------------

/// Qualitative drift regime applied to a sensor's random walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    FastDecrease,
    Decrease,
    #[default]
    Normal,
    Increase,
    FastIncrease,
}

impl Trend {
    pub const ALL: [Trend; 5] = [
        Trend::FastDecrease,
        Trend::Decrease,
        Trend::Normal,
        Trend::Increase,
        Trend::FastIncrease,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FastDecrease => "fast_decrease",
            Self::Decrease => "decrease",
            Self::Normal => "normal",
            Self::Increase => "increase",
            Self::FastIncrease => "fast_increase",
        }
    }

    /// The four classes other than `self`, in declaration order.
    fn others(self) -> [Trend; 4] {
        let mut out = [Trend::Normal; 4];
        let mut i = 0;
        for t in Self::ALL {
            if t != self {
                out[i] = t;
                i += 1;
            }
        }
        out
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trend {
    type Err = SensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SensorError::UnknownTrend(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Trend model
// ---------------------------------------------------------------------------

/// Current trend of one sensor plus the instant it was set.
#[derive(Debug, Clone)]
pub struct TrendModel {
    trend: Trend,
    set_at: Instant,
}

impl TrendModel {
    pub fn new(trend: Trend, now: Instant) -> Self {
        Self { trend, set_at: now }
    }

    pub fn trend(&self) -> Trend {
        self.trend
    }

    pub fn set_at(&self) -> Instant {
        self.set_at
    }

    /// Re-roll the trend if it has been held for longer than
    /// [`REROLL_INTERVAL`].  The new trend is drawn uniformly from the four
    /// classes other than the current one.  Returns `true` when it changed.
    pub fn reroll<E: Entropy + ?Sized>(&mut self, now: Instant, rng: &mut E) -> bool {
        if now.saturating_duration_since(self.set_at) <= REROLL_INTERVAL {
            return false;
        }

        let others = self.trend.others();
        self.trend = others[rng.index(others.len())];
        self.set_at = now;
        true
    }
}

// ===========================================================================
// Tests
// ===========================================================================
