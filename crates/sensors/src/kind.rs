//! The twelve supported sensor kinds and their fixed numeric profiles.
//!
//! Every kind shares one [`Sensor`](crate::Sensor) implementation; what
//! differs is the data in its [`KindProfile`]: default bounds, default start
//! value, reporting precision, and the delta range for each trend class.

use std::fmt;
use std::str::FromStr;

use crate::{SensorError, Trend};

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// Step-delta ranges `(lo, hi)` indexed by trend, in [`Trend::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaTable([(f64, f64); 5]);

impl DeltaTable {
    pub fn range(&self, trend: Trend) -> (f64, f64) {
        self.0[trend as usize]
    }
}

/// Fixed per-kind parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KindProfile {
    pub min_value: f64,
    pub max_value: f64,
    pub start_value: f64,
    /// Decimal digits kept in the stored and reported value.
    pub precision: u8,
    pub deltas: DeltaTable,
}

// Temperature and humidity share a table, as do pressure/CO and SO2/NO2.
const CLIMATE_DELTAS: DeltaTable = DeltaTable([
    (-1.0, -0.2),
    (-0.5, -0.1),
    (-0.3, 0.3),
    (0.1, 0.5),
    (0.2, 1.0),
]);

const COARSE_GAS_DELTAS: DeltaTable = DeltaTable([
    (-0.5, -0.1),
    (-0.2, -0.05),
    (-0.1, 0.1),
    (0.05, 0.2),
    (0.1, 0.5),
]);

const TRACE_GAS_DELTAS: DeltaTable = DeltaTable([
    (-0.04, -0.02),
    (-0.02, -0.01),
    (-0.01, 0.01),
    (0.01, 0.02),
    (0.02, 0.04),
]);

static TEMPERATURE: KindProfile = KindProfile {
    min_value: -40.0,
    max_value: 50.0,
    start_value: 25.0,
    precision: 2,
    deltas: CLIMATE_DELTAS,
};

static HUMIDITY: KindProfile = KindProfile {
    min_value: 0.0,
    max_value: 100.0,
    start_value: 50.0,
    precision: 2,
    deltas: CLIMATE_DELTAS,
};

static PRESSURE: KindProfile = KindProfile {
    min_value: 90.0,
    max_value: 110.0,
    start_value: 100.0,
    precision: 2,
    deltas: COARSE_GAS_DELTAS,
};

/// MPC = 0.025 mg/m3
static PM25: KindProfile = KindProfile {
    min_value: 0.0,
    max_value: 0.5,
    start_value: 0.01,
    precision: 4,
    deltas: DeltaTable([
        (-0.02, -0.005),
        (-0.005, -0.001),
        (-0.001, 0.001),
        (0.001, 0.005),
        (0.005, 0.02),
    ]),
};

/// MPC = 0.05 mg/m3
static PM10: KindProfile = KindProfile {
    min_value: 0.0,
    max_value: 1.0,
    start_value: 0.01,
    precision: 4,
    deltas: DeltaTable([
        (-0.05, -0.01),
        (-0.02, -0.005),
        (-0.01, 0.01),
        (0.005, 0.02),
        (0.01, 0.05),
    ]),
};

/// MPC = 17.5 ppm
static CO: KindProfile = KindProfile {
    min_value: 0.0,
    max_value: 25.0,
    start_value: 1.0,
    precision: 2,
    deltas: COARSE_GAS_DELTAS,
};

/// MPC = 3.8 ppm
static SO2: KindProfile = KindProfile {
    min_value: 0.0,
    max_value: 20.0,
    start_value: 0.1,
    precision: 4,
    deltas: TRACE_GAS_DELTAS,
};

/// MPC = 1.6 ppm
static NO2: KindProfile = KindProfile {
    min_value: 0.0,
    max_value: 20.0,
    start_value: 0.1,
    precision: 4,
    deltas: TRACE_GAS_DELTAS,
};

/// MPC = 0.05 ppm
static O3: KindProfile = KindProfile {
    min_value: 0.0,
    max_value: 18.0,
    start_value: 0.001,
    precision: 4,
    deltas: DeltaTable([
        (-0.004, -0.002),
        (-0.002, -0.001),
        (-0.001, 0.001),
        (0.001, 0.002),
        (0.002, 0.004),
    ]),
};

/// MPC = 28.2 ppm
static NH3: KindProfile = KindProfile {
    min_value: 0.0,
    max_value: 50.0,
    start_value: 1.0,
    precision: 2,
    deltas: DeltaTable([
        (-0.4, -0.2),
        (-0.2, -0.1),
        (-0.1, 0.1),
        (0.1, 0.2),
        (0.2, 0.4),
    ]),
};

/// MPC = 7.2 ppm
static H2S: KindProfile = KindProfile {
    min_value: 0.0,
    max_value: 20.0,
    start_value: 0.5,
    precision: 4,
    deltas: DeltaTable([
        (-0.2, -0.1),
        (-0.1, -0.05),
        (-0.05, 0.05),
        (0.05, 0.1),
        (0.1, 0.2),
    ]),
};

/// MPC = 5000 ppm
static CO2: KindProfile = KindProfile {
    min_value: 0.0,
    max_value: 20_000.0,
    start_value: 1_000.0,
    precision: 1,
    deltas: DeltaTable([
        (-20.0, -10.0),
        (-10.0, -5.0),
        (-5.0, 5.0),
        (5.0, 10.0),
        (10.0, 20.0),
    ]),
};

// ---------------------------------------------------------------------------
// Sensor kind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Temperature,
    Humidity,
    Pressure,
    Pm25,
    Pm10,
    Co,
    So2,
    No2,
    O3,
    Nh3,
    H2s,
    Co2,
}

impl SensorKind {
    pub const ALL: [SensorKind; 12] = [
        Self::Temperature,
        Self::Humidity,
        Self::Pressure,
        Self::Pm25,
        Self::Pm10,
        Self::Co,
        Self::So2,
        Self::No2,
        Self::O3,
        Self::Nh3,
        Self::H2s,
        Self::Co2,
    ];

    /// Identifier used in bot-farm config files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Pressure => "pressure",
            Self::Pm25 => "PM2.5",
            Self::Pm10 => "PM10",
            Self::Co => "CO",
            Self::So2 => "SO2",
            Self::No2 => "NO2",
            Self::O3 => "O3",
            Self::Nh3 => "NH3",
            Self::H2s => "H2S",
            Self::Co2 => "CO2",
        }
    }

    pub fn profile(self) -> &'static KindProfile {
        match self {
            Self::Temperature => &TEMPERATURE,
            Self::Humidity => &HUMIDITY,
            Self::Pressure => &PRESSURE,
            Self::Pm25 => &PM25,
            Self::Pm10 => &PM10,
            Self::Co => &CO,
            Self::So2 => &SO2,
            Self::No2 => &NO2,
            Self::O3 => &O3,
            Self::Nh3 => &NH3,
            Self::H2s => &H2S,
            Self::Co2 => &CO2,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = SensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| SensorError::UnknownKind(s.to_string()))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_identifiers() {
        assert_eq!("temperature".parse::<SensorKind>(), Ok(SensorKind::Temperature));
        assert_eq!("PM2.5".parse::<SensorKind>(), Ok(SensorKind::Pm25));
        assert_eq!("H2S".parse::<SensorKind>(), Ok(SensorKind::H2s));
        assert_eq!("CO2".parse::<SensorKind>(), Ok(SensorKind::Co2));
    }

    #[test]
    fn parse_is_case_sensitive() {
        assert!("Temperature".parse::<SensorKind>().is_err());
        assert!("pm2.5".parse::<SensorKind>().is_err());
        assert!("co".parse::<SensorKind>().is_err());
    }

    #[test]
    fn parse_unknown_kind_fails() {
        assert_eq!(
            "radon".parse::<SensorKind>(),
            Err(SensorError::UnknownKind("radon".into()))
        );
    }

    #[test]
    fn identifiers_are_unique() {
        let mut names: Vec<_> = SensorKind::ALL.iter().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 12);
    }

    #[test]
    fn default_start_within_default_bounds() {
        for kind in SensorKind::ALL {
            let p = kind.profile();
            assert!(p.min_value < p.max_value, "{kind}: inverted bounds");
            assert!(
                (p.min_value..=p.max_value).contains(&p.start_value),
                "{kind}: start {} outside [{}, {}]",
                p.start_value,
                p.min_value,
                p.max_value
            );
        }
    }

    #[test]
    fn delta_tables_are_ordered_by_trend() {
        for kind in SensorKind::ALL {
            let d = kind.profile().deltas;
            for t in Trend::ALL {
                let (lo, hi) = d.range(t);
                assert!(lo < hi, "{kind}/{t}: empty range");
            }

            // Decreasing trends only step down, increasing only step up.
            assert!(d.range(Trend::FastDecrease).1 < 0.0, "{kind}");
            assert!(d.range(Trend::Decrease).1 < 0.0, "{kind}");
            assert!(d.range(Trend::Increase).0 > 0.0, "{kind}");
            assert!(d.range(Trend::FastIncrease).0 > 0.0, "{kind}");

            // The fast variants reach further than the slow ones.
            assert!(d.range(Trend::FastDecrease).0 < d.range(Trend::Decrease).0);
            assert!(d.range(Trend::FastIncrease).1 > d.range(Trend::Increase).1);

            let (lo, hi) = d.range(Trend::Normal);
            assert_eq!(lo, -hi, "{kind}: normal range must be symmetric");
        }
    }

    #[test]
    fn normal_ranges_match_reference_table() {
        let expected = [
            (SensorKind::Temperature, 0.3),
            (SensorKind::Humidity, 0.3),
            (SensorKind::Pressure, 0.1),
            (SensorKind::Pm25, 0.001),
            (SensorKind::Pm10, 0.01),
            (SensorKind::Co, 0.1),
            (SensorKind::So2, 0.01),
            (SensorKind::No2, 0.01),
            (SensorKind::O3, 0.001),
            (SensorKind::Nh3, 0.1),
            (SensorKind::H2s, 0.05),
            (SensorKind::Co2, 5.0),
        ];
        for (kind, half_width) in expected {
            assert_eq!(
                kind.profile().deltas.range(Trend::Normal),
                (-half_width, half_width),
                "{kind}"
            );
        }
    }

    #[test]
    fn precision_per_kind() {
        let expected = [
            (SensorKind::Temperature, 2),
            (SensorKind::Humidity, 2),
            (SensorKind::Pressure, 2),
            (SensorKind::Pm25, 4),
            (SensorKind::Pm10, 4),
            (SensorKind::Co, 2),
            (SensorKind::So2, 4),
            (SensorKind::No2, 4),
            (SensorKind::O3, 4),
            (SensorKind::Nh3, 2),
            (SensorKind::H2s, 4),
            (SensorKind::Co2, 1),
        ];
        for (kind, precision) in expected {
            assert_eq!(kind.profile().precision, precision, "{kind}");
        }
    }

    #[test]
    fn temperature_defaults() {
        let p = SensorKind::Temperature.profile();
        assert_eq!((p.min_value, p.max_value, p.start_value), (-40.0, 50.0, 25.0));
        assert_eq!(p.deltas.range(Trend::FastIncrease), (0.2, 1.0));
    }
}
