//! Bot-farm config file loading and validation.
//!
//! A config is a mapping with a mandatory `bots` list.  JSON is the primary
//! format; files ending in `.toml` are parsed as TOML with the same shape.

use anyhow::{bail, Context, Result};
use botfarm_sensors::{Sensor, SensorKind, SensorSettings};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::publish::PublishStrategy;

/// A bot reports at most this many sensor fields.
pub const MAX_SENSORS_PER_BOT: usize = 8;

const DEFAULT_HTTP_URL: &str = "https://api.thingspeak.com/update";
const DEFAULT_MQTT_HOST: &str = "mqtt.thingspeak.com";

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    pub bots: Vec<BotEntry>,
    /// Fleet-wide report interval (seconds) for bots without their own.
    #[serde(default)]
    pub update_time: Option<u64>,
    /// Seed for the fleet's random source.  Unset means OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub publisher: PublisherEntry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotEntry {
    pub email: String,
    pub channel: Channel,
    pub api_key: String,
    #[serde(default)]
    pub bot_name: Option<String>,
    pub sensors: Vec<SensorEntry>,
    /// Report interval in seconds.
    #[serde(default)]
    pub update_time: Option<u64>,
    /// Total run time in seconds; unset means unbounded.
    #[serde(default)]
    pub work_time: Option<u64>,
}

/// Single-key mapping `{kind: {params...}}`.
pub type SensorEntry = BTreeMap<String, SensorSettings>;

/// Channel numbers appear both as integers and as strings in the wild.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Channel {
    Id(u64),
    Name(String),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Http,
    Mqtt,
    DryRun,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublisherEntry {
    pub backend: Backend,
    /// HTTP update endpoint.
    pub url: String,
    /// MQTT broker.
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub strategy: PublishStrategy,
}

impl Default for PublisherEntry {
    fn default() -> Self {
        Self {
            backend: Backend::Http,
            url: DEFAULT_HTTP_URL.to_string(),
            host: DEFAULT_MQTT_HOST.to_string(),
            port: 1883,
            timeout_secs: 10,
            max_attempts: 5,
            backoff_ms: 500,
            max_backoff_ms: 30_000,
            strategy: PublishStrategy::Aggregate,
        }
    }
}

// ---------------------------------------------------------------------------
// Derived values
// ---------------------------------------------------------------------------

impl BotEntry {
    /// Display name used in logs; defaults to `<email>/<channel>`.
    pub fn name(&self) -> String {
        match &self.bot_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!("{}/{}", self.email, self.channel),
        }
    }

    /// The bot's own interval, else the fleet default.
    pub fn interval(&self, fleet_default: Option<u64>) -> Option<Duration> {
        self.update_time
            .or(fleet_default)
            .map(Duration::from_secs)
    }

    pub fn work_time(&self) -> Option<Duration> {
        self.work_time.map(Duration::from_secs)
    }
}

/// Resolve a single-key sensor entry into its kind and settings.
pub fn sensor_kind(entry: &SensorEntry) -> Result<(SensorKind, &SensorSettings)> {
    let mut iter = entry.iter();
    match (iter.next(), iter.next()) {
        (Some((kind, settings)), None) => Ok((kind.parse()?, settings)),
        _ => bail!(
            "expected exactly one sensor kind, got {} keys: {:?}",
            entry.len(),
            entry.keys().collect::<Vec<_>>()
        ),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.bots.is_empty() {
            errors.push("no bots configured".to_string());
        }
        if self.update_time == Some(0) {
            errors.push("update_time must be positive, got 0".to_string());
        }

        self.validate_bots(&mut errors);
        self.validate_publisher(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_bots(&self, errors: &mut Vec<String>) {
        let mut seen_names: HashSet<String> = HashSet::new();
        let now = Instant::now();

        for (i, b) in self.bots.iter().enumerate() {
            let ctx = || {
                if b.email.trim().is_empty() {
                    format!("bots[{i}]")
                } else {
                    format!("bot '{}'", b.name())
                }
            };

            // ── Identity ────────────────────────────────────────
            if b.email.trim().is_empty() {
                errors.push(format!("{}: email is empty", ctx()));
            }
            if b.api_key.trim().is_empty() {
                errors.push(format!("{}: api_key is empty", ctx()));
            }
            if let Channel::Name(name) = &b.channel {
                if name.trim().is_empty() {
                    errors.push(format!("{}: channel is empty", ctx()));
                }
            }
            if !seen_names.insert(b.name()) {
                errors.push(format!("{}: duplicate bot name", ctx()));
            }

            // ── Timing ──────────────────────────────────────────
            match b.update_time.or(self.update_time) {
                None => errors.push(format!(
                    "{}: update_time is not set (set it on the bot or at the top level)",
                    ctx()
                )),
                Some(0) => errors.push(format!("{}: update_time must be positive, got 0", ctx())),
                Some(_) => {}
            }
            if b.work_time == Some(0) {
                errors.push(format!("{}: work_time must be positive, got 0", ctx()));
            }

            // ── Sensors ─────────────────────────────────────────
            if b.sensors.is_empty() || b.sensors.len() > MAX_SENSORS_PER_BOT {
                errors.push(format!(
                    "{}: expected 1 to {MAX_SENSORS_PER_BOT} sensors, got {}",
                    ctx(),
                    b.sensors.len()
                ));
            }

            for (j, entry) in b.sensors.iter().enumerate() {
                let checked = sensor_kind(entry).and_then(|(kind, settings)| {
                    Sensor::new(kind, settings, now)
                        .map(|_| ())
                        .map_err(anyhow::Error::from)
                });
                if let Err(e) = checked {
                    errors.push(format!("{}: sensors[{j}]: {e}", ctx()));
                }
            }
        }
    }

    fn validate_publisher(&self, errors: &mut Vec<String>) {
        let p = &self.publisher;

        match p.backend {
            Backend::Http => {
                if !p.url.starts_with("http://") && !p.url.starts_with("https://") {
                    errors.push(format!(
                        "publisher: url '{}' must start with http:// or https://",
                        p.url
                    ));
                }
            }
            Backend::Mqtt => {
                if !cfg!(feature = "mqtt") {
                    errors.push("publisher: mqtt backend requested but this build has no MQTT support".to_string());
                }
                if p.host.trim().is_empty() {
                    errors.push("publisher: host is empty".to_string());
                }
            }
            Backend::DryRun => {}
        }

        if p.timeout_secs == 0 {
            errors.push("publisher: timeout_secs must be positive, got 0".to_string());
        }
        if p.max_attempts == 0 {
            errors.push("publisher: max_attempts must be at least 1, got 0".to_string());
        }
        if p.backoff_ms > p.max_backoff_ms {
            errors.push(format!(
                "publisher: backoff_ms ({}) exceeds max_backoff_ms ({})",
                p.backoff_ms, p.max_backoff_ms
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Parse config text; `toml` selects TOML, anything else JSON.
pub fn parse(contents: &str, toml: bool) -> Result<Config> {
    if toml {
        Ok(toml::from_str(contents)?)
    } else {
        Ok(serde_json::from_str(contents)?)
    }
}

/// Read, parse, and validate a config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let is_toml = Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let config = parse(&contents, is_toml).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;

    tracing::info!(
        path,
        bots = config.bots.len(),
        backend = ?config.publisher.backend,
        "config loaded"
    );

    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
