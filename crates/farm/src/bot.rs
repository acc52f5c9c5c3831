//! Per-bot state: identity, sensors, schedule, and delivery counters.

use std::time::Duration;

use anyhow::{Context, Result};
use botfarm_sensors::{Entropy, Sensor};
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{sensor_kind, BotEntry};
use crate::publish::{Dispatcher, Field, PublishError, Report};

pub struct Bot {
    name: String,
    channel: String,
    api_key: String,
    interval: Duration,
    work_time: Option<Duration>,
    started_at: Instant,
    next_report_at: Instant,
    sensors: Vec<Sensor>,
    retired: bool,
    reports_ok: u64,
    reports_failed: u64,
}

impl Bot {
    /// Build a bot from its config entry.  The first report is due at `now`.
    pub fn from_entry(entry: &BotEntry, fleet_interval: Option<u64>, now: Instant) -> Result<Self> {
        let name = entry.name();
        let interval = entry
            .interval(fleet_interval)
            .with_context(|| format!("bot '{name}': update_time is not set"))?;

        let sensors = entry
            .sensors
            .iter()
            .enumerate()
            .map(|(j, s)| {
                let (kind, settings) = sensor_kind(s)?;
                Sensor::new(kind, settings, now.into_std())
                    .with_context(|| format!("bot '{name}': sensors[{j}]"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name,
            channel: entry.channel.to_string(),
            api_key: entry.api_key.clone(),
            interval,
            work_time: entry.work_time(),
            started_at: now,
            next_report_at: now,
            sensors,
            retired: false,
            reports_ok: 0,
            reports_failed: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_report_at(&self) -> Instant {
        self.next_report_at
    }

    #[cfg(test)]
    pub(crate) fn set_next_report_at(&mut self, at: Instant) {
        self.next_report_at = at;
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn reports_ok(&self) -> u64 {
        self.reports_ok
    }

    pub fn reports_failed(&self) -> u64 {
        self.reports_failed
    }

    /// Whether the bot has run longer than its work time.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.work_time
            .is_some_and(|w| now.saturating_duration_since(self.started_at) > w)
    }

    /// Stop scheduling this bot.
    pub fn retire(&mut self) {
        self.retired = true;
    }

    // -----------------------------------------------------------------------
    // Report cycle
    // -----------------------------------------------------------------------

    /// Advance every sensor one step.
    pub fn measure_all<E: Entropy + ?Sized>(&mut self, now: Instant, rng: &mut E) {
        let now = now.into_std();
        for sensor in &mut self.sensors {
            sensor.measure(now, rng);
        }
    }

    /// Snapshot of the current values as `field1..fieldN`.
    pub fn report(&self) -> Report {
        Report {
            bot: self.name.clone(),
            channel: self.channel.clone(),
            api_key: self.api_key.clone(),
            taken_at: OffsetDateTime::now_utc(),
            fields: self
                .sensors
                .iter()
                .enumerate()
                .map(|(i, s)| Field {
                    index: i + 1,
                    value: s.value(),
                    precision: s.precision(),
                })
                .collect(),
        }
    }

    /// Measure, publish, and reschedule.  The next report is due one
    /// interval after `now` whether or not publishing succeeded.
    pub async fn report_cycle<E: Entropy + ?Sized>(
        &mut self,
        now: Instant,
        rng: &mut E,
        dispatcher: &Dispatcher,
    ) -> Result<Report, PublishError> {
        self.measure_all(now, rng);
        let report = self.report();
        debug!(bot = %self.name, payload = %report.field_payload(), "measured");

        let outcome = dispatcher.send(&report).await;
        match outcome {
            Ok(()) => self.reports_ok += 1,
            Err(_) => self.reports_failed += 1,
        }
        self.next_report_at = now + self.interval;

        outcome.map(|()| report)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
