//! Earliest-deadline-first fleet scheduler.
//!
//! Every bot keeps its own `next_report_at`.  The scheduler sleeps until the
//! earliest one, runs that bot's report cycle, and repeats.  Cycles never
//! overlap: a slow publish delays every bot behind it, and a bot that falls
//! behind reports once when it is reached rather than catching up.
//!
//! ## Per-bot lifecycle
//!
//! ```text
//! Waiting ──[next_report_at reached]──▶ Reporting ──[cycle done]──▶ Waiting
//!    │                                                  (next = now + interval)
//!    └──[work_time elapsed]──▶ Retired
//! ```

use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::bot::Bot;
use crate::config::Config;
use crate::publish::Dispatcher;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FleetError {
    #[error("fleet has no bots to schedule")]
    Empty,
}

pub struct Fleet {
    bots: Vec<Bot>,
    dispatcher: Dispatcher,
    rng: fastrand::Rng,
}

impl Fleet {
    pub fn new(bots: Vec<Bot>, dispatcher: Dispatcher, rng: fastrand::Rng) -> Result<Self, FleetError> {
        if bots.is_empty() {
            return Err(FleetError::Empty);
        }
        Ok(Self {
            bots,
            dispatcher,
            rng,
        })
    }

    /// Build every configured bot with its first report due at `now`.
    pub fn from_config(
        cfg: &Config,
        dispatcher: Dispatcher,
        rng: fastrand::Rng,
        now: Instant,
    ) -> Result<Self> {
        let bots = cfg
            .bots
            .iter()
            .map(|entry| Bot::from_entry(entry, cfg.update_time, now))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(bots, dispatcher, rng)?)
    }

    pub fn bots(&self) -> &[Bot] {
        &self.bots
    }

    /// Index of the active bot with the earliest deadline.  Ties go to the
    /// bot registered first.
    pub fn next_due(&self) -> Option<usize> {
        self.bots
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_retired())
            .min_by_key(|(_, b)| b.next_report_at())
            .map(|(i, _)| i)
    }

    /// How long after `now` the next active bot is due.
    pub fn until_next(&self, now: Instant) -> Option<Duration> {
        self.next_due()
            .map(|i| self.bots[i].next_report_at().saturating_duration_since(now))
    }

    /// Run one bot's cycle at `now`, or retire it if its work time is over.
    pub async fn dispatch(&mut self, index: usize, now: Instant) {
        let bot = &mut self.bots[index];

        if bot.is_expired(now) {
            bot.retire();
            info!(
                bot = %bot.name(),
                reports_ok = bot.reports_ok(),
                reports_failed = bot.reports_failed(),
                "work time elapsed, bot retired"
            );
            return;
        }

        match bot.report_cycle(now, &mut self.rng, &self.dispatcher).await {
            Ok(report) => info!(
                bot = %bot.name(),
                channel = %report.channel,
                payload = %report.field_payload(),
                next_in_secs = bot.interval().as_secs(),
                "report published"
            ),
            Err(e) => warn!(
                bot = %bot.name(),
                next_in_secs = bot.interval().as_secs(),
                "report failed, skipping this cycle: {e}"
            ),
        }
    }

    /// Drive the fleet until every bot is retired or `shutdown` turns true.
    /// A cycle already in progress finishes before shutdown takes effect.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            bots = self.bots.len(),
            sensors = self.bots.iter().map(|b| b.sensors().len()).sum::<usize>(),
            strategy = ?self.dispatcher.strategy(),
            "scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                info!("shutdown requested, scheduler stopping");
                break;
            }

            let Some(index) = self.next_due() else {
                info!("all bots retired, scheduler stopping");
                break;
            };
            let due = self.bots[index].next_report_at();
            debug!(
                bot = %self.bots[index].name(),
                wait = ?self.until_next(Instant::now()).unwrap_or_default(),
                "waiting for next report"
            );

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    info!("shutdown requested, scheduler stopping");
                    break;
                }
                _ = sleep_until(due) => {}
            }

            self.dispatch(index, Instant::now()).await;
        }

        for bot in self.bots() {
            info!(
                bot = %bot.name(),
                reports_ok = bot.reports_ok(),
                reports_failed = bot.reports_failed(),
                "bot summary"
            );
        }
    }
}

/// Resolves once the flag is true.  A dropped sender never resolves.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BotEntry, Channel};
    use crate::publish::{PublishError, PublishStrategy, Publisher, Report, RetryPolicy};
    use async_trait::async_trait;
    use botfarm_sensors::SensorSettings;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    /// Records `(bot, seconds since start)` for every publish.
    struct Recorder {
        start: Instant,
        fail: bool,
        sent: Mutex<Vec<(String, u64)>>,
    }

    impl Recorder {
        fn new(start: Instant) -> Arc<Self> {
            Arc::new(Self {
                start,
                fail: false,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn failing(start: Instant) -> Arc<Self> {
            Arc::new(Self {
                start,
                fail: true,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<(String, u64)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Publisher for Recorder {
        async fn publish(&self, report: &Report) -> Result<(), PublishError> {
            let at = Instant::now().duration_since(self.start).as_secs();
            self.sent.lock().unwrap().push((report.bot.clone(), at));
            if self.fail {
                Err(PublishError::Status {
                    status: 503,
                    body: String::new(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn entry(name: &str, interval: u64, work_time: Option<u64>) -> BotEntry {
        BotEntry {
            email: "farm@example.com".into(),
            channel: Channel::Name(name.into()),
            api_key: format!("KEY-{name}"),
            bot_name: Some(name.into()),
            sensors: vec![BTreeMap::from([(
                "temperature".to_string(),
                SensorSettings::default(),
            )])],
            update_time: Some(interval),
            work_time,
        }
    }

    fn fleet(entries: &[BotEntry], publisher: Arc<Recorder>, now: Instant) -> Fleet {
        let bots = entries
            .iter()
            .map(|e| Bot::from_entry(e, None, now).unwrap())
            .collect();
        let retry = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        let dispatcher = Dispatcher::new(publisher, PublishStrategy::Aggregate, retry);
        Fleet::new(bots, dispatcher, fastrand::Rng::with_seed(9)).unwrap()
    }

    /// Run the fleet until `horizon` elapses, then signal shutdown.
    async fn run_for(fleet: &mut Fleet, horizon: Duration) {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(horizon).await;
            let _ = tx.send(true);
        });
        fleet.run(rx).await;
    }

    // -- Construction -----------------------------------------------------

    #[tokio::test]
    async fn empty_fleet_rejected() {
        let publisher = Recorder::new(Instant::now());
        let dispatcher = Dispatcher::new(publisher, PublishStrategy::Aggregate, RetryPolicy::default());
        let err = Fleet::new(Vec::new(), dispatcher, fastrand::Rng::with_seed(1))
            .err()
            .unwrap();
        assert_eq!(err, FleetError::Empty);
    }

    // -- Ordering ---------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn next_due_picks_earliest_deadline() {
        let now = Instant::now();
        let entries = [entry("a", 60, None), entry("b", 60, None), entry("c", 60, None)];
        let mut f = fleet(&entries, Recorder::new(now), now);

        for (bot, offset) in f.bots.iter_mut().zip([50, 10, 30]) {
            bot.set_next_report_at(now + Duration::from_secs(offset));
        }
        assert_eq!(f.next_due(), Some(1));

        f.bots[1].set_next_report_at(now + Duration::from_secs(70));
        assert_eq!(f.next_due(), Some(2));
        assert_eq!(f.until_next(now), Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn ties_go_to_first_registered() {
        let now = Instant::now();
        let entries = [entry("a", 60, None), entry("b", 60, None)];
        let f = fleet(&entries, Recorder::new(now), now);
        assert_eq!(f.next_due(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_in_deadline_order() {
        let now = Instant::now();
        let publisher = Recorder::new(now);
        let entries = [entry("a", 100, None), entry("b", 100, None), entry("c", 100, None)];
        let mut f = fleet(&entries, publisher.clone(), now);
        for (bot, offset) in f.bots.iter_mut().zip([50, 10, 30]) {
            bot.set_next_report_at(now + Duration::from_secs(offset));
        }

        run_for(&mut f, Duration::from_secs(60)).await;

        assert_eq!(
            publisher.sent(),
            vec![("b".into(), 10), ("c".into(), 30), ("a".into(), 50)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn two_bots_interleave_by_interval() {
        let now = Instant::now();
        let publisher = Recorder::new(now);
        let entries = [entry("a", 10, None), entry("b", 20, None)];
        let mut f = fleet(&entries, publisher.clone(), now);

        run_for(&mut f, Duration::from_secs(25)).await;

        assert_eq!(
            publisher.sent(),
            vec![
                ("a".into(), 0),
                ("b".into(), 0),
                ("a".into(), 10),
                ("a".into(), 20),
                ("b".into(), 20),
            ]
        );
    }

    // -- Failure handling -------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn failed_publish_skips_to_next_interval() {
        let now = Instant::now();
        let publisher = Recorder::failing(now);
        let entries = [entry("a", 10, None)];
        let mut f = fleet(&entries, publisher.clone(), now);

        run_for(&mut f, Duration::from_secs(25)).await;

        assert_eq!(
            publisher.sent(),
            vec![("a".into(), 0), ("a".into(), 10), ("a".into(), 20)]
        );
        assert_eq!(f.bots()[0].reports_failed(), 3);
        assert_eq!(f.bots()[0].reports_ok(), 0);
    }

    // -- Work time --------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn retired_bots_stop_and_run_returns() {
        let now = Instant::now();
        let publisher = Recorder::new(now);
        let entries = [entry("a", 10, Some(25)), entry("b", 10, Some(5))];
        let mut f = fleet(&entries, publisher.clone(), now);

        // No shutdown signal: run returns once both bots are retired.
        let (_tx, rx) = watch::channel(false);
        f.run(rx).await;

        assert_eq!(
            publisher.sent(),
            vec![
                ("a".into(), 0),
                ("b".into(), 0),
                ("a".into(), 10),
                ("a".into(), 20),
            ]
        );
        assert!(f.bots().iter().all(Bot::is_retired));
        assert_eq!(f.next_due(), None);
    }

    // -- Shutdown ---------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_start_publishes_nothing() {
        let now = Instant::now();
        let publisher = Recorder::new(now);
        let mut f = fleet(&[entry("a", 10, None)], publisher.clone(), now);

        let (_tx, rx) = watch::channel(true);
        f.run(rx).await;

        assert!(publisher.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_sleep() {
        let now = Instant::now();
        let publisher = Recorder::new(now);
        let mut f = fleet(&[entry("a", 3_600, None)], publisher.clone(), now);

        run_for(&mut f, Duration::from_secs(5)).await;

        assert_eq!(publisher.sent(), vec![("a".into(), 0)]);
        assert!(Instant::now().duration_since(now) < Duration::from_secs(3_600));
    }
}
