//! Sampling loop
//!
//! One tick per interval (fixed rate, missed ticks skipped):
//! 1. fire the daily report if the deadline has passed
//! 2. grab a frame and count people in it
//! 3. append the count to the sample log
//!
//! Detector, notification and storage I/O failures are logged and the next
//! tick proceeds. A corrupt sample log stops the loop.

use crate::aggregate::{self, AggregationWindow, StayDuration};
use crate::detect::{Detector, FrameSource};
use crate::error::StayError;
use crate::notify::Notifier;
use crate::observation::Observation;
use crate::schedule::DailySchedule;
use crate::store::SampleStore;
use chrono::{DateTime, Local};
use std::future::Future;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RETENTION_DAYS: i64 = 7;

/// External handles the loop drives. Dropped, and so released, when the
/// sampler is.
pub struct Collaborators {
    pub frames: Box<dyn FrameSource>,
    pub detector: Box<dyn Detector>,
    pub notifier: Box<dyn Notifier>,
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Set when the daily deadline fired and the log was readable.
    pub report: Option<StayDuration>,
    pub notified: bool,
    /// Count appended to the log this tick.
    pub recorded: Option<u32>,
}

pub struct Sampler<S: SampleStore> {
    store: S,
    schedule: DailySchedule<Local>,
    collaborators: Collaborators,
    interval: Duration,
    notify_timeout: Duration,
    retention: chrono::Duration,
}

impl<S: SampleStore> Sampler<S> {
    pub fn new(
        store: S,
        schedule: DailySchedule<Local>,
        collaborators: Collaborators,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            schedule,
            collaborators,
            interval,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
            retention: chrono::Duration::days(DEFAULT_RETENTION_DAYS),
        }
    }

    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention = chrono::Duration::days(i64::from(days.max(1)));
        self
    }

    pub fn schedule(&self) -> &DailySchedule<Local> {
        &self.schedule
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Tick until `shutdown` resolves or a fatal error occurs.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), StayError>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the first sample is one interval in.
        ticker.tick().await;
        tokio::pin!(shutdown);

        info!(
            target: "stayd",
            "sampling every {}s, daily report at {}, next at {}",
            self.interval.as_secs(),
            self.schedule.at().format("%H:%M"),
            self.schedule.next_deadline().format("%Y-%m-%d %H:%M:%S")
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(target: "stayd", "stop requested, sampler exiting");
                    break;
                }
                _ = ticker.tick() => {}
            }
            if let Err(err) = self.tick(Local::now()).await {
                error!(target: "stayd", "sampler stopped: {err}");
                return Err(err);
            }
        }
        Ok(())
    }

    /// One iteration at `now`. Only fatal errors are returned.
    pub async fn tick(&mut self, now: DateTime<Local>) -> Result<TickOutcome, StayError> {
        let mut outcome = TickOutcome::default();

        if let Some(window) = self.schedule.check_and_advance(&now) {
            if let Some(stay) = self.report(&window)? {
                outcome.notified = self.send(&stay).await;
                outcome.report = Some(stay);
            }
            self.prune(&now)?;
            info!(
                target: "stayd",
                "next report at {}",
                self.schedule.next_deadline().format("%Y-%m-%d %H:%M:%S")
            );
        }

        outcome.recorded = self.record(&now).await?;
        Ok(outcome)
    }

    fn report(&self, window: &AggregationWindow) -> Result<Option<StayDuration>, StayError> {
        debug!(target: "stayd", "aggregating {} .. {}", window.start, window.end);
        match aggregate::presence_in_store(&self.store, window, self.interval.as_secs()) {
            Ok(seconds) => {
                info!(target: "stayd", "total: {}s", seconds);
                Ok(Some(StayDuration::from_secs(seconds)))
            }
            Err(err) if err.is_fatal() => {
                error!(target: "stayd", "report skipped, sample log corrupt: {err}");
                Err(err)
            }
            Err(err) => {
                warn!(target: "stayd", kind = err.kind(), "report skipped, sample log unreadable: {err}");
                Ok(None)
            }
        }
    }

    async fn send(&self, stay: &StayDuration) -> bool {
        let message = stay.message();
        let notify = self.collaborators.notifier.notify(&message);
        match time::timeout(self.notify_timeout, notify).await {
            Ok(Ok(())) => {
                info!(target: "stayd", "notified: {}", message);
                true
            }
            Ok(Err(err)) => {
                warn!(target: "stayd", kind = err.kind(), "notification failed: {err}");
                false
            }
            Err(_) => {
                warn!(
                    target: "stayd",
                    "notification timed out after {}s",
                    self.notify_timeout.as_secs_f32()
                );
                false
            }
        }
    }

    fn prune(&self, now: &DateTime<Local>) -> Result<(), StayError> {
        let cutoff = (*now - self.retention).fixed_offset();
        match self.store.prune_older_than(cutoff) {
            Ok(0) => Ok(()),
            Ok(removed) => {
                info!(target: "stayd", "pruned {} observations older than {}", removed, cutoff);
                Ok(())
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(target: "stayd", kind = err.kind(), "retention pass failed: {err}");
                Ok(())
            }
        }
    }

    async fn record(&mut self, now: &DateTime<Local>) -> Result<Option<u32>, StayError> {
        let count = match self.acquire().await {
            Ok(Some(count)) => count,
            Ok(None) => {
                debug!(target: "stayd", "no frame available, sample skipped");
                return Ok(None);
            }
            Err(err) => {
                warn!(target: "stayd", kind = err.kind(), "presence detection failed: {err}");
                return Ok(None);
            }
        };

        match self.store.append(Observation::new(count, now)) {
            Ok(()) => {
                debug!(target: "stayd", "recorded count={}", count);
                Ok(Some(count))
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(target: "stayd", kind = err.kind(), "failed to record sample: {err}");
                Ok(None)
            }
        }
    }

    async fn acquire(&mut self) -> Result<Option<u32>, StayError> {
        let Some(frame) = self.collaborators.frames.next_frame().await? else {
            return Ok(None);
        };
        debug!(
            target: "stayd",
            "frame captured at {} ({} bytes)",
            frame.captured_at.format("%H:%M:%S"),
            frame.data.len()
        );
        self.collaborators.detector.detect(&frame).await.map(Some)
    }
}
