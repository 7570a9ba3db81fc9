//! Window aggregation - presence duration from sampled observations
//!
//! This is a duration-by-sampling estimator. The loop never sees continuous
//! occupancy, only that someone was present around a sample, so each positive
//! observation stands for one sampling interval. Samples straddling the window
//! edges make the total slightly under- or over-count; that approximation is
//! accepted.

use crate::error::StayError;
use crate::observation::Observation;
use crate::store::SampleStore;
use chrono::{DateTime, Days, Duration, FixedOffset, TimeZone};
use std::fmt;

/// Inclusive `[start, end]` interval, one day long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl AggregationWindow {
    /// The trailing day ending at `end`. "One day" is the same wall-clock time
    /// on the previous calendar day in `end`'s zone, falling back to 24 hours
    /// when that local time does not exist.
    pub fn ending_at<Tz: TimeZone>(end: &DateTime<Tz>) -> Self {
        let start = end
            .clone()
            .checked_sub_days(Days::new(1))
            .unwrap_or_else(|| end.clone() - Duration::days(1));
        Self {
            start: start.fixed_offset(),
            end: end.fixed_offset(),
        }
    }

    pub fn contains(&self, at: &DateTime<FixedOffset>) -> bool {
        *at >= self.start && *at <= self.end
    }
}

/// Sum `sample_interval_secs` for each positive observation inside `window`.
///
/// `observations` must be newest first. The scan ends at the first
/// observation outside the window, on either side.
pub fn total_presence_seconds(
    observations: &[Observation],
    window: &AggregationWindow,
    sample_interval_secs: u64,
) -> u64 {
    let mut total = 0u64;
    for obs in observations {
        if !window.contains(&obs.created_at) {
            break;
        }
        if obs.is_present() {
            total += sample_interval_secs;
        }
    }
    total
}

pub fn presence_in_store<S: SampleStore + ?Sized>(
    store: &S,
    window: &AggregationWindow,
    sample_interval_secs: u64,
) -> Result<u64, StayError> {
    let observations = store.read_all()?;
    Ok(total_presence_seconds(&observations, window, sample_interval_secs))
}

/// Aggregated stay time, rendered for the notification sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StayDuration {
    seconds: u64,
}

impl StayDuration {
    pub fn from_secs(seconds: u64) -> Self {
        Self { seconds }
    }

    pub fn as_secs(&self) -> u64 {
        self.seconds
    }

    pub fn hours(&self) -> u64 {
        self.seconds / 3600
    }

    pub fn minutes(&self) -> u64 {
        (self.seconds % 3600) / 60
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StayDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stay time is {}hour {}min", self.hours(), self.minutes())
    }
}
