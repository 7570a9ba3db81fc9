use chrono::{DateTime, FixedOffset, TimeZone};
use serde::{Deserialize, Serialize};

/// One presence sample: how many people the detector saw, and when.
///
/// `created_at` keeps its UTC offset so a log written under one local zone
/// still compares correctly after the host moves to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub count: u32,
    pub created_at: DateTime<FixedOffset>,
}

impl Observation {
    pub fn new<Tz: TimeZone>(count: u32, at: &DateTime<Tz>) -> Self {
        Self {
            count,
            created_at: at.fixed_offset(),
        }
    }

    pub fn is_present(&self) -> bool {
        self.count > 0
    }
}
