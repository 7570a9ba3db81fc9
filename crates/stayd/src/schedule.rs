use crate::aggregate::AggregationWindow;
use chrono::{DateTime, Days, Duration, NaiveTime, TimeZone};

/// Rolling daily deadline for the stay-time report.
///
/// Only the next deadline is kept, in memory. After a restart it is recomputed
/// from the wall clock, so a report due while the process was down is skipped.
#[derive(Debug, Clone)]
pub struct DailySchedule<Tz: TimeZone> {
    at: NaiveTime,
    next_deadline: DateTime<Tz>,
}

impl<Tz: TimeZone> DailySchedule<Tz> {
    /// First occurrence of `at` strictly after `now`.
    pub fn new(now: &DateTime<Tz>, at: NaiveTime) -> Self {
        let today = now.date_naive().and_time(at);
        let candidate = resolve_local(&now.timezone(), today, now);
        let next_deadline = if candidate > *now {
            candidate
        } else {
            next_day(&candidate)
        };
        Self { at, next_deadline }
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    pub fn next_deadline(&self) -> &DateTime<Tz> {
        &self.next_deadline
    }

    /// Fire when `now` has reached the deadline. Returns the window to
    /// aggregate and moves the deadline forward by exactly one day, however
    /// late `now` is. A gap of several days yields one window per call.
    pub fn check_and_advance(&mut self, now: &DateTime<Tz>) -> Option<AggregationWindow> {
        if *now < self.next_deadline {
            return None;
        }
        let window = AggregationWindow::ending_at(&self.next_deadline);
        self.next_deadline = next_day(&self.next_deadline);
        Some(window)
    }
}

fn next_day<Tz: TimeZone>(t: &DateTime<Tz>) -> DateTime<Tz> {
    t.clone()
        .checked_add_days(Days::new(1))
        .unwrap_or_else(|| t.clone() + Duration::days(1))
}

// A time of day that falls in a DST gap is pushed forward an hour.
fn resolve_local<Tz: TimeZone>(
    tz: &Tz,
    naive: chrono::NaiveDateTime,
    now: &DateTime<Tz>,
) -> DateTime<Tz> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .unwrap_or_else(|| now.clone() + Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, d, h, m, 0).unwrap()
    }

    #[test]
    fn later_today_when_target_ahead() {
        let schedule = DailySchedule::new(&utc(10, 6, 0), hm(7, 30));
        assert_eq!(*schedule.next_deadline(), utc(10, 7, 30));
    }

    #[test]
    fn tomorrow_when_target_passed() {
        let schedule = DailySchedule::new(&utc(10, 7, 45), hm(7, 30));
        assert_eq!(*schedule.next_deadline(), utc(11, 7, 30));
    }

    #[test]
    fn tomorrow_when_exactly_on_target() {
        let schedule = DailySchedule::new(&utc(10, 7, 30), hm(7, 30));
        assert_eq!(*schedule.next_deadline(), utc(11, 7, 30));
    }

    #[test]
    fn does_not_fire_before_deadline() {
        let mut schedule = DailySchedule::new(&utc(10, 8, 0), hm(7, 30));
        assert!(schedule.check_and_advance(&utc(11, 7, 29)).is_none());
        assert_eq!(*schedule.next_deadline(), utc(11, 7, 30));
    }

    #[test]
    fn fires_once_and_advances_one_day() {
        let mut schedule = DailySchedule::new(&utc(10, 8, 0), hm(7, 30));
        let window = schedule.check_and_advance(&utc(11, 7, 30)).unwrap();
        assert_eq!(window.start, utc(10, 7, 30));
        assert_eq!(window.end, utc(11, 7, 30));
        assert_eq!(*schedule.next_deadline(), utc(12, 7, 30));
        assert!(schedule.check_and_advance(&utc(11, 7, 31)).is_none());
    }

    #[test]
    fn late_check_advances_only_one_day() {
        let mut schedule = DailySchedule::new(&utc(10, 8, 0), hm(7, 30));
        let now = utc(14, 12, 0);

        let first = schedule.check_and_advance(&now).unwrap();
        assert_eq!(first.end, utc(11, 7, 30));
        assert_eq!(*schedule.next_deadline(), utc(12, 7, 30));

        // Still behind: the next check fires for the following day only.
        let second = schedule.check_and_advance(&now).unwrap();
        assert_eq!(second.end, utc(12, 7, 30));
        assert_eq!(*schedule.next_deadline(), utc(13, 7, 30));
    }
}
