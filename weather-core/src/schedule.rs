//! One scheduled invocation: a pipeline run plus the weekly retention sweep.
//!
//! The timer itself lives with the caller; this module only decides what a
//! tick does so both entry points stay independently callable.

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};

use crate::{
    error::ScheduleError,
    pipeline::{Pipeline, RunReport},
};

pub const SWEEP_WEEKDAY: Weekday = Weekday::Sun;

#[derive(Debug)]
pub struct TickOutcome {
    pub report: RunReport,
    /// Result of the retention sweep, when one was due on this tick.
    pub sweep: Option<Result<usize, ScheduleError>>,
}

/// Tracks when the last retention sweep happened so it runs once per week.
#[derive(Debug, Default, Clone)]
pub struct SweepTracker {
    last_sweep: Option<NaiveDate>,
}

impl SweepTracker {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        now.weekday() == SWEEP_WEEKDAY && self.last_sweep != Some(today)
    }

    pub fn mark(&mut self, now: DateTime<Utc>) {
        self.last_sweep = Some(now.date_naive());
    }
}

/// Run all cities, then sweep old records if a sweep is due.
///
/// A failed sweep is not marked as done, so the next tick on the same day
/// retries it.
pub async fn tick(
    pipeline: &mut Pipeline,
    cities: &[String],
    retention_days: u32,
    now: DateTime<Utc>,
    sweeps: &mut SweepTracker,
) -> TickOutcome {
    let report = pipeline.run_all(cities).await;

    if !sweeps.is_due(now) {
        return TickOutcome { report, sweep: None };
    }

    let sweep = pipeline.retention_sweep(retention_days).map_err(ScheduleError::Retention);
    if sweep.is_ok() {
        sweeps.mark(now);
    }

    TickOutcome { report, sweep: Some(sweep) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sweep_is_due_once_per_sunday() {
        let sunday_morning = Utc.with_ymd_and_hms(2024, 6, 2, 8, 0, 0).unwrap();
        let sunday_evening = Utc.with_ymd_and_hms(2024, 6, 2, 20, 0, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap();
        let next_sunday = Utc.with_ymd_and_hms(2024, 6, 9, 8, 0, 0).unwrap();

        let mut tracker = SweepTracker::default();
        assert!(!tracker.is_due(monday));
        assert!(tracker.is_due(sunday_morning));

        tracker.mark(sunday_morning);
        assert!(!tracker.is_due(sunday_evening));
        assert!(tracker.is_due(next_sunday));
    }
}
