use crate::domain::models::{TimeEntry, TimeEntryStatus};
use chrono::{DateTime, Utc};

/// Whole seconds between two instants, floored. Negative spans floor towards
/// negative infinity so a clock running behind never yields phantom seconds.
pub fn whole_seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_milliseconds().div_euclid(1000)
}

/// Seconds of work counted on `entry` at `now`. Completed entries report their
/// stored duration; everything else is derived from wall-clock timestamps.
pub fn calculate_elapsed(entry: &TimeEntry, now: DateTime<Utc>) -> i64 {
    if entry.status == TimeEntryStatus::Completed {
        return entry.duration;
    }

    let mut elapsed = whole_seconds_between(entry.start_time, now) - entry.paused_duration;
    if entry.status == TimeEntryStatus::Paused {
        if let Some(last_paused_at) = entry.last_paused_at {
            elapsed -= whole_seconds_between(last_paused_at, now);
        }
    }
    elapsed.max(0)
}

/// Seconds left in a phase of `target_seconds` for a pomodoro entry.
pub fn remaining_for_entry(entry: &TimeEntry, target_seconds: i64, now: DateTime<Utc>) -> i64 {
    (target_seconds - calculate_elapsed(entry, now)).max(0)
}

/// Progress through a phase as a percentage; a zero target reports no progress.
pub fn progress_percent(elapsed_seconds: i64, target_seconds: i64) -> f64 {
    if target_seconds <= 0 {
        return 0.0;
    }
    let ratio = elapsed_seconds.max(0) as f64 / target_seconds as f64;
    (ratio * 100.0).clamp(0.0, 100.0)
}
