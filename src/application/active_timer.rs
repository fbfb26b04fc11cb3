use crate::application::session_store::PomodoroSnapshot;
use crate::domain::elapsed::{calculate_elapsed, progress_percent};
use crate::domain::models::{TimeEntry, TimeEntryStatus, TimerMode};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// What the floating indicator shows. A pomodoro in progress wins over a
/// plain tracked entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ActiveTimerView {
    Pomodoro {
        mode: TimerMode,
        label: String,
        is_active: bool,
        time_remaining: i64,
        clock: String,
        progress_percent: f64,
        completed_pomodoros: u32,
        task_id: Option<String>,
    },
    Tracking {
        time_entry_id: String,
        task_id: String,
        is_paused: bool,
        elapsed_seconds: i64,
        clock: String,
    },
}

pub fn active_timer_view(
    snapshot: &PomodoroSnapshot,
    regular_entry: Option<&TimeEntry>,
    now: DateTime<Utc>,
) -> Option<ActiveTimerView> {
    if let Some(view) = pomodoro_view(snapshot) {
        return Some(view);
    }

    let entry = regular_entry.filter(|entry| entry.status != TimeEntryStatus::Completed)?;
    let elapsed_seconds = calculate_elapsed(entry, now);
    Some(ActiveTimerView::Tracking {
        time_entry_id: entry.id.clone(),
        task_id: entry.task_id.clone(),
        is_paused: entry.status == TimeEntryStatus::Paused,
        elapsed_seconds,
        clock: format_clock(elapsed_seconds),
    })
}

fn pomodoro_view(snapshot: &PomodoroSnapshot) -> Option<ActiveTimerView> {
    let session = &snapshot.session;
    let phase_seconds = snapshot.phase_seconds();
    let started = session.is_active
        || session.time_entry_id.is_some()
        || session.time_remaining < phase_seconds;
    if !started {
        return None;
    }

    Some(ActiveTimerView::Pomodoro {
        mode: session.current_mode,
        label: session.current_mode.label().to_string(),
        is_active: session.is_active,
        time_remaining: session.time_remaining,
        clock: format_clock(session.time_remaining),
        progress_percent: progress_percent(phase_seconds - session.time_remaining, phase_seconds),
        completed_pomodoros: session.completed_pomodoros,
        task_id: session.task_id.clone(),
    })
}

/// `MM:SS`, growing to `H:MM:SS` past the hour.
pub fn format_clock(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (hours, minutes, secs) = (seconds / 3_600, (seconds % 3_600) / 60, seconds % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}
