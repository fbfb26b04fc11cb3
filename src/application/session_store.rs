use crate::domain::elapsed::whole_seconds_between;
use crate::domain::models::{PomodoroSession, PomodoroSettings, SettingsPatch, TimerMode};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_repository::{PersistedPomodoroState, SessionRepository};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroSnapshot {
    pub settings: PomodoroSettings,
    pub session: PomodoroSession,
}

impl PomodoroSnapshot {
    fn factory() -> Self {
        let settings = PomodoroSettings::default();
        Self {
            session: PomodoroSession::new(&settings),
            settings,
        }
    }

    /// Configured length of the phase currently shown.
    pub fn phase_seconds(&self) -> i64 {
        self.settings.duration_seconds(self.session.current_mode)
    }
}

/// Owns the pomodoro settings and session. Every mutation is a named transition
/// that is published to subscribers and written through to the repository.
pub struct PomodoroStore {
    state: watch::Sender<PomodoroSnapshot>,
    repository: Arc<dyn SessionRepository>,
    now_provider: NowProvider,
}

impl PomodoroStore {
    pub fn new(repository: Arc<dyn SessionRepository>) -> Self {
        let initial = restore_snapshot(repository.as_ref());
        let (state, _) = watch::channel(initial);
        Self {
            state,
            repository,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    pub fn snapshot(&self) -> PomodoroSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PomodoroSnapshot> {
        self.state.subscribe()
    }

    pub fn apply_settings(&self, patch: &SettingsPatch) -> Result<PomodoroSnapshot, InfraError> {
        let mut rejected = None;
        let applied = self.transition_if("apply_settings", |state, now| {
            let merged = state.settings.merged(patch);
            if let Err(message) = merged.validate() {
                rejected = Some(message);
                return false;
            }
            let mode = state.session.current_mode;
            let resize = merged.duration_minutes(mode) != state.settings.duration_minutes(mode);
            state.settings = merged;
            if resize {
                state.session.time_remaining = merged.duration_seconds(mode);
                if state.session.is_active {
                    state.session.last_updated_at = Some(now);
                }
            }
            true
        });

        if let Some(message) = rejected {
            return Err(InfraError::InvalidInput(message));
        }
        Ok(applied.unwrap_or_else(|| self.snapshot()))
    }

    pub fn start_session(
        &self,
        task_id: Option<String>,
        time_entry_id: Option<String>,
    ) -> PomodoroSnapshot {
        self.transition("start_session", |state, now| {
            let mode = state.session.current_mode;
            if time_entry_id.is_some() && mode != TimerMode::Work {
                log::warn!("ignoring time entry for a {} phase", mode.as_str());
            }
            state.session.is_active = true;
            state.session.task_id = task_id;
            state.session.time_entry_id = time_entry_id.filter(|_| mode == TimerMode::Work);
            state.session.time_remaining = state.settings.duration_seconds(mode);
            state.session.last_updated_at = Some(now);
        })
    }

    /// Settles whole seconds that ran since the last stamp before stopping the clock.
    pub fn pause_session(&self) -> PomodoroSnapshot {
        self.transition("pause_session", |state, now| {
            if state.session.is_active {
                if let Some(last_updated_at) = state.session.last_updated_at {
                    let elapsed = whole_seconds_between(last_updated_at, now).max(0);
                    state.session.time_remaining = (state.session.time_remaining - elapsed).max(0);
                }
            }
            state.session.is_active = false;
            state.session.last_updated_at = Some(now);
        })
    }

    pub fn resume_session(&self) -> PomodoroSnapshot {
        self.transition("resume_session", |state, now| {
            state.session.is_active = true;
            state.session.last_updated_at = Some(now);
        })
    }

    pub fn stop_session(&self) -> PomodoroSnapshot {
        self.transition("stop_session", |state, _now| {
            state.session.is_active = false;
            state.session.time_entry_id = None;
            state.session.current_mode = TimerMode::Work;
            state.session.time_remaining = state.settings.duration_seconds(TimerMode::Work);
            state.session.last_updated_at = None;
        })
    }

    pub fn complete_work_phase(&self, next_mode: TimerMode) -> PomodoroSnapshot {
        self.transition("complete_work_phase", |state, now| {
            state.session.is_active = state.settings.auto_start_breaks;
            state.session.current_mode = next_mode;
            state.session.time_remaining = state.settings.duration_seconds(next_mode);
            state.session.completed_pomodoros = state.session.completed_pomodoros.saturating_add(1);
            state.session.time_entry_id = None;
            state.session.last_updated_at = Some(now);
        })
    }

    pub fn complete_break_phase(&self) -> PomodoroSnapshot {
        self.transition("complete_break_phase", |state, now| {
            state.session.is_active = state.settings.auto_start_pomodoros;
            state.session.current_mode = TimerMode::Work;
            state.session.time_remaining = state.settings.duration_seconds(TimerMode::Work);
            state.session.last_updated_at = Some(now);
        })
    }

    pub fn update_time_remaining(&self, seconds: i64) -> PomodoroSnapshot {
        let now = self.now();
        self.update_time_remaining_at(seconds, now)
    }

    /// Like [`update_time_remaining`](Self::update_time_remaining) but stamps the
    /// given instant, so a caller that consumed whole seconds keeps the remainder.
    pub fn update_time_remaining_at(
        &self,
        seconds: i64,
        stamped_at: DateTime<Utc>,
    ) -> PomodoroSnapshot {
        self.transition("update_time_remaining", |state, _now| {
            state.session.time_remaining = seconds.max(0);
            state.session.last_updated_at = Some(stamped_at);
        })
    }

    /// Consumes the whole seconds that ran since the last stamp of an active
    /// session. Returns the remaining seconds, or `None` when the clock is stopped.
    pub fn advance_active_clock(&self) -> Option<i64> {
        let mut remaining = None;
        self.transition_if("advance_active_clock", |state, now| {
            if !state.session.is_active {
                return false;
            }
            let Some(last_updated_at) = state.session.last_updated_at else {
                state.session.last_updated_at = Some(now);
                remaining = Some(state.session.time_remaining);
                return true;
            };
            let elapsed = whole_seconds_between(last_updated_at, now);
            if elapsed <= 0 {
                remaining = Some(state.session.time_remaining);
                return false;
            }
            let next = (state.session.time_remaining - elapsed).max(0);
            state.session.time_remaining = next;
            state.session.last_updated_at =
                Some(last_updated_at + chrono::Duration::seconds(elapsed));
            remaining = Some(next);
            true
        });
        remaining
    }

    pub fn set_time_entry_id(&self, time_entry_id: Option<String>) -> PomodoroSnapshot {
        self.transition("set_time_entry_id", |state, _now| {
            if time_entry_id.is_some() && state.session.current_mode != TimerMode::Work {
                log::warn!(
                    "refusing to link a time entry during {}",
                    state.session.current_mode.as_str()
                );
                return;
            }
            state.session.time_entry_id = time_entry_id;
        })
    }

    /// Links an entry created asynchronously, but only while the session still
    /// waits for one. Returns false when the session has moved on.
    pub fn attach_time_entry(&self, time_entry_id: &str) -> bool {
        self.transition_if("attach_time_entry", |state, _now| {
            if state.session.current_mode != TimerMode::Work
                || state.session.time_entry_id.is_some()
            {
                return false;
            }
            state.session.time_entry_id = Some(time_entry_id.to_string());
            true
        })
        .is_some()
    }

    /// Replaces local work-phase state with what the server reports.
    pub fn adopt_server_entry(
        &self,
        time_entry_id: &str,
        task_id: &str,
        is_active: bool,
        time_remaining: i64,
    ) -> PomodoroSnapshot {
        self.transition("adopt_server_entry", |state, now| {
            state.session.current_mode = TimerMode::Work;
            state.session.is_active = is_active;
            state.session.task_id = Some(task_id.to_string());
            state.session.time_entry_id = Some(time_entry_id.to_string());
            state.session.time_remaining = time_remaining.max(0);
            state.session.last_updated_at = Some(now);
        })
    }

    /// Drops a work phase the server no longer knows about.
    pub fn fall_back_to_idle(&self) -> PomodoroSnapshot {
        self.transition("fall_back_to_idle", |state, now| {
            state.session.is_active = false;
            state.session.time_entry_id = None;
            state.session.last_updated_at = Some(now);
        })
    }

    /// Pauses a running linked work phase the server has not confirmed.
    /// Remaining time is left as persisted so a later sync can adopt the entry.
    pub fn suspend_unverified_session(&self) -> Option<PomodoroSnapshot> {
        self.transition_if("suspend_unverified_session", |state, now| {
            let session = &mut state.session;
            if session.current_mode != TimerMode::Work
                || !session.is_active
                || session.time_entry_id.is_none()
            {
                return false;
            }
            session.is_active = false;
            session.last_updated_at = Some(now);
            true
        })
    }

    /// Clears transient session state and the counter; settings are kept.
    pub fn reset_session(&self) -> PomodoroSnapshot {
        self.transition("reset_session", |state, _now| {
            state.session = PomodoroSession::new(&state.settings);
        })
    }

    /// Full factory reset of settings and session.
    pub fn reset_to_defaults(&self) -> PomodoroSnapshot {
        self.transition("reset_to_defaults", |state, _now| {
            *state = PomodoroSnapshot::factory();
        })
    }

    fn transition<F>(&self, operation: &str, apply: F) -> PomodoroSnapshot
    where
        F: FnOnce(&mut PomodoroSnapshot, DateTime<Utc>),
    {
        self.transition_if(operation, |state, now| {
            apply(state, now);
            true
        })
        .unwrap_or_else(|| self.snapshot())
    }

    fn transition_if<F>(&self, operation: &str, apply: F) -> Option<PomodoroSnapshot>
    where
        F: FnOnce(&mut PomodoroSnapshot, DateTime<Utc>) -> bool,
    {
        let mut applied = None;
        // Saving under the channel lock keeps storage writes in transition order.
        self.state.send_if_modified(|state| {
            if !apply(state, self.now()) {
                return false;
            }
            self.persist(state);
            applied = Some(state.clone());
            true
        });

        let snapshot = applied?;
        log::debug!(
            "{operation}: mode={} active={} remaining={} completed={}",
            snapshot.session.current_mode.as_str(),
            snapshot.session.is_active,
            snapshot.session.time_remaining,
            snapshot.session.completed_pomodoros
        );
        Some(snapshot)
    }

    fn persist(&self, snapshot: &PomodoroSnapshot) {
        let state = PersistedPomodoroState {
            settings: snapshot.settings,
            session: snapshot.session.clone(),
        };
        if let Err(error) = self.repository.save(&state) {
            log::warn!("failed to persist pomodoro state: {}", error);
        }
    }
}

fn restore_snapshot(repository: &dyn SessionRepository) -> PomodoroSnapshot {
    let persisted = match repository.load() {
        Ok(Some(persisted)) => persisted,
        Ok(None) => return PomodoroSnapshot::factory(),
        Err(error) => {
            log::warn!("discarding unreadable pomodoro state: {}", error);
            return PomodoroSnapshot::factory();
        }
    };

    let settings = match persisted.settings.validate() {
        Ok(()) => persisted.settings,
        Err(message) => {
            log::warn!("discarding persisted settings: {}", message);
            PomodoroSettings::default()
        }
    };
    let session = match persisted.session.validate() {
        Ok(()) => persisted.session,
        Err(message) => {
            log::warn!("discarding persisted session: {}", message);
            PomodoroSession::new(&settings)
        }
    };
    PomodoroSnapshot { settings, session }
}
