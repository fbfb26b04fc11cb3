use crate::application::session_store::{PomodoroSnapshot, PomodoroStore};
use crate::domain::elapsed::remaining_for_entry;
use crate::domain::models::{TimeEntry, TimeEntryStatus, TimerMode};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::time_entry_client::TimeEntryClient;
use tokio::time::{Duration as TokioDuration, sleep};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Local state already matched the server.
    InSync,
    /// The server entry replaced local state.
    Adopted { time_entry_id: String, is_active: bool },
    /// Local state claimed a linked work phase the server does not have.
    FellBackToIdle,
    /// The server still runs an entry whose work phase ran out while nothing
    /// was linked to it. Local state is kept and the entry should be stopped.
    Expired { time_entry_id: String },
    /// Nothing to reconcile on either side.
    NoActiveEntry,
}

pub async fn fetch_active_entry_with_retry<C>(
    client: &C,
    retry_policy: &RetryPolicy,
) -> Result<Option<TimeEntry>, InfraError>
where
    C: TimeEntryClient + ?Sized,
{
    let max_attempts = retry_policy.max_attempts.max(1);
    let mut attempt: u8 = 0;

    loop {
        match client.get_active_time_entry().await {
            Ok(entry) => return Ok(entry),
            Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                let delay = retry_policy
                    .base_delay_ms
                    .saturating_mul(2u64.saturating_pow(attempt as u32));
                log::debug!("active entry lookup failed ({error}); retrying in {delay}ms");
                sleep(TokioDuration::from_millis(delay)).await;
                attempt = attempt.saturating_add(1);
            }
            Err(error) => return Err(error),
        }
    }
}

/// Brings the local session in line with the server's active entry. Every
/// surface that shows timer state calls this on mount.
pub async fn reconcile_with_server<C>(
    store: &PomodoroStore,
    client: &C,
    retry_policy: &RetryPolicy,
) -> Result<ReconcileOutcome, InfraError>
where
    C: TimeEntryClient + ?Sized,
{
    let server_entry = fetch_active_entry_with_retry(client, retry_policy).await?;
    let outcome = reconcile_with_entry(store, server_entry.as_ref());
    stop_expired_entry(client, &outcome).await;
    Ok(outcome)
}

/// Closes the server entry behind an [`ReconcileOutcome::Expired`] outcome.
/// Failures are logged; the next reconcile sees the entry again.
pub async fn stop_expired_entry<C>(client: &C, outcome: &ReconcileOutcome)
where
    C: TimeEntryClient + ?Sized,
{
    let ReconcileOutcome::Expired { time_entry_id } = outcome else {
        return;
    };
    match client.stop_time_entry(time_entry_id).await {
        Ok(_) => log::info!("stopped expired time entry {}", time_entry_id),
        Err(error) => log::warn!("failed to stop expired time entry {}: {}", time_entry_id, error),
    }
}

/// Reconciles against an active entry the caller already fetched.
pub fn reconcile_with_entry(
    store: &PomodoroStore,
    server_entry: Option<&TimeEntry>,
) -> ReconcileOutcome {
    let snapshot = store.snapshot();
    let outcome = reconcile_snapshot(store, &snapshot, server_entry);
    match &outcome {
        ReconcileOutcome::Adopted { time_entry_id, is_active } => log::info!(
            "adopted server time entry {} (active={})",
            time_entry_id,
            is_active
        ),
        ReconcileOutcome::FellBackToIdle => {
            log::info!("no active server entry for local work phase; timer is idle")
        }
        ReconcileOutcome::Expired { time_entry_id } => {
            log::info!("server time entry {} outlived its work phase", time_entry_id)
        }
        ReconcileOutcome::InSync | ReconcileOutcome::NoActiveEntry => {}
    }
    outcome
}

fn reconcile_snapshot(
    store: &PomodoroStore,
    snapshot: &PomodoroSnapshot,
    server_entry: Option<&TimeEntry>,
) -> ReconcileOutcome {
    let session = &snapshot.session;
    let matching =
        server_entry.filter(|entry| is_matching_entry(entry, session.task_id.as_deref()));

    let Some(entry) = matching else {
        let claims_server_phase = session.time_entry_id.is_some()
            || (session.is_active && session.task_id.is_some());
        if session.current_mode == TimerMode::Work && claims_server_phase {
            store.fall_back_to_idle();
            return ReconcileOutcome::FellBackToIdle;
        }
        return ReconcileOutcome::NoActiveEntry;
    };

    let server_active = entry.status == TimeEntryStatus::Active;
    let agrees = session.current_mode == TimerMode::Work
        && session.time_entry_id.as_deref() == Some(entry.id.as_str())
        && session.is_active == server_active;
    if agrees {
        return ReconcileOutcome::InSync;
    }

    let target_seconds = entry
        .pomodoro_config
        .map(|config| i64::from(config.work_duration) * 60)
        .unwrap_or_else(|| snapshot.settings.duration_seconds(TimerMode::Work));
    let remaining = remaining_for_entry(entry, target_seconds, store.now());
    let linked = session.time_entry_id.as_deref() == Some(entry.id.as_str());
    if remaining == 0 && !linked {
        return ReconcileOutcome::Expired {
            time_entry_id: entry.id.clone(),
        };
    }
    store.adopt_server_entry(&entry.id, &entry.task_id, server_active, remaining);

    ReconcileOutcome::Adopted {
        time_entry_id: entry.id.clone(),
        is_active: server_active,
    }
}

/// Only unfinished pomodoro entries for the session's task (or any task when
/// none is selected) can drive the pomodoro timer.
fn is_matching_entry(entry: &TimeEntry, task_id: Option<&str>) -> bool {
    if entry.status == TimeEntryStatus::Completed || !entry.is_pomodoro {
        return false;
    }
    if let Err(message) = entry.validate() {
        log::warn!("ignoring invalid server time entry {}: {}", entry.id, message);
        return false;
    }
    match task_id {
        Some(task_id) => entry.task_id == task_id,
        None => true,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::application::session_store::tests::store_with_clock;
    use crate::domain::models::{
        Pagination, PomodoroConfig, StartTimeEntryRequest, StatsPeriod, TimeStats,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scriptable server used across the application tests.
    #[derive(Default)]
    pub(crate) struct FakeTimeEntryClient {
        pub(crate) active_responses: Mutex<VecDeque<Result<Option<TimeEntry>, InfraError>>>,
        pub(crate) fail_starts: Mutex<bool>,
        pub(crate) fail_stops: Mutex<bool>,
        pub(crate) fail_pauses: Mutex<bool>,
        pub(crate) started: Mutex<Vec<StartTimeEntryRequest>>,
        pub(crate) stopped: Mutex<Vec<String>>,
        pub(crate) paused: Mutex<Vec<String>>,
        pub(crate) resumed: Mutex<Vec<String>>,
        pub(crate) active_calls: AtomicUsize,
        pub(crate) next_id: AtomicUsize,
    }

    impl FakeTimeEntryClient {
        pub(crate) fn with_active(responses: Vec<Result<Option<TimeEntry>, InfraError>>) -> Self {
            Self {
                active_responses: Mutex::new(responses.into()),
                ..Self::default()
            }
        }

        fn entry(
            id: &str,
            task_id: &str,
            is_pomodoro: bool,
            config: Option<PomodoroConfig>,
        ) -> TimeEntry {
            TimeEntry {
                id: id.to_string(),
                task_id: task_id.to_string(),
                user_id: Some("user-1".to_string()),
                start_time: Utc::now(),
                end_time: None,
                duration: 0,
                is_pomodoro,
                pomodoro_config: config,
                status: TimeEntryStatus::Active,
                paused_duration: 0,
                last_paused_at: None,
            }
        }
    }

    #[async_trait]
    impl TimeEntryClient for FakeTimeEntryClient {
        async fn start_time_entry(
            &self,
            request: &StartTimeEntryRequest,
        ) -> Result<TimeEntry, InfraError> {
            if *self.fail_starts.lock().expect("lock") {
                return Err(InfraError::Remote(
                    "network error while starting time entry".to_string(),
                ));
            }
            self.started.lock().expect("lock").push(request.clone());
            let sequence = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            Ok(Self::entry(
                &format!("te-{sequence}"),
                &request.task_id,
                request.is_pomodoro,
                request.pomodoro_config,
            ))
        }

        async fn pause_time_entry(&self, time_entry_id: &str) -> Result<TimeEntry, InfraError> {
            if *self.fail_pauses.lock().expect("lock") {
                return Err(InfraError::Remote(
                    "network error while pausing time entry".to_string(),
                ));
            }
            self.paused.lock().expect("lock").push(time_entry_id.to_string());
            let mut entry = Self::entry(time_entry_id, "task-1", true, None);
            entry.status = TimeEntryStatus::Paused;
            entry.last_paused_at = Some(Utc::now());
            Ok(entry)
        }

        async fn resume_time_entry(&self, time_entry_id: &str) -> Result<TimeEntry, InfraError> {
            self.resumed.lock().expect("lock").push(time_entry_id.to_string());
            Ok(Self::entry(time_entry_id, "task-1", true, None))
        }

        async fn stop_time_entry(&self, time_entry_id: &str) -> Result<TimeEntry, InfraError> {
            if *self.fail_stops.lock().expect("lock") {
                return Err(InfraError::Http {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            self.stopped.lock().expect("lock").push(time_entry_id.to_string());
            let mut entry = Self::entry(time_entry_id, "task-1", true, None);
            entry.status = TimeEntryStatus::Completed;
            entry.duration = 60;
            entry.end_time = Some(entry.start_time);
            Ok(entry)
        }

        async fn get_active_time_entry(&self) -> Result<Option<TimeEntry>, InfraError> {
            self.active_calls.fetch_add(1, Ordering::Relaxed);
            self.active_responses
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or(Ok(None))
        }

        async fn get_task_time_entries(&self, task_id: &str) -> Result<Vec<TimeEntry>, InfraError> {
            Ok(vec![Self::entry("te-history", task_id, false, None)])
        }

        async fn get_user_time_entries(
            &self,
            pagination: Pagination,
        ) -> Result<Vec<TimeEntry>, InfraError> {
            Ok((0..pagination.limit.min(3))
                .map(|index| Self::entry(&format!("te-page-{index}"), "task-1", false, None))
                .collect())
        }

        async fn get_time_stats(&self, period: StatsPeriod) -> Result<TimeStats, InfraError> {
            Ok(TimeStats {
                period,
                total_seconds: 3_600,
                by_task: Vec::new(),
                by_day: Vec::new(),
            })
        }
    }

    fn server_entry(
        id: &str,
        task_id: &str,
        start_time: DateTime<Utc>,
        status: TimeEntryStatus,
    ) -> TimeEntry {
        TimeEntry {
            id: id.to_string(),
            task_id: task_id.to_string(),
            user_id: None,
            start_time,
            end_time: None,
            duration: 0,
            is_pomodoro: true,
            pomodoro_config: Some(PomodoroConfig {
                work_duration: 25,
                break_duration: 5,
                long_break_duration: 15,
                cycles: 4,
            }),
            status,
            paused_duration: 0,
            last_paused_at: None,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn adopts_active_server_entry_over_stale_local_state() {
        let (store, clock, _repository) = store_with_clock();
        store.start_session(Some("task-1".to_string()), Some("te-old".to_string()));
        store.pause_session();

        let started = clock.now() - Duration::seconds(600);
        let client = FakeTimeEntryClient::with_active(vec![Ok(Some(server_entry(
            "te-new",
            "task-1",
            started,
            TimeEntryStatus::Active,
        )))]);

        let outcome = reconcile_with_server(&store, &client, &fast_retry())
            .await
            .expect("reconcile");
        assert_eq!(
            outcome,
            ReconcileOutcome::Adopted {
                time_entry_id: "te-new".to_string(),
                is_active: true
            }
        );
        let session = store.snapshot().session;
        assert_eq!(session.time_entry_id.as_deref(), Some("te-new"));
        assert!(session.is_active);
        assert_eq!(session.time_remaining, 900);
    }

    #[tokio::test]
    async fn paused_server_entry_pauses_local_ticking() {
        let (store, clock, _repository) = store_with_clock();
        store.start_session(Some("task-1".to_string()), Some("te-1".to_string()));

        let started = clock.now() - Duration::seconds(300);
        let mut entry = server_entry("te-1", "task-1", started, TimeEntryStatus::Paused);
        entry.last_paused_at = Some(clock.now() - Duration::seconds(100));
        let client = FakeTimeEntryClient::with_active(vec![Ok(Some(entry))]);

        let outcome = reconcile_with_server(&store, &client, &fast_retry())
            .await
            .expect("reconcile");
        assert_eq!(
            outcome,
            ReconcileOutcome::Adopted {
                time_entry_id: "te-1".to_string(),
                is_active: false
            }
        );
        let session = store.snapshot().session;
        assert!(!session.is_active);
        assert_eq!(session.time_remaining, 1_300);
    }

    #[tokio::test]
    async fn missing_server_entry_falls_back_to_idle() {
        let (store, _clock, _repository) = store_with_clock();
        store.start_session(Some("task-1".to_string()), Some("te-1".to_string()));
        let client = FakeTimeEntryClient::with_active(vec![Ok(None)]);

        let outcome = reconcile_with_server(&store, &client, &fast_retry())
            .await
            .expect("reconcile");
        assert_eq!(outcome, ReconcileOutcome::FellBackToIdle);
        let session = store.snapshot().session;
        assert!(!session.is_active);
        assert_eq!(session.time_entry_id, None);
    }

    #[tokio::test]
    async fn entry_for_another_task_is_ignored() {
        let (store, clock, _repository) = store_with_clock();
        store.start_session(Some("task-1".to_string()), Some("te-1".to_string()));
        let client = FakeTimeEntryClient::with_active(vec![Ok(Some(server_entry(
            "te-2",
            "task-2",
            clock.now(),
            TimeEntryStatus::Active,
        )))]);

        let outcome = reconcile_with_server(&store, &client, &fast_retry())
            .await
            .expect("reconcile");
        assert_eq!(outcome, ReconcileOutcome::FellBackToIdle);
    }

    #[tokio::test]
    async fn break_phase_without_entry_is_left_alone() {
        let (store, _clock, _repository) = store_with_clock();
        store.complete_work_phase(TimerMode::Break);
        store.resume_session();
        let client = FakeTimeEntryClient::with_active(vec![Ok(None)]);

        let outcome = reconcile_with_server(&store, &client, &fast_retry())
            .await
            .expect("reconcile");
        assert_eq!(outcome, ReconcileOutcome::NoActiveEntry);
        assert!(store.snapshot().session.is_active);
    }

    #[tokio::test]
    async fn matching_state_is_in_sync() {
        let (store, clock, _repository) = store_with_clock();
        store.start_session(Some("task-1".to_string()), Some("te-1".to_string()));
        let before = store.snapshot();
        let client = FakeTimeEntryClient::with_active(vec![Ok(Some(server_entry(
            "te-1",
            "task-1",
            clock.now(),
            TimeEntryStatus::Active,
        )))]);

        let outcome = reconcile_with_server(&store, &client, &fast_retry())
            .await
            .expect("reconcile");
        assert_eq!(outcome, ReconcileOutcome::InSync);
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let (store, _clock, _repository) = store_with_clock();
        let client = FakeTimeEntryClient::with_active(vec![
            Err(InfraError::Remote("network error while loading".to_string())),
            Err(InfraError::Http {
                status: 503,
                body: String::new(),
            }),
            Ok(None),
        ]);

        let outcome = reconcile_with_server(&store, &client, &fast_retry())
            .await
            .expect("reconcile");
        assert_eq!(outcome, ReconcileOutcome::NoActiveEntry);
        assert_eq!(client.active_calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn permanent_failure_leaves_local_state_untouched() {
        let (store, _clock, _repository) = store_with_clock();
        store.start_session(Some("task-1".to_string()), Some("te-1".to_string()));
        let before = store.snapshot();
        let client = FakeTimeEntryClient::with_active(vec![Err(InfraError::Unauthorized)]);

        let result = reconcile_with_server(&store, &client, &fast_retry()).await;
        assert!(matches!(result, Err(InfraError::Unauthorized)));
        assert_eq!(client.active_calls.load(Ordering::Relaxed), 1);
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn expired_unlinked_entry_is_stopped_without_recounting() {
        let (store, clock, _repository) = store_with_clock();
        store.start_session(Some("task-1".to_string()), Some("te-1".to_string()));
        clock.advance(Duration::seconds(1_500));
        store.complete_work_phase(TimerMode::Break);
        let before = store.snapshot();

        let client = FakeTimeEntryClient::with_active(vec![Ok(Some(server_entry(
            "te-1",
            "task-1",
            clock.now() - Duration::seconds(1_800),
            TimeEntryStatus::Active,
        )))]);
        let outcome = reconcile_with_server(&store, &client, &fast_retry())
            .await
            .expect("reconcile");

        assert_eq!(
            outcome,
            ReconcileOutcome::Expired {
                time_entry_id: "te-1".to_string()
            }
        );
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.snapshot().session.completed_pomodoros, 1);
        assert_eq!(*client.stopped.lock().expect("lock"), vec!["te-1".to_string()]);
    }

    #[tokio::test]
    async fn expired_linked_entry_is_adopted_to_finish_once() {
        let (store, clock, _repository) = store_with_clock();
        store.start_session(Some("task-1".to_string()), Some("te-1".to_string()));
        let client = FakeTimeEntryClient::with_active(vec![Ok(Some(server_entry(
            "te-1",
            "task-1",
            clock.now() - Duration::seconds(1_800),
            TimeEntryStatus::Paused,
        )))]);

        let outcome = reconcile_with_server(&store, &client, &fast_retry())
            .await
            .expect("reconcile");
        assert!(matches!(outcome, ReconcileOutcome::Adopted { .. }));
        assert_eq!(store.snapshot().session.time_remaining, 0);
        assert!(client.stopped.lock().expect("lock").is_empty());
    }
}
