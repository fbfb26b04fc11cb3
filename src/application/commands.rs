use crate::application::active_timer::{ActiveTimerView, active_timer_view};
use crate::application::bootstrap::{BootstrapResult, bootstrap_workspace};
use crate::application::notices::{NoticeBoard, PhaseNotice};
use crate::application::orchestrator::{PhaseOrchestrator, PhaseTrigger, ServerLink};
use crate::application::reconcile::{
    ReconcileOutcome, RetryPolicy, fetch_active_entry_with_retry, reconcile_with_entry,
    stop_expired_entry,
};
use crate::application::regular_timer::RegularTimer;
use crate::application::session_store::{PomodoroSnapshot, PomodoroStore};
use crate::application::tick_driver::TickDriver;
use crate::domain::models::{
    Pagination, SettingsPatch, StatsPeriod, TimeEntry, TimeStats, TimerMode,
};
use crate::infrastructure::alarm::{AlarmPlayer, default_alarm_player};
use crate::infrastructure::config::{AppConfig, load_config_from_env};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_repository::SqliteSessionRepository;
use crate::infrastructure::time_entry_client::{ReqwestTimeEntryClient, TimeEntryClient};
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const MAX_PAGE_SIZE: u32 = 100;

pub struct AppState<C = ReqwestTimeEntryClient>
where
    C: TimeEntryClient + 'static,
{
    workspace: BootstrapResult,
    config: AppConfig,
    store: Arc<PomodoroStore>,
    orchestrator: Arc<PhaseOrchestrator<C>>,
    regular: RegularTimer<C>,
    retry_policy: RetryPolicy,
    tick_driver: Mutex<Option<TickDriver>>,
    log_guard: Mutex<()>,
}

impl AppState<ReqwestTimeEntryClient> {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let workspace = bootstrap_workspace(&workspace_root)?;
        let config = load_config_from_env(&workspace.config_dir)?;
        let client = ReqwestTimeEntryClient::new(&config.api_base_url, config.api_token.clone())?;
        Ok(Self::with_client(
            workspace,
            config,
            Arc::new(client),
            default_alarm_player(),
        ))
    }
}

impl<C> AppState<C>
where
    C: TimeEntryClient + 'static,
{
    pub fn with_client(
        workspace: BootstrapResult,
        config: AppConfig,
        client: Arc<C>,
        alarm: Arc<dyn AlarmPlayer>,
    ) -> Self {
        let repository = Arc::new(SqliteSessionRepository::new(&workspace.database_path));
        let store = Arc::new(PomodoroStore::new(repository));
        let notices = NoticeBoard::new(Duration::from_secs(config.notice_dismiss_seconds));
        let orchestrator = Arc::new(PhaseOrchestrator::new(
            store.clone(),
            client.clone(),
            alarm,
            notices,
        ));

        Self {
            workspace,
            config,
            store,
            orchestrator,
            regular: RegularTimer::new(client),
            retry_policy: RetryPolicy::default(),
            tick_driver: Mutex::new(None),
            log_guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn database_path(&self) -> &Path {
        &self.workspace.database_path
    }

    pub fn store(&self) -> &Arc<PomodoroStore> {
        &self.store
    }

    pub fn notices(&self) -> &NoticeBoard {
        self.orchestrator.notices()
    }

    pub fn regular_timer(&self) -> &RegularTimer<C> {
        &self.regular
    }

    fn client(&self) -> &C {
        self.orchestrator.client().as_ref()
    }

    /// Spawns the countdown task unless one is already running. Must be
    /// called from within a tokio runtime.
    pub fn start_tick_driver(&self) -> Result<(), InfraError> {
        let mut guard = lock_tick_driver(self)?;
        if guard.as_ref().is_some_and(TickDriver::is_running) {
            return Ok(());
        }
        let tick_interval = Duration::from_millis(self.config.tick_interval_ms);
        *guard = Some(TickDriver::spawn(self.orchestrator.clone(), tick_interval));
        log::debug!("tick driver started ({}ms)", self.config.tick_interval_ms);
        Ok(())
    }

    pub fn stop_tick_driver(&self) -> Result<(), InfraError> {
        if let Some(driver) = lock_tick_driver(self)?.take() {
            driver.stop();
        }
        Ok(())
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        log::info!("{command}: {message}");
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        log::error!("{command}: {message}");
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.workspace.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

pub fn get_pomodoro_state_impl<C>(state: &AppState<C>) -> PomodoroSnapshot
where
    C: TimeEntryClient + 'static,
{
    state.store.snapshot()
}

pub async fn start_pomodoro_impl<C>(
    state: &AppState<C>,
    task_id: Option<String>,
) -> Result<PomodoroSnapshot, InfraError>
where
    C: TimeEntryClient + 'static,
{
    let before = state.store.snapshot();
    if before.session.is_active {
        return Err(InfraError::InvalidInput(
            "pomodoro is already running".to_string(),
        ));
    }

    let task_id = normalize_task_id(task_id)
        .or_else(|| before.session.task_id.clone())
        .or_else(|| state.config.task_id.clone());
    if let Some(stale_entry_id) = before.session.time_entry_id.as_deref() {
        stop_entry_best_effort(state, stale_entry_id).await;
    }

    let started = state.store.start_session(task_id.clone(), None);
    state.log_info(
        "start_pomodoro",
        &format!(
            "started {} phase for task {}",
            started.session.current_mode.as_str(),
            task_id.as_deref().unwrap_or("-")
        ),
    );

    if started.session.current_mode != TimerMode::Work {
        return Ok(started);
    }
    let Some(task_id) = task_id else {
        return Ok(started);
    };
    if let ServerLink::Failed(error) = state
        .orchestrator
        .start_linked_entry(task_id, &started.settings)
        .await
    {
        state.log_error(
            "start_pomodoro",
            &format!("continuing without a time entry: {error}"),
        );
    }
    Ok(state.store.snapshot())
}

pub async fn pause_pomodoro_impl<C>(state: &AppState<C>) -> Result<PomodoroSnapshot, InfraError>
where
    C: TimeEntryClient + 'static,
{
    if !state.store.snapshot().session.is_active {
        return Err(InfraError::InvalidInput("pomodoro is not running".to_string()));
    }

    let paused = state.store.pause_session();
    if let Some(time_entry_id) = paused.session.time_entry_id.as_deref() {
        if let Err(error) = state.client().pause_time_entry(time_entry_id).await {
            log::warn!("failed to pause time entry {}: {}", time_entry_id, error);
        }
    }
    Ok(paused)
}

pub async fn resume_pomodoro_impl<C>(state: &AppState<C>) -> Result<PomodoroSnapshot, InfraError>
where
    C: TimeEntryClient + 'static,
{
    if state.store.snapshot().session.is_active {
        return Err(InfraError::InvalidInput("pomodoro is not paused".to_string()));
    }

    let resumed = state.store.resume_session();
    if let Some(time_entry_id) = resumed.session.time_entry_id.as_deref() {
        if let Err(error) = state.client().resume_time_entry(time_entry_id).await {
            log::warn!("failed to resume time entry {}: {}", time_entry_id, error);
        }
    }
    Ok(resumed)
}

pub async fn stop_pomodoro_impl<C>(state: &AppState<C>) -> Result<PomodoroSnapshot, InfraError>
where
    C: TimeEntryClient + 'static,
{
    let linked = state.store.snapshot().session.time_entry_id;
    let stopped = state.store.stop_session();
    if let Some(time_entry_id) = linked.as_deref() {
        stop_entry_best_effort(state, time_entry_id).await;
    }
    state.log_info("stop_pomodoro", "pomodoro stopped");
    Ok(stopped)
}

pub async fn skip_phase_impl<C>(state: &AppState<C>) -> Result<PomodoroSnapshot, InfraError>
where
    C: TimeEntryClient + 'static,
{
    let outcome = state.orchestrator.complete_phase(PhaseTrigger::Skipped).await;
    state.log_info(
        "skip_phase",
        &format!(
            "skipped {} phase; now {}",
            outcome.finished_mode.as_str(),
            outcome.snapshot.session.current_mode.as_str()
        ),
    );
    Ok(outcome.snapshot)
}

pub fn save_settings_impl<C>(
    state: &AppState<C>,
    patch: SettingsPatch,
) -> Result<PomodoroSnapshot, InfraError>
where
    C: TimeEntryClient + 'static,
{
    let snapshot = state.store.apply_settings(&patch)?;
    state.log_info("save_settings", "pomodoro settings saved");
    Ok(snapshot)
}

/// Restores factory settings and clears the session, stopping any linked entry.
pub async fn reset_settings_impl<C>(state: &AppState<C>) -> Result<PomodoroSnapshot, InfraError>
where
    C: TimeEntryClient + 'static,
{
    let linked = state.store.snapshot().session.time_entry_id;
    let reset = state.store.reset_to_defaults();
    if let Some(time_entry_id) = linked.as_deref() {
        stop_entry_best_effort(state, time_entry_id).await;
    }
    state.log_info("reset_settings", "pomodoro settings reset to defaults");
    Ok(reset)
}

pub fn get_active_timer_impl<C>(state: &AppState<C>) -> Option<ActiveTimerView>
where
    C: TimeEntryClient + 'static,
{
    let snapshot = state.store.snapshot();
    let regular = state.regular.current();
    active_timer_view(&snapshot, regular.as_ref(), state.store.now())
}

pub fn dismiss_notice_impl<C>(state: &AppState<C>) -> Option<PhaseNotice>
where
    C: TimeEntryClient + 'static,
{
    let shown = state.notices().current();
    state.notices().dismiss();
    shown
}

pub async fn start_tracking_impl<C>(
    state: &AppState<C>,
    task_id: String,
) -> Result<TimeEntry, InfraError>
where
    C: TimeEntryClient + 'static,
{
    let entry = state.regular.start_tracking(&task_id).await?;
    state.log_info(
        "start_tracking",
        &format!("tracking task {} as {}", entry.task_id, entry.id),
    );
    Ok(entry)
}

pub async fn pause_tracking_impl<C>(state: &AppState<C>) -> Result<TimeEntry, InfraError>
where
    C: TimeEntryClient + 'static,
{
    state.regular.pause_tracking().await
}

pub async fn resume_tracking_impl<C>(state: &AppState<C>) -> Result<TimeEntry, InfraError>
where
    C: TimeEntryClient + 'static,
{
    state.regular.resume_tracking().await
}

pub async fn stop_tracking_impl<C>(state: &AppState<C>) -> Result<Option<TimeEntry>, InfraError>
where
    C: TimeEntryClient + 'static,
{
    let completed = state.regular.stop_tracking().await?;
    if let Some(entry) = completed.as_ref() {
        state.log_info(
            "stop_tracking",
            &format!("time entry {} completed after {}s", entry.id, entry.duration),
        );
    }
    Ok(completed)
}

pub async fn list_task_time_entries_impl<C>(
    state: &AppState<C>,
    task_id: String,
) -> Result<Vec<TimeEntry>, InfraError>
where
    C: TimeEntryClient + 'static,
{
    let task_id = normalize_task_id(Some(task_id))
        .ok_or_else(|| InfraError::InvalidInput("task_id must not be empty".to_string()))?;
    state.client().get_task_time_entries(&task_id).await
}

pub async fn list_time_entries_impl<C>(
    state: &AppState<C>,
    limit: Option<u32>,
    offset: Option<u32>,
) -> Result<Vec<TimeEntry>, InfraError>
where
    C: TimeEntryClient + 'static,
{
    let defaults = Pagination::default();
    let pagination = Pagination {
        limit: limit.unwrap_or(defaults.limit).clamp(1, MAX_PAGE_SIZE),
        offset: offset.unwrap_or(defaults.offset),
    };
    state.client().get_user_time_entries(pagination).await
}

pub async fn get_time_stats_impl<C>(
    state: &AppState<C>,
    period: Option<String>,
) -> Result<TimeStats, InfraError>
where
    C: TimeEntryClient + 'static,
{
    let period = parse_stats_period(period.as_deref())?;
    state.client().get_time_stats(period).await
}

/// Runs once per timer surface mount: reconciles the pomodoro session and the
/// regular timer against the server's single active entry. A restored work
/// phase is only trusted once the server confirms it, so it is held paused
/// when the lookup fails.
pub async fn mount_impl<C>(state: &AppState<C>) -> Result<ReconcileOutcome, InfraError>
where
    C: TimeEntryClient + 'static,
{
    let result = sync_impl(state).await;
    if result.is_err() && state.store.suspend_unverified_session().is_some() {
        log::warn!("server unreachable on mount; restored work phase held paused");
    }
    result
}

/// Reconciles again on demand. Local state is left alone when the lookup fails.
pub async fn sync_impl<C>(state: &AppState<C>) -> Result<ReconcileOutcome, InfraError>
where
    C: TimeEntryClient + 'static,
{
    let server_entry = fetch_active_entry_with_retry(state.client(), &state.retry_policy).await?;
    let outcome = reconcile_with_entry(&state.store, server_entry.as_ref());
    stop_expired_entry(state.client(), &outcome).await;
    state.regular.sync_with_server(server_entry.as_ref());
    Ok(outcome)
}

fn lock_tick_driver<C>(
    state: &AppState<C>,
) -> Result<MutexGuard<'_, Option<TickDriver>>, InfraError>
where
    C: TimeEntryClient + 'static,
{
    state
        .tick_driver
        .lock()
        .map_err(|error| InfraError::StatePoisoned(format!("tick driver lock poisoned: {error}")))
}

async fn stop_entry_best_effort<C>(state: &AppState<C>, time_entry_id: &str)
where
    C: TimeEntryClient + 'static,
{
    if let Err(error) = state.client().stop_time_entry(time_entry_id).await {
        log::warn!("failed to stop time entry {}: {}", time_entry_id, error);
    }
}

fn normalize_task_id(task_id: Option<String>) -> Option<String> {
    task_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn parse_stats_period(raw: Option<&str>) -> Result<StatsPeriod, InfraError> {
    match raw.map(str::trim).unwrap_or("week") {
        "day" => Ok(StatsPeriod::Day),
        "week" => Ok(StatsPeriod::Week),
        "month" => Ok(StatsPeriod::Month),
        other => Err(InfraError::InvalidInput(format!(
            "period must be day, week or month: {other}"
        ))),
    }
}
