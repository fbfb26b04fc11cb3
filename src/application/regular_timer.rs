use crate::application::session_store::NowProvider;
use crate::domain::elapsed::{calculate_elapsed, whole_seconds_between};
use crate::domain::models::{StartTimeEntryRequest, TimeEntry, TimeEntryStatus};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::time_entry_client::TimeEntryClient;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;

/// Plain time tracking against a task, outside the pomodoro cycle.
///
/// Starting is server-first: nothing becomes active locally until the server
/// has created the entry. Pause, resume and stop are local-first and only log
/// server failures.
pub struct RegularTimer<C>
where
    C: TimeEntryClient,
{
    client: Arc<C>,
    entry: watch::Sender<Option<TimeEntry>>,
    now_provider: NowProvider,
}

impl<C> RegularTimer<C>
where
    C: TimeEntryClient,
{
    pub fn new(client: Arc<C>) -> Self {
        let (entry, _) = watch::channel(None);
        Self {
            client,
            entry,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn current(&self) -> Option<TimeEntry> {
        self.entry.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<TimeEntry>> {
        self.entry.subscribe()
    }

    pub fn elapsed_seconds(&self) -> i64 {
        let now = (self.now_provider)();
        self.entry
            .borrow()
            .as_ref()
            .map(|entry| calculate_elapsed(entry, now))
            .unwrap_or(0)
    }

    pub async fn start_tracking(&self, task_id: &str) -> Result<TimeEntry, InfraError> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Err(InfraError::InvalidInput("task id is required".to_string()));
        }
        if let Some(current) = self.current() {
            return Err(InfraError::InvalidInput(format!(
                "already tracking time entry {} for task {}",
                current.id, current.task_id
            )));
        }

        let request = StartTimeEntryRequest {
            task_id: task_id.to_string(),
            is_pomodoro: false,
            pomodoro_config: None,
        };
        let entry = self.client.start_time_entry(&request).await?;
        entry.validate().map_err(InfraError::Remote)?;

        log::info!("tracking task {} with time entry {}", entry.task_id, entry.id);
        self.entry.send_replace(Some(entry.clone()));
        Ok(entry)
    }

    pub async fn pause_tracking(&self) -> Result<TimeEntry, InfraError> {
        let current = self.require_current("pause")?;
        if current.status != TimeEntryStatus::Active {
            return Ok(current);
        }

        let now = (self.now_provider)();
        let mut local = current.clone();
        local.status = TimeEntryStatus::Paused;
        local.last_paused_at = Some(now);
        self.entry.send_replace(Some(local.clone()));

        match self.client.pause_time_entry(&current.id).await {
            Ok(entry) => Ok(self.accept_server_entry(entry, local)),
            Err(error) => {
                log::warn!("failed to pause time entry {}: {}", current.id, error);
                Ok(local)
            }
        }
    }

    pub async fn resume_tracking(&self) -> Result<TimeEntry, InfraError> {
        let current = self.require_current("resume")?;
        if current.status != TimeEntryStatus::Paused {
            return Ok(current);
        }

        let now = (self.now_provider)();
        let mut local = current.clone();
        if let Some(last_paused_at) = local.last_paused_at.take() {
            local.paused_duration += whole_seconds_between(last_paused_at, now).max(0);
        }
        local.status = TimeEntryStatus::Active;
        self.entry.send_replace(Some(local.clone()));

        match self.client.resume_time_entry(&current.id).await {
            Ok(entry) => Ok(self.accept_server_entry(entry, local)),
            Err(error) => {
                log::warn!("failed to resume time entry {}: {}", current.id, error);
                Ok(local)
            }
        }
    }

    /// Clears the local entry and returns the server's completed record when
    /// the stop call succeeded.
    pub async fn stop_tracking(&self) -> Result<Option<TimeEntry>, InfraError> {
        let current = self.require_current("stop")?;
        self.entry.send_replace(None);

        match self.client.stop_time_entry(&current.id).await {
            Ok(entry) => {
                log::info!("stopped time entry {} after {}s", entry.id, entry.duration);
                Ok(Some(entry))
            }
            Err(error) => {
                log::warn!("failed to stop time entry {}: {}", current.id, error);
                Ok(None)
            }
        }
    }

    /// Picks up a non-pomodoro entry the server reports as running. Pomodoro
    /// entries belong to the session store and are ignored here.
    pub fn sync_with_server(&self, server_entry: Option<&TimeEntry>) {
        let adopted = server_entry
            .filter(|entry| !entry.is_pomodoro && entry.status != TimeEntryStatus::Completed)
            .filter(|entry| match entry.validate() {
                Ok(()) => true,
                Err(message) => {
                    log::warn!("ignoring invalid server time entry {}: {}", entry.id, message);
                    false
                }
            })
            .cloned();
        self.entry.send_if_modified(|current| {
            if *current == adopted {
                return false;
            }
            *current = adopted;
            true
        });
    }

    fn require_current(&self, action: &str) -> Result<TimeEntry, InfraError> {
        self.current()
            .ok_or_else(|| InfraError::InvalidInput(format!("no tracked time entry to {action}")))
    }

    /// Keeps the server's record unless the local entry was stopped or
    /// replaced while the request was in flight.
    fn accept_server_entry(&self, server: TimeEntry, local: TimeEntry) -> TimeEntry {
        let mut accepted = local;
        self.entry.send_if_modified(|current| match current {
            Some(entry) if entry.id == server.id => {
                *entry = server.clone();
                accepted = server;
                true
            }
            _ => false,
        });
        accepted
    }
}
