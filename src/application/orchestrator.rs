use crate::application::notices::NoticeBoard;
use crate::application::session_store::{PomodoroSnapshot, PomodoroStore};
use crate::domain::models::{PomodoroSettings, StartTimeEntryRequest, TimerMode};
use crate::infrastructure::alarm::AlarmPlayer;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::time_entry_client::TimeEntryClient;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTrigger {
    Elapsed,
    Skipped,
}

impl PhaseTrigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Elapsed => "elapsed",
            Self::Skipped => "skipped",
        }
    }
}

/// What happened to the server side of a phase change.
#[derive(Debug)]
pub enum ServerLink {
    /// No server call was needed.
    Untouched,
    Stopped { time_entry_id: String },
    Started { time_entry_id: String },
    /// The entry was created but the session had moved on, so it was stopped again.
    Discarded { time_entry_id: String },
    Failed(InfraError),
}

#[derive(Debug)]
pub struct PhaseOutcome {
    pub finished_mode: TimerMode,
    pub snapshot: PomodoroSnapshot,
    pub server: ServerLink,
}

/// Runs the side effects of a finished phase. The local transition always
/// happens first; server calls are best effort and reported in the outcome.
pub struct PhaseOrchestrator<C>
where
    C: TimeEntryClient,
{
    store: Arc<PomodoroStore>,
    client: Arc<C>,
    alarm: Arc<dyn AlarmPlayer>,
    notices: NoticeBoard,
}

impl<C> PhaseOrchestrator<C>
where
    C: TimeEntryClient,
{
    pub fn new(
        store: Arc<PomodoroStore>,
        client: Arc<C>,
        alarm: Arc<dyn AlarmPlayer>,
        notices: NoticeBoard,
    ) -> Self {
        Self {
            store,
            client,
            alarm,
            notices,
        }
    }

    pub fn store(&self) -> &Arc<PomodoroStore> {
        &self.store
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub async fn complete_phase(&self, trigger: PhaseTrigger) -> PhaseOutcome {
        let before = self.store.snapshot();
        let finished_mode = before.session.current_mode;
        log::info!(
            "{} phase finished ({})",
            finished_mode.as_str(),
            trigger.as_str()
        );
        self.play_alarm(&before);

        match finished_mode {
            TimerMode::Work => self.finish_work_phase(before).await,
            TimerMode::Break | TimerMode::LongBreak => self.finish_break_phase(before).await,
        }
    }

    async fn finish_work_phase(&self, before: PomodoroSnapshot) -> PhaseOutcome {
        let next_mode = before
            .settings
            .next_break_mode(before.session.completed_pomodoros);
        self.notices.announce_work_finished(next_mode);
        let snapshot = self.store.complete_work_phase(next_mode);

        let server = match before.session.time_entry_id {
            None => ServerLink::Untouched,
            Some(time_entry_id) => match self.client.stop_time_entry(&time_entry_id).await {
                Ok(_) => ServerLink::Stopped { time_entry_id },
                Err(error) => {
                    log::error!("failed to stop time entry {}: {}", time_entry_id, error);
                    ServerLink::Failed(error)
                }
            },
        };

        PhaseOutcome {
            finished_mode: TimerMode::Work,
            snapshot,
            server,
        }
    }

    async fn finish_break_phase(&self, before: PomodoroSnapshot) -> PhaseOutcome {
        let finished_mode = before.session.current_mode;
        let auto_start = before.settings.auto_start_pomodoros;
        self.notices.announce_break_finished(auto_start);
        let mut snapshot = self.store.complete_break_phase();

        let server = match (auto_start, before.session.task_id.clone()) {
            (true, Some(task_id)) => {
                let link = self.start_linked_entry(task_id, &before.settings).await;
                snapshot = self.store.snapshot();
                link
            }
            (true, None) => {
                log::debug!("auto-started focus session has no task; no time entry requested");
                ServerLink::Untouched
            }
            (false, _) => ServerLink::Untouched,
        };

        PhaseOutcome {
            finished_mode,
            snapshot,
            server,
        }
    }

    /// Requests a pomodoro entry for the current work phase and links it if the
    /// session still waits for one; otherwise the new entry is stopped again.
    pub async fn start_linked_entry(
        &self,
        task_id: String,
        settings: &PomodoroSettings,
    ) -> ServerLink {
        let request = StartTimeEntryRequest {
            task_id,
            is_pomodoro: true,
            pomodoro_config: Some(settings.pomodoro_config()),
        };
        let entry = match self.client.start_time_entry(&request).await {
            Ok(entry) => entry,
            Err(error) => {
                log::error!("failed to start pomodoro time entry: {}", error);
                return ServerLink::Failed(error);
            }
        };

        if self.store.attach_time_entry(&entry.id) {
            return ServerLink::Started {
                time_entry_id: entry.id,
            };
        }

        log::warn!(
            "session moved on before time entry {} was created; stopping it",
            entry.id
        );
        if let Err(error) = self.client.stop_time_entry(&entry.id).await {
            log::error!("failed to stop orphaned time entry {}: {}", entry.id, error);
        }
        ServerLink::Discarded {
            time_entry_id: entry.id,
        }
    }

    fn play_alarm(&self, snapshot: &PomodoroSnapshot) {
        if let Err(error) = self
            .alarm
            .play(snapshot.settings.alarm_sound, snapshot.settings.alarm_volume)
        {
            log::warn!("alarm playback failed: {}", error);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::application::reconcile::tests::FakeTimeEntryClient;
    use crate::application::session_store::tests::store_with_clock;
    use crate::domain::models::{AlarmSound, SettingsPatch};
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingAlarm {
        pub(crate) played: Mutex<Vec<(AlarmSound, u8)>>,
        pub(crate) fail: bool,
    }

    impl AlarmPlayer for RecordingAlarm {
        fn play(&self, sound: AlarmSound, volume: u8) -> Result<(), InfraError> {
            self.played.lock().expect("lock").push((sound, volume));
            if self.fail {
                return Err(InfraError::Audio("autoplay blocked".to_string()));
            }
            Ok(())
        }
    }

    fn orchestrator(
        client: FakeTimeEntryClient,
        alarm: RecordingAlarm,
    ) -> (PhaseOrchestrator<FakeTimeEntryClient>, Arc<RecordingAlarm>) {
        let (store, _clock, _repository) = store_with_clock();
        let alarm = Arc::new(alarm);
        let orchestrator = PhaseOrchestrator::new(
            Arc::new(store),
            Arc::new(client),
            alarm.clone(),
            NoticeBoard::default(),
        );
        (orchestrator, alarm)
    }

    #[tokio::test]
    async fn work_completion_stops_entry_and_moves_to_break() {
        let (orchestrator, alarm) =
            orchestrator(FakeTimeEntryClient::default(), RecordingAlarm::default());
        orchestrator
            .store()
            .start_session(Some("task-1".to_string()), Some("te-1".to_string()));

        let outcome = orchestrator.complete_phase(PhaseTrigger::Elapsed).await;
        assert_eq!(outcome.finished_mode, TimerMode::Work);
        assert!(matches!(
            outcome.server,
            ServerLink::Stopped { ref time_entry_id } if time_entry_id == "te-1"
        ));
        assert_eq!(outcome.snapshot.session.current_mode, TimerMode::Break);
        assert_eq!(outcome.snapshot.session.completed_pomodoros, 1);
        assert_eq!(outcome.snapshot.session.time_remaining, 300);
        assert_eq!(outcome.snapshot.session.time_entry_id, None);
        assert_eq!(orchestrator.client().stopped.lock().expect("lock").as_slice(), ["te-1"]);
        assert_eq!(alarm.played.lock().expect("lock").as_slice(), [(AlarmSound::Bell, 50)]);
        assert!(orchestrator.notices().current().is_some());
    }

    #[tokio::test]
    async fn fourth_completion_routes_to_long_break() {
        let (orchestrator, _alarm) =
            orchestrator(FakeTimeEntryClient::default(), RecordingAlarm::default());
        let store = orchestrator.store().clone();

        let mut modes = Vec::new();
        for _ in 0..4 {
            store.start_session(Some("task-1".to_string()), None);
            let outcome = orchestrator.complete_phase(PhaseTrigger::Elapsed).await;
            modes.push(outcome.snapshot.session.current_mode);
            store.complete_break_phase();
        }
        assert_eq!(
            modes,
            [TimerMode::Break, TimerMode::Break, TimerMode::Break, TimerMode::LongBreak]
        );
        assert_eq!(store.snapshot().session.completed_pomodoros, 4);
        assert_eq!(
            store.snapshot().settings.duration_seconds(TimerMode::LongBreak),
            900
        );
    }

    #[tokio::test]
    async fn failed_stop_and_alarm_do_not_block_transition() {
        let client = FakeTimeEntryClient::default();
        *client.fail_stops.lock().expect("lock") = true;
        let alarm = RecordingAlarm {
            fail: true,
            ..RecordingAlarm::default()
        };
        let (orchestrator, _alarm) = orchestrator(client, alarm);
        orchestrator
            .store()
            .start_session(Some("task-1".to_string()), Some("te-1".to_string()));

        let outcome = orchestrator.complete_phase(PhaseTrigger::Skipped).await;
        assert!(matches!(outcome.server, ServerLink::Failed(InfraError::Http { status: 500, .. })));
        assert_eq!(outcome.snapshot.session.current_mode, TimerMode::Break);
        assert_eq!(outcome.snapshot.session.completed_pomodoros, 1);
    }

    #[tokio::test]
    async fn break_completion_auto_starts_linked_focus_session() {
        let (orchestrator, _alarm) =
            orchestrator(FakeTimeEntryClient::default(), RecordingAlarm::default());
        let store = orchestrator.store().clone();
        store
            .apply_settings(&SettingsPatch {
                auto_start_pomodoros: Some(true),
                work_duration: Some(30),
                ..SettingsPatch::default()
            })
            .expect("apply settings");
        store.start_session(Some("task-1".to_string()), None);
        store.complete_work_phase(TimerMode::Break);

        let outcome = orchestrator.complete_phase(PhaseTrigger::Elapsed).await;
        assert_eq!(outcome.finished_mode, TimerMode::Break);
        assert!(matches!(
            outcome.server,
            ServerLink::Started { ref time_entry_id } if time_entry_id == "te-1"
        ));
        let session = outcome.snapshot.session;
        assert_eq!(session.current_mode, TimerMode::Work);
        assert!(session.is_active);
        assert_eq!(session.time_remaining, 1_800);
        assert_eq!(session.time_entry_id.as_deref(), Some("te-1"));

        let started = orchestrator.client().started.lock().expect("lock").clone();
        assert_eq!(started.len(), 1);
        assert!(started[0].is_pomodoro);
        assert_eq!(started[0].pomodoro_config.map(|config| config.work_duration), Some(30));
    }

    #[tokio::test]
    async fn break_completion_without_auto_start_stays_idle() {
        let (orchestrator, _alarm) =
            orchestrator(FakeTimeEntryClient::default(), RecordingAlarm::default());
        let store = orchestrator.store().clone();
        store.start_session(Some("task-1".to_string()), None);
        store.complete_work_phase(TimerMode::Break);

        let outcome = orchestrator.complete_phase(PhaseTrigger::Skipped).await;
        assert!(matches!(outcome.server, ServerLink::Untouched));
        assert!(!outcome.snapshot.session.is_active);
        assert!(orchestrator.client().started.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn failed_auto_start_keeps_local_focus_session() {
        let client = FakeTimeEntryClient::default();
        *client.fail_starts.lock().expect("lock") = true;
        let (orchestrator, _alarm) = orchestrator(client, RecordingAlarm::default());
        let store = orchestrator.store().clone();
        store
            .apply_settings(&SettingsPatch {
                auto_start_pomodoros: Some(true),
                ..SettingsPatch::default()
            })
            .expect("apply settings");
        store.start_session(Some("task-1".to_string()), None);
        store.complete_work_phase(TimerMode::LongBreak);

        let outcome = orchestrator.complete_phase(PhaseTrigger::Elapsed).await;
        assert!(matches!(outcome.server, ServerLink::Failed(InfraError::Remote(_))));
        assert!(outcome.snapshot.session.is_active);
        assert_eq!(outcome.snapshot.session.current_mode, TimerMode::Work);
        assert_eq!(outcome.snapshot.session.time_entry_id, None);
    }
}
