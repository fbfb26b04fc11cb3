use crate::domain::models::{PomodoroSession, PomodoroSettings};
use crate::infrastructure::error::InfraError;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const POMODORO_STORAGE_KEY: &str = "tasknest-pomodoro-storage";

/// Subset of the pomodoro state that survives a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPomodoroState {
    pub settings: PomodoroSettings,
    pub session: PomodoroSession,
}

pub trait SessionRepository: Send + Sync {
    fn load(&self) -> Result<Option<PersistedPomodoroState>, InfraError>;
    fn save(&self, state: &PersistedPomodoroState) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteSessionRepository {
    db_path: PathBuf,
}

impl SqliteSessionRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl SessionRepository for SqliteSessionRepository {
    fn load(&self) -> Result<Option<PersistedPomodoroState>, InfraError> {
        let connection = self.connect()?;
        let raw: Option<String> = connection
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![POMODORO_STORAGE_KEY],
                |row| row.get(0),
            )
            .optional()?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        let parsed: PersistedPomodoroState = serde_json::from_str(&raw)?;
        Ok(Some(parsed))
    }

    fn save(&self, state: &PersistedPomodoroState) -> Result<(), InfraError> {
        let connection = self.connect()?;
        let value = serde_json::to_string(state)?;
        connection.execute(
            "INSERT INTO kv_store (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            params![POMODORO_STORAGE_KEY, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionRepository {
    state: Mutex<Option<PersistedPomodoroState>>,
}

impl InMemorySessionRepository {
    pub fn with_state(state: PersistedPomodoroState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }
}

impl SessionRepository for InMemorySessionRepository {
    fn load(&self) -> Result<Option<PersistedPomodoroState>, InfraError> {
        let state = self
            .state
            .lock()
            .map_err(|error| {
                InfraError::StatePoisoned(format!("session storage lock poisoned: {error}"))
            })?;
        Ok(state.clone())
    }

    fn save(&self, next: &PersistedPomodoroState) -> Result<(), InfraError> {
        let mut state = self
            .state
            .lock()
            .map_err(|error| {
                InfraError::StatePoisoned(format!("session storage lock poisoned: {error}"))
            })?;
        *state = Some(next.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TimerMode;
    use crate::infrastructure::storage::initialize_database;

    struct TempDatabase {
        path: PathBuf,
    }

    impl TempDatabase {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "tasknest-session-repo-{}-{}.sqlite",
                name,
                std::process::id()
            ));
            let _ = std::fs::remove_file(&path);
            initialize_database(&path).expect("initialize database");
            Self { path }
        }
    }

    impl Drop for TempDatabase {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn sample_state() -> PersistedPomodoroState {
        let settings = PomodoroSettings {
            work_duration: 50,
            ..PomodoroSettings::default()
        };
        let mut session = PomodoroSession::new(&settings);
        session.current_mode = TimerMode::Work;
        session.is_active = true;
        session.task_id = Some("task-1".to_string());
        session.time_entry_id = Some("te-1".to_string());
        session.completed_pomodoros = 2;
        session.last_updated_at = Some(Utc::now());
        PersistedPomodoroState { settings, session }
    }

    #[test]
    fn sqlite_repository_returns_none_before_first_save() {
        let database = TempDatabase::new("empty");
        let repository = SqliteSessionRepository::new(&database.path);
        assert_eq!(repository.load().expect("load"), None);
    }

    #[test]
    fn sqlite_repository_overwrites_single_key() {
        let database = TempDatabase::new("overwrite");
        let repository = SqliteSessionRepository::new(&database.path);

        let mut state = sample_state();
        repository.save(&state).expect("first save");
        state.session.completed_pomodoros = 3;
        state.session.time_entry_id = None;
        repository.save(&state).expect("second save");

        let loaded = repository.load().expect("load").expect("state present");
        assert_eq!(loaded, state);

        let connection = Connection::open(&database.path).expect("open");
        let rows: i64 = connection
            .query_row("SELECT COUNT(*) FROM kv_store", [], |row| row.get(0))
            .expect("count rows");
        assert_eq!(rows, 1);
    }

    #[test]
    fn sqlite_repository_rejects_corrupt_payload() {
        let database = TempDatabase::new("corrupt");
        let connection = Connection::open(&database.path).expect("open");
        connection
            .execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, 'not json', '')",
                params![POMODORO_STORAGE_KEY],
            )
            .expect("insert corrupt row");

        let repository = SqliteSessionRepository::new(&database.path);
        assert!(matches!(repository.load(), Err(InfraError::Json(_))));
    }

    #[test]
    fn in_memory_repository_keeps_latest_state() {
        let repository = InMemorySessionRepository::default();
        assert_eq!(repository.load().expect("load"), None);
        let state = sample_state();
        repository.save(&state).expect("save");
        assert_eq!(repository.load().expect("load"), Some(state));
    }
}
