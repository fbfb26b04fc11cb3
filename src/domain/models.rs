use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeEntryStatus {
    Active,
    Paused,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroConfig {
    pub work_duration: u32,
    pub break_duration: u32,
    pub long_break_duration: u32,
    pub cycles: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: String,
    pub task_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub is_pomodoro: bool,
    #[serde(default)]
    pub pomodoro_config: Option<PomodoroConfig>,
    pub status: TimeEntryStatus,
    #[serde(default)]
    pub paused_duration: i64,
    #[serde(default)]
    pub last_paused_at: Option<DateTime<Utc>>,
}

impl TimeEntry {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "time_entry.id")?;
        validate_non_empty(&self.task_id, "time_entry.task_id")?;
        if self.status == TimeEntryStatus::Paused && self.last_paused_at.is_none() {
            return Err("time_entry.last_paused_at is required while paused".to_string());
        }
        if let Some(end_time) = self.end_time {
            if end_time < self.start_time {
                return Err("time_entry.end_time must be >= time_entry.start_time".to_string());
            }
        }
        if self.duration < 0 || self.paused_duration < 0 {
            return Err("time_entry durations must be >= 0".to_string());
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.status == TimeEntryStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartTimeEntryRequest {
    pub task_id: String,
    pub is_pomodoro: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pomodoro_config: Option<PomodoroConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatsPeriod {
    Day,
    Week,
    Month,
}

impl StatsPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskTimeTotal {
    pub task_id: String,
    #[serde(default)]
    pub task_title: Option<String>,
    pub total_seconds: i64,
    #[serde(default)]
    pub pomodoro_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailyTimeTotal {
    pub date: NaiveDate,
    pub total_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeStats {
    pub period: StatsPeriod,
    pub total_seconds: i64,
    #[serde(default)]
    pub by_task: Vec<TaskTimeTotal>,
    #[serde(default)]
    pub by_day: Vec<DailyTimeTotal>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TimerMode {
    #[default]
    Work,
    Break,
    LongBreak,
}

impl TimerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Break => "break",
            Self::LongBreak => "longBreak",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Work => "Focus time",
            Self::Break => "Short break",
            Self::LongBreak => "Long break",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlarmSound {
    #[default]
    Bell,
    Digital,
    Kitchen,
    Bird,
    None,
}

impl AlarmSound {
    /// Tone frequency and beep count used when synthesizing the alarm.
    pub fn pattern(self) -> Option<(f32, u32)> {
        match self {
            Self::Bell => Some((880.0, 3)),
            Self::Digital => Some((1_320.0, 4)),
            Self::Kitchen => Some((660.0, 6)),
            Self::Bird => Some((1_760.0, 5)),
            Self::None => None,
        }
    }
}

pub const DEFAULT_WORK_MINUTES: u32 = 25;
pub const DEFAULT_BREAK_MINUTES: u32 = 5;
pub const DEFAULT_LONG_BREAK_MINUTES: u32 = 15;
pub const DEFAULT_CYCLES: u32 = 4;
pub const DEFAULT_ALARM_VOLUME: u8 = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroSettings {
    pub work_duration: u32,
    pub break_duration: u32,
    pub long_break_duration: u32,
    pub cycles: u32,
    pub auto_start_breaks: bool,
    pub auto_start_pomodoros: bool,
    pub alarm_sound: AlarmSound,
    pub alarm_volume: u8,
}

impl Default for PomodoroSettings {
    fn default() -> Self {
        Self {
            work_duration: DEFAULT_WORK_MINUTES,
            break_duration: DEFAULT_BREAK_MINUTES,
            long_break_duration: DEFAULT_LONG_BREAK_MINUTES,
            cycles: DEFAULT_CYCLES,
            auto_start_breaks: false,
            auto_start_pomodoros: false,
            alarm_sound: AlarmSound::Bell,
            alarm_volume: DEFAULT_ALARM_VOLUME,
        }
    }
}

impl PomodoroSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.work_duration == 0 {
            return Err("settings.work_duration must be > 0".to_string());
        }
        if self.break_duration == 0 {
            return Err("settings.break_duration must be > 0".to_string());
        }
        if self.long_break_duration == 0 {
            return Err("settings.long_break_duration must be > 0".to_string());
        }
        if self.cycles == 0 {
            return Err("settings.cycles must be > 0".to_string());
        }
        if self.alarm_volume > 100 {
            return Err("settings.alarm_volume must be <= 100".to_string());
        }
        Ok(())
    }

    pub fn duration_minutes(&self, mode: TimerMode) -> u32 {
        match mode {
            TimerMode::Work => self.work_duration,
            TimerMode::Break => self.break_duration,
            TimerMode::LongBreak => self.long_break_duration,
        }
    }

    pub fn duration_seconds(&self, mode: TimerMode) -> i64 {
        i64::from(self.duration_minutes(mode)) * 60
    }

    /// Which break follows a finished work phase, given the count before it.
    pub fn next_break_mode(&self, completed_before: u32) -> TimerMode {
        let cycles = self.cycles.max(1);
        if (completed_before + 1) % cycles == 0 {
            TimerMode::LongBreak
        } else {
            TimerMode::Break
        }
    }

    pub fn pomodoro_config(&self) -> PomodoroConfig {
        PomodoroConfig {
            work_duration: self.work_duration,
            break_duration: self.break_duration,
            long_break_duration: self.long_break_duration,
            cycles: self.cycles,
        }
    }

    pub fn merged(&self, patch: &SettingsPatch) -> PomodoroSettings {
        PomodoroSettings {
            work_duration: patch.work_duration.unwrap_or(self.work_duration),
            break_duration: patch.break_duration.unwrap_or(self.break_duration),
            long_break_duration: patch.long_break_duration.unwrap_or(self.long_break_duration),
            cycles: patch.cycles.unwrap_or(self.cycles),
            auto_start_breaks: patch.auto_start_breaks.unwrap_or(self.auto_start_breaks),
            auto_start_pomodoros: patch.auto_start_pomodoros.unwrap_or(self.auto_start_pomodoros),
            alarm_sound: patch.alarm_sound.unwrap_or(self.alarm_sound),
            alarm_volume: patch.alarm_volume.unwrap_or(self.alarm_volume),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub work_duration: Option<u32>,
    pub break_duration: Option<u32>,
    pub long_break_duration: Option<u32>,
    pub cycles: Option<u32>,
    pub auto_start_breaks: Option<bool>,
    pub auto_start_pomodoros: Option<bool>,
    pub alarm_sound: Option<AlarmSound>,
    pub alarm_volume: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroSession {
    pub current_mode: TimerMode,
    pub is_active: bool,
    pub time_remaining: i64,
    pub completed_pomodoros: u32,
    pub task_id: Option<String>,
    pub time_entry_id: Option<String>,
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl PomodoroSession {
    pub fn new(settings: &PomodoroSettings) -> Self {
        Self {
            current_mode: TimerMode::Work,
            is_active: false,
            time_remaining: settings.duration_seconds(TimerMode::Work),
            completed_pomodoros: 0,
            task_id: None,
            time_entry_id: None,
            last_updated_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.time_remaining < 0 {
            return Err("session.time_remaining must be >= 0".to_string());
        }
        if self.time_entry_id.is_some() && self.current_mode != TimerMode::Work {
            return Err("session.time_entry_id is only allowed during work".to_string());
        }
        Ok(())
    }
}

impl Default for PomodoroSession {
    fn default() -> Self {
        Self::new(&PomodoroSettings::default())
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
