use crate::application::commands::{
    AppState, dismiss_notice_impl, get_active_timer_impl, get_pomodoro_state_impl,
    get_time_stats_impl, list_task_time_entries_impl, list_time_entries_impl,
    pause_pomodoro_impl, pause_tracking_impl, reset_settings_impl, resume_pomodoro_impl,
    resume_tracking_impl, save_settings_impl, skip_phase_impl, start_pomodoro_impl,
    start_tracking_impl, stop_pomodoro_impl, stop_tracking_impl, sync_impl,
};
use crate::domain::models::{AlarmSound, SettingsPatch};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::time_entry_client::TimeEntryClient;
use serde::Serialize;

/// One line typed into the headless runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start(Option<String>),
    Pause,
    Resume,
    Stop,
    Skip,
    Status,
    Timer,
    Dismiss,
    Set(SettingsPatch),
    Reset,
    Track(String),
    PauseTracking,
    ResumeTracking,
    Untrack,
    History(Option<String>),
    Stats(Option<String>),
    Sync,
    Help,
    Quit,
}

pub const HELP: &str = "commands: start [task] | pause | resume | stop | skip | status | \
timer | dismiss | set <work|break|long|cycles|volume|sound|auto-breaks|auto-pomodoros> <value> | \
reset | track <task> | pause-tracking | resume-tracking | untrack | history [task] | \
stats [day|week|month] | sync | help | quit";

pub fn parse_console_command(line: &str) -> Result<ConsoleCommand, InfraError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(ConsoleCommand::Help);
    };
    let argument = words.next().map(ToOwned::to_owned);
    let extra = words.next().map(ToOwned::to_owned);

    let command = match verb.to_ascii_lowercase().as_str() {
        "start" => ConsoleCommand::Start(argument),
        "pause" => ConsoleCommand::Pause,
        "resume" => ConsoleCommand::Resume,
        "stop" => ConsoleCommand::Stop,
        "skip" => ConsoleCommand::Skip,
        "status" => ConsoleCommand::Status,
        "timer" => ConsoleCommand::Timer,
        "dismiss" => ConsoleCommand::Dismiss,
        "set" => ConsoleCommand::Set(parse_setting(argument.as_deref(), extra.as_deref())?),
        "reset" => ConsoleCommand::Reset,
        "track" => ConsoleCommand::Track(
            argument.ok_or_else(|| InfraError::InvalidInput("track needs a task id".to_string()))?,
        ),
        "pause-tracking" => ConsoleCommand::PauseTracking,
        "resume-tracking" => ConsoleCommand::ResumeTracking,
        "untrack" => ConsoleCommand::Untrack,
        "history" => ConsoleCommand::History(argument),
        "stats" => ConsoleCommand::Stats(argument),
        "sync" => ConsoleCommand::Sync,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => {
            return Err(InfraError::InvalidInput(format!("unknown command: {other}")));
        }
    };
    Ok(command)
}

fn parse_setting(name: Option<&str>, value: Option<&str>) -> Result<SettingsPatch, InfraError> {
    let (Some(name), Some(value)) = (name, value) else {
        return Err(InfraError::InvalidInput("set needs a name and a value".to_string()));
    };
    let mut patch = SettingsPatch::default();
    match name {
        "work" => patch.work_duration = Some(parse_number(name, value)?),
        "break" => patch.break_duration = Some(parse_number(name, value)?),
        "long" => patch.long_break_duration = Some(parse_number(name, value)?),
        "cycles" => patch.cycles = Some(parse_number(name, value)?),
        "volume" => patch.alarm_volume = Some(parse_number(name, value)?),
        "sound" => {
            let raw = serde_json::Value::String(value.to_string());
            patch.alarm_sound = Some(
                serde_json::from_value::<AlarmSound>(raw).map_err(|_| {
                    InfraError::InvalidInput(format!("unknown alarm sound: {value}"))
                })?,
            )
        }
        "auto-breaks" => patch.auto_start_breaks = Some(parse_flag(value)?),
        "auto-pomodoros" => patch.auto_start_pomodoros = Some(parse_flag(value)?),
        other => return Err(InfraError::InvalidInput(format!("unknown setting: {other}"))),
    }
    Ok(patch)
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, InfraError> {
    value
        .parse()
        .map_err(|_| InfraError::InvalidInput(format!("{name} must be a number: {value}")))
}

fn parse_flag(value: &str) -> Result<bool, InfraError> {
    match value {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        other => Err(InfraError::InvalidInput(format!("expected on/off: {other}"))),
    }
}

/// Runs one command and renders its result as a JSON line.
pub async fn execute_console_command<C>(
    state: &AppState<C>,
    command: ConsoleCommand,
) -> Result<String, InfraError>
where
    C: TimeEntryClient + 'static,
{
    match command {
        ConsoleCommand::Start(task_id) => render(&start_pomodoro_impl(state, task_id).await?),
        ConsoleCommand::Pause => render(&pause_pomodoro_impl(state).await?),
        ConsoleCommand::Resume => render(&resume_pomodoro_impl(state).await?),
        ConsoleCommand::Stop => render(&stop_pomodoro_impl(state).await?),
        ConsoleCommand::Skip => render(&skip_phase_impl(state).await?),
        ConsoleCommand::Status => render(&get_pomodoro_state_impl(state)),
        ConsoleCommand::Timer => render(&get_active_timer_impl(state)),
        ConsoleCommand::Dismiss => render(&dismiss_notice_impl(state)),
        ConsoleCommand::Set(patch) => render(&save_settings_impl(state, patch)?),
        ConsoleCommand::Reset => render(&reset_settings_impl(state).await?),
        ConsoleCommand::Track(task_id) => render(&start_tracking_impl(state, task_id).await?),
        ConsoleCommand::PauseTracking => render(&pause_tracking_impl(state).await?),
        ConsoleCommand::ResumeTracking => render(&resume_tracking_impl(state).await?),
        ConsoleCommand::Untrack => render(&stop_tracking_impl(state).await?),
        ConsoleCommand::History(Some(task_id)) => {
            render(&list_task_time_entries_impl(state, task_id).await?)
        }
        ConsoleCommand::History(None) => render(&list_time_entries_impl(state, None, None).await?),
        ConsoleCommand::Stats(period) => render(&get_time_stats_impl(state, period).await?),
        ConsoleCommand::Sync => Ok(format!("{:?}", sync_impl(state).await?)),
        ConsoleCommand::Help => Ok(HELP.to_string()),
        ConsoleCommand::Quit => Ok("bye".to_string()),
    }
}

fn render<T: Serialize>(value: &T) -> Result<String, InfraError> {
    Ok(serde_json::to_string(value)?)
}
