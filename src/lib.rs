pub mod application;
pub mod domain;
pub mod infrastructure;

use application::bootstrap::bootstrap_workspace;
use application::commands::{AppState, mount_impl};
use application::console::{ConsoleCommand, HELP, execute_console_command, parse_console_command};
use infrastructure::config::load_config_from_env;
use infrastructure::error::InfraError;
use infrastructure::logging::init_logging;
use infrastructure::time_entry_client::TimeEntryClient;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

/// Headless runner: reconciles with the server, keeps the countdown ticking
/// and reads commands from stdin until `quit` or Ctrl-C.
pub async fn run() -> Result<(), InfraError> {
    let workspace_root = std::env::current_dir()?;
    let workspace = bootstrap_workspace(&workspace_root)?;
    let config = load_config_from_env(&workspace.config_dir)?;
    init_logging(&config.log_filter);
    log::info!(
        "workspace {} using {}",
        workspace.workspace_root.display(),
        config.api_base_url
    );

    let state = AppState::new(workspace_root)?;
    match mount_impl(&state).await {
        Ok(outcome) => log::info!("reconciled with server: {:?}", outcome),
        Err(error) => {
            state.command_error("mount", &error);
        }
    }
    state.start_tick_driver()?;
    let watchers = spawn_watchers(&state);

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted; shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let command = match parse_console_command(&line) {
                    Ok(command) => command,
                    Err(error) => {
                        println!("error: {}", state.command_error("console", &error));
                        continue;
                    }
                };
                let quit = command == ConsoleCommand::Quit;
                match execute_console_command(&state, command).await {
                    Ok(output) => println!("{output}"),
                    Err(error) => println!("error: {}", state.command_error("console", &error)),
                }
                if quit {
                    break;
                }
            }
        }
    }

    for watcher in watchers {
        watcher.abort();
    }
    state.stop_tick_driver()
}

fn spawn_watchers<C>(state: &AppState<C>) -> Vec<JoinHandle<()>>
where
    C: TimeEntryClient + 'static,
{
    let mut snapshots = state.store().subscribe();
    let phases = tokio::spawn(async move {
        let mut last = {
            let snapshot = snapshots.borrow_and_update();
            (snapshot.session.current_mode, snapshot.session.is_active)
        };
        while snapshots.changed().await.is_ok() {
            let (mode, is_active, completed) = {
                let snapshot = snapshots.borrow_and_update();
                (
                    snapshot.session.current_mode,
                    snapshot.session.is_active,
                    snapshot.session.completed_pomodoros,
                )
            };
            if (mode, is_active) != last {
                log::info!(
                    "{} {} ({} completed)",
                    mode.label(),
                    if is_active { "running" } else { "idle" },
                    completed
                );
                last = (mode, is_active);
            }
        }
    });

    let mut notices = state.notices().subscribe();
    let banners = tokio::spawn(async move {
        while notices.changed().await.is_ok() {
            let notice = notices.borrow_and_update().clone();
            if let Some(notice) = notice {
                println!("[{}] {}", notice.title, notice.message);
            }
        }
    });

    vec![phases, banners]
}
