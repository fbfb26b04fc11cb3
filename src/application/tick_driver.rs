use crate::application::orchestrator::{PhaseOrchestrator, PhaseTrigger};
use crate::application::session_store::{PomodoroSnapshot, PomodoroStore};
use crate::infrastructure::time_entry_client::TimeEntryClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

enum PhaseRun {
    Elapsed,
    Stopped,
    Closed,
}

/// Background countdown. Sleeps while the session is idle and, once the
/// remaining time of an active phase reaches zero, hands over to the
/// orchestrator exactly once.
pub struct TickDriver {
    handle: JoinHandle<()>,
}

impl TickDriver {
    pub fn spawn<C>(orchestrator: Arc<PhaseOrchestrator<C>>, tick_interval: Duration) -> Self
    where
        C: TimeEntryClient + 'static,
    {
        let tick_interval = if tick_interval.is_zero() {
            DEFAULT_TICK_INTERVAL
        } else {
            tick_interval
        };
        let handle = tokio::spawn(async move {
            let store = orchestrator.store().clone();
            let mut receiver = store.subscribe();
            loop {
                let active = receiver.borrow_and_update().session.is_active;
                if !active {
                    if receiver.changed().await.is_err() {
                        break;
                    }
                    continue;
                }

                match run_active_phase(&store, &mut receiver, tick_interval).await {
                    PhaseRun::Elapsed => {
                        orchestrator.complete_phase(PhaseTrigger::Elapsed).await;
                    }
                    PhaseRun::Stopped => {}
                    PhaseRun::Closed => break,
                }
            }
            log::debug!("tick driver exited");
        });
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for TickDriver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run_active_phase(
    store: &PomodoroStore,
    receiver: &mut watch::Receiver<PomodoroSnapshot>,
    tick_interval: Duration,
) -> PhaseRun {
    let mut interval = time::interval_at(Instant::now() + tick_interval, tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match store.advance_active_clock() {
                    Some(0) => return PhaseRun::Elapsed,
                    Some(_) => {}
                    None => return PhaseRun::Stopped,
                }
            }
            changed = receiver.changed() => {
                if changed.is_err() {
                    return PhaseRun::Closed;
                }
                if !receiver.borrow_and_update().session.is_active {
                    return PhaseRun::Stopped;
                }
            }
        }
    }
}
