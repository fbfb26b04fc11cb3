use crate::domain::models::TimerMode;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_NOTICE_DISMISS: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseNotice {
    pub id: u64,
    pub title: String,
    pub message: String,
}

impl PhaseNotice {
    fn work_finished(next_mode: TimerMode) -> (String, String) {
        let message = match next_mode {
            TimerMode::LongBreak => "Great work! Time for a long break.",
            _ => "Great work! Time for a short break.",
        };
        (format!("{} is up", TimerMode::Work.label()), message.to_string())
    }

    fn break_finished(auto_started: bool) -> (String, String) {
        let message = if auto_started {
            "Break over. The next focus session has started."
        } else {
            "Break over. Ready for the next focus session?"
        };
        ("Break over".to_string(), message.to_string())
    }
}

/// Holds at most one visible notice; a newer notice replaces the older one and
/// each notice clears itself after the dismiss delay unless it was replaced.
#[derive(Clone)]
pub struct NoticeBoard {
    current: Arc<watch::Sender<Option<PhaseNotice>>>,
    next_id: Arc<AtomicU64>,
    dismiss_after: Duration,
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new(DEFAULT_NOTICE_DISMISS)
    }
}

impl NoticeBoard {
    pub fn new(dismiss_after: Duration) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            current: Arc::new(current),
            next_id: Arc::new(AtomicU64::new(1)),
            dismiss_after,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PhaseNotice>> {
        self.current.subscribe()
    }

    pub fn current(&self) -> Option<PhaseNotice> {
        self.current.borrow().clone()
    }

    pub fn announce_work_finished(&self, next_mode: TimerMode) -> PhaseNotice {
        let (title, message) = PhaseNotice::work_finished(next_mode);
        self.show(title, message)
    }

    pub fn announce_break_finished(&self, auto_started: bool) -> PhaseNotice {
        let (title, message) = PhaseNotice::break_finished(auto_started);
        self.show(title, message)
    }

    /// Must be called from within a tokio runtime.
    pub fn show(&self, title: String, message: String) -> PhaseNotice {
        let notice = PhaseNotice {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            title,
            message,
        };
        log::info!("{}: {}", notice.title, notice.message);
        self.current.send_replace(Some(notice.clone()));

        let current = self.current.clone();
        let id = notice.id;
        let dismiss_after = self.dismiss_after;
        tokio::spawn(async move {
            tokio::time::sleep(dismiss_after).await;
            current.send_if_modified(|shown| {
                if shown.as_ref().map(|notice| notice.id) == Some(id) {
                    *shown = None;
                    return true;
                }
                false
            });
        });
        notice
    }

    pub fn dismiss(&self) {
        self.current.send_if_modified(|shown| shown.take().is_some());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn notice_dismisses_after_delay() {
        let board = NoticeBoard::default();
        let notice = board.announce_work_finished(TimerMode::LongBreak);
        assert!(notice.message.contains("long break"));
        assert_eq!(board.current(), Some(notice));

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(board.current().is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(board.current(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_notice_is_not_cleared_by_older_timer() {
        let board = NoticeBoard::default();
        board.announce_work_finished(TimerMode::Break);
        tokio::time::sleep(Duration::from_secs(3)).await;
        let newer = board.announce_break_finished(false);

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(board.current(), Some(newer));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(board.current(), None);
    }

    #[tokio::test]
    async fn dismiss_clears_immediately() {
        let board = NoticeBoard::default();
        board.announce_break_finished(true);
        board.dismiss();
        assert_eq!(board.current(), None);
    }
}
