//! Timer-backed scheduler for deferred events
//!
//! Each request becomes a tokio task that sleeps and then hands a
//! [`ScheduledEvent`] to whoever drains the receiver (the session manager
//! in the server). Pending timers are lost on restart.

use crate::engine::{Scheduler, SessionRef};
use crate::error::DialogResult;
use crate::state_machine::Event;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A deferred event that is due
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub session: SessionRef,
    pub event: Event,
}

/// Scheduler firing events from tokio timers
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
    tx: mpsc::UnboundedSender<ScheduledEvent>,
    cancel: CancellationToken,
}

impl TokioScheduler {
    /// Scheduler spawning on the given runtime, plus the receiver of due events
    pub fn new(handle: Handle) -> (Self, mpsc::UnboundedReceiver<ScheduledEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                handle,
                tx,
                cancel: CancellationToken::new(),
            },
            rx,
        )
    }

    /// Drop every pending timer
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn enqueue(&self, session: &SessionRef, event: Event, delay: Duration) {
        let due = ScheduledEvent {
            session: session.clone(),
            event,
        };
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        self.handle.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if tx.send(due).is_err() {
                        tracing::warn!("Scheduled event dropped, nobody is receiving");
                    }
                }
            }
        });
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_at(
        &self,
        session: &SessionRef,
        callback: &str,
        at: DateTime<Utc>,
    ) -> DialogResult<()> {
        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tracing::debug!(session = %session, callback, at = %at, "Scheduling callback");
        self.enqueue(session, Event::scheduled(callback), delay);
        Ok(())
    }

    fn schedule_after(
        &self,
        session: &SessionRef,
        callback: &str,
        delay: Duration,
    ) -> DialogResult<()> {
        tracing::debug!(session = %session, callback, ?delay, "Scheduling callback");
        self.enqueue(session, Event::scheduled(callback), delay);
        Ok(())
    }

    fn schedule_inactivity(
        &self,
        session: &SessionRef,
        callback: &str,
        delay: Duration,
        turn_guard: u64,
    ) -> DialogResult<()> {
        self.enqueue(
            session,
            Event::inactivity(callback, delay.as_secs(), turn_guard),
            delay,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::EventKind;
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_schedule_after_fires() {
        let (scheduler, mut rx) = TokioScheduler::new(Handle::current());
        let session = SessionRef::new("web", "u1");
        scheduler
            .schedule_after(&session, "reminder", Duration::from_millis(10))
            .unwrap();

        let due = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(due.session, session);
        assert_eq!(due.event.kind, EventKind::Schedule);
        assert_eq!(due.event.entities["_callback_name"], json!("reminder"));
        assert_eq!(due.event.turn_guard, None);
    }

    #[tokio::test]
    async fn test_past_time_fires_immediately() {
        let (scheduler, mut rx) = TokioScheduler::new(Handle::current());
        let at = Utc::now() - chrono::Duration::seconds(30);
        scheduler
            .schedule_at(&SessionRef::new("web", "u1"), "late", at)
            .unwrap();
        let due = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(due.event.entities["_callback_name"], json!("late"));
    }

    #[tokio::test]
    async fn test_inactivity_carries_guard() {
        let (scheduler, mut rx) = TokioScheduler::new(Handle::current());
        scheduler
            .schedule_inactivity(&SessionRef::new("web", "u1"), "nudge", Duration::from_millis(5), 7)
            .unwrap();
        let due = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(due.event.turn_guard, Some(7));
        assert_eq!(due.event.entities["intent"], json!("_inactive"));
    }

    #[tokio::test]
    async fn test_shutdown_drops_pending_timers() {
        let (scheduler, mut rx) = TokioScheduler::new(Handle::current());
        scheduler
            .schedule_after(&SessionRef::new("web", "u1"), "reminder", Duration::from_millis(50))
            .unwrap();
        scheduler.shutdown();
        assert!(tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err());
    }
}
