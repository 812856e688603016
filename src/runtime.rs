//! Per-session workers
//!
//! Every session gets one tokio task that owns its turns, so events for the
//! same session run strictly one after another while different sessions
//! run in parallel. Turns themselves are synchronous and run on the
//! blocking pool. Idle workers shut down and are recreated on demand.

use crate::engine::{DialogEngine, SessionRef, TurnReport};
use crate::error::{DialogError, DialogResult};
use crate::scheduler::ScheduledEvent;
use crate::state_machine::Event;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

const QUEUE_DEPTH: usize = 32;

/// Work waiting for its turn on a session worker
enum Job {
    Turn {
        event: Event,
        reply: oneshot::Sender<DialogResult<TurnReport>>,
    },
    Clear {
        reply: oneshot::Sender<DialogResult<()>>,
    },
}

type Workers = Arc<RwLock<HashMap<SessionRef, mpsc::Sender<Job>>>>;

/// Routes events to per-session workers
pub struct SessionManager {
    engine: Arc<DialogEngine>,
    workers: Workers,
    idle: Duration,
}

impl SessionManager {
    pub fn new(engine: Arc<DialogEngine>, idle: Duration) -> Self {
        Self {
            engine,
            workers: Arc::new(RwLock::new(HashMap::new())),
            idle,
        }
    }

    pub fn engine(&self) -> &Arc<DialogEngine> {
        &self.engine
    }

    /// Number of live workers
    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Run a synchronous engine call on the blocking pool
    pub async fn blocking<T, F>(&self, f: F) -> DialogResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&DialogEngine) -> DialogResult<T> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || f(&engine))
            .await
            .map_err(|e| DialogError::Store(format!("engine call crashed: {e}")))?
    }

    /// Queue an event for a session and wait for its turn report
    pub async fn dispatch(&self, session: &SessionRef, event: Event) -> DialogResult<TurnReport> {
        self.submit(session, |reply| Job::Turn { event, reply }).await
    }

    /// Forget a session once the turns queued before it have run
    pub async fn clear(&self, session: &SessionRef) -> DialogResult<()> {
        self.submit(session, |reply| Job::Clear { reply }).await
    }

    async fn submit<T>(
        &self,
        session: &SessionRef,
        job: impl FnOnce(oneshot::Sender<DialogResult<T>>) -> Job,
    ) -> DialogResult<T> {
        let (reply, rx) = oneshot::channel();
        let mut job = job(reply);
        // a worker may shut down between lookup and send; retry once on a fresh one
        for _ in 0..2 {
            let tx = self.get_or_spawn(session).await;
            match tx.send(job).await {
                Ok(()) => {
                    return rx.await.map_err(|_| {
                        DialogError::Store(format!("worker for {session} stopped mid-turn"))
                    })?;
                }
                Err(mpsc::error::SendError(returned)) => {
                    job = returned;
                    let mut workers = self.workers.write().await;
                    if workers.get(session).is_some_and(mpsc::Sender::is_closed) {
                        workers.remove(session);
                    }
                }
            }
        }
        Err(DialogError::SessionBusy(session.to_string()))
    }

    async fn get_or_spawn(&self, session: &SessionRef) -> mpsc::Sender<Job> {
        if let Some(tx) = self.workers.read().await.get(session) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }

        let mut workers = self.workers.write().await;
        if let Some(tx) = workers.get(session) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        workers.insert(session.clone(), tx.clone());
        tokio::spawn(run_worker(
            Arc::clone(&self.engine),
            session.clone(),
            rx,
            self.idle,
            Arc::clone(&self.workers),
        ));
        tracing::debug!(session = %session, "Session worker started");
        tx
    }

    /// Send a scheduled callback to every stored session; returns how many ran
    pub async fn schedule_all(&self, callback: &str) -> DialogResult<usize> {
        let sessions = self.blocking(DialogEngine::sessions).await?;
        tracing::info!(callback, sessions = sessions.len(), "Scheduling callback for all sessions");

        let results = futures::future::join_all(
            sessions
                .iter()
                .map(|session| self.dispatch(session, Event::scheduled(callback))),
        )
        .await;

        let mut ran = 0;
        for (session, result) in sessions.iter().zip(results) {
            match result {
                Ok(_) => ran += 1,
                Err(e) => {
                    tracing::warn!(session = %session, callback, error = %e, "Scheduled callback failed");
                }
            }
        }
        Ok(ran)
    }

    /// Feed due scheduled events into their sessions until the sender closes
    pub fn run_scheduled(
        self: &Arc<Self>,
        mut due: mpsc::UnboundedReceiver<ScheduledEvent>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(ScheduledEvent { session, event }) = due.recv().await {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    if let Err(e) = manager.dispatch(&session, event).await {
                        tracing::warn!(session = %session, error = %e, "Scheduled event failed");
                    }
                });
            }
            tracing::info!("Scheduled event loop stopped");
        })
    }
}

async fn run_worker(
    engine: Arc<DialogEngine>,
    session: SessionRef,
    mut rx: mpsc::Receiver<Job>,
    idle: Duration,
    workers: Workers,
) {
    loop {
        match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(job)) => run_job(&engine, &session, job).await,
            Ok(None) => break,
            Err(_) => {
                // refuse new jobs, finish the ones already queued
                rx.close();
                while let Some(job) = rx.recv().await {
                    run_job(&engine, &session, job).await;
                }
                break;
            }
        }
    }

    let mut workers = workers.write().await;
    if workers.get(&session).is_some_and(mpsc::Sender::is_closed) {
        workers.remove(&session);
    }
    tracing::debug!(session = %session, "Session worker stopped");
}

async fn run_job(engine: &Arc<DialogEngine>, session: &SessionRef, job: Job) {
    let engine = Arc::clone(engine);
    let address = session.clone();
    // callers may have given up waiting
    match job {
        Job::Turn { event, reply } => {
            let result = tokio::task::spawn_blocking(move || engine.process(&address, &event))
                .await
                .unwrap_or_else(|e| Err(DialogError::Store(format!("turn crashed: {e}"))));
            let _ = reply.send(result);
        }
        Job::Clear { reply } => {
            let result = tokio::task::spawn_blocking(move || engine.clear(&address))
                .await
                .unwrap_or_else(|e| Err(DialogError::Store(format!("clear crashed: {e}"))));
            let _ = reply.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{InMemorySessionStore, RecordingChannel};
    use crate::flow::{ActionRegistry, FlowSetDefinition, StaticFlowProvider};
    use serde_json::json;

    fn definition() -> FlowSetDefinition {
        serde_json::from_value(json!({
            "default": {"states": {
                "root": {"accept": {"template": "message", "params": {"text": "Hi"}}},
                "digest": {
                    "intent": "_schedule",
                    "accept": {"template": "message", "params": {"text": "Your daily digest", "next": "default.root:none"}}
                }
            }}
        }))
        .unwrap()
    }

    fn manager(idle: Duration) -> (Arc<SessionManager>, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel::new("web"));
        let engine = DialogEngine::builder(
            StaticFlowProvider::new(definition()),
            InMemorySessionStore::new(),
        )
        .registry(ActionRegistry::new())
        .channel(Arc::clone(&channel))
        .build()
        .unwrap();
        (
            Arc::new(SessionManager::new(Arc::new(engine), idle)),
            channel,
        )
    }

    fn hello() -> Event {
        Event::message(serde_json::Map::new())
    }

    #[tokio::test]
    async fn test_dispatch_runs_turn() {
        let (manager, channel) = manager(Duration::from_secs(60));
        let session = SessionRef::new("web", "u1");

        let report = manager.dispatch(&session, hello()).await.unwrap();
        assert_eq!(report.texts(), vec!["Hi"]);
        assert_eq!(channel.texts("u1"), vec!["Hi".to_string()]);
        assert_eq!(manager.worker_count().await, 1);
    }

    #[tokio::test]
    async fn test_same_session_events_run_in_order() {
        let (manager, _channel) = manager(Duration::from_secs(60));
        let session = SessionRef::new("web", "u1");

        let (a, b, c) = tokio::join!(
            manager.dispatch(&session, hello()),
            manager.dispatch(&session, hello()),
            manager.dispatch(&session, hello()),
        );
        let mut counters = vec![a.unwrap().counter, b.unwrap().counter, c.unwrap().counter];
        counters.sort_unstable();
        assert_eq!(counters, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_idle_worker_is_recreated() {
        let (manager, _channel) = manager(Duration::from_millis(20));
        let session = SessionRef::new("web", "u1");

        manager.dispatch(&session, hello()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(manager.worker_count().await, 0);

        let report = manager.dispatch(&session, hello()).await.unwrap();
        assert_eq!(report.counter, 2);
    }

    #[tokio::test]
    async fn test_schedule_all_reaches_every_session() {
        let (manager, channel) = manager(Duration::from_secs(60));
        for id in ["u1", "u2"] {
            manager
                .dispatch(&SessionRef::new("web", id), hello())
                .await
                .unwrap();
        }

        assert_eq!(manager.schedule_all("daily").await.unwrap(), 2);
        for id in ["u1", "u2"] {
            assert_eq!(
                channel.texts(id),
                vec!["Hi".to_string(), "Your daily digest".to_string()]
            );
        }
    }

    #[tokio::test]
    async fn test_scheduled_events_are_dispatched() {
        let (manager, channel) = manager(Duration::from_secs(60));
        let session = SessionRef::new("web", "u1");
        manager.dispatch(&session, hello()).await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = manager.run_scheduled(rx);
        tx.send(ScheduledEvent {
            session: session.clone(),
            event: Event::scheduled("reminder"),
        })
        .unwrap();

        let mut delivered = false;
        for _ in 0..100 {
            if channel.texts("u1").len() == 2 {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(delivered);

        drop(tx);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_runs_after_queued_turns() {
        let (manager, _channel) = manager(Duration::from_secs(60));
        let session = SessionRef::new("web", "u1");

        let (turn, cleared) = tokio::join!(
            manager.dispatch(&session, hello()),
            manager.clear(&session),
        );
        assert_eq!(turn.unwrap().counter, 1);
        cleared.unwrap();

        let engine = Arc::clone(manager.engine());
        let lookup = session.clone();
        let stored = tokio::task::spawn_blocking(move || engine.session(&lookup))
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_none());

        let report = manager.dispatch(&session, hello()).await.unwrap();
        assert_eq!(report.counter, 1);
    }
}
