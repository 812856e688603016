//! Dialog engine turn executor
//!
//! One call to [`DialogEngine::process`] is one turn: load the session,
//! record the event's entities, resolve where the turn goes, run the
//! actions along the way and persist the result.

use super::recovery::{self, RecoveryReason};
use super::traits::{ChannelAdapter, LogSink, NoopScheduler, Scheduler, SessionRef, SessionStore};
use crate::config::EngineConfig;
use crate::error::{DialogError, DialogResult};
use crate::flow::{Action, ActionInput, ActionRegistry, FlowGraph, FlowProvider, State};
use crate::session::{Session, SnapshotError, SCHEMA_VERSION};
use crate::state_machine::event::INACTIVE_SECONDS_ENTITY;
use crate::state_machine::transition::{override_target, turn_intent};
use crate::state_machine::{
    plan_move, resolve_intent, ActionOutcome, Event, LifecycleAction, MovePlan, Response,
    ScheduleWhen, TransitionTarget,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Completed,
    /// An action failed; the fallback message (if any) was sent
    Failed,
    /// Event kind the engine does not handle; nothing changed
    Unsupported,
    /// Deferred event fired after the session moved on; nothing changed
    Stale,
}

/// Outcome of one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReport {
    pub session_id: String,
    /// Responses posted during the turn, in order
    pub responses: Vec<Response>,
    /// States entered during the turn, in order
    pub states_visited: Vec<String>,
    /// State the session ended in
    pub state_name: String,
    pub counter: u64,
    pub status: TurnStatus,
}

impl TurnReport {
    /// Text of every text response
    pub fn texts(&self) -> Vec<&str> {
        self.responses.iter().filter_map(Response::as_text).collect()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Builder for [`DialogEngine`]
pub struct DialogEngineBuilder {
    provider: Arc<dyn FlowProvider>,
    store: Arc<dyn SessionStore>,
    registry: ActionRegistry,
    scheduler: Arc<dyn Scheduler>,
    channels: HashMap<String, Arc<dyn ChannelAdapter>>,
    sinks: Vec<Arc<dyn LogSink>>,
    config: EngineConfig,
}

impl DialogEngineBuilder {
    #[must_use]
    pub fn registry(mut self, registry: ActionRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Arc::new(scheduler);
        self
    }

    /// Add a channel, addressed by its name
    #[must_use]
    pub fn channel(mut self, channel: impl ChannelAdapter + 'static) -> Self {
        let name = channel.name().to_string();
        self.channels.insert(name, Arc::new(channel));
        self
    }

    #[must_use]
    pub fn sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Load and build the flow graph; a broken definition fails here
    pub fn build(self) -> DialogResult<DialogEngine> {
        let graph = load_graph(self.provider.as_ref(), &self.registry, &self.config.root_state)?;
        Ok(DialogEngine {
            config: self.config,
            registry: self.registry,
            provider: self.provider,
            graph: RwLock::new(Arc::new(graph)),
            store: self.store,
            scheduler: self.scheduler,
            channels: self.channels,
            sinks: self.sinks,
            in_flight: Mutex::new(HashSet::new()),
        })
    }
}

fn load_graph(
    provider: &dyn FlowProvider,
    registry: &ActionRegistry,
    root: &str,
) -> DialogResult<FlowGraph> {
    let version = provider.version()?;
    let definition = provider.load()?;
    Ok(FlowGraph::build(&definition, registry, root)?.with_version(version))
}

/// Runs turns for every session of every registered channel
pub struct DialogEngine {
    config: EngineConfig,
    registry: ActionRegistry,
    provider: Arc<dyn FlowProvider>,
    graph: RwLock<Arc<FlowGraph>>,
    store: Arc<dyn SessionStore>,
    scheduler: Arc<dyn Scheduler>,
    channels: HashMap<String, Arc<dyn ChannelAdapter>>,
    sinks: Vec<Arc<dyn LogSink>>,
    /// Sessions with a turn (or a clear) in progress
    in_flight: Mutex<HashSet<SessionRef>>,
}

impl DialogEngine {
    pub fn builder(
        provider: impl FlowProvider + 'static,
        store: impl SessionStore + 'static,
    ) -> DialogEngineBuilder {
        DialogEngineBuilder {
            provider: Arc::new(provider),
            store: Arc::new(store),
            registry: ActionRegistry::new(),
            scheduler: Arc::new(NoopScheduler),
            channels: HashMap::new(),
            sinks: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Graph used by the last turn
    pub fn graph(&self) -> Arc<FlowGraph> {
        Arc::clone(&self.graph.read().unwrap())
    }

    /// Rebuild the graph from the provider and swap it in
    pub fn reload_graph(&self) -> DialogResult<Arc<FlowGraph>> {
        let graph = Arc::new(load_graph(
            self.provider.as_ref(),
            &self.registry,
            &self.config.root_state,
        )?);
        *self.graph.write().unwrap() = Arc::clone(&graph);
        tracing::info!(version = %graph.version(), "Flow graph reloaded");
        Ok(graph)
    }

    /// Graph for a new turn, rebuilt when the provider's version changed.
    /// A definition that fails to build keeps the previous graph in service.
    fn current_graph(&self) -> Arc<FlowGraph> {
        let loaded = self.graph();
        match self.provider.version() {
            Ok(version) if version == loaded.version() => loaded,
            Ok(_) => self.reload_graph().unwrap_or_else(|e| {
                tracing::error!(error = %e, "Flow definition changed but does not build, keeping previous graph");
                loaded
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot read flow definition version");
                loaded
            }
        }
    }

    fn channel(&self, name: &str) -> DialogResult<Arc<dyn ChannelAdapter>> {
        self.channels
            .get(name)
            .cloned()
            .ok_or_else(|| DialogError::Channel(format!("no channel named \"{name}\"")))
    }

    /// Parse a raw payload with the session's channel, then process it
    pub fn run_raw(&self, session: &SessionRef, raw: &Value) -> DialogResult<TurnReport> {
        let event = self.channel(&session.channel)?.parse_message(raw)?;
        self.process(session, &event)
    }

    /// Forget everything stored about a session.
    ///
    /// Fails with `SessionBusy` while a turn for the session is running, so
    /// the turn cannot write the session back after it was cleared.
    pub fn clear(&self, session: &SessionRef) -> DialogResult<()> {
        let _claim = InFlight::claim(&self.in_flight, session)?;
        self.store.clear(session)?;
        tracing::info!(session = %session, "Session cleared");
        Ok(())
    }

    /// Every stored session address
    pub fn sessions(&self) -> DialogResult<Vec<SessionRef>> {
        self.store.list_sessions()
    }

    /// Stored session as the next turn would see it, without running one
    pub fn session(&self, session: &SessionRef) -> DialogResult<Option<Session>> {
        let Some(stored) = self.store.load(session)? else {
            return Ok(None);
        };
        let version = self.store.schema_version()?;
        if version.as_deref() != Some(SCHEMA_VERSION) {
            return Err(DialogError::SessionVersionMismatch {
                stored: version.unwrap_or_default(),
                running: SCHEMA_VERSION.to_string(),
            });
        }
        match Session::from_stored(&stored, self.config.max_depth) {
            Ok(session) => Ok(Some(session)),
            Err(SnapshotError::VersionMismatch { stored }) => {
                Err(DialogError::SessionVersionMismatch {
                    stored,
                    running: SCHEMA_VERSION.to_string(),
                })
            }
            Err(SnapshotError::Corrupt(e)) => Err(DialogError::Store(format!(
                "session {session} cannot be decoded: {e}"
            ))),
        }
    }

    /// Run one turn for one event.
    ///
    /// Responses are posted as actions emit them, before the session is
    /// written back.
    pub fn process(&self, session: &SessionRef, event: &Event) -> DialogResult<TurnReport> {
        let channel = self.channel(&session.channel)?;
        let _claim = InFlight::claim(&self.in_flight, session)?;

        let graph = self.current_graph();
        let stored = self.store.load(session)?;
        let store_version = match stored {
            Some(_) => self.store.schema_version()?,
            None => None,
        };
        let decision = recovery::recover(
            session,
            stored.as_ref(),
            store_version.as_deref(),
            &graph,
            self.config.max_depth,
        );
        match &decision.reason {
            RecoveryReason::Resumed => {}
            RecoveryReason::NewSession => {
                tracing::info!(session_id = %session.session_id, channel = %session.channel, "Starting new session");
            }
            reason => {
                tracing::warn!(session_id = %session.session_id, ?reason, "Stored session not resumable as is");
            }
        }

        let mut turn = Turn::new(self, graph, Arc::clone(&channel), session.clone(), decision.session);

        if !event.kind.is_supported() {
            tracing::debug!(session_id = %session.session_id, kind = %event.kind, "Skipping unsupported event");
            return Ok(turn.report(TurnStatus::Unsupported));
        }

        if let Some(guard) = event.turn_guard.filter(|_| event.kind.is_deferred()) {
            let counter = turn.session.context.counter();
            if guard != counter {
                let stale = DialogError::StaleScheduledEvent { guard, counter };
                tracing::debug!(session_id = %session.session_id, error = %stale, "Dropping scheduled event");
                return Ok(turn.report(TurnStatus::Stale));
            }
        }

        if decision.reason.is_fresh() {
            let profile = channel.load_profile(&session.session_id);
            for sink in &self.sinks {
                warn_on_sink_error(sink.log_user(&session.session_id, &profile), "log_user");
            }
        }

        channel.processing_start(&session.session_id);
        let result = turn.run(event);

        let status = match result {
            Ok(()) => TurnStatus::Completed,
            Err(e @ DialogError::ActionExecution { .. }) => {
                turn.fail(&e);
                if self.config.strict {
                    turn.finish(event)?;
                    return Err(e);
                }
                TurnStatus::Failed
            }
            Err(e) => {
                tracing::error!(session_id = %session.session_id, state = %turn.session.state_name, error = %e, "Turn aborted");
                turn.finish(event)?;
                return Err(e);
            }
        };
        turn.finish(event)?;
        Ok(turn.report(status))
    }
}

// ============================================================================
// Single turn
// ============================================================================

/// Mutable state of a turn in progress
struct Turn<'e> {
    engine: &'e DialogEngine,
    graph: Arc<FlowGraph>,
    channel: Arc<dyn ChannelAdapter>,
    address: SessionRef,
    session: Session,
    responses: Vec<Response>,
    states_visited: Vec<String>,
    accepted_at: DateTime<Utc>,
    accepted_state: String,
    accepted_entities: BTreeMap<String, Vec<Value>>,
}

impl<'e> Turn<'e> {
    fn new(
        engine: &'e DialogEngine,
        graph: Arc<FlowGraph>,
        channel: Arc<dyn ChannelAdapter>,
        address: SessionRef,
        session: Session,
    ) -> Self {
        let accepted_state = session.state_name.clone();
        Self {
            engine,
            graph,
            channel,
            address,
            session,
            responses: Vec::new(),
            states_visited: Vec::new(),
            accepted_at: Utc::now(),
            accepted_state,
            accepted_entities: BTreeMap::new(),
        }
    }

    fn run(&mut self, event: &Event) -> DialogResult<()> {
        let deferred = event.kind.is_deferred();
        if !deferred {
            self.session.context.advance();
        }

        let mut entities = event.entities.clone();
        if deferred && !entities.contains_key(INACTIVE_SECONDS_ENTITY) {
            if let Some(active_at) = self.session.active_at {
                let idle = (Utc::now() - active_at).num_seconds().max(0);
                entities.insert(INACTIVE_SECONDS_ENTITY.to_string(), json!(idle));
            }
        }

        self.accepted_at = Utc::now();
        self.accepted_state = self.session.state_name.clone();
        self.accepted_entities = self.session.context.add_entities(&entities);

        if !deferred {
            self.session.active_at = Some(self.accepted_at);
            let guard = self.session.context.counter();
            for (callback, delay) in &self.engine.config.inactive_callbacks {
                if let Err(e) = self.engine.scheduler.schedule_inactivity(
                    &self.address,
                    callback,
                    *delay,
                    guard,
                ) {
                    tracing::warn!(session_id = %self.session.id, callback = %callback, error = %e, "Failed to schedule inactivity callback");
                }
            }
        }

        tracing::debug!(
            session_id = %self.session.id,
            kind = %event.kind,
            state = %self.session.state_name,
            counter = self.session.context.counter(),
            "Processing event"
        );
        self.resolve(event)
    }

    /// Explicit override, then intent, then the current state's accept
    fn resolve(&mut self, event: &Event) -> DialogResult<()> {
        match override_target(&self.session.context, event) {
            Some(Ok(target)) => {
                if self.follow(Some(target), false)? {
                    return Ok(());
                }
            }
            Some(Err(e)) => {
                tracing::warn!(session_id = %self.session.id, error = %e, "Ignoring malformed state override");
            }
            None => {}
        }

        if let Some(intent) = turn_intent(&self.session.context, event) {
            match resolve_intent(&self.graph, &self.session.state_name, &intent) {
                Some(target) => {
                    if self.follow(Some(target), false)? {
                        return Ok(());
                    }
                }
                None => {
                    let unknown = DialogError::UnknownIntent(intent);
                    tracing::warn!(session_id = %self.session.id, state = %self.session.state_name, error = %unknown, "Falling back to the current state");
                }
            }
        }

        self.fallback()
    }

    /// Run the current state's accept in place
    fn fallback(&mut self) -> DialogResult<()> {
        let graph = Arc::clone(&self.graph);
        let Some(state) = graph.get_state(&self.session.state_name) else {
            return Ok(());
        };
        let Some(action) = self.accept_action(state)? else {
            return Ok(());
        };
        let next = self.run_action(state, &action)?;
        self.follow(next, true)?;
        Ok(())
    }

    /// Follow a target and every target the entered states' hooks return.
    ///
    /// Returns whether the first target caused a move.
    fn follow(&mut self, target: Option<TransitionTarget>, force_log: bool) -> DialogResult<bool> {
        let graph = Arc::clone(&self.graph);
        let mut target = target;
        let mut force_log = force_log;
        let mut moved = false;
        let mut hops = 0usize;

        loop {
            let plan = plan_move(
                &graph,
                &self.session.state_name,
                &self.session.context,
                target.as_ref(),
                force_log,
            );
            let (name, action) = match plan {
                MovePlan::Unknown { target } => {
                    let unknown = DialogError::UnknownState {
                        target,
                        current: self.session.state_name.clone(),
                    };
                    tracing::warn!(session_id = %self.session.id, error = %unknown, "Ignoring transition");
                    return Ok(moved);
                }
                MovePlan::Stay { state, log } => {
                    if log {
                        self.session.context.add_state(&state);
                    }
                    return Ok(moved);
                }
                MovePlan::Enter { state, action } => (state, action),
            };

            hops += 1;
            if hops > self.engine.config.max_transitions {
                return Err(DialogError::configuration(format!(
                    "more than {} transitions in one turn (last target {name}); the flows loop",
                    self.engine.config.max_transitions
                )));
            }
            moved = true;

            tracing::debug!(
                session_id = %self.session.id,
                from = %self.session.state_name,
                to = %name,
                action = action.as_str(),
                "Entering state"
            );
            self.session.context.add_state(&name);
            self.session.state_name.clone_from(&name);
            self.channel.state_change(&self.session.id, &name);
            self.states_visited.push(name.clone());

            let Some(state) = graph.get_state(&name) else {
                return Ok(moved);
            };
            let hook = match action {
                LifecycleAction::Init => state.init().cloned(),
                LifecycleAction::Accept => self.accept_action(state)?,
                LifecycleAction::None => None,
            };
            let Some(hook) = hook else {
                return Ok(moved);
            };
            target = self.run_action(state, &hook)?;
            force_log = false;
        }
    }

    /// Accept of a state, or the remedial action of its first unmet requirement
    fn accept_action(&self, state: &State) -> DialogResult<Option<Arc<dyn Action>>> {
        if !self.graph.is_root(state.name()) {
            for requirement in state.requirements() {
                if !requirement.is_met(&self.session.context)? {
                    tracing::debug!(
                        session_id = %self.session.id,
                        state = %state.name(),
                        requirement = %requirement.describe(),
                        "Requirement not met, running its action"
                    );
                    return Ok(Some(Arc::clone(requirement.action())));
                }
            }
        }
        Ok(state.accept().cloned())
    }

    /// Run an action and apply its outcome; returns where to go next
    fn run_action(
        &mut self,
        state: &State,
        action: &Arc<dyn Action>,
    ) -> DialogResult<Option<TransitionTarget>> {
        let result = {
            let mut input = ActionInput {
                session_id: &self.session.id,
                state,
                context: &mut self.session.context,
            };
            panic::catch_unwind(AssertUnwindSafe(|| action.run(&mut input)))
        };
        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                return Err(DialogError::ActionExecution {
                    state: state.name().to_string(),
                    message: e.to_string(),
                })
            }
            Err(payload) => {
                return Err(DialogError::ActionExecution {
                    state: state.name().to_string(),
                    message: panic_message(payload.as_ref()),
                })
            }
        };
        Ok(self.apply(outcome))
    }

    fn apply(&mut self, outcome: ActionOutcome) -> Option<TransitionTarget> {
        for response in outcome.responses {
            self.send(response);
        }
        for request in outcome.schedule {
            let scheduled = match request.when {
                ScheduleWhen::At(at) => {
                    self.engine
                        .scheduler
                        .schedule_at(&self.address, &request.callback, at)
                }
                ScheduleWhen::After(delay) => {
                    self.engine
                        .scheduler
                        .schedule_after(&self.address, &request.callback, delay)
                }
            };
            if let Err(e) = scheduled {
                tracing::warn!(session_id = %self.session.id, callback = %request.callback, error = %e, "Failed to schedule callback");
            }
        }
        outcome.next
    }

    fn send(&mut self, response: Response) {
        if let Err(e) = self.channel.post_message(&self.session.id, &response) {
            tracing::warn!(session_id = %self.session.id, error = %e, "Failed to post response");
        }
        for sink in &self.engine.sinks {
            warn_on_sink_error(
                sink.log_bot_message(&self.session.id, &response, &self.session.state_name),
                "log_bot_message",
            );
        }
        self.responses.push(response);
    }

    /// Report a failed action and tell the user once
    fn fail(&mut self, error: &DialogError) {
        tracing::error!(
            session_id = %self.session.id,
            state = %self.session.state_name,
            context = %self.session.context.summary(5),
            error = %error,
            "Action failed"
        );
        for sink in &self.engine.sinks {
            warn_on_sink_error(
                sink.log_error(&self.session.id, error, &self.session.state_name),
                "log_error",
            );
        }
        if let Some(message) = self.engine.config.error_message.clone() {
            self.send(Response::text(message));
        }
    }

    /// Persist, end processing, log the accepted message
    fn finish(&mut self, event: &Event) -> DialogResult<()> {
        let saved = self.save();
        self.channel.processing_end(&self.session.id);
        for sink in &self.engine.sinks {
            warn_on_sink_error(
                sink.log_user_message(
                    &self.session.id,
                    &event.kind,
                    &self.accepted_entities,
                    self.accepted_at,
                    &self.accepted_state,
                ),
                "log_user_message",
            );
        }
        saved
    }

    fn save(&self) -> DialogResult<()> {
        let stored = self.session.to_stored()?;
        self.engine.store.save(&stored)?;
        self.engine.store.set_schema_version(SCHEMA_VERSION)?;
        Ok(())
    }

    fn report(self, status: TurnStatus) -> TurnReport {
        TurnReport {
            session_id: self.session.id,
            counter: self.session.context.counter(),
            state_name: self.session.state_name,
            responses: self.responses,
            states_visited: self.states_visited,
            status,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

fn warn_on_sink_error(result: DialogResult<()>, call: &str) {
    if let Err(e) = result {
        tracing::warn!(call, error = %e, "Log sink failed");
    }
}

/// Claim on a session id, released on drop
struct InFlight<'a> {
    sessions: &'a Mutex<HashSet<SessionRef>>,
    session: SessionRef,
}

impl<'a> InFlight<'a> {
    fn claim(sessions: &'a Mutex<HashSet<SessionRef>>, session: &SessionRef) -> DialogResult<Self> {
        if !sessions.lock().unwrap().insert(session.clone()) {
            return Err(DialogError::SessionBusy(session.to_string()));
        }
        Ok(Self {
            sessions,
            session: session.clone(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&self.session);
        }
    }
}
