//! In-memory collaborators and a replay harness
//!
//! These implementations let a bot author (or a test) drive the engine
//! without a database, a platform or timers.

use super::executor::{DialogEngine, TurnReport};
use super::traits::{ChannelAdapter, LogSink, Profile, Scheduler, SessionRef, SessionStore};
use crate::config::EngineConfig;
use crate::context::EntityBatch;
use crate::error::{DialogError, DialogResult};
use crate::flow::{ActionRegistry, FlowSetDefinition, StaticFlowProvider};
use crate::session::{Session, StoredSession};
use crate::state_machine::{ButtonAction, Event, EventKind, Response};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Session store
// ============================================================================

/// Session store backed by a map keyed by channel and session id
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionRef, StoredSession>>,
    schema: Mutex<Option<String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, session: &SessionRef) -> Option<StoredSession> {
        self.sessions.lock().unwrap().get(session).cloned()
    }
}

impl SessionStore for InMemorySessionStore {
    fn load(&self, session: &SessionRef) -> DialogResult<Option<StoredSession>> {
        Ok(self.get(session))
    }

    fn save(&self, session: &StoredSession) -> DialogResult<()> {
        self.sessions.lock().unwrap().insert(
            SessionRef::new(&session.channel, &session.session_id),
            session.clone(),
        );
        Ok(())
    }

    fn clear(&self, session: &SessionRef) -> DialogResult<()> {
        self.sessions.lock().unwrap().remove(session);
        Ok(())
    }

    fn schema_version(&self) -> DialogResult<Option<String>> {
        Ok(self.schema.lock().unwrap().clone())
    }

    fn set_schema_version(&self, version: &str) -> DialogResult<()> {
        *self.schema.lock().unwrap() = Some(version.to_string());
        Ok(())
    }

    fn list_sessions(&self) -> DialogResult<Vec<SessionRef>> {
        let mut sessions: Vec<SessionRef> =
            self.sessions.lock().unwrap().keys().cloned().collect();
        sessions.sort_by(|a, b| {
            (&a.session_id, &a.channel).cmp(&(&b.session_id, &b.channel))
        });
        Ok(sessions)
    }
}

// ============================================================================
// Channel
// ============================================================================

/// One call the engine made on a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelCall {
    ProcessingStart(String),
    ProcessingEnd(String),
    StateChange { session_id: String, state: String },
    Posted { session_id: String, response: Response },
}

/// Channel that parses `{type, entities}` payloads and records everything
#[derive(Debug)]
pub struct RecordingChannel {
    name: String,
    calls: Mutex<Vec<ChannelCall>>,
}

impl RecordingChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ChannelCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Texts posted to a session, in order
    pub fn texts(&self, session_id: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                ChannelCall::Posted {
                    session_id: id,
                    response,
                } if id == session_id => response.as_text().map(str::to_string),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ChannelCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ChannelAdapter for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn parse_message(&self, raw: &Value) -> DialogResult<Event> {
        serde_json::from_value(raw.clone())
            .map_err(|e| DialogError::Channel(format!("unparsable event: {e}")))
    }

    fn post_message(&self, session_id: &str, response: &Response) -> DialogResult<()> {
        self.record(ChannelCall::Posted {
            session_id: session_id.to_string(),
            response: response.clone(),
        });
        Ok(())
    }

    fn processing_start(&self, session_id: &str) {
        self.record(ChannelCall::ProcessingStart(session_id.to_string()));
    }

    fn processing_end(&self, session_id: &str) {
        self.record(ChannelCall::ProcessingEnd(session_id.to_string()));
    }

    fn state_change(&self, session_id: &str, state: &str) {
        self.record(ChannelCall::StateChange {
            session_id: session_id.to_string(),
            state: state.to_string(),
        });
    }
}

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledWhen {
    At(DateTime<Utc>),
    After(Duration),
    Inactivity { delay: Duration, turn_guard: u64 },
}

/// One request the engine made on the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledCall {
    pub session: SessionRef,
    pub callback: String,
    pub when: ScheduledWhen,
}

/// Scheduler that only records requests; tests fire them by hand
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    calls: Mutex<Vec<ScheduledCall>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ScheduledCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, session: &SessionRef, callback: &str, when: ScheduledWhen) {
        self.calls.lock().unwrap().push(ScheduledCall {
            session: session.clone(),
            callback: callback.to_string(),
            when,
        });
    }
}

impl Scheduler for RecordingScheduler {
    fn schedule_at(&self, session: &SessionRef, callback: &str, at: DateTime<Utc>) -> DialogResult<()> {
        self.record(session, callback, ScheduledWhen::At(at));
        Ok(())
    }

    fn schedule_after(&self, session: &SessionRef, callback: &str, delay: Duration) -> DialogResult<()> {
        self.record(session, callback, ScheduledWhen::After(delay));
        Ok(())
    }

    fn schedule_inactivity(
        &self,
        session: &SessionRef,
        callback: &str,
        delay: Duration,
        turn_guard: u64,
    ) -> DialogResult<()> {
        self.record(
            session,
            callback,
            ScheduledWhen::Inactivity { delay, turn_guard },
        );
        Ok(())
    }
}

// ============================================================================
// Log sink
// ============================================================================

/// One analytics record
#[derive(Debug, Clone, PartialEq)]
pub enum SinkRecord {
    User {
        session_id: String,
    },
    UserMessage {
        session_id: String,
        kind: EventKind,
        entities: BTreeMap<String, Vec<Value>>,
        state: String,
    },
    BotMessage {
        session_id: String,
        response: Response,
        state: String,
    },
    Error {
        session_id: String,
        message: String,
        state: String,
    },
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<SinkRecord>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        self.records.lock().unwrap().clone()
    }

    fn record(&self, record: SinkRecord) -> DialogResult<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

impl LogSink for RecordingSink {
    fn log_user(&self, session_id: &str, _profile: &Profile) -> DialogResult<()> {
        self.record(SinkRecord::User {
            session_id: session_id.to_string(),
        })
    }

    fn log_user_message(
        &self,
        session_id: &str,
        kind: &EventKind,
        entities: &BTreeMap<String, Vec<Value>>,
        _accepted_at: DateTime<Utc>,
        state: &str,
    ) -> DialogResult<()> {
        self.record(SinkRecord::UserMessage {
            session_id: session_id.to_string(),
            kind: kind.clone(),
            entities: entities.clone(),
            state: state.to_string(),
        })
    }

    fn log_bot_message(&self, session_id: &str, response: &Response, state: &str) -> DialogResult<()> {
        self.record(SinkRecord::BotMessage {
            session_id: session_id.to_string(),
            response: response.clone(),
            state: state.to_string(),
        })
    }

    fn log_error(&self, session_id: &str, error: &DialogError, state: &str) -> DialogResult<()> {
        self.record(SinkRecord::Error {
            session_id: session_id.to_string(),
            message: error.to_string(),
            state: state.to_string(),
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Engine wired to in-memory collaborators on one channel named `test`
pub struct ConversationHarness {
    engine: DialogEngine,
    pub store: Arc<InMemorySessionStore>,
    pub channel: Arc<RecordingChannel>,
    pub scheduler: Arc<RecordingScheduler>,
    pub sink: Arc<RecordingSink>,
}

impl ConversationHarness {
    pub const CHANNEL: &'static str = "test";

    pub fn new(definition: FlowSetDefinition, registry: ActionRegistry) -> DialogResult<Self> {
        Self::with_config(definition, registry, EngineConfig::default())
    }

    pub fn with_config(
        definition: FlowSetDefinition,
        registry: ActionRegistry,
        config: EngineConfig,
    ) -> DialogResult<Self> {
        let store = Arc::new(InMemorySessionStore::new());
        let channel = Arc::new(RecordingChannel::new(Self::CHANNEL));
        let scheduler = Arc::new(RecordingScheduler::new());
        let sink = Arc::new(RecordingSink::new());
        let engine = DialogEngine::builder(StaticFlowProvider::new(definition), Arc::clone(&store))
            .registry(registry)
            .channel(Arc::clone(&channel))
            .scheduler(Arc::clone(&scheduler))
            .sink(Arc::clone(&sink))
            .config(config)
            .build()?;
        Ok(Self {
            engine,
            store,
            channel,
            scheduler,
            sink,
        })
    }

    pub fn engine(&self) -> &DialogEngine {
        &self.engine
    }

    /// Run an event given by kind and a JSON object of entities
    pub fn run_event(&self, session_id: &str, kind: &str, entities: Value) -> DialogResult<TurnReport> {
        let entities = match entities {
            Value::Object(map) => map,
            Value::Null => EntityBatch::new(),
            other => {
                return Err(DialogError::invalid_value(format!(
                    "entities must be an object, got {other}"
                )))
            }
        };
        self.run(session_id, &Event::new(kind, entities))
    }

    pub fn run(&self, session_id: &str, event: &Event) -> DialogResult<TurnReport> {
        self.engine.process(&Self::address(session_id), event)
    }

    /// Address of a session on the harness channel
    pub fn address(session_id: &str) -> SessionRef {
        SessionRef::new(Self::CHANNEL, session_id)
    }

    /// Stored session, if it can be resumed
    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.engine.session(&Self::address(session_id)).ok().flatten()
    }

    pub fn clear(&self, session_id: &str) -> DialogResult<()> {
        self.engine.clear(&Self::address(session_id))
    }
}

// ============================================================================
// Conversation scripts
// ============================================================================

/// One step of a scripted conversation
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// The user sends an event of this kind
    User { kind: String, entities: Value },
    /// The user presses a button or quick reply the bot offered earlier
    Press(String),
    /// The next bot message; `None` accepts any message
    Bot(Option<String>),
    /// The next state the session enters
    State(String),
}

/// A recorded conversation to replay against the engine.
///
/// User steps run turns; bot and state steps consume, in order, the
/// messages and state changes those turns produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationScript {
    steps: Vec<ScriptStep>,
}

impl ConversationScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// User text message carrying already extracted entities
    #[must_use]
    pub fn user(self, entities: Value) -> Self {
        self.step(ScriptStep::User {
            kind: "message".into(),
            entities,
        })
    }

    #[must_use]
    pub fn postback(self, entities: Value) -> Self {
        self.step(ScriptStep::User {
            kind: "postback".into(),
            entities,
        })
    }

    #[must_use]
    pub fn press(self, title: impl Into<String>) -> Self {
        self.step(ScriptStep::Press(title.into()))
    }

    #[must_use]
    pub fn bot(self, text: impl Into<String>) -> Self {
        self.step(ScriptStep::Bot(Some(text.into())))
    }

    #[must_use]
    pub fn bot_any(self) -> Self {
        self.step(ScriptStep::Bot(None))
    }

    #[must_use]
    pub fn state(self, name: impl Into<String>) -> Self {
        self.step(ScriptStep::State(name.into()))
    }

    #[must_use]
    pub fn step(mut self, step: ScriptStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }
}

/// First point where a replayed conversation diverged from its script.
/// Steps are numbered from 1.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("step {step}: expected bot message {expected:?} but the bot sent nothing")]
    MissingMessage { step: usize, expected: Option<String> },
    #[error("step {step}: expected bot text \"{expected}\" but received {actual:?}")]
    WrongMessage {
        step: usize,
        expected: String,
        actual: Response,
    },
    #[error("step {step}: expected state {expected} but no state change occurred")]
    MissingState { step: usize, expected: String },
    #[error("step {step}: expected state {expected} but moved to {actual}")]
    WrongState {
        step: usize,
        expected: String,
        actual: String,
    },
    #[error("step {step}: wanted to press \"{title}\" but no such button was offered")]
    MissingButton { step: usize, title: String },
    #[error("step {step}: turn failed: {message}")]
    Turn { step: usize, message: String },
}

impl ConversationHarness {
    /// Replay a script on a freshly cleared session
    pub fn run_script(&self, session_id: &str, script: &ConversationScript) -> Result<(), ScriptError> {
        let turn_error = |step: usize, e: DialogError| ScriptError::Turn {
            step,
            message: e.to_string(),
        };
        self.clear(session_id).map_err(|e| turn_error(0, e))?;

        let mut messages: VecDeque<Response> = VecDeque::new();
        let mut states: VecDeque<String> = VecDeque::new();
        let mut buttons: HashMap<String, EntityBatch> = HashMap::new();

        for (index, step) in script.steps().iter().enumerate() {
            let step_no = index + 1;
            let report = match step {
                ScriptStep::User { kind, entities } => Some(
                    self.run_event(session_id, kind, entities.clone())
                        .map_err(|e| turn_error(step_no, e))?,
                ),
                ScriptStep::Press(title) => {
                    let payload = buttons.get(title).cloned().ok_or_else(|| {
                        ScriptError::MissingButton {
                            step: step_no,
                            title: title.clone(),
                        }
                    })?;
                    Some(
                        self.run(session_id, &Event::postback(payload))
                            .map_err(|e| turn_error(step_no, e))?,
                    )
                }
                ScriptStep::Bot(expected) => {
                    let message = messages.pop_front().ok_or_else(|| ScriptError::MissingMessage {
                        step: step_no,
                        expected: expected.clone(),
                    })?;
                    if let Some(expected) = expected {
                        if message.as_text() != Some(expected.as_str()) {
                            return Err(ScriptError::WrongMessage {
                                step: step_no,
                                expected: expected.clone(),
                                actual: message,
                            });
                        }
                    }
                    remember_buttons(&message, &mut buttons);
                    None
                }
                ScriptStep::State(expected) => {
                    let actual = states.pop_front().ok_or_else(|| ScriptError::MissingState {
                        step: step_no,
                        expected: expected.clone(),
                    })?;
                    if &actual != expected {
                        return Err(ScriptError::WrongState {
                            step: step_no,
                            expected: expected.clone(),
                            actual,
                        });
                    }
                    None
                }
            };
            if let Some(report) = report {
                messages.extend(report.responses);
                states.extend(report.states_visited);
            }
        }
        Ok(())
    }
}

/// Postback buttons and quick replies of a message, by title
fn remember_buttons(message: &Response, buttons: &mut HashMap<String, EntityBatch>) {
    let Response::Text {
        buttons: offered,
        quick_replies,
        ..
    } = message
    else {
        return;
    };
    for button in offered {
        if let ButtonAction::Postback { payload } = &button.action {
            buttons.insert(button.title.clone(), payload.clone());
        }
    }
    for reply in quick_replies {
        buttons.insert(reply.title.clone(), reply.payload.clone());
    }
}
