//! API request and response types

use crate::context::HistoryEntry;
use crate::flow::FlowGraph;
use crate::session::Session;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Where a session stands, without its full entity log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub channel: String,
    pub state_name: String,
    pub counter: u64,
    pub active_at: Option<DateTime<Utc>>,
    pub history: Vec<HistoryEntry>,
    /// Most recent value of each entity
    pub entities: BTreeMap<String, Value>,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        let context = &session.context;
        let entities = context
            .entities()
            .keys()
            .filter_map(|name| {
                context
                    .value(name, None)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();
        Self {
            session_id: session.id.clone(),
            channel: session.channel.clone(),
            state_name: session.state_name.clone(),
            counter: context.counter(),
            active_at: session.active_at,
            history: context.history().to_vec(),
            entities,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowView {
    pub name: String,
    pub intent: String,
    pub states: Vec<String>,
}

/// The loaded flow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowsResponse {
    pub version: String,
    pub root: String,
    pub flows: Vec<FlowView>,
}

impl From<&FlowGraph> for FlowsResponse {
    fn from(graph: &FlowGraph) -> Self {
        Self {
            version: graph.version().to_string(),
            root: graph.root().to_string(),
            flows: graph
                .flows()
                .map(|flow| FlowView {
                    name: flow.name().to_string(),
                    intent: flow.intent().as_str().to_string(),
                    states: flow.states().map(|s| s.name().to_string()).collect(),
                })
                .collect(),
        }
    }
}

/// Generic success response
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
