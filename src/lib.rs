//! Dialog engine
//!
//! Drives conversational bots as a graph of flows and states. Each inbound
//! event runs one turn: entities go into the session context, the engine
//! picks a transition and runs the state's actions, and responses go back
//! through the session's channel.

// Error and panic conditions are documented on the error enums
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub mod analytics;
pub mod api;
pub mod channel;
pub mod config;
pub mod context;
pub mod db;
pub mod engine;
pub mod error;
pub mod flow;
pub mod pattern;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod state_machine;

pub use engine::{DialogEngine, SessionRef, TurnReport};
pub use error::{DialogError, DialogResult};
