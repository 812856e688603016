//! HTTP surface for the dialog engine
//!
//! Events come in through the webhook channel; bot output goes back both in
//! the turn report and over a per-session event stream.

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
pub use types::*;

use crate::channel::WebhookChannel;
use crate::engine::{ChannelAdapter, SessionRef};
use crate::runtime::SessionManager;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<SessionManager>,
    pub channel: Arc<WebhookChannel>,
}

impl AppState {
    /// `channel` must be registered with the engine behind `runtime`
    pub fn new(runtime: Arc<SessionManager>, channel: Arc<WebhookChannel>) -> Self {
        Self { runtime, channel }
    }

    fn session(&self, session_id: &str) -> SessionRef {
        SessionRef::new(self.channel.name(), session_id)
    }
}
