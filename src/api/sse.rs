//! Server-sent events for a session's bot output

use crate::channel::ChannelEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Stream that opens with `init` and then relays channel events
pub fn sse_stream<T: Serialize + Send + 'static>(
    init: T,
    rx: broadcast::Receiver<ChannelEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let init = futures::stream::once(async move { Ok(to_sse("init", &init)) });

    let events = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok(to_sse(event_name(&event), &event))),
        Err(e) => {
            tracing::debug!(error = %e, "Listener lagged, skipping events");
            None
        }
    });

    Sse::new(init.chain(events)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn event_name(event: &ChannelEvent) -> &'static str {
    match event {
        ChannelEvent::Message { .. } => "message",
        ChannelEvent::StateChange { .. } => "state_change",
        ChannelEvent::Processing { .. } => "processing",
    }
}

fn to_sse<T: Serialize>(name: &str, data: &T) -> Event {
    let data = serde_json::to_string(data).unwrap_or_else(|e| {
        tracing::warn!(error = %e, event = name, "Cannot serialize stream event");
        "null".to_string()
    });
    Event::default().event(name).data(data)
}
