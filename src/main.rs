//! Dialog engine server
//!
//! Serves one flow definition over HTTP through the webhook channel.

use dialog_engine::analytics::TracingLogSink;
use dialog_engine::api::{create_router, AppState};
use dialog_engine::channel::WebhookChannel;
use dialog_engine::config::{EngineConfig, ServerConfig};
use dialog_engine::db::Database;
use dialog_engine::flow::{ActionRegistry, FileFlowProvider};
use dialog_engine::runtime::SessionManager;
use dialog_engine::scheduler::TokioScheduler;
use dialog_engine::DialogEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dialog_engine=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let server = ServerConfig::from_env()?;
    let config = EngineConfig::from_env()?;

    tracing::info!(path = %server.db_path.display(), "Opening database");
    let db = Database::open(&server.db_path)?;

    let (scheduler, due) = TokioScheduler::new(tokio::runtime::Handle::current());
    let channel = Arc::new(WebhookChannel::new("webhook"));

    tracing::info!(path = %server.flows_path.display(), "Loading flows");
    let engine = DialogEngine::builder(FileFlowProvider::new(&server.flows_path), db)
        .registry(ActionRegistry::new())
        .scheduler(scheduler.clone())
        .channel(Arc::clone(&channel))
        .sink(TracingLogSink)
        .config(config)
        .build()
        .inspect_err(|e| tracing::error!(error = %e, "Flow definition does not build"))?;
    tracing::info!(version = %engine.graph().version(), "Flows loaded");

    let runtime = Arc::new(SessionManager::new(Arc::new(engine), server.session_idle));
    let scheduled = runtime.run_scheduled(due);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(runtime, channel))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], server.port));
    tracing::info!(%addr, "Dialog engine listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    scheduler.shutdown();
    scheduled.abort();
    Ok(())
}
