//! HTTP API gateway for orderdesk.
//!
//! Accepts questions, hands them to the job executor, and lets clients
//! follow the streamed answer over a token-guarded realtime channel.
//!
//! Built on Axum for high performance async HTTP.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::{Router, extract::State, http::HeaderValue, response::Json, routing::get};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use orderdesk_agent::AgentLoop;
use orderdesk_config::AppConfig;
use orderdesk_core::event::EventBus;
use orderdesk_core::order::OrderStore;
use orderdesk_core::provider::Provider;
use orderdesk_jobs::{JobExecutor, JobQueue, JobRegistry, RetryPolicy};
use orderdesk_realtime::ChannelBroker;

pub use api_v1::{ApiV1State, SharedApiState};

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Everything a running gateway needs, wired together.
pub struct Pipeline {
    pub state: SharedApiState,
    pub executor: Arc<JobExecutor>,
    /// Executor dispatch loop; ends once the state (and its queue) is dropped
    pub dispatcher: JoinHandle<()>,
}

/// Wire store, tools, agent, broker, executor and queue from `config`.
///
/// Must be called inside a Tokio runtime: the executor dispatcher is
/// spawned immediately.
pub fn assemble(
    config: &AppConfig,
    provider: Arc<dyn Provider>,
    store: Arc<dyn OrderStore>,
) -> orderdesk_core::Result<Pipeline> {
    let event_bus = Arc::new(EventBus::default());
    let tools = Arc::new(orderdesk_tools::default_registry(store));
    let agent = Arc::new(
        AgentLoop::from_config(provider, &config.provider.model, tools, &config.agent)
            .with_event_bus(event_bus.clone()),
    );

    let tokens = orderdesk_realtime::token_service(&config.realtime)?;
    let broker = Arc::new(
        ChannelBroker::new(tokens.clone(), config.realtime.broadcast_capacity).with_event_bus(event_bus.clone()),
    );

    let registry = Arc::new(JobRegistry::new());
    let executor = Arc::new(
        JobExecutor::new(
            agent,
            broker.clone(),
            registry.clone(),
            RetryPolicy::from_config(&config.executor),
        )
        .with_target(&config.realtime.channel, &config.realtime.topic)
        .with_event_bus(event_bus.clone()),
    );

    let (queue, receiver) = JobQueue::bounded(config.executor.queue_capacity);
    let queue = queue.with_registry(registry.clone()).with_event_bus(event_bus.clone());
    let dispatcher = executor.clone().spawn(receiver, config.executor.workers);

    let state = Arc::new(ApiV1State {
        queue,
        registry,
        tokens,
        broker,
        event_bus,
        channel: config.realtime.channel.clone(),
        topic: config.realtime.topic.clone(),
        start_time: chrono::Utc::now(),
    });

    Ok(Pipeline {
        state,
        executor,
        dispatcher,
    })
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Build the full router: `/health` plus the v1 API under `/v1`.
pub fn build_router(state: SharedApiState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state.clone())
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let provider = orderdesk_providers::build_from_config(&config)?;
    let store = orderdesk_store::open(&config.store).await?;
    let pipeline = assemble(&config, provider, store)?;
    let app = build_router(pipeline.state, &config.gateway.allowed_origins);

    info!(addr = %addr, "Gateway starting with v1 API");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

// --- Handlers ---

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: i64,
    pub jobs: usize,
}

async fn health_handler(State(state): State<SharedApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: (chrono::Utc::now() - state.start_time).num_seconds(),
        jobs: state.registry.len().await,
    })
}
