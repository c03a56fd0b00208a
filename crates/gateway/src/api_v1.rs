//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST /v1/ask`: Validate and queue a question (202)
//! - `GET  /v1/realtime/token`: Issue a subscription token for `ai`/`ai`
//! - `GET  /v1/realtime/subscribe`: SSE stream of message snapshots
//! - `GET  /v1/jobs`: List recent jobs
//! - `GET  /v1/jobs/{id}`: Get one job
//! - `GET  /v1/events`: SSE stream of domain events

use axum::{
    Router,
    extract::rejection::JsonRejection,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::Json,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use orderdesk_core::error::AuthError;
use orderdesk_core::event::{DomainEvent, EventBus};
use orderdesk_core::request::SubmitQuery;
use orderdesk_jobs::{JobQueue, JobRecord, JobRegistry, QueueError};
use orderdesk_realtime::{BrokerError, ChannelBroker, Delivery, SubscriptionToken, TokenService};

/// SSE event sent before closing a subscription whose token ran out.
pub const TOKEN_EXPIRED_EVENT: &str = "token_expired";

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state for the v1 API.
pub struct ApiV1State {
    pub queue: JobQueue,
    pub registry: Arc<JobRegistry>,
    pub tokens: Arc<TokenService>,
    pub broker: Arc<ChannelBroker>,
    pub event_bus: Arc<EventBus>,
    /// Channel every token is scoped to
    pub channel: String,
    /// Topic every token is scoped to
    pub topic: String,
    pub start_time: DateTime<Utc>,
}

pub type SharedApiState = Arc<ApiV1State>;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/ask", post(ask_handler))
        .route("/realtime/token", get(token_handler))
        .route("/realtime/subscribe", get(subscribe_handler))
        .route("/jobs", get(list_jobs_handler))
        .route("/jobs/{id}", get(get_job_handler))
        .route("/events", get(event_stream_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub accepted: bool,
    pub job_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// Opaque token for `/v1/realtime/subscribe?token=`
    pub token: String,
    pub channel: String,
    pub topics: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeParams {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobRecord>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
            field: None,
        }),
    )
}

/// Bad signatures and garbage are 401; a genuine token used outside its
/// scope or lifetime is 403.
fn auth_error(e: &AuthError) -> ApiError {
    let (status, code) = match e {
        AuthError::Expired => (StatusCode::FORBIDDEN, "token_expired"),
        AuthError::OutOfScope { .. } => (StatusCode::FORBIDDEN, "token_out_of_scope"),
        AuthError::BadSignature => (StatusCode::UNAUTHORIZED, "token_invalid"),
        AuthError::Malformed(_) => (StatusCode::UNAUTHORIZED, "token_malformed"),
    };
    api_error(status, code, e.to_string())
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `POST /v1/ask`: validate and enqueue; the answer arrives on the realtime channel.
async fn ask_handler(
    State(state): State<SharedApiState>,
    payload: Result<Json<SubmitQuery>, JsonRejection>,
) -> Result<(StatusCode, Json<AskResponse>), ApiError> {
    let Json(query) = payload.map_err(|e| api_error(StatusCode::BAD_REQUEST, "invalid_body", e.body_text()))?;

    let event = query.validate().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.message.clone(),
                code: "validation_error".into(),
                field: Some(e.field.clone()),
            }),
        )
    })?;

    info!(
        has_order_id = event.order_id.is_some(),
        user_id = %event.user_id,
        "v1/ask request"
    );

    let job_id = state.queue.submit(event).await.map_err(|e| match e {
        QueueError::Full => api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "queue_full",
            "Too many questions in flight, please try again shortly.",
        ),
        QueueError::Closed => api_error(StatusCode::SERVICE_UNAVAILABLE, "queue_closed", e.to_string()),
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(AskResponse {
            accepted: true,
            job_id,
        }),
    ))
}

/// `GET /v1/realtime/token`: token scoped to the configured channel and topic.
async fn token_handler(State(state): State<SharedApiState>) -> Json<TokenResponse> {
    let token = state.tokens.issue(&state.channel, [state.topic.as_str()]);
    Json(TokenResponse {
        token: token.encode(),
        channel: token.channel.clone(),
        topics: token.topics.iter().cloned().collect(),
        expires_at: token.expires_at,
    })
}

fn delivery_event(delivery: &Delivery) -> SseEvent {
    let data = serde_json::to_string(delivery.payload.as_ref()).unwrap_or_default();
    SseEvent::default().event(delivery.topic.as_str()).data(data)
}

/// `GET /v1/realtime/subscribe?token=…`: live snapshots for every topic in the token.
///
/// Nothing published before the subscription is replayed. When the token
/// expires a `token_expired` event is sent and the stream ends.
async fn subscribe_handler(
    State(state): State<SharedApiState>,
    Query(params): Query<SubscribeParams>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let token = SubscriptionToken::decode(&params.token).map_err(|e| {
        warn!("Rejected subscription token: {e}");
        state.event_bus.publish(DomainEvent::TokenRejected {
            reason: e.to_string(),
            timestamp: Utc::now(),
        });
        auth_error(&e)
    })?;

    let topics: Vec<String> = token.topics.iter().cloned().collect();
    let subscription = state
        .broker
        .subscribe(&token.channel, topics, &token)
        .map_err(|e| match e {
            BrokerError::Unauthorized(auth) => auth_error(&auth),
            BrokerError::NoTopics => api_error(StatusCode::BAD_REQUEST, "no_topics", e.to_string()),
        })?;

    info!(channel = %token.channel, "Realtime subscriber attached");

    let stream = futures::stream::unfold(Some(subscription), |state| async move {
        let mut subscription = state?;
        match subscription.next().await? {
            Ok(delivery) => Some((Ok::<_, Infallible>(delivery_event(&delivery)), Some(subscription))),
            Err(e) => {
                let data = serde_json::json!({ "error": e.to_string() }).to_string();
                let event = SseEvent::default().event(TOKEN_EXPIRED_EVENT).data(data);
                Some((Ok(event), None))
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn list_jobs_handler(State(state): State<SharedApiState>) -> Json<JobListResponse> {
    let jobs = state.registry.list().await;
    let count = jobs.len();
    Json(JobListResponse { jobs, count })
}

async fn get_job_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    state
        .registry
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "not_found", format!("Job '{id}' not found")))
}

// ── SSE Event Stream ──────────────────────────────────────────────────────

/// `GET /v1/events`: SSE stream of domain events (jobs, tools, token refusals).
async fn event_stream_handler(
    State(state): State<SharedApiState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.event_bus.subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Ok(SseEvent::default().event(event.kind()).data(data))
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_api_state(queue_capacity: usize) -> (SharedApiState, orderdesk_jobs::JobReceiver) {
        let registry = Arc::new(JobRegistry::new());
        let event_bus = Arc::new(EventBus::new(64));
        let tokens = Arc::new(TokenService::new("gateway-secret", Duration::from_secs(60)).unwrap());
        let broker = Arc::new(ChannelBroker::new(tokens.clone(), 16).with_event_bus(event_bus.clone()));
        let (queue, receiver) = JobQueue::bounded(queue_capacity);
        let queue = queue.with_registry(registry.clone()).with_event_bus(event_bus.clone());
        let state = Arc::new(ApiV1State {
            queue,
            registry,
            tokens,
            broker,
            event_bus,
            channel: "ai".into(),
            topic: "ai".into(),
            start_time: Utc::now(),
        });
        (state, receiver)
    }

    fn ask(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn ask_accepts_and_queues() {
        let (state, mut receiver) = test_api_state(4);
        let app = v1_router(state.clone());

        let response = app
            .oneshot(ask(serde_json::json!({
                "question": "What is the status of my order?",
                "orderId": "297b2cc5e3c97637"
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let accepted: AskResponse = json_body(response).await;
        assert!(accepted.accepted);

        let queued = receiver.recv().await.unwrap();
        assert_eq!(queued.id, accepted.job_id);
        assert_eq!(queued.order_id.as_deref(), Some("297b2cc5e3c97637"));
        assert_eq!(queued.user_id, "anonymous");
        assert!(state.registry.get(&accepted.job_id).await.is_some());
    }

    #[tokio::test]
    async fn ask_rejects_invalid_input() {
        let (state, _receiver) = test_api_state(4);

        let response = v1_router(state.clone())
            .oneshot(ask(serde_json::json!({ "question": "" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err: ErrorResponse = json_body(response).await;
        assert_eq!(err.code, "validation_error");
        assert_eq!(err.error, "Please enter your question.");

        let response = v1_router(state.clone())
            .oneshot(ask(serde_json::json!({ "question": "Where?", "orderId": "ab" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err: ErrorResponse = json_body(response).await;
        assert_eq!(err.field.as_deref(), Some("orderId"));

        let bad_json = Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = v1_router(state.clone()).oneshot(bad_json).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.registry.is_empty().await);
    }

    #[tokio::test]
    async fn ask_returns_503_when_queue_is_full() {
        let (state, _receiver) = test_api_state(1);
        let first = v1_router(state.clone())
            .oneshot(ask(serde_json::json!({ "question": "first" })))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        let second = v1_router(state.clone())
            .oneshot(ask(serde_json::json!({ "question": "second" })))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
        let err: ErrorResponse = json_body(second).await;
        assert_eq!(err.code, "queue_full");
    }

    #[tokio::test]
    async fn token_is_scoped_to_ai() {
        let (state, _receiver) = test_api_state(4);
        let response = v1_router(state.clone())
            .oneshot(Request::builder().uri("/realtime/token").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let issued: TokenResponse = json_body(response).await;
        assert_eq!(issued.channel, "ai");
        assert_eq!(issued.topics, vec!["ai".to_string()]);
        assert!(issued.expires_at > Utc::now());

        let token = SubscriptionToken::decode(&issued.token).unwrap();
        assert!(state.tokens.is_valid(&token, "ai", "ai"));
        assert!(!state.tokens.is_valid(&token, "ai", "other"));
    }

    #[tokio::test]
    async fn subscribe_rejects_bad_tokens() {
        let (state, _receiver) = test_api_state(4);

        let response = v1_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/realtime/subscribe?token=garbage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let foreign = TokenService::new("someone-else", Duration::from_secs(60))
            .unwrap()
            .issue("ai", ["ai"]);
        let response = v1_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/realtime/subscribe?token={}", foreign.encode()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let expired = state.tokens.issue_at("ai", ["ai"], Utc::now() - chrono::Duration::hours(1));
        let response = v1_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/realtime/subscribe?token={}", expired.encode()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let err: ErrorResponse = json_body(response).await;
        assert_eq!(err.code, "token_expired");
    }

    #[tokio::test]
    async fn subscribe_streams_published_snapshots() {
        let (state, _receiver) = test_api_state(4);
        let token = state.tokens.issue("ai", ["ai"]);

        let response = v1_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/realtime/subscribe?token={}", token.encode()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.broker.subscriber_count("ai", "ai"), 1);

        let mut message = orderdesk_core::Message::assistant("job-1");
        message.parts.push(orderdesk_core::Part::text("On its way."));
        state.broker.publish("ai", "ai", message.into());

        let mut body = response.into_body();
        let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(text.contains("event: ai"));
        assert!(text.contains("On its way."));
        assert!(text.contains("\"data\""));
    }

    #[tokio::test]
    async fn jobs_are_listed_and_fetched() {
        let (state, _receiver) = test_api_state(4);
        let response = v1_router(state.clone())
            .oneshot(ask(serde_json::json!({ "question": "Where is it?" })))
            .await
            .unwrap();
        let accepted: AskResponse = json_body(response).await;

        let response = v1_router(state.clone())
            .oneshot(Request::builder().uri("/jobs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let list: JobListResponse = json_body(response).await;
        assert_eq!(list.count, 1);
        assert_eq!(list.jobs[0].id, accepted.job_id);

        let response = v1_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/jobs/{}", accepted.job_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = v1_router(state)
            .oneshot(Request::builder().uri("/jobs/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
