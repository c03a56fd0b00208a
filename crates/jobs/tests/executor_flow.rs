//! Executor behaviour against a scripted model and the in-process broker.

use async_trait::async_trait;
use orderdesk_agent::AgentLoop;
use orderdesk_core::chat::ChatToolCall;
use orderdesk_core::error::ProviderError;
use orderdesk_core::event::EventBus;
use orderdesk_core::message::Part;
use orderdesk_core::provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk};
use orderdesk_core::request::{QueryEvent, SubmitQuery};
use orderdesk_core::tool::ToolRegistry;
use orderdesk_jobs::{JobExecutor, JobQueue, JobRegistry, JobStatus, RetryPolicy};
use orderdesk_realtime::{ChannelBroker, TokenService};
use orderdesk_store::{InMemoryOrderStore, demo_orders};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
enum Turn {
    Text(Vec<&'static str>),
    Tools(Vec<(&'static str, &'static str)>),
    Fail(ProviderError),
}

/// Streams scripted turns in order; repeats the last one when exhausted.
struct ScriptedProvider {
    turns: Vec<Turn>,
    calls: Mutex<usize>,
}

impl ScriptedProvider {
    fn new(turns: Vec<Turn>) -> Arc<Self> {
        Arc::new(Self {
            turns,
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        unreachable!("agent loop always streams")
    }

    async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            (*calls - 1).min(self.turns.len() - 1)
        };
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        match self.turns[index].clone() {
            Turn::Fail(e) => return Err(e),
            Turn::Text(deltas) => {
                for d in deltas {
                    tx.send(Ok(StreamChunk { content: Some(d.into()), ..Default::default() })).await.unwrap();
                }
                tx.send(Ok(StreamChunk { done: true, ..Default::default() })).await.unwrap();
            }
            Turn::Tools(calls) => {
                let tool_calls = calls
                    .into_iter()
                    .enumerate()
                    .map(|(i, (name, args))| ChatToolCall {
                        id: format!("call_{index}_{i}"),
                        name: name.into(),
                        arguments: args.into(),
                    })
                    .collect();
                tx.send(Ok(StreamChunk { tool_calls, done: true, ..Default::default() })).await.unwrap();
            }
        }
        Ok(rx)
    }
}

struct Harness {
    provider: Arc<ScriptedProvider>,
    broker: Arc<ChannelBroker>,
    registry: Arc<JobRegistry>,
    bus: Arc<EventBus>,
    executor: Arc<JobExecutor>,
}

fn harness(turns: Vec<Turn>) -> Harness {
    let provider = ScriptedProvider::new(turns);
    let store = Arc::new(InMemoryOrderStore::with_orders(demo_orders()));
    let tools: Arc<ToolRegistry> = Arc::new(orderdesk_tools::default_registry(store));
    let agent = Arc::new(AgentLoop::new(provider.clone(), "mock-model", tools));
    let tokens = Arc::new(TokenService::new("jobs-secret", Duration::from_secs(60)).unwrap());
    let broker = Arc::new(ChannelBroker::new(tokens, 256));
    let registry = Arc::new(JobRegistry::new());
    let bus = Arc::new(EventBus::new(64));
    let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
    let executor = Arc::new(
        JobExecutor::new(agent, broker.clone(), registry.clone(), policy).with_event_bus(bus.clone()),
    );
    Harness {
        provider,
        broker,
        registry,
        bus,
        executor,
    }
}

fn question(order_id: Option<&str>) -> QueryEvent {
    let mut query = SubmitQuery::new("What is the status of my order?");
    if let Some(id) = order_id {
        query = query.with_order_id(id);
    }
    query.validate().unwrap()
}

#[tokio::test]
async fn publishes_growing_snapshots_in_order() {
    let h = harness(vec![
        Turn::Tools(vec![("findOrderById", r#"{"orderId":"297b2cc5e3c97637"}"#)]),
        Turn::Text(vec!["Your order ", "was delivered."]),
    ]);
    let token = h.broker.tokens().issue("ai", ["ai"]);
    let mut sub = h.broker.subscribe("ai", ["ai"], &token).unwrap();

    let event = question(Some("297b2cc5e3c97637"));
    assert_eq!(h.executor.run_job(event.clone()).await, JobStatus::Completed);

    let mut snapshots = Vec::new();
    while let Ok(Some(Ok(delivery))) = tokio::time::timeout(Duration::from_millis(50), sub.next()).await {
        snapshots.push(delivery.payload.data.clone());
    }
    assert!(snapshots.len() >= 3);
    assert!(snapshots.iter().all(|m| m.id == event.id));
    for pair in snapshots.windows(2) {
        assert!(pair[0].parts.len() <= pair[1].parts.len());
    }

    let last = snapshots.last().unwrap();
    match &last.parts[0] {
        Part::ToolInvocation { name, output: Some(outcome), .. } => {
            assert_eq!(name, "findOrderById");
            assert!(outcome.success);
        }
        other => panic!("expected resolved tool part, got {other:?}"),
    }
    assert_eq!(last.parts[1], Part::text("Your order was delivered."));

    let record = h.registry.get(&event.id).await.unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.attempts, 1);
}

#[tokio::test]
async fn transient_model_failure_is_retried() {
    let h = harness(vec![
        Turn::Fail(ProviderError::Network("connection reset".into())),
        Turn::Text(vec!["Please contact customer service."]),
    ]);
    let event = question(None);
    assert_eq!(h.executor.run_job(event.clone()).await, JobStatus::Completed);
    assert_eq!(h.provider.calls(), 2);
    assert_eq!(h.registry.get(&event.id).await.unwrap().attempts, 2);
}

#[tokio::test]
async fn exhausted_retries_fail_the_job() {
    let h = harness(vec![Turn::Fail(ProviderError::Timeout("60s".into()))]);
    let mut events = h.bus.subscribe();
    let event = question(None);

    assert_eq!(h.executor.run_job(event.clone()).await, JobStatus::Failed);
    assert_eq!(h.provider.calls(), 3);

    let record = h.registry.get(&event.id).await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error.unwrap().contains("timed out"));

    let mut kinds = Vec::new();
    while let Ok(e) = events.try_recv() {
        kinds.push(e.kind());
    }
    assert_eq!(kinds.first(), Some(&"job_started"));
    assert_eq!(kinds.iter().filter(|k| **k == "step_retrying").count(), 2);
    assert_eq!(kinds.last(), Some(&"job_failed"));
}

#[tokio::test]
async fn permanent_model_failure_is_not_retried() {
    let h = harness(vec![Turn::Fail(ProviderError::AuthenticationFailed("bad key".into()))]);
    let event = question(None);
    assert_eq!(h.executor.run_job(event).await, JobStatus::Failed);
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test]
async fn redelivered_event_is_not_executed_twice() {
    let h = harness(vec![Turn::Text(vec!["Done."])]);
    let event = question(None);
    assert_eq!(h.executor.run_job(event.clone()).await, JobStatus::Completed);
    assert_eq!(h.executor.run_job(event).await, JobStatus::Completed);
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test]
async fn runs_without_subscribers() {
    let h = harness(vec![Turn::Text(vec!["Nobody is listening."])]);
    assert_eq!(h.broker.subscriber_count("ai", "ai"), 0);
    assert_eq!(h.executor.run_job(question(None)).await, JobStatus::Completed);
}

#[tokio::test]
async fn queued_jobs_run_on_workers() {
    let h = harness(vec![Turn::Text(vec!["Answer."])]);
    let (queue, receiver) = JobQueue::bounded(8);
    let queue = queue.with_registry(h.registry.clone());
    let dispatcher = h.executor.clone().spawn(receiver, 2);

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(queue.submit(question(None)).await.unwrap());
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let mut done = 0;
            for id in &ids {
                if h.registry.get(id).await.is_some_and(|r| r.status == JobStatus::Completed) {
                    done += 1;
                }
            }
            if done == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    drop(queue);
    tokio::time::timeout(Duration::from_secs(1), dispatcher).await.unwrap().unwrap();
}
