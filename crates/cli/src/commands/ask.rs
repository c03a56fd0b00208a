//! `orderdesk ask`: submit a question and stream its answer.

use std::io::Write;
use std::time::Duration;

use orderdesk_client::ConnectionState;
use orderdesk_core::request::SubmitQuery;
use orderdesk_jobs::{JobRecord, JobStatus};
use serde::Deserialize;
use tracing::debug;

use crate::render::Renderer;

/// How often the job status is polled while streaming.
const STATUS_POLL: Duration = Duration::from_millis(500);

/// Grace period for snapshots still in flight once the job has ended.
const DRAIN: Duration = Duration::from_millis(500);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Accepted {
    job_id: String,
}

#[derive(Deserialize)]
struct Refused {
    error: String,
    #[serde(default)]
    field: Option<String>,
}

pub async fn run(
    url: &str,
    question: String,
    order_id: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = url.trim_end_matches('/');
    let http = reqwest::Client::new();

    // Attach before submitting; the channel keeps no history.
    let mut client = super::watch::connect(url).await;
    if client.state() != ConnectionState::Active {
        let reason = client
            .last_error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "not connected".into());
        return Err(format!("Could not subscribe to {url}: {reason}").into());
    }

    let mut query = SubmitQuery::new(question);
    query.order_id = order_id;
    let response = http.post(format!("{url}/v1/ask")).json(&query).send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let message = match response.json::<Refused>().await {
            Ok(Refused {
                error,
                field: Some(field),
            }) => format!("{field}: {error}"),
            Ok(Refused { error, .. }) => error,
            Err(_) => status.to_string(),
        };
        return Err(format!("Question rejected: {message}").into());
    }
    let Accepted { job_id } = response.json().await?;
    debug!(job_id = %job_id, "Question accepted");
    eprintln!("  Job {job_id} accepted");

    let mut renderer = Renderer::new();
    let mut poll = tokio::time::interval(STATUS_POLL);
    let record = loop {
        tokio::select! {
            message = client.next_message() => match message {
                Some(message) if message.id == job_id => {
                    print!("{}", renderer.update(message));
                    std::io::stdout().flush()?;
                }
                Some(_) => {}
                None => break None,
            },
            _ = poll.tick() => {
                let record = job_status(&http, url, &job_id).await?;
                if record.status.is_terminal() {
                    break Some(record);
                }
            }
        }
    };

    if record.is_some() {
        while let Ok(Some(message)) = tokio::time::timeout(DRAIN, client.next_message()).await {
            if message.id == job_id {
                print!("{}", renderer.update(message));
            }
        }
    }
    print!("{}", renderer.finish());
    std::io::stdout().flush()?;
    client.close();

    match record {
        Some(JobRecord {
            status: JobStatus::Failed,
            error,
            ..
        }) => Err(format!("Job failed: {}", error.unwrap_or_default()).into()),
        Some(_) => Ok(()),
        None => {
            let reason = client
                .last_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "stream ended".into());
            Err(format!("Lost the answer stream: {reason}").into())
        }
    }
}

async fn job_status(
    http: &reqwest::Client,
    url: &str,
    job_id: &str,
) -> Result<JobRecord, Box<dyn std::error::Error>> {
    let record = http
        .get(format!("{url}/v1/jobs/{job_id}"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(record)
}
