//! `orderdesk watch`: follow the answer channel.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use orderdesk_client::{HttpTokenSource, SseTransport, SubscriptionClient};
use tracing::info;

use crate::render::Renderer;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Attach to the gateway at `url`. The client may come back in `Error`.
pub async fn connect(url: &str) -> SubscriptionClient {
    let http = reqwest::Client::new();
    SubscriptionClient::connect(
        Arc::new(HttpTokenSource::new(http.clone(), url)),
        Arc::new(SseTransport::new(http, url)),
    )
    .await
}

pub async fn run(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = connect(url).await;
    let mut renderer = Renderer::new();
    let mut delay = Duration::from_secs(1);
    eprintln!("  [{}] {url}", client.state());

    loop {
        tokio::select! {
            message = client.next_message() => match message {
                Some(message) => {
                    print!("{}", renderer.update(message));
                    std::io::stdout().flush()?;
                    delay = Duration::from_secs(1);
                    continue;
                }
                None => {}
            },
            _ = tokio::signal::ctrl_c() => break,
        }

        print!("{}", renderer.finish());
        match client.last_error() {
            Some(e) => eprintln!("  [{}] {e}", client.state()),
            None => eprintln!("  [{}]", client.state()),
        }
        if !client.state().can_retry() {
            break;
        }

        eprintln!("  Retrying in {}s (Ctrl+C to quit)", delay.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
        delay = (delay * 2).min(MAX_RETRY_DELAY);
        if client.retry().await {
            eprintln!("  [{}] {url}", client.state());
        }
    }

    print!("{}", renderer.finish());
    client.close();
    info!(received = client.received(), "Watch ended");
    eprintln!("  [{}]", client.state());
    Ok(())
}
