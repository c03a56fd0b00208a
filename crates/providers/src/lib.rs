//! Language-model provider implementations for orderdesk.
//!
//! All providers implement the `orderdesk_core::Provider` trait.

pub mod openai_compat;

use std::sync::Arc;

use orderdesk_core::{Provider, ProviderError};

pub use openai_compat::OpenAiCompatProvider;

/// Build the configured provider.
pub fn build_from_config(config: &orderdesk_config::AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let provider = OpenAiCompatProvider::from_config(&config.provider)?;
    tracing::info!(
        provider = provider.name(),
        base_url = %config.provider.base_url,
        model = %config.provider.model,
        "Model provider ready"
    );
    Ok(Arc::new(provider))
}
