//! Order store implementations for orderdesk.
//!
//! Both backends implement the read-only `orderdesk_core::OrderStore`
//! consumed by the lookup tools; writes only happen through seeding.

pub mod demo;
pub mod in_memory;
pub mod sqlite;

use std::path::Path;
use std::sync::Arc;

use orderdesk_config::StoreConfig;
use orderdesk_core::{Order, OrderStore, StoreError};
use tracing::info;

pub use demo::demo_orders;
pub use in_memory::InMemoryOrderStore;
pub use sqlite::SqliteOrderStore;

/// `database_url` value selecting the in-process store.
pub const MEMORY_URL: &str = "memory";

/// Read a JSON array of orders.
pub async fn load_seed_file(path: &Path) -> Result<Vec<Order>, StoreError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| StoreError::InvalidSeed(format!("{}: {e}", path.display())))?;
    let orders: Vec<Order> = serde_json::from_str(&raw)
        .map_err(|e| StoreError::InvalidSeed(format!("{}: {e}", path.display())))?;
    if let Some(bad) = orders.iter().position(|o| o.order_public_id.trim().is_empty()) {
        return Err(StoreError::InvalidSeed(format!("entry {bad} has an empty orderPublicId")));
    }
    Ok(orders)
}

/// Open the configured store, applying the seed file if one is set.
///
/// The in-memory store starts with the demo orders when no seed file is given.
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn OrderStore>, StoreError> {
    let seed = match &config.seed_file {
        Some(path) => Some(load_seed_file(path).await?),
        None => None,
    };

    if config.database_url == MEMORY_URL {
        let store = InMemoryOrderStore::with_orders(seed.unwrap_or_else(demo_orders));
        info!(orders = store.len().await, "In-memory order store ready");
        return Ok(Arc::new(store));
    }

    let store = SqliteOrderStore::new(&config.database_url).await?;
    if let Some(orders) = seed {
        let written = store.upsert_many(&orders).await?;
        info!(written, "Seeded order store");
    }
    Ok(Arc::new(store))
}
