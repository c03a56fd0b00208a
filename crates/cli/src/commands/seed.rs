//! `orderdesk seed`: load orders into the configured store.

use std::path::Path;

use orderdesk_config::AppConfig;
use orderdesk_store::{MEMORY_URL, SqliteOrderStore};

pub async fn run(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.store.database_url == MEMORY_URL {
        return Err("store.database_url is \"memory\"; seeding needs a SQLite database".into());
    }

    let orders = orderdesk_store::load_seed_file(file).await?;
    let store = SqliteOrderStore::new(&config.store.database_url).await?;
    let written = store.upsert_many(&orders).await?;
    let total = store.count().await?;

    println!("Seeded {written} order(s) from {}", file.display());
    println!("   Store:  {}", config.store.database_url);
    println!("   Total:  {total}");
    Ok(())
}
