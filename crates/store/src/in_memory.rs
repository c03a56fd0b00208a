//! In-memory order store for tests and demos.

use async_trait::async_trait;
use orderdesk_core::error::StoreError;
use orderdesk_core::order::{Order, OrderStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Orders held in a map keyed by public id, so a customer search can never
/// return the same order twice.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<String, Order>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let map = orders
            .into_iter()
            .map(|o| (o.order_public_id.clone(), o))
            .collect();
        Self {
            orders: Arc::new(RwLock::new(map)),
        }
    }

    pub async fn upsert_many(&self, orders: impl IntoIterator<Item = Order>) -> usize {
        let mut map = self.orders.write().await;
        let mut written = 0;
        for order in orders {
            map.insert(order.order_public_id.clone(), order);
            written += 1;
        }
        written
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn find_by_public_id(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.read().await.get(order_id).cloned())
    }

    async fn search_customers(&self, search: &str) -> Result<Vec<Order>, StoreError> {
        let mut hits: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.matches_customer(search))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::demo_orders;

    #[tokio::test]
    async fn lookup_and_search() {
        let store = InMemoryOrderStore::with_orders(demo_orders());
        assert!(store.find_by_public_id("297b2cc5e3c97637").await.unwrap().is_some());
        assert!(store.find_by_public_id("nope").await.unwrap().is_none());

        let hits = store.search_customers("OLIVIA").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].created_at >= hits[1].created_at);
    }

    #[tokio::test]
    async fn upsert_does_not_duplicate() {
        let store = InMemoryOrderStore::with_orders(demo_orders());
        let before = store.len().await;
        store.upsert_many(demo_orders()).await;
        assert_eq!(store.len().await, before);
        assert_eq!(store.search_customers("thompson").await.unwrap().len(), 1);
    }
}
