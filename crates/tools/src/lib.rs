//! Order lookup tools for the orderdesk agent.
//!
//! Both tools are read-only and never fail outright: misses and backend
//! errors resolve to a `success: false` outcome the model can explain.

pub mod find_order_by_id;
pub mod find_orders_by_customer;

use std::sync::Arc;

use orderdesk_core::order::OrderStore;
use orderdesk_core::tool::ToolRegistry;

pub use find_order_by_id::FindOrderByIdTool;
pub use find_orders_by_customer::FindOrdersByCustomerTool;

/// Create the registry the agent is configured with.
pub fn default_registry(store: Arc<dyn OrderStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(FindOrderByIdTool::new(store.clone())));
    registry.register(Box::new(FindOrdersByCustomerTool::new(store)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderdesk_core::tool::ToolCall;
    use orderdesk_store::{InMemoryOrderStore, demo_orders};

    #[test]
    fn registry_exposes_both_tools() {
        let registry = default_registry(Arc::new(InMemoryOrderStore::new()));
        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["findOrderById", "findOrdersByCustomer"]);
    }

    #[tokio::test]
    async fn registry_dispatches_by_name() {
        let registry = default_registry(Arc::new(InMemoryOrderStore::with_orders(demo_orders())));
        let call = ToolCall {
            id: "call_1".into(),
            name: find_order_by_id::NAME.into(),
            arguments: serde_json::json!({"orderId": "d5a9c3e1f7b24460"}),
        };
        let outcome = registry.execute(&call).await;
        assert!(outcome.success);
        assert_eq!(outcome.payload["order"]["customerName"], "Liam Carter");
    }
}
