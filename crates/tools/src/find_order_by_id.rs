//! `findOrderById`: exact lookup on the public order id.

use std::sync::Arc;

use async_trait::async_trait;
use orderdesk_core::order::OrderStore;
use orderdesk_core::tool::{Tool, ToolOutcome, parse_input};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

pub const NAME: &str = "findOrderById";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Input {
    order_id: String,
}

pub struct FindOrderByIdTool {
    store: Arc<dyn OrderStore>,
}

impl FindOrderByIdTool {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for FindOrderByIdTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Find a specific order by its public order ID. Returns the order's status, \
         shipping service, tracking details and lifecycle timestamps."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "orderId": {
                    "type": "string",
                    "description": "The public order ID to look up"
                }
            },
            "required": ["orderId"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolOutcome {
        let input: Input = match parse_input(arguments) {
            Ok(input) => input,
            Err(e) => return ToolOutcome::failure(e.to_string()).with("order", Value::Null),
        };
        let order_id = input.order_id.as_str();

        match self.store.find_by_public_id(order_id).await {
            Ok(Some(order)) => {
                debug!(order_id, "Order found");
                ToolOutcome::success(format!("Order {order_id} found successfully"))
                    .with("order", serde_json::to_value(&order).unwrap_or(Value::Null))
            }
            Ok(None) => {
                debug!(order_id, "Order not found");
                ToolOutcome::failure(format!("Order with ID {order_id} not found")).with("order", Value::Null)
            }
            Err(e) => {
                warn!(order_id, error = %e, "Order lookup failed");
                ToolOutcome::failure(format!("Error querying order: {e}")).with("order", Value::Null)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderdesk_core::error::StoreError;
    use orderdesk_core::order::Order;
    use orderdesk_store::{InMemoryOrderStore, demo_orders};

    struct BrokenStore;

    #[async_trait]
    impl OrderStore for BrokenStore {
        async fn find_by_public_id(&self, _: &str) -> Result<Option<Order>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn search_customers(&self, _: &str) -> Result<Vec<Order>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    fn tool() -> FindOrderByIdTool {
        FindOrderByIdTool::new(Arc::new(InMemoryOrderStore::with_orders(demo_orders())))
    }

    #[tokio::test]
    async fn found_order_carries_payload() {
        let outcome = tool().execute(serde_json::json!({"orderId": "297b2cc5e3c97637"})).await;
        assert!(outcome.success);
        assert_eq!(outcome.message, "Order 297b2cc5e3c97637 found successfully");
        assert_eq!(outcome.payload["order"]["deliveredAt"], "2025-08-07 18:01:52");
    }

    #[tokio::test]
    async fn missing_orders_resolve_to_deterministic_failure() {
        for id in ["unknown-1", "0000000000000000", "abc"] {
            let outcome = tool().execute(serde_json::json!({"orderId": id})).await;
            assert!(!outcome.success);
            assert_eq!(outcome.message, format!("Order with ID {id} not found"));
            assert!(outcome.payload["order"].is_null());
        }
    }

    #[tokio::test]
    async fn order_id_is_matched_exactly() {
        let outcome = tool().execute(serde_json::json!({"orderId": " 297b2cc5e3c97637 "})).await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Order with ID  297b2cc5e3c97637  not found");

        let upper = tool().execute(serde_json::json!({"orderId": "297B2CC5E3C97637"})).await;
        assert!(!upper.success);
    }

    #[tokio::test]
    async fn backend_error_is_captured() {
        let tool = FindOrderByIdTool::new(Arc::new(BrokenStore));
        let outcome = tool.execute(serde_json::json!({"orderId": "297b2cc5e3c97637"})).await;
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("Error querying order:"));
    }

    #[tokio::test]
    async fn malformed_input_is_captured() {
        let outcome = tool().execute(serde_json::json!({"id": 5})).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("orderId"));
    }
}
