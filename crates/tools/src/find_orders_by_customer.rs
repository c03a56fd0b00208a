//! `findOrdersByCustomer`: substring search on customer name or email.

use std::sync::Arc;

use async_trait::async_trait;
use orderdesk_core::order::{OrderStore, OrderSummary};
use orderdesk_core::tool::{Tool, ToolOutcome, parse_input};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

pub const NAME: &str = "findOrdersByCustomer";

#[derive(Debug, Deserialize)]
struct Input {
    search: String,
}

pub struct FindOrdersByCustomerTool {
    store: Arc<dyn OrderStore>,
}

impl FindOrdersByCustomerTool {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }
}

fn empty(outcome: ToolOutcome) -> ToolOutcome {
    outcome.with("orders", Value::Array(Vec::new())).with("count", 0.into())
}

#[async_trait]
impl Tool for FindOrdersByCustomerTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Find orders by customer email or name. Matches any part of either field and \
         returns every matching order."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "search": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Part of the customer's email address or name"
                }
            },
            "required": ["search"]
        })
    }

    async fn execute(&self, arguments: Value) -> ToolOutcome {
        let input: Input = match parse_input(arguments) {
            Ok(input) => input,
            Err(e) => return empty(ToolOutcome::failure(e.to_string())),
        };
        let search = input.search.trim();
        if search.is_empty() {
            return empty(ToolOutcome::failure("Search term must not be empty"));
        }

        match self.store.search_customers(search).await {
            Ok(orders) if orders.is_empty() => {
                debug!(search, "No customer matches");
                empty(ToolOutcome::failure(format!("No orders found for search term \"{search}\"")))
            }
            Ok(orders) => {
                let count = orders.len();
                debug!(search, count, "Customer matches");
                let summaries: Vec<OrderSummary> = orders.iter().map(|o| o.summary()).collect();
                let noun = if count == 1 { "order" } else { "orders" };
                ToolOutcome::success(format!("Found {count} {noun} matching \"{search}\""))
                    .with("orders", serde_json::to_value(&summaries).unwrap_or_default())
                    .with("count", count.into())
            }
            Err(e) => {
                warn!(search, error = %e, "Customer search failed");
                empty(ToolOutcome::failure(format!("Error querying orders: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderdesk_store::{InMemoryOrderStore, demo_orders};

    fn tool() -> FindOrdersByCustomerTool {
        FindOrdersByCustomerTool::new(Arc::new(InMemoryOrderStore::with_orders(demo_orders())))
    }

    #[tokio::test]
    async fn count_matches_distinct_hits() {
        let outcome = tool().execute(serde_json::json!({"search": "olivia"})).await;
        assert!(outcome.success);
        assert_eq!(outcome.payload["count"], 2);
        let orders = outcome.payload["orders"].as_array().unwrap();
        assert_eq!(orders.len(), 2);
        assert_ne!(orders[0]["orderPublicId"], orders[1]["orderPublicId"]);
        assert_eq!(outcome.message, "Found 2 orders matching \"olivia\"");
    }

    #[tokio::test]
    async fn email_fragment_matches() {
        let outcome = tool().execute(serde_json::json!({"search": "noah.schmidt@"})).await;
        assert_eq!(outcome.payload["count"], 1);
        assert_eq!(outcome.payload["orders"][0]["customerName"], "Noah Schmidt");
        assert_eq!(outcome.message, "Found 1 order matching \"noah.schmidt@\"");
    }

    #[tokio::test]
    async fn no_match_is_failure_with_empty_list() {
        let outcome = tool().execute(serde_json::json!({"search": "zelda"})).await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "No orders found for search term \"zelda\"");
        assert_eq!(outcome.payload["count"], 0);
        assert!(outcome.payload["orders"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_search_rejected_without_querying() {
        let outcome = tool().execute(serde_json::json!({"search": ""})).await;
        assert!(!outcome.success);
        assert_eq!(outcome.payload["count"], 0);
    }
}
