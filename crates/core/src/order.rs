//! Order records and the read-only store the lookup tools query.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// A tracked e-commerce order.
///
/// Timestamps are kept as the strings the fulfilment platform exports
/// (`YYYY-MM-DD HH:MM:SS`); the assistant only ever reads them back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_public_id: String,
    pub platform_public_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub destination_country_code: String,
    pub destination_country: String,
    pub order_status: i64,
    pub created_at: String,
    #[serde(default)]
    pub paid_at: Option<String>,
    #[serde(default)]
    pub shipped_at: Option<String>,
    #[serde(default)]
    pub info_received_at: Option<String>,
    #[serde(default)]
    pub in_transit_at: Option<String>,
    #[serde(default)]
    pub out_for_delivery_at: Option<String>,
    #[serde(default)]
    pub delivered_at: Option<String>,
    #[serde(default)]
    pub failed_attempt_at: Option<String>,
    #[serde(default)]
    pub exception_at: Option<String>,
    #[serde(default)]
    pub shipping_service: Option<String>,
    #[serde(default)]
    pub track_number_masked: Option<String>,
    #[serde(default)]
    pub last_mile_carrier: Option<String>,
    #[serde(default)]
    pub last_mile_tracking_masked: Option<String>,
}

impl Order {
    pub fn summary(&self) -> OrderSummary {
        OrderSummary {
            order_public_id: self.order_public_id.clone(),
            customer_name: self.customer_name.clone(),
            customer_email: self.customer_email.clone(),
            order_status: self.order_status,
            created_at: self.created_at.clone(),
            shipped_at: self.shipped_at.clone(),
            delivered_at: self.delivered_at.clone(),
        }
    }

    /// Case-insensitive substring match on customer name or email.
    pub fn matches_customer(&self, search: &str) -> bool {
        let needle = search.to_lowercase();
        self.customer_name.to_lowercase().contains(&needle)
            || self.customer_email.to_lowercase().contains(&needle)
    }
}

/// The projection returned by customer searches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub order_public_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub order_status: i64,
    pub created_at: String,
    pub shipped_at: Option<String>,
    pub delivered_at: Option<String>,
}

/// Read access to the order store.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Exact match on the public order id.
    async fn find_by_public_id(&self, order_id: &str) -> std::result::Result<Option<Order>, StoreError>;

    /// Orders whose customer name or email contains `search`, newest first.
    /// Each order appears at most once.
    async fn search_customers(&self, search: &str) -> std::result::Result<Vec<Order>, StoreError>;
}
