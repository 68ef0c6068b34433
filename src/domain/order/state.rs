use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::{OrderItem, OrderStatus};

// ============================================================================
// Order State - Materialized Payload
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "order")]
pub enum OrderPayload {
    /// No `OrderCreated` seen yet.
    NotCreated,
    Placed(Order),
}

impl OrderPayload {
    pub fn order(&self) -> Option<&Order> {
        match self {
            OrderPayload::NotCreated => None,
            OrderPayload::Placed(order) => Some(order),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,

    // Audit Trail, taken from event metadata so replays are deterministic
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub cancelled_reason: Option<String>,
}

impl Order {
    pub fn total_quantity(&self) -> i64 {
        self.items.iter().map(|item| i64::from(item.quantity)).sum()
    }
}
