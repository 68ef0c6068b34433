use uuid::Uuid;

use crate::event_sourcing::core::{Command, PartitionKey};
use super::value_objects::OrderItem;

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

/// Partition group every order lives in.
pub const ORDER_GROUP: &str = "Order";

#[derive(Debug, Clone)]
pub enum OrderCommand {
    CreateOrder {
        order_id: Uuid,
        customer_id: Uuid,
        items: Vec<OrderItem>,
    },
    UpdateItems {
        order_id: Uuid,
        items: Vec<OrderItem>,
        reason: Option<String>,
    },
    ConfirmOrder {
        order_id: Uuid,
    },
    ShipOrder {
        order_id: Uuid,
        tracking_number: String,
        carrier: String,
    },
    DeliverOrder {
        order_id: Uuid,
        signature: Option<String>,
    },
    CancelOrder {
        order_id: Uuid,
        reason: Option<String>,
        cancelled_by: Option<Uuid>,
    },
}

impl OrderCommand {
    pub fn order_id(&self) -> Uuid {
        match self {
            OrderCommand::CreateOrder { order_id, .. }
            | OrderCommand::UpdateItems { order_id, .. }
            | OrderCommand::ConfirmOrder { order_id }
            | OrderCommand::ShipOrder { order_id, .. }
            | OrderCommand::DeliverOrder { order_id, .. }
            | OrderCommand::CancelOrder { order_id, .. } => *order_id,
        }
    }
}

impl Command for OrderCommand {
    fn partition_key(&self) -> PartitionKey {
        PartitionKey::for_group(ORDER_GROUP, self.order_id())
    }
}
