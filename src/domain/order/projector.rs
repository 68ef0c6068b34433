use crate::event_sourcing::core::{Event, PartitionKey, Projector};

use super::events::OrderEvent;
use super::state::{Order, OrderPayload};
use super::value_objects::OrderStatus;

// ============================================================================
// Order Projector - Fold Order Events Into OrderPayload
// ============================================================================

pub const ORDER_PROJECTOR_VERSION: &str = "1";

#[derive(Debug, Clone)]
pub struct OrderProjector {
    version: String,
}

impl OrderProjector {
    pub fn new() -> Self {
        Self::with_version(ORDER_PROJECTOR_VERSION)
    }

    /// Same fold, reported under another revision. Cached state built by a
    /// different revision gets rebuilt.
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

impl Default for OrderProjector {
    fn default() -> Self {
        Self::new()
    }
}

impl Projector for OrderProjector {
    type Payload = OrderPayload;
    type Event = OrderEvent;

    fn type_name(&self) -> &str {
        "OrderProjector"
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn initial_state(&self, _partition_key: &PartitionKey) -> OrderPayload {
        OrderPayload::NotCreated
    }

    fn apply(&self, payload: OrderPayload, event: &Event<OrderEvent>) -> OrderPayload {
        let at = event.metadata.timestamp;

        match (payload, &event.payload) {
            (OrderPayload::NotCreated, OrderEvent::Created(e)) => OrderPayload::Placed(Order {
                id: event.partition_key.aggregate_id(),
                customer_id: e.customer_id,
                items: e.items.clone(),
                status: OrderStatus::Created,
                created_at: at,
                updated_at: at,
                tracking_number: None,
                carrier: None,
                cancelled_reason: None,
            }),
            (OrderPayload::Placed(mut order), OrderEvent::ItemsUpdated(e)) => {
                order.items = e.items.clone();
                order.updated_at = at;
                OrderPayload::Placed(order)
            }
            (OrderPayload::Placed(mut order), OrderEvent::Confirmed(_)) => {
                order.status = OrderStatus::Confirmed;
                order.updated_at = at;
                OrderPayload::Placed(order)
            }
            (OrderPayload::Placed(mut order), OrderEvent::Shipped(e)) => {
                order.status = OrderStatus::Shipped;
                order.tracking_number = Some(e.tracking_number.clone());
                order.carrier = Some(e.carrier.clone());
                order.updated_at = at;
                OrderPayload::Placed(order)
            }
            (OrderPayload::Placed(mut order), OrderEvent::Delivered(_)) => {
                order.status = OrderStatus::Delivered;
                order.updated_at = at;
                OrderPayload::Placed(order)
            }
            (OrderPayload::Placed(mut order), OrderEvent::Cancelled(e)) => {
                order.status = OrderStatus::Cancelled;
                order.cancelled_reason = e.reason.clone();
                order.updated_at = at;
                OrderPayload::Placed(order)
            }
            // Anything else (e.g. a second OrderCreated) leaves the state as is.
            (payload, _) => payload,
        }
    }
}
