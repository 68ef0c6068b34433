use chrono::Utc;

use crate::event_sourcing::core::CommandHandler;

use super::commands::OrderCommand;
use super::errors::OrderError;
use super::events::*;
use super::projector::OrderProjector;
use super::state::{Order, OrderPayload};
use super::value_objects::{OrderItem, OrderStatus};

// ============================================================================
// Order Command Handler
// ============================================================================
//
// Business rules only: Command + current OrderPayload → OrderEvents.
// Loading, appending and concurrency are the coordinator's job.
//
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct OrderCommandHandler;

impl OrderCommandHandler {
    pub fn new() -> Self {
        Self
    }

    fn validate_items(items: &[OrderItem]) -> Result<(), OrderError> {
        if items.is_empty() {
            return Err(OrderError::EmptyItems);
        }

        for item in items {
            if item.quantity <= 0 {
                return Err(OrderError::InvalidQuantity(item.quantity));
            }
        }

        Ok(())
    }

    fn existing(payload: &OrderPayload) -> Result<&Order, OrderError> {
        payload.order().ok_or(OrderError::NotFound)
    }
}

impl CommandHandler for OrderCommandHandler {
    type Projector = OrderProjector;
    type Command = OrderCommand;
    type Error = OrderError;

    fn handle(&self, payload: &OrderPayload, command: &OrderCommand) -> Result<Vec<OrderEvent>, OrderError> {
        match command {
            OrderCommand::CreateOrder { customer_id, items, .. } => {
                if payload.order().is_some() {
                    return Err(OrderError::AlreadyExists);
                }
                Self::validate_items(items)?;

                Ok(vec![OrderEvent::Created(OrderCreated {
                    customer_id: *customer_id,
                    items: items.clone(),
                })])
            }

            OrderCommand::UpdateItems { items, reason, .. } => {
                let order = Self::existing(payload)?;
                match order.status {
                    OrderStatus::Created => {}
                    OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
                    status => return Err(OrderError::InvalidStatusTransition(status)),
                }
                Self::validate_items(items)?;

                // Same items again: nothing to record.
                if order.items == *items {
                    return Ok(vec![]);
                }

                Ok(vec![OrderEvent::ItemsUpdated(OrderItemsUpdated {
                    items: items.clone(),
                    reason: reason.clone(),
                })])
            }

            OrderCommand::ConfirmOrder { .. } => {
                let order = Self::existing(payload)?;
                match order.status {
                    OrderStatus::Created => {}
                    OrderStatus::Confirmed => return Err(OrderError::AlreadyConfirmed),
                    status => return Err(OrderError::InvalidStatusTransition(status)),
                }

                Ok(vec![OrderEvent::Confirmed(OrderConfirmed {
                    confirmed_at: Utc::now(),
                })])
            }

            OrderCommand::ShipOrder {
                tracking_number,
                carrier,
                ..
            } => {
                let order = Self::existing(payload)?;
                match order.status {
                    OrderStatus::Confirmed => {}
                    OrderStatus::Created => return Err(OrderError::NotConfirmed),
                    status => return Err(OrderError::InvalidStatusTransition(status)),
                }

                Ok(vec![OrderEvent::Shipped(OrderShipped {
                    tracking_number: tracking_number.clone(),
                    carrier: carrier.clone(),
                    shipped_at: Utc::now(),
                })])
            }

            OrderCommand::DeliverOrder { signature, .. } => {
                let order = Self::existing(payload)?;
                if order.status != OrderStatus::Shipped {
                    return Err(OrderError::NotShipped);
                }

                Ok(vec![OrderEvent::Delivered(OrderDelivered {
                    delivered_at: Utc::now(),
                    signature: signature.clone(),
                })])
            }

            OrderCommand::CancelOrder {
                reason,
                cancelled_by,
                ..
            } => {
                let order = Self::existing(payload)?;
                match order.status {
                    OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
                    OrderStatus::Delivered => {
                        return Err(OrderError::InvalidStatusTransition(OrderStatus::Delivered))
                    }
                    _ => {} // Can cancel from Created, Confirmed, or Shipped
                }

                Ok(vec![OrderEvent::Cancelled(OrderCancelled {
                    reason: reason.clone(),
                    cancelled_by: *cancelled_by,
                })])
            }
        }
    }
}
