use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Domain events emitted after a committed state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
    },
    OrderPaid {
        order_id: Uuid,
        order_number: String,
    },
    OrderCancelled {
        order_id: Uuid,
        order_number: String,
    },
    OrderShipped {
        order_id: Uuid,
        order_number: String,
    },
    OrderConfirmed {
        order_id: Uuid,
        order_number: String,
    },
    OrderRefunded {
        order_id: Uuid,
        order_number: String,
    },
    OrderItemRefunded {
        order_id: Uuid,
        order_number: String,
        product_id: Uuid,
    },
    ReviewSubmitted {
        review_id: Uuid,
        product_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Consumes events from the channel and logs them. Events carry no
/// side effects beyond observability in this service.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderItemRefunded {
                order_number,
                product_id,
                ..
            } => {
                info!(order_number = %order_number, product_id = %product_id, "event: order item refunded");
            }
            Event::ReviewSubmitted {
                review_id,
                product_id,
            } => {
                info!(review_id = %review_id, product_id = %product_id, "event: review submitted");
            }
            other => {
                info!(event = ?other, "event processed");
            }
        }
    }
    info!("Event channel closed; consumer stopping");
}
