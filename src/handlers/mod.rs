pub mod orders;
pub mod reviews;

use std::sync::Arc;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::media::MediaStorage;
use crate::services::{orders::OrderService, refunds::RefundService, reviews::ReviewService};

/// Shared service instances handed to every handler through `AppState`.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub refunds: Arc<RefundService>,
    pub reviews: Arc<ReviewService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        media: Arc<dyn MediaStorage>,
    ) -> Self {
        Self {
            orders: Arc::new(OrderService::new(db.clone(), event_sender.clone())),
            refunds: Arc::new(RefundService::new(db.clone(), event_sender.clone())),
            reviews: Arc::new(ReviewService::new(db, event_sender, media)),
        }
    }
}
