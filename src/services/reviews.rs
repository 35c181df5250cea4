use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, Model as OrderModel},
    entities::order_item::{self, Entity as OrderItemEntity},
    entities::product_review::{
        self, ActiveModel as ReviewActiveModel, Entity as ReviewEntity, Model as ReviewModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    media::{review_image_key, MediaStorage},
};

use super::orders::{clamp_page, clamp_size, total_pages};

const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct SubmitReviewRequest {
    #[validate(length(min = 1, max = 50))]
    pub order_number: String,
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i16,
    pub content: Option<String>,
    #[serde(default)]
    pub image_paths: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReviewResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub buyer_id: Uuid,
    pub order_number: String,
    pub rating: i16,
    pub content: Option<String>,
    pub image_paths: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReviewListResponse {
    pub reviews: Vec<ReviewResponse>,
    pub total: u64,
    pub page: u64,
    pub size: u64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReviewSummaryResponse {
    pub product_id: Uuid,
    pub count: u64,
    /// Absent when the product has no reviews yet.
    pub average_rating: Option<f64>,
    /// Review counts for one through five stars.
    pub star_counts: [u64; 5],
}

fn review_to_response(model: ReviewModel) -> ReviewResponse {
    let image_paths = serde_json::from_value(model.image_paths).unwrap_or_default();
    ReviewResponse {
        id: model.id,
        product_id: model.product_id,
        buyer_id: model.buyer_id,
        order_number: model.order_number,
        rating: model.rating,
        content: model.content,
        image_paths,
        created_at: model.created_at,
    }
}

/// Service for product reviews and their image attachments.
#[derive(Clone)]
pub struct ReviewService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    media: Arc<dyn MediaStorage>,
}

impl ReviewService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        media: Arc<dyn MediaStorage>,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            media,
        }
    }

    /// Submits a review for a product the buyer purchased in the given order.
    #[instrument(skip(self, request), fields(buyer_id = %buyer_id, order_number = %request.order_number))]
    pub async fn submit_review(
        &self,
        buyer_id: Uuid,
        request: SubmitReviewRequest,
    ) -> Result<Uuid, ServiceError> {
        request.validate()?;

        let db = &*self.db_pool;
        let order = self
            .find_owned_order(&request.order_number, buyer_id)
            .await?;

        let purchased = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .filter(order_item::Column::ProductId.eq(request.product_id))
            .one(db)
            .await?;
        if purchased.is_none() {
            return Err(ServiceError::ItemNotFound(format!(
                "Product {} is not part of order {}",
                request.product_id, request.order_number
            )));
        }

        let existing = ReviewEntity::find()
            .filter(product_review::Column::BuyerId.eq(buyer_id))
            .filter(product_review::Column::OrderNumber.eq(request.order_number.as_str()))
            .filter(product_review::Column::ProductId.eq(request.product_id))
            .count(db)
            .await?;
        if existing > 0 {
            return Err(ServiceError::Conflict(format!(
                "Product {} from order {} has already been reviewed",
                request.product_id, request.order_number
            )));
        }

        let review_id = Uuid::new_v4();
        let review = ReviewActiveModel {
            id: Set(review_id),
            product_id: Set(request.product_id),
            buyer_id: Set(buyer_id),
            order_number: Set(request.order_number.clone()),
            rating: Set(request.rating),
            content: Set(request.content),
            image_paths: Set(serde_json::json!(request.image_paths)),
            created_at: Set(Utc::now()),
        };
        review.insert(db).await?;

        info!(review_id = %review_id, product_id = %request.product_id, "Review submitted");

        self.emit(Event::ReviewSubmitted {
            review_id,
            product_id: request.product_id,
        })
        .await;

        Ok(review_id)
    }

    /// Stores a review image and returns its relative path. The buyer must
    /// own the order and the order must contain the product.
    #[instrument(skip(self, bytes), fields(buyer_id = %buyer_id, product_id = %product_id))]
    pub async fn store_review_image(
        &self,
        buyer_id: Uuid,
        product_id: Uuid,
        order_number: &str,
        image_index: u32,
        extension: &str,
        bytes: &[u8],
    ) -> Result<String, ServiceError> {
        let extension = extension.to_ascii_lowercase();
        if !ALLOWED_IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ServiceError::ValidationError(format!(
                "Unsupported image extension: {}",
                extension
            )));
        }
        if bytes.is_empty() {
            return Err(ServiceError::ValidationError(
                "Image payload is empty".to_string(),
            ));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(ServiceError::ValidationError(format!(
                "Image exceeds the {} byte limit",
                MAX_IMAGE_BYTES
            )));
        }

        let db = &*self.db_pool;
        let order = self.find_owned_order(order_number, buyer_id).await?;

        let purchased = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .filter(order_item::Column::ProductId.eq(product_id))
            .one(db)
            .await?;
        if purchased.is_none() {
            return Err(ServiceError::ItemNotFound(format!(
                "Product {} is not part of order {}",
                product_id, order_number
            )));
        }

        let key = review_image_key(product_id, order_number, image_index, &extension);
        self.media.store(bytes, &key).await
    }

    /// Lists a product's reviews, newest first.
    #[instrument(skip(self))]
    pub async fn get_product_reviews(
        &self,
        product_id: Uuid,
        page: u64,
        size: u64,
    ) -> Result<ReviewListResponse, ServiceError> {
        let db = &*self.db_pool;
        let page = clamp_page(page);
        let size = clamp_size(size);

        let paginator = ReviewEntity::find()
            .filter(product_review::Column::ProductId.eq(product_id))
            .order_by_desc(product_review::Column::CreatedAt)
            .paginate(db, size);

        let total = paginator.num_items().await?;
        let reviews = paginator.fetch_page(page - 1).await?;

        Ok(ReviewListResponse {
            reviews: reviews.into_iter().map(review_to_response).collect(),
            total,
            page,
            size,
            total_pages: total_pages(total, size),
        })
    }

    /// Aggregates a product's rating distribution.
    #[instrument(skip(self))]
    pub async fn get_review_summary(
        &self,
        product_id: Uuid,
    ) -> Result<ReviewSummaryResponse, ServiceError> {
        let db = &*self.db_pool;

        let ratings: Vec<i16> = ReviewEntity::find()
            .select_only()
            .column(product_review::Column::Rating)
            .filter(product_review::Column::ProductId.eq(product_id))
            .into_tuple()
            .all(db)
            .await?;

        let count = ratings.len() as u64;
        let mut star_counts = [0u64; 5];
        for rating in &ratings {
            if (1..=5).contains(rating) {
                star_counts[(*rating - 1) as usize] += 1;
            }
        }
        let average_rating = if count > 0 {
            Some(ratings.iter().map(|r| *r as f64).sum::<f64>() / count as f64)
        } else {
            None
        };

        Ok(ReviewSummaryResponse {
            product_id,
            count,
            average_rating,
            star_counts,
        })
    }

    /// Whether the buyer already reviewed this product from this order.
    #[instrument(skip(self))]
    pub async fn has_reviewed(
        &self,
        buyer_id: Uuid,
        order_number: &str,
        product_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let db = &*self.db_pool;
        let count = ReviewEntity::find()
            .filter(product_review::Column::BuyerId.eq(buyer_id))
            .filter(product_review::Column::OrderNumber.eq(order_number))
            .filter(product_review::Column::ProductId.eq(product_id))
            .count(db)
            .await?;
        Ok(count > 0)
    }

    async fn find_owned_order(
        &self,
        order_number: &str,
        buyer_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let db = &*self.db_pool;
        let order = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))?;

        if order.buyer_id != buyer_id {
            return Err(ServiceError::Unauthorized(format!(
                "Order {} does not belong to this buyer",
                order_number
            )));
        }
        Ok(order)
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send review event");
            }
        }
    }
}
