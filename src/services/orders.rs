use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
        OrderStatus,
    },
    entities::order_item::{
        self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity,
        Model as OrderItemModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Request/Response types for the order service

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    pub seller_id: Uuid,
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<CreateOrderItem>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderItem {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub payment_method: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub refunded: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderDetailResponse {
    #[serde(flatten)]
    pub order: OrderResponse,
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub size: u64,
    pub total_pages: u64,
}

/// Whose orders a list query returns.
#[derive(Debug, Clone, Copy)]
pub enum OrderScope {
    Buyer(Uuid),
    Seller(Uuid),
}

#[derive(Debug, Clone)]
pub struct OrderFilter {
    pub scope: OrderScope,
    pub status: Option<OrderStatus>,
    pub page: u64,
    pub size: u64,
}

pub(crate) fn order_to_response(model: OrderModel) -> OrderResponse {
    OrderResponse {
        id: model.id,
        order_number: model.order_number,
        buyer_id: model.buyer_id,
        seller_id: model.seller_id,
        status: model.status,
        total_amount: model.total_amount,
        payment_method: model.payment_method,
        created_at: model.created_at,
        paid_at: model.paid_at,
        shipped_at: model.shipped_at,
        confirmed_at: model.confirmed_at,
        cancelled_at: model.cancelled_at,
        refunded_at: model.refunded_at,
        updated_at: model.updated_at,
        version: model.version,
    }
}

pub(crate) fn item_to_response(model: OrderItemModel) -> OrderItemResponse {
    OrderItemResponse {
        id: model.id,
        product_id: model.product_id,
        quantity: model.quantity,
        unit_price: model.unit_price,
        total_price: model.total_price,
        refunded: model.refunded,
    }
}

pub(crate) fn clamp_page(page: u64) -> u64 {
    page.max(1)
}

pub(crate) fn clamp_size(size: u64) -> u64 {
    size.clamp(1, 100)
}

pub(crate) fn total_pages(total: u64, size: u64) -> u64 {
    total.div_ceil(size)
}

/// Service for order creation, queries, and lifecycle transitions.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a new order with its items in one transaction.
    #[instrument(skip(self, request), fields(buyer_id = %buyer_id, seller_id = %request.seller_id))]
    pub async fn create_order(
        &self,
        buyer_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderDetailResponse, ServiceError> {
        request.validate()?;

        for item in &request.items {
            item.validate()?;
            if item.unit_price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Unit price for product {} must not be negative",
                    item.product_id
                )));
            }
        }

        let db = &*self.db_pool;
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order_number = format!("ORD-{}", Uuid::new_v4().simple());

        let total_amount: Decimal = request
            .items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order_active_model = OrderActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            buyer_id: Set(buyer_id),
            seller_id: Set(request.seller_id),
            status: Set(OrderStatus::Created),
            total_amount: Set(total_amount),
            payment_method: Set(None),
            created_at: Set(now),
            paid_at: Set(None),
            shipped_at: Set(None),
            confirmed_at: Set(None),
            cancelled_at: Set(None),
            refunded_at: Set(None),
            updated_at: Set(Some(now)),
            version: Set(0),
        };

        let order_model = order_active_model.insert(&txn).await?;

        let mut item_models = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let item_active_model = OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                total_price: Set(item.unit_price * Decimal::from(item.quantity)),
                refunded: Set(false),
                ..Default::default()
            };
            item_models.push(item_active_model.insert(&txn).await?);
        }

        txn.commit().await?;

        info!(order_id = %order_id, order_number = %order_number, total = %total_amount, "Order created");

        self.emit(Event::OrderCreated {
            order_id,
            order_number,
        })
        .await;

        Ok(OrderDetailResponse {
            order: order_to_response(order_model),
            items: item_models.into_iter().map(item_to_response).collect(),
        })
    }

    /// Retrieves an order with all its items.
    #[instrument(skip(self))]
    pub async fn get_order_detail(
        &self,
        order_number: &str,
    ) -> Result<OrderDetailResponse, ServiceError> {
        let db = &*self.db_pool;
        let order = self.find_order(order_number).await?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(OrderDetailResponse {
            order: order_to_response(order),
            items: items.into_iter().map(item_to_response).collect(),
        })
    }

    /// Lists orders for a buyer or seller, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(&self, filter: OrderFilter) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db_pool;
        let page = clamp_page(filter.page);
        let size = clamp_size(filter.size);

        let mut query = OrderEntity::find();
        query = match filter.scope {
            OrderScope::Buyer(buyer_id) => query.filter(order::Column::BuyerId.eq(buyer_id)),
            OrderScope::Seller(seller_id) => query.filter(order::Column::SellerId.eq(seller_id)),
        };
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, size);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        Ok(OrderListResponse {
            orders: orders.into_iter().map(order_to_response).collect(),
            total,
            page,
            size,
            total_pages: total_pages(total, size),
        })
    }

    /// Counts a seller's orders, optionally restricted to one status.
    #[instrument(skip(self))]
    pub async fn count_seller_orders(
        &self,
        seller_id: Uuid,
        status: Option<OrderStatus>,
    ) -> Result<u64, ServiceError> {
        let db = &*self.db_pool;

        let mut query = OrderEntity::find().filter(order::Column::SellerId.eq(seller_id));
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }

        Ok(query.count(db).await?)
    }

    /// Marks an order paid. Only the buyer may pay, and only from `Created`.
    #[instrument(skip(self))]
    pub async fn pay_order(
        &self,
        order_number: &str,
        buyer_id: Uuid,
        payment_method: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.find_order(order_number).await?;
        self.ensure_buyer(&order, buyer_id)?;

        if order.status != OrderStatus::Created {
            return Err(ServiceError::AlreadyPaid(format!(
                "Order {} is {} and can no longer be paid",
                order_number, order.status
            )));
        }

        let now = Utc::now();
        let patch = OrderActiveModel {
            payment_method: Set(payment_method),
            paid_at: Set(Some(now)),
            ..Default::default()
        };

        let updated = self.commit_transition(order, OrderStatus::Paid, patch).await?;
        info!(order_number = %order_number, "Order paid");

        self.emit(Event::OrderPaid {
            order_id: updated.id,
            order_number: updated.order_number.clone(),
        })
        .await;

        Ok(order_to_response(updated))
    }

    /// Cancels an order. Allowed for the buyer before payment only.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        order_number: &str,
        buyer_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.find_order(order_number).await?;
        self.ensure_buyer(&order, buyer_id)?;

        if order.status != OrderStatus::Created {
            return Err(ServiceError::CannotCancelAfterPayment(format!(
                "Order {} is {} and can no longer be cancelled",
                order_number, order.status
            )));
        }

        let patch = OrderActiveModel {
            cancelled_at: Set(Some(Utc::now())),
            ..Default::default()
        };

        let updated = self
            .commit_transition(order, OrderStatus::Cancelled, patch)
            .await?;
        info!(order_number = %order_number, "Order cancelled");

        self.emit(Event::OrderCancelled {
            order_id: updated.id,
            order_number: updated.order_number.clone(),
        })
        .await;

        Ok(order_to_response(updated))
    }

    /// Marks an order shipped. Only the owning seller may ship, and only
    /// from `Paid`.
    #[instrument(skip(self))]
    pub async fn ship_order(
        &self,
        order_number: &str,
        seller_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.find_order(order_number).await?;

        if order.seller_id != seller_id {
            return Err(ServiceError::Unauthorized(format!(
                "Order {} does not belong to this seller",
                order_number
            )));
        }

        let patch = OrderActiveModel {
            shipped_at: Set(Some(Utc::now())),
            ..Default::default()
        };

        let updated = self
            .commit_transition(order, OrderStatus::Shipped, patch)
            .await?;
        info!(order_number = %order_number, "Order shipped");

        self.emit(Event::OrderShipped {
            order_id: updated.id,
            order_number: updated.order_number.clone(),
        })
        .await;

        Ok(order_to_response(updated))
    }

    /// Confirms receipt of a shipped order. Buyer only; `Shipped -> Confirmed`.
    #[instrument(skip(self))]
    pub async fn confirm_receipt(
        &self,
        order_number: &str,
        buyer_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.find_order(order_number).await?;
        self.ensure_buyer(&order, buyer_id)?;

        let patch = OrderActiveModel {
            confirmed_at: Set(Some(Utc::now())),
            ..Default::default()
        };

        let updated = self
            .commit_transition(order, OrderStatus::Confirmed, patch)
            .await?;
        info!(order_number = %order_number, "Order receipt confirmed");

        self.emit(Event::OrderConfirmed {
            order_id: updated.id,
            order_number: updated.order_number.clone(),
        })
        .await;

        Ok(order_to_response(updated))
    }

    pub(crate) async fn find_order(&self, order_number: &str) -> Result<OrderModel, ServiceError> {
        let db = &*self.db_pool;
        OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))
    }

    fn ensure_buyer(&self, order: &OrderModel, buyer_id: Uuid) -> Result<(), ServiceError> {
        if order.buyer_id != buyer_id {
            return Err(ServiceError::Unauthorized(format!(
                "Order {} does not belong to this buyer",
                order.order_number
            )));
        }
        Ok(())
    }

    /// Applies `patch` plus the status change as a version-guarded update.
    /// A concurrent writer makes the guard miss, which surfaces as `Conflict`.
    async fn commit_transition(
        &self,
        order: OrderModel,
        target: OrderStatus,
        mut patch: OrderActiveModel,
    ) -> Result<OrderModel, ServiceError> {
        if !order.status.can_transition_to(target) {
            return Err(ServiceError::InvalidTransition(format!(
                "Order {} cannot move from {} to {}",
                order.order_number, order.status, target
            )));
        }

        let db = &*self.db_pool;

        patch.status = Set(target);
        patch.updated_at = Set(Some(Utc::now()));
        patch.version = Set(order.version + 1);

        let result = OrderEntity::update_many()
            .set(patch)
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Version.eq(order.version))
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            warn!(order_number = %order.order_number, "Concurrent modification detected");
            return Err(ServiceError::Conflict(format!(
                "Order {} was modified concurrently; retry the request",
                order.order_number
            )));
        }

        OrderEntity::find_by_id(order.id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Order {} vanished after update",
                    order.order_number
                ))
            })
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send order event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::setup_db;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    async fn build_service() -> OrderService {
        let db = Arc::new(setup_db().await);
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        OrderService::new(db, Some(Arc::new(EventSender::new(tx))))
    }

    fn two_item_request(seller_id: Uuid) -> CreateOrderRequest {
        CreateOrderRequest {
            seller_id,
            items: vec![
                CreateOrderItem {
                    product_id: Uuid::new_v4(),
                    quantity: 2,
                    unit_price: dec!(10.00),
                },
                CreateOrderItem {
                    product_id: Uuid::new_v4(),
                    quantity: 1,
                    unit_price: dec!(5.00),
                },
            ],
        }
    }

    #[tokio::test]
    async fn create_order_computes_total_and_persists_items() {
        let service = build_service().await;
        let buyer = Uuid::new_v4();

        let detail = service
            .create_order(buyer, two_item_request(Uuid::new_v4()))
            .await
            .unwrap();

        assert_eq!(detail.order.status, OrderStatus::Created);
        assert_eq!(detail.order.total_amount, dec!(25.00));
        assert_eq!(detail.order.version, 0);
        assert_eq!(detail.items.len(), 2);
        assert!(detail.items.iter().all(|i| !i.refunded));

        let fetched = service
            .get_order_detail(&detail.order.order_number)
            .await
            .unwrap();
        assert_eq!(fetched.items.len(), 2);
    }

    #[tokio::test]
    async fn create_order_rejects_empty_items() {
        let service = build_service().await;
        let request = CreateOrderRequest {
            seller_id: Uuid::new_v4(),
            items: vec![],
        };

        let result = service.create_order(Uuid::new_v4(), request).await;
        assert!(matches!(result, Err(ServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn create_order_rejects_negative_price() {
        let service = build_service().await;
        let request = CreateOrderRequest {
            seller_id: Uuid::new_v4(),
            items: vec![CreateOrderItem {
                product_id: Uuid::new_v4(),
                quantity: 1,
                unit_price: dec!(-1.00),
            }],
        };

        let result = service.create_order(Uuid::new_v4(), request).await;
        assert!(matches!(result, Err(ServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn pay_moves_created_order_to_paid() {
        let service = build_service().await;
        let buyer = Uuid::new_v4();
        let detail = service
            .create_order(buyer, two_item_request(Uuid::new_v4()))
            .await
            .unwrap();

        let paid = service
            .pay_order(&detail.order.order_number, buyer, Some("card".into()))
            .await
            .unwrap();

        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(paid.payment_method.as_deref(), Some("card"));
        assert!(paid.paid_at.is_some());
        assert_eq!(paid.version, detail.order.version + 1);
    }

    #[tokio::test]
    async fn pay_twice_fails_with_already_paid() {
        let service = build_service().await;
        let buyer = Uuid::new_v4();
        let detail = service
            .create_order(buyer, two_item_request(Uuid::new_v4()))
            .await
            .unwrap();

        service
            .pay_order(&detail.order.order_number, buyer, None)
            .await
            .unwrap();
        let result = service
            .pay_order(&detail.order.order_number, buyer, None)
            .await;

        assert!(matches!(result, Err(ServiceError::AlreadyPaid(_))));
    }

    #[tokio::test]
    async fn pay_by_wrong_buyer_is_unauthorized() {
        let service = build_service().await;
        let detail = service
            .create_order(Uuid::new_v4(), two_item_request(Uuid::new_v4()))
            .await
            .unwrap();

        let result = service
            .pay_order(&detail.order.order_number, Uuid::new_v4(), None)
            .await;
        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn cancel_after_pay_fails() {
        let service = build_service().await;
        let buyer = Uuid::new_v4();
        let detail = service
            .create_order(buyer, two_item_request(Uuid::new_v4()))
            .await
            .unwrap();

        service
            .pay_order(&detail.order.order_number, buyer, None)
            .await
            .unwrap();
        let result = service
            .cancel_order(&detail.order.order_number, buyer)
            .await;

        assert!(matches!(
            result,
            Err(ServiceError::CannotCancelAfterPayment(_))
        ));
    }

    #[tokio::test]
    async fn cancel_before_pay_succeeds() {
        let service = build_service().await;
        let buyer = Uuid::new_v4();
        let detail = service
            .create_order(buyer, two_item_request(Uuid::new_v4()))
            .await
            .unwrap();

        let cancelled = service
            .cancel_order(&detail.order.order_number, buyer)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn ship_by_non_owning_seller_is_unauthorized() {
        let service = build_service().await;
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        let detail = service
            .create_order(buyer, two_item_request(seller))
            .await
            .unwrap();
        service
            .pay_order(&detail.order.order_number, buyer, None)
            .await
            .unwrap();

        let result = service
            .ship_order(&detail.order.order_number, Uuid::new_v4())
            .await;
        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));

        // The owning seller can ship.
        let shipped = service
            .ship_order(&detail.order.order_number, seller)
            .await
            .unwrap();
        assert_eq!(shipped.status, OrderStatus::Shipped);
    }

    #[tokio::test]
    async fn ship_before_pay_is_invalid_transition() {
        let service = build_service().await;
        let seller = Uuid::new_v4();
        let detail = service
            .create_order(Uuid::new_v4(), two_item_request(seller))
            .await
            .unwrap();

        let result = service.ship_order(&detail.order.order_number, seller).await;
        assert!(matches!(result, Err(ServiceError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn confirm_receipt_twice_fails_second_time() {
        let service = build_service().await;
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        let detail = service
            .create_order(buyer, two_item_request(seller))
            .await
            .unwrap();
        let order_number = detail.order.order_number;

        service.pay_order(&order_number, buyer, None).await.unwrap();
        service.ship_order(&order_number, seller).await.unwrap();

        let confirmed = service.confirm_receipt(&order_number, buyer).await.unwrap();
        assert_eq!(confirmed.status, OrderStatus::Confirmed);

        let second = service.confirm_receipt(&order_number, buyer).await;
        assert!(matches!(second, Err(ServiceError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let service = build_service().await;
        let result = service
            .pay_order("ORD-missing", Uuid::new_v4(), None)
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_orders_scopes_and_filters_by_status() {
        let service = build_service().await;
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();

        let first = service
            .create_order(buyer, two_item_request(seller))
            .await
            .unwrap();
        service
            .create_order(buyer, two_item_request(seller))
            .await
            .unwrap();
        service
            .create_order(Uuid::new_v4(), two_item_request(seller))
            .await
            .unwrap();

        service
            .pay_order(&first.order.order_number, buyer, None)
            .await
            .unwrap();

        let all_buyer = service
            .list_orders(OrderFilter {
                scope: OrderScope::Buyer(buyer),
                status: None,
                page: 1,
                size: 10,
            })
            .await
            .unwrap();
        assert_eq!(all_buyer.total, 2);

        let paid_only = service
            .list_orders(OrderFilter {
                scope: OrderScope::Buyer(buyer),
                status: Some(OrderStatus::Paid),
                page: 1,
                size: 10,
            })
            .await
            .unwrap();
        assert_eq!(paid_only.total, 1);
        assert_eq!(paid_only.orders[0].status, OrderStatus::Paid);

        let seller_orders = service
            .list_orders(OrderFilter {
                scope: OrderScope::Seller(seller),
                status: None,
                page: 1,
                size: 10,
            })
            .await
            .unwrap();
        assert_eq!(seller_orders.total, 3);

        assert_eq!(
            service
                .count_seller_orders(seller, Some(OrderStatus::Created))
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn stale_snapshot_transition_is_rejected_as_conflict() {
        let service = build_service().await;
        let buyer = Uuid::new_v4();
        let detail = service
            .create_order(buyer, two_item_request(Uuid::new_v4()))
            .await
            .unwrap();

        // Snapshot the row, then let a concurrent payment bump the version
        // underneath it.
        let snapshot = service
            .find_order(&detail.order.order_number)
            .await
            .unwrap();
        service
            .pay_order(&detail.order.order_number, buyer, None)
            .await
            .unwrap();

        // Cancel is a valid edge from the snapshot's CREATED state, so the
        // write reaches the version guard and loses there.
        let result = service
            .commit_transition(
                snapshot,
                OrderStatus::Cancelled,
                <OrderActiveModel as Default>::default(),
            )
            .await;
        assert!(matches!(result, Err(ServiceError::Conflict(_))));

        // The concurrent winner's state is untouched.
        let current = service
            .find_order(&detail.order.order_number)
            .await
            .unwrap();
        assert_eq!(current.status, OrderStatus::Paid);
        assert_eq!(current.version, detail.order.version + 1);
    }
}
