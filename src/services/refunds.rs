use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::{Expr, Query};
use sea_orm::{
    ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::order::{self, ActiveModel as OrderActiveModel, Entity as OrderEntity, OrderStatus},
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
};

use super::orders::{
    clamp_page, clamp_size, order_to_response, total_pages, OrderFilter, OrderListResponse,
    OrderScope,
};

/// Service for whole-order and per-item refunds.
///
/// The two refund granularities are deliberately asymmetric: refunding the
/// whole order is a status transition, refunding a single item only flips
/// that item's soft-delete flag and leaves the order status alone.
#[derive(Clone)]
pub struct RefundService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl RefundService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Refunds a whole order: flips every remaining item and transitions the
    /// order to `Refunded` in one transaction. Eligible from `Paid` or
    /// `Shipped` only.
    #[instrument(skip(self))]
    pub async fn refund_order(
        &self,
        order_number: &str,
        buyer_id: Uuid,
    ) -> Result<super::orders::OrderResponse, ServiceError> {
        let db = &*self.db_pool;
        let order = self.find_order(order_number).await?;
        self.ensure_buyer(&order, buyer_id)?;

        if !order.status.can_transition_to(OrderStatus::Refunded) {
            return Err(ServiceError::IneligibleForRefund(format!(
                "Order {} is {} and cannot be refunded",
                order_number, order.status
            )));
        }

        self.apply_order_refund(&order).await?;

        info!(order_number = %order_number, "Order refunded");

        self.emit(Event::OrderRefunded {
            order_id: order.id,
            order_number: order.order_number.clone(),
        })
        .await;

        let updated = OrderEntity::find_by_id(order.id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!("Order {} vanished after refund", order_number))
            })?;

        Ok(order_to_response(updated))
    }

    /// The transactional half of a whole-order refund: version-guarded status
    /// update plus the item sweep. Runs against the row state captured in
    /// `order`; a concurrent writer makes the guard miss and the transaction
    /// rolls back with `Conflict`.
    async fn apply_order_refund(&self, order: &order::Model) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();
        let txn = db.begin().await?;

        let patch = OrderActiveModel {
            status: Set(OrderStatus::Refunded),
            refunded_at: Set(Some(now)),
            updated_at: Set(Some(now)),
            version: Set(order.version + 1),
            ..Default::default()
        };

        let result = OrderEntity::update_many()
            .set(patch)
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Version.eq(order.version))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            warn!(order_number = %order.order_number, "Concurrent modification detected during refund");
            return Err(ServiceError::Conflict(format!(
                "Order {} was modified concurrently; retry the request",
                order.order_number
            )));
        }

        OrderItemEntity::update_many()
            .col_expr(order_item::Column::Refunded, Expr::value(true))
            .col_expr(order_item::Column::UpdatedAt, Expr::value(now))
            .filter(order_item::Column::OrderId.eq(order.id))
            .filter(order_item::Column::Refunded.eq(false))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(())
    }

    /// Refunds a single item: marks the matching unrefunded item refunded.
    /// Never touches the order's own status, even when this leaves every
    /// item refunded.
    #[instrument(skip(self))]
    pub async fn refund_item(
        &self,
        order_number: &str,
        buyer_id: Uuid,
        product_id: Uuid,
    ) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let order = self.find_order(order_number).await?;
        self.ensure_buyer(&order, buyer_id)?;

        if order.status == OrderStatus::Cancelled {
            return Err(ServiceError::IneligibleForRefund(format!(
                "Order {} is cancelled; its items cannot be refunded",
                order_number
            )));
        }

        let item = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .filter(order_item::Column::ProductId.eq(product_id))
            .filter(order_item::Column::Refunded.eq(false))
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::ItemNotFound(format!(
                    "No unrefunded item for product {} in order {}",
                    product_id, order_number
                ))
            })?;

        // Guarded on the flag so a racing refund of the same item loses.
        let result = OrderItemEntity::update_many()
            .col_expr(order_item::Column::Refunded, Expr::value(true))
            .col_expr(order_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order_item::Column::Id.eq(item.id))
            .filter(order_item::Column::Refunded.eq(false))
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Item for product {} in order {} was refunded concurrently",
                product_id, order_number
            )));
        }

        info!(order_number = %order_number, product_id = %product_id, "Order item refunded");

        self.emit(Event::OrderItemRefunded {
            order_id: order.id,
            order_number: order.order_number.clone(),
            product_id,
        })
        .await;

        Ok(())
    }

    /// Lists orders containing at least one refunded item, regardless of the
    /// order's own status.
    #[instrument(skip(self))]
    pub async fn list_orders_with_refunded_items(
        &self,
        filter: OrderFilter,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db_pool;
        let page = clamp_page(filter.page);
        let size = clamp_size(filter.size);

        let refunded_order_ids = Query::select()
            .column(order_item::Column::OrderId)
            .from(OrderItemEntity)
            .and_where(Expr::col(order_item::Column::Refunded).eq(true))
            .to_owned();

        let mut query =
            OrderEntity::find().filter(order::Column::Id.in_subquery(refunded_order_ids));
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

    /// Lists orders whose *status* is `Refunded`. Orders that merely contain
    /// refunded items stay out of this surface.
    #[instrument(skip(self))]
    pub async fn list_refunded_orders(
        &self,
        scope: OrderScope,
        page: u64,
        size: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db_pool;
        let page = clamp_page(page);
        let size = clamp_size(size);

        let mut query = OrderEntity::find().filter(order::Column::Status.eq(OrderStatus::Refunded));
        query = match scope {
            OrderScope::Buyer(buyer_id) => query.filter(order::Column::BuyerId.eq(buyer_id)),
            OrderScope::Seller(seller_id) => query.filter(order::Column::SellerId.eq(seller_id)),
        };

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

    async fn find_order(&self, order_number: &str) -> Result<order::Model, ServiceError> {
        let db = &*self.db_pool;
        OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))
    }

    fn ensure_buyer(&self, order: &order::Model, buyer_id: Uuid) -> Result<(), ServiceError> {
        if order.buyer_id != buyer_id {
            return Err(ServiceError::Unauthorized(format!(
                "Order {} does not belong to this buyer",
                order.order_number
            )));
        }
        Ok(())
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send refund event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::orders::{CreateOrderItem, CreateOrderRequest, OrderService};
    use crate::services::test_support::setup_db;
    use rust_decimal_macros::dec;
    use sea_orm::DatabaseConnection;

    struct Fixture {
        orders: OrderService,
        refunds: RefundService,
    }

    async fn build_services() -> Fixture {
        let db: Arc<DatabaseConnection> = Arc::new(setup_db().await);
        Fixture {
            orders: OrderService::new(db.clone(), None),
            refunds: RefundService::new(db, None),
        }
    }

    struct PlacedOrder {
        order_number: String,
        product_a: Uuid,
        product_b: Uuid,
    }

    /// Creates an order with A(qty 2, $10) and B(qty 1, $5) and pays it.
    async fn place_paid_order(fx: &Fixture, buyer: Uuid, seller: Uuid) -> PlacedOrder {
        let product_a = Uuid::new_v4();
        let product_b = Uuid::new_v4();
        let detail = fx
            .orders
            .create_order(
                buyer,
                CreateOrderRequest {
                    seller_id: seller,
                    items: vec![
                        CreateOrderItem {
                            product_id: product_a,
                            quantity: 2,
                            unit_price: dec!(10.00),
                        },
                        CreateOrderItem {
                            product_id: product_b,
                            quantity: 1,
                            unit_price: dec!(5.00),
                        },
                    ],
                },
            )
            .await
            .unwrap();

        fx.orders
            .pay_order(&detail.order.order_number, buyer, None)
            .await
            .unwrap();

        PlacedOrder {
            order_number: detail.order.order_number,
            product_a,
            product_b,
        }
    }

    #[tokio::test]
    async fn item_refund_then_order_refund_scenario() {
        let fx = build_services().await;
        let buyer = Uuid::new_v4();
        let placed = place_paid_order(&fx, buyer, Uuid::new_v4()).await;

        // Partial refund of A leaves the order PAID.
        fx.refunds
            .refund_item(&placed.order_number, buyer, placed.product_a)
            .await
            .unwrap();

        let detail = fx.orders.get_order_detail(&placed.order_number).await.unwrap();
        assert_eq!(detail.order.status, OrderStatus::Paid);
        let item_a = detail
            .items
            .iter()
            .find(|i| i.product_id == placed.product_a)
            .unwrap();
        let item_b = detail
            .items
            .iter()
            .find(|i| i.product_id == placed.product_b)
            .unwrap();
        assert!(item_a.refunded);
        assert!(!item_b.refunded);
        assert_eq!(detail.order.total_amount, dec!(25.00));

        // Whole-order refund flips B and the status.
        let refunded = fx
            .refunds
            .refund_order(&placed.order_number, buyer)
            .await
            .unwrap();
        assert_eq!(refunded.status, OrderStatus::Refunded);
        assert!(refunded.refunded_at.is_some());

        let detail = fx.orders.get_order_detail(&placed.order_number).await.unwrap();
        assert!(detail.items.iter().all(|i| i.refunded));
    }

    #[tokio::test]
    async fn refund_order_before_payment_is_ineligible() {
        let fx = build_services().await;
        let buyer = Uuid::new_v4();
        let detail = fx
            .orders
            .create_order(
                buyer,
                CreateOrderRequest {
                    seller_id: Uuid::new_v4(),
                    items: vec![CreateOrderItem {
                        product_id: Uuid::new_v4(),
                        quantity: 1,
                        unit_price: dec!(9.99),
                    }],
                },
            )
            .await
            .unwrap();

        let result = fx
            .refunds
            .refund_order(&detail.order.order_number, buyer)
            .await;
        assert!(matches!(result, Err(ServiceError::IneligibleForRefund(_))));
    }

    #[tokio::test]
    async fn refund_item_on_cancelled_order_is_ineligible() {
        let fx = build_services().await;
        let buyer = Uuid::new_v4();
        let product = Uuid::new_v4();
        let detail = fx
            .orders
            .create_order(
                buyer,
                CreateOrderRequest {
                    seller_id: Uuid::new_v4(),
                    items: vec![CreateOrderItem {
                        product_id: product,
                        quantity: 1,
                        unit_price: dec!(4.00),
                    }],
                },
            )
            .await
            .unwrap();
        fx.orders
            .cancel_order(&detail.order.order_number, buyer)
            .await
            .unwrap();

        let result = fx
            .refunds
            .refund_item(&detail.order.order_number, buyer, product)
            .await;
        assert!(matches!(result, Err(ServiceError::IneligibleForRefund(_))));
    }

    #[tokio::test]
    async fn refund_item_twice_reports_item_not_found() {
        let fx = build_services().await;
        let buyer = Uuid::new_v4();
        let placed = place_paid_order(&fx, buyer, Uuid::new_v4()).await;

        fx.refunds
            .refund_item(&placed.order_number, buyer, placed.product_a)
            .await
            .unwrap();
        let second = fx
            .refunds
            .refund_item(&placed.order_number, buyer, placed.product_a)
            .await;
        assert!(matches!(second, Err(ServiceError::ItemNotFound(_))));

        let unknown = fx
            .refunds
            .refund_item(&placed.order_number, buyer, Uuid::new_v4())
            .await;
        assert!(matches!(unknown, Err(ServiceError::ItemNotFound(_))));
    }

    #[tokio::test]
    async fn refund_by_wrong_buyer_is_unauthorized() {
        let fx = build_services().await;
        let buyer = Uuid::new_v4();
        let placed = place_paid_order(&fx, buyer, Uuid::new_v4()).await;

        let result = fx
            .refunds
            .refund_order(&placed.order_number, Uuid::new_v4())
            .await;
        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));

        let result = fx
            .refunds
            .refund_item(&placed.order_number, Uuid::new_v4(), placed.product_a)
            .await;
        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn refunded_order_listing_excludes_partial_refunds() {
        let fx = build_services().await;
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();

        // One order with a partial item refund, still PAID.
        let partial = place_paid_order(&fx, buyer, seller).await;
        fx.refunds
            .refund_item(&partial.order_number, buyer, partial.product_a)
            .await
            .unwrap();

        // One fully refunded order.
        let full = place_paid_order(&fx, buyer, seller).await;
        fx.refunds
            .refund_order(&full.order_number, buyer)
            .await
            .unwrap();

        let refunded = fx
            .refunds
            .list_refunded_orders(OrderScope::Buyer(buyer), 1, 10)
            .await
            .unwrap();
        assert_eq!(refunded.total, 1);
        assert_eq!(refunded.orders[0].order_number, full.order_number);
        assert_eq!(refunded.orders[0].status, OrderStatus::Refunded);

        // Both orders contain refunded items.
        let with_items = fx
            .refunds
            .list_orders_with_refunded_items(OrderFilter {
                scope: OrderScope::Buyer(buyer),
                status: None,
                page: 1,
                size: 10,
            })
            .await
            .unwrap();
        assert_eq!(with_items.total, 2);
    }

    #[tokio::test]
    async fn stale_snapshot_refund_is_rejected_as_conflict() {
        let fx = build_services().await;
        let buyer = Uuid::new_v4();
        let placed = place_paid_order(&fx, buyer, Uuid::new_v4()).await;

        // Snapshot the PAID row, then let a concurrent refund win the race.
        let snapshot = fx.orders.find_order(&placed.order_number).await.unwrap();
        fx.refunds
            .refund_order(&placed.order_number, buyer)
            .await
            .unwrap();

        let result = fx.refunds.apply_order_refund(&snapshot).await;
        assert!(matches!(result, Err(ServiceError::Conflict(_))));

        // The winner's version survives; the loser wrote nothing.
        let current = fx.orders.find_order(&placed.order_number).await.unwrap();
        assert_eq!(current.status, OrderStatus::Refunded);
        assert_eq!(current.version, snapshot.version + 1);
    }
}
