use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use crate::services::orders::{
    CreateOrderRequest, OrderDetailResponse, OrderFilter, OrderListResponse, OrderResponse,
    OrderScope,
};
use crate::{ApiResponse, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/refunded", get(list_refunded_orders))
        .route("/orders/seller", get(list_seller_orders))
        .route("/orders/seller/count", get(count_seller_orders))
        .route("/orders/:order_number", get(get_order))
        .route("/orders/:order_number/pay", post(pay_order))
        .route("/orders/:order_number/cancel", post(cancel_order))
        .route("/orders/:order_number/ship", post(ship_order))
        .route("/orders/:order_number/confirm", post(confirm_receipt))
        .route("/orders/:order_number/refund", post(refund_order))
        .route("/orders/:order_number/refund-item", post(refund_item))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OrderListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_size")]
    pub size: u64,
    pub status: Option<OrderStatus>,
    /// When true, returns orders containing at least one refunded item.
    #[serde(default)]
    pub refunded_items: bool,
}

fn default_page() -> u64 {
    1
}
fn default_size() -> u64 {
    20
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PayOrderRequest {
    pub payment_method: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefundItemRequest {
    pub product_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SellerOrderCountResponse {
    pub seller_id: Uuid,
    pub status: Option<OrderStatus>,
    pub count: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SellerCountQuery {
    pub status: Option<OrderStatus>,
}

/// Create a new order
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderDetailResponse>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderDetailResponse>>), ServiceError> {
    let detail = state
        .services
        .orders
        .create_order(auth_user.user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(detail))))
}

/// List the caller's orders as a buyer
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(
        ("page" = Option<u64>, Query, description = "Page number (1-based)"),
        ("size" = Option<u64>, Query, description = "Items per page"),
        ("status" = Option<String>, Query, description = "Filter by order status"),
        ("refunded_items" = Option<bool>, Query, description = "Only orders containing refunded items"),
    ),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<OrderListResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn list_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<ApiResponse<OrderListResponse>>, ServiceError> {
    let filter = OrderFilter {
        scope: OrderScope::Buyer(auth_user.user_id),
        status: query.status,
        page: query.page,
        size: query.size,
    };

    let result = if query.refunded_items {
        state
            .services
            .refunds
            .list_orders_with_refunded_items(filter)
            .await?
    } else {
        state.services.orders.list_orders(filter).await?
    };

    Ok(Json(ApiResponse::success(result)))
}

/// List the caller's orders whose status is refunded
#[utoipa::path(
    get,
    path = "/api/v1/orders/refunded",
    responses(
        (status = 200, description = "Refunded orders retrieved", body = ApiResponse<OrderListResponse>),
    ),
    security(("Bearer" = []))
)]
pub async fn list_refunded_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<ApiResponse<OrderListResponse>>, ServiceError> {
    let result = state
        .services
        .refunds
        .list_refunded_orders(OrderScope::Buyer(auth_user.user_id), query.page, query.size)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

/// List the caller's orders as a seller
#[utoipa::path(
    get,
    path = "/api/v1/orders/seller",
    responses(
        (status = 200, description = "Seller orders retrieved", body = ApiResponse<OrderListResponse>),
    ),
    security(("Bearer" = []))
)]
pub async fn list_seller_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> Result<Json<ApiResponse<OrderListResponse>>, ServiceError> {
    let filter = OrderFilter {
        scope: OrderScope::Seller(auth_user.user_id),
        status: query.status,
        page: query.page,
        size: query.size,
    };

    let result = if query.refunded_items {
        state
            .services
            .refunds
            .list_orders_with_refunded_items(filter)
            .await?
    } else {
        state.services.orders.list_orders(filter).await?
    };

    Ok(Json(ApiResponse::success(result)))
}

/// Count the caller's seller orders, optionally per status
#[utoipa::path(
    get,
    path = "/api/v1/orders/seller/count",
    params(("status" = Option<String>, Query, description = "Restrict to one status")),
    responses(
        (status = 200, description = "Count retrieved", body = ApiResponse<SellerOrderCountResponse>),
    ),
    security(("Bearer" = []))
)]
pub async fn count_seller_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<SellerCountQuery>,
) -> Result<Json<ApiResponse<SellerOrderCountResponse>>, ServiceError> {
    let count = state
        .services
        .orders
        .count_seller_orders(auth_user.user_id, query.status)
        .await?;
    Ok(Json(ApiResponse::success(SellerOrderCountResponse {
        seller_id: auth_user.user_id,
        status: query.status,
        count,
    })))
}

/// Get one order with its items
#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_number}",
    params(("order_number" = String, Path, description = "External order number")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderDetailResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn get_order(
    State(state): State<AppState>,
    _auth_user: AuthUser,
    Path(order_number): Path<String>,
) -> Result<Json<ApiResponse<OrderDetailResponse>>, ServiceError> {
    let detail = state.services.orders.get_order_detail(&order_number).await?;
    Ok(Json(ApiResponse::success(detail)))
}

/// Pay an order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_number}/pay",
    request_body = PayOrderRequest,
    responses(
        (status = 200, description = "Order paid", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Order already paid", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn pay_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(order_number): Path<String>,
    Json(request): Json<PayOrderRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .pay_order(&order_number, auth_user.user_id, request.payment_method)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Cancel an order before payment
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_number}/cancel",
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Order already paid", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(order_number): Path<String>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .cancel_order(&order_number, auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Ship a paid order (seller only)
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_number}/ship",
    responses(
        (status = 200, description = "Order shipped", body = ApiResponse<OrderResponse>),
        (status = 401, description = "Not the owning seller", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn ship_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(order_number): Path<String>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .ship_order(&order_number, auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Confirm receipt of a shipped order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_number}/confirm",
    responses(
        (status = 200, description = "Receipt confirmed", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Invalid transition", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn confirm_receipt(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(order_number): Path<String>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .confirm_receipt(&order_number, auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Refund a whole order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_number}/refund",
    responses(
        (status = 200, description = "Order refunded", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Order not eligible for refund", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn refund_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(order_number): Path<String>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .refunds
        .refund_order(&order_number, auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Refund a single item of an order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_number}/refund-item",
    request_body = RefundItemRequest,
    responses(
        (status = 200, description = "Item refunded", body = ApiResponse<String>),
        (status = 404, description = "No matching unrefunded item", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn refund_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(order_number): Path<String>,
    Json(request): Json<RefundItemRequest>,
) -> Result<Json<ApiResponse<String>>, ServiceError> {
    state
        .services
        .refunds
        .refund_item(&order_number, auth_user.user_id, request.product_id)
        .await?;
    Ok(Json(ApiResponse::success("Item refunded".to_string())))
}
