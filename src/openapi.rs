use axum::Json;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::handlers;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "storefront-api",
        description = "Order lifecycle, partial refunds, and product reviews"
    ),
    paths(
        handlers::orders::create_order,
        handlers::orders::list_orders,
        handlers::orders::list_refunded_orders,
        handlers::orders::list_seller_orders,
        handlers::orders::count_seller_orders,
        handlers::orders::get_order,
        handlers::orders::pay_order,
        handlers::orders::cancel_order,
        handlers::orders::ship_order,
        handlers::orders::confirm_receipt,
        handlers::orders::refund_order,
        handlers::orders::refund_item,
        handlers::reviews::submit_review,
        handlers::reviews::upload_review_image,
        handlers::reviews::check_reviewed,
        handlers::reviews::list_product_reviews,
        handlers::reviews::review_summary,
    ),
    components(schemas(
        crate::entities::order::OrderStatus,
        crate::errors::ErrorResponse,
        crate::services::orders::CreateOrderRequest,
        crate::services::orders::CreateOrderItem,
        crate::services::orders::OrderResponse,
        crate::services::orders::OrderItemResponse,
        crate::services::orders::OrderDetailResponse,
        crate::services::orders::OrderListResponse,
        crate::services::reviews::SubmitReviewRequest,
        crate::services::reviews::ReviewResponse,
        crate::services::reviews::ReviewListResponse,
        crate::services::reviews::ReviewSummaryResponse,
        handlers::orders::PayOrderRequest,
        handlers::orders::RefundItemRequest,
        handlers::orders::SellerOrderCountResponse,
        handlers::reviews::ReviewCheckResponse,
        handlers::reviews::SubmittedReviewResponse,
        handlers::reviews::UploadedImageResponse,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "orders", description = "Order lifecycle and refunds"),
        (name = "reviews", description = "Product reviews"),
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_contains_order_and_review_paths() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_string(&doc).expect("serialize openapi document");
        assert!(json.contains("/api/v1/orders/{order_number}/refund-item"));
        assert!(json.contains("/api/v1/reviews/{product_id}/summary"));
        assert!(json.contains("Bearer"));
    }
}
