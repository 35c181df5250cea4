use std::path::Path as FsPath;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::services::reviews::{
    ReviewListResponse, ReviewSummaryResponse, SubmitReviewRequest,
};
use crate::{ApiResponse, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reviews", post(submit_review))
        .route("/reviews/images", post(upload_review_image))
        .route("/reviews/check", get(check_reviewed))
        .route("/reviews/:product_id", get(list_product_reviews))
        .route("/reviews/:product_id/summary", get(review_summary))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReviewListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_size")]
    pub size: u64,
}

fn default_page() -> u64 {
    1
}
fn default_size() -> u64 {
    20
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReviewCheckQuery {
    pub order_number: String,
    pub product_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReviewCheckResponse {
    pub order_number: String,
    pub product_id: Uuid,
    pub reviewed: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubmittedReviewResponse {
    pub review_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadedImageResponse {
    pub path: String,
}

/// Submit a product review
#[utoipa::path(
    post,
    path = "/api/v1/reviews",
    request_body = SubmitReviewRequest,
    responses(
        (status = 201, description = "Review submitted", body = ApiResponse<SubmittedReviewResponse>),
        (status = 400, description = "Invalid rating", body = crate::errors::ErrorResponse),
        (status = 409, description = "Already reviewed", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn submit_review(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<SubmitReviewRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SubmittedReviewResponse>>), ServiceError> {
    let review_id = state
        .services
        .reviews
        .submit_review(auth_user.user_id, request)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(SubmittedReviewResponse { review_id })),
    ))
}

/// Upload one review image (multipart: order_number, product_id, index, image)
#[utoipa::path(
    post,
    path = "/api/v1/reviews/images",
    responses(
        (status = 201, description = "Image stored", body = ApiResponse<UploadedImageResponse>),
        (status = 400, description = "Invalid upload", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = []))
)]
pub async fn upload_review_image(
    State(state): State<AppState>,
    auth_user: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<UploadedImageResponse>>), ServiceError> {
    let mut order_number: Option<String> = None;
    let mut product_id: Option<Uuid> = None;
    let mut image_index: u32 = 0;
    let mut image: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::ValidationError(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("order_number") => {
                order_number = Some(field.text().await.map_err(|e| {
                    ServiceError::ValidationError(format!("Invalid order_number field: {}", e))
                })?);
            }
            Some("product_id") => {
                let raw = field.text().await.map_err(|e| {
                    ServiceError::ValidationError(format!("Invalid product_id field: {}", e))
                })?;
                product_id = Some(Uuid::parse_str(&raw).map_err(|_| {
                    ServiceError::ValidationError(format!("Not a valid product id: {}", raw))
                })?);
            }
            Some("index") => {
                let raw = field.text().await.map_err(|e| {
                    ServiceError::ValidationError(format!("Invalid index field: {}", e))
                })?;
                image_index = raw.parse().map_err(|_| {
                    ServiceError::ValidationError(format!("Not a valid image index: {}", raw))
                })?;
            }
            Some("image") => {
                let extension = field
                    .file_name()
                    .and_then(|file_name| FsPath::new(file_name).extension())
                    .and_then(|ext| ext.to_str())
                    .unwrap_or("jpg")
                    .to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    ServiceError::ValidationError(format!("Failed to read image field: {}", e))
                })?;
                image = Some((extension, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let order_number = order_number.ok_or_else(|| {
        ServiceError::ValidationError("Missing order_number field".to_string())
    })?;
    let product_id = product_id
        .ok_or_else(|| ServiceError::ValidationError("Missing product_id field".to_string()))?;
    let (extension, bytes) =
        image.ok_or_else(|| ServiceError::ValidationError("Missing image field".to_string()))?;

    let path = state
        .services
        .reviews
        .store_review_image(
            auth_user.user_id,
            product_id,
            &order_number,
            image_index,
            &extension,
            &bytes,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(UploadedImageResponse { path })),
    ))
}

/// Whether the caller already reviewed this product from this order
#[utoipa::path(
    get,
    path = "/api/v1/reviews/check",
    params(
        ("order_number" = String, Query, description = "External order number"),
        ("product_id" = Uuid, Query, description = "Product to check"),
    ),
    responses(
        (status = 200, description = "Check result", body = ApiResponse<ReviewCheckResponse>),
    ),
    security(("Bearer" = []))
)]
pub async fn check_reviewed(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<ReviewCheckQuery>,
) -> Result<Json<ApiResponse<ReviewCheckResponse>>, ServiceError> {
    let reviewed = state
        .services
        .reviews
        .has_reviewed(auth_user.user_id, &query.order_number, query.product_id)
        .await?;
    Ok(Json(ApiResponse::success(ReviewCheckResponse {
        order_number: query.order_number,
        product_id: query.product_id,
        reviewed,
    })))
}

/// List a product's reviews, newest first
#[utoipa::path(
    get,
    path = "/api/v1/reviews/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product identifier")),
    responses(
        (status = 200, description = "Reviews retrieved", body = ApiResponse<ReviewListResponse>),
    ),
    security(("Bearer" = []))
)]
pub async fn list_product_reviews(
    State(state): State<AppState>,
    _auth_user: AuthUser,
    Path(product_id): Path<Uuid>,
    Query(query): Query<ReviewListQuery>,
) -> Result<Json<ApiResponse<ReviewListResponse>>, ServiceError> {
    let result = state
        .services
        .reviews
        .get_product_reviews(product_id, query.page, query.size)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

/// Rating summary for a product
#[utoipa::path(
    get,
    path = "/api/v1/reviews/{product_id}/summary",
    params(("product_id" = Uuid, Path, description = "Product identifier")),
    responses(
        (status = 200, description = "Summary retrieved", body = ApiResponse<ReviewSummaryResponse>),
    ),
    security(("Bearer" = []))
)]
pub async fn review_summary(
    State(state): State<AppState>,
    _auth_user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> Result<Json<ApiResponse<ReviewSummaryResponse>>, ServiceError> {
    let summary = state.services.reviews.get_review_summary(product_id).await?;
    Ok(Json(ApiResponse::success(summary)))
}
