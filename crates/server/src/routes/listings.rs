//! Listing surfaces: feed, search, category browse, detail, seller
//! profile, and the admin panel. Every collection route funnels its
//! join rows through `aggregate`.

use std::str::FromStr;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, put},
};
use db::{
    aggregate::{AggregatedListing, aggregate},
    models::{
        listing::{Category, CreateListing, Listing, ListingFilters, ListingStatus, UpdateListing},
        listing_image::ListingImage,
    },
};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

/// GET /api/listings
/// Home feed: active listings, newest first
pub async fn get_listings(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<AggregatedListing>>>, ApiError> {
    let rows = Listing::find_active_with_images(&state.db.pool).await?;
    Ok(ResponseJson(ApiResponse::success(aggregate(rows))))
}

/// GET /api/listings/search
pub async fn search_listings(
    State(state): State<AppState>,
    Query(filters): Query<ListingFilters>,
) -> Result<ResponseJson<ApiResponse<Vec<AggregatedListing>>>, ApiError> {
    let rows = Listing::search_with_images(&state.db.pool, &filters).await?;
    Ok(ResponseJson(ApiResponse::success(aggregate(rows))))
}

/// GET /api/listings/category/{category}
pub async fn get_listings_by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<ResponseJson<ApiResponse<Vec<AggregatedListing>>>, ApiError> {
    let category = Category::from_str(&category)
        .map_err(|_| ApiError::BadRequest(format!("unknown category: {category}")))?;

    let rows = Listing::find_by_category_with_images(&state.db.pool, category).await?;
    Ok(ResponseJson(ApiResponse::success(aggregate(rows))))
}

/// GET /api/listings/{id}
pub async fn get_listing(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<ResponseJson<ApiResponse<AggregatedListing>>, ApiError> {
    let listing = Listing::find_by_id_with_images(&state.db.pool, id)
        .await?
        .ok_or(ApiError::NotFound("listing"))?;
    Ok(ResponseJson(ApiResponse::success(listing)))
}

/// GET /api/sellers/{seller_id}/listings
/// Profile page: everything one seller has posted
pub async fn get_seller_listings(
    State(state): State<AppState>,
    Path(seller_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<Vec<AggregatedListing>>>, ApiError> {
    let rows = Listing::find_by_seller_with_images(&state.db.pool, &seller_id).await?;
    Ok(ResponseJson(ApiResponse::success(aggregate(rows))))
}

/// POST /api/listings
pub async fn create_listing(
    State(state): State<AppState>,
    axum::Json(payload): axum::Json<CreateListing>,
) -> Result<ResponseJson<ApiResponse<AggregatedListing>>, ApiError> {
    let listing = Listing::create(&state.db.pool, &payload).await?;

    if let Some(urls) = &payload.image_urls {
        ListingImage::create_many(&state.db.pool, listing.id, urls).await?;
    }

    let aggregated = Listing::find_by_id_with_images(&state.db.pool, listing.id)
        .await?
        .ok_or(ApiError::NotFound("listing"))?;

    tracing::info!(listing_id = listing.id, "listing created");

    Ok(ResponseJson(ApiResponse::success(aggregated)))
}

/// PUT /api/listings/{id}
/// Partial field update; when `image_urls` is present the photo set is
/// replaced wholesale.
pub async fn update_listing(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    axum::Json(payload): axum::Json<UpdateListing>,
) -> Result<ResponseJson<ApiResponse<AggregatedListing>>, ApiError> {
    Listing::update(&state.db.pool, id, &payload)
        .await?
        .ok_or(ApiError::NotFound("listing"))?;

    if let Some(urls) = &payload.image_urls {
        ListingImage::delete_by_listing_id(&state.db.pool, id).await?;
        ListingImage::create_many(&state.db.pool, id, urls).await?;
    }

    let aggregated = Listing::find_by_id_with_images(&state.db.pool, id)
        .await?
        .ok_or(ApiError::NotFound("listing"))?;

    Ok(ResponseJson(ApiResponse::success(aggregated)))
}

/// DELETE /api/listings/{id}
pub async fn delete_listing(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let deleted = Listing::delete(&state.db.pool, id).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("listing"));
    }

    tracing::info!(listing_id = id, "listing deleted");

    Ok(ResponseJson(ApiResponse::success(())))
}

/// GET /api/admin/listings
/// Admin panel: all listings regardless of status
pub async fn get_all_listings(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<AggregatedListing>>>, ApiError> {
    let rows = Listing::find_all_with_images(&state.db.pool).await?;
    Ok(ResponseJson(ApiResponse::success(aggregate(rows))))
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UpdateStatusRequest {
    pub status: ListingStatus,
}

/// PUT /api/admin/listings/{id}/status
pub async fn update_listing_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    axum::Json(payload): axum::Json<UpdateStatusRequest>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let updated = Listing::update_status(&state.db.pool, id, payload.status.clone()).await?;
    if updated == 0 {
        return Err(ApiError::NotFound("listing"));
    }

    tracing::info!(listing_id = id, status = %payload.status, "listing status changed");

    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .nest(
            "/listings",
            Router::new()
                .route("/", get(get_listings).post(create_listing))
                .route("/search", get(search_listings))
                .route("/category/{category}", get(get_listings_by_category))
                .route(
                    "/{id}",
                    get(get_listing).put(update_listing).delete(delete_listing),
                ),
        )
        .route("/sellers/{seller_id}/listings", get(get_seller_listings))
        .nest(
            "/admin/listings",
            Router::new()
                .route("/", get(get_all_listings))
                .route("/{id}/status", put(update_listing_status)),
        )
}
