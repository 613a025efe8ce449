//! Image upload route: accepts a base64 payload and hands back the
//! hosted URL, which listing create/update calls then persist.

use axum::{Router, extract::State, response::Json as ResponseJson, routing::post};
use serde::{Deserialize, Serialize};
use services::services::media::UploadedMedia;
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UploadRequest {
    /// Base64-encoded image bytes, as submitted by the browser.
    pub data: String,
    pub file_name: String,
}

/// POST /api/media
pub async fn upload_image(
    State(state): State<AppState>,
    axum::Json(payload): axum::Json<UploadRequest>,
) -> Result<ResponseJson<ApiResponse<UploadedMedia>>, ApiError> {
    if payload.data.is_empty() {
        return Err(ApiError::BadRequest("data must not be empty".to_string()));
    }

    let media = state
        .media
        .upload_base64(&payload.data, &payload.file_name)
        .await?;

    Ok(ResponseJson(ApiResponse::success(media)))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/media", post(upload_image))
}
