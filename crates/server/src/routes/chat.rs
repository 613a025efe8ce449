//! Routes for the hosted messaging service: conversation provisioning
//! and the thin token-issuance proxy.

use axum::{Router, extract::State, response::Json as ResponseJson, routing::post};
use serde::{Deserialize, Serialize};
use services::services::chat::{ChatToken, ProvisionRequest, ProvisionedChannel};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

/// POST /api/chat/provision
/// Ensures the buyer/seller conversation for a listing exists.
pub async fn provision_channel(
    State(state): State<AppState>,
    axum::Json(payload): axum::Json<ProvisionRequest>,
) -> Result<ResponseJson<ApiResponse<ProvisionedChannel>>, ApiError> {
    let channel = state.chat_provisioner.provision(&payload).await?;
    Ok(ResponseJson(ApiResponse::success(channel)))
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct TokenRequest {
    pub user_id: String,
}

/// POST /api/chat/token
/// Proxies token issuance so the service credentials never reach the
/// browser.
pub async fn issue_token(
    State(state): State<AppState>,
    axum::Json(payload): axum::Json<TokenRequest>,
) -> Result<ResponseJson<ApiResponse<ChatToken>>, ApiError> {
    if payload.user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id must not be empty".to_string()));
    }

    let token = state.chat.issue_token(&payload.user_id).await?;
    Ok(ResponseJson(ApiResponse::success(token)))
}

pub fn router() -> Router<AppState> {
    Router::new().nest(
        "/chat",
        Router::new()
            .route("/provision", post(provision_channel))
            .route("/token", post(issue_token)),
    )
}
