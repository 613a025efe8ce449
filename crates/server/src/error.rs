use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use services::services::{
    chat::{ChatApiError, ChatProvisionError},
    media::MediaApiError,
};
use thiserror::Error;
use tracing::error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    ChatApi(#[from] ChatApiError),
    #[error(transparent)]
    ChatProvision(#[from] ChatProvisionError),
    #[error(transparent)]
    MediaApi(#[from] MediaApiError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0} not found")]
    NotFound(&'static str),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Database(sqlx::Error::RowNotFound) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ChatApi(_) | Self::ChatProvision(_) | Self::MediaApi(_) => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        (status, Json(ApiResponse::<()>::error(&self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_rows_map_to_not_found() {
        assert_eq!(
            ApiError::Database(sqlx::Error::RowNotFound).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::NotFound("listing").status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn saas_failures_map_to_bad_gateway() {
        assert_eq!(
            ApiError::ChatApi(ChatApiError::Timeout).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::MediaApi(MediaApiError::InvalidApiKey).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn bad_input_maps_to_bad_request() {
        assert_eq!(
            ApiError::BadRequest("unknown category".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
