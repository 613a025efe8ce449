//! Hosted image service client.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use ts_rs::TS;
use url::Url;

use super::config::MediaConfig;

#[derive(Debug, Clone, Error)]
pub enum MediaApiError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("payload rejected: {0}")]
    Rejected(String),
    #[error("json error: {0}")]
    Serde(String),
}

impl MediaApiError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// A stored image as reported by the hosting service. `url` is what
/// listing image rows persist.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UploadedMedia {
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub delete_hash: Option<String>,
}

#[derive(Debug, Serialize)]
struct UploadBody {
    image: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
    thumbnail_url: Option<String>,
    delete_hash: Option<String>,
}

/// Image hosting client
#[derive(Debug, Clone)]
pub struct MediaClient {
    http: Client,
    base_url: Url,
    api_key: SecretString,
}

impl MediaClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(config: MediaConfig) -> Result<Self, MediaApiError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("carmarket/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MediaApiError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url,
            api_key: config.api_key,
        })
    }

    /// Uploads raw image bytes and returns the hosted location.
    pub async fn upload(&self, bytes: &[u8], name: &str) -> Result<UploadedMedia, MediaApiError> {
        self.upload_base64(&STANDARD.encode(bytes), name).await
    }

    /// Uploads an already base64-encoded payload, the form browser
    /// clients submit directly.
    pub async fn upload_base64(
        &self,
        encoded: &str,
        name: &str,
    ) -> Result<UploadedMedia, MediaApiError> {
        let url = self.endpoint("/3/image")?;
        let body = UploadBody {
            image: encoded.to_string(),
            name: sanitize_name(name),
        };

        let response: UploadResponse = self
            .with_retry(|| async {
                let res = self
                    .http
                    .post(url.clone())
                    .header(
                        "Authorization",
                        format!("Client-ID {}", self.api_key.expose_secret()),
                    )
                    .json(&body)
                    .send()
                    .await
                    .map_err(map_reqwest_error)?;
                Self::read_json(res).await
            })
            .await?;

        info!(url = %response.url, "image uploaded");

        Ok(UploadedMedia {
            url: response.url,
            thumbnail_url: response.thumbnail_url,
            delete_hash: response.delete_hash,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, MediaApiError> {
        self.base_url
            .join(path)
            .map_err(|e| MediaApiError::Serde(e.to_string()))
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, MediaApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MediaApiError>>,
    {
        op.retry(
            &ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(10))
                .with_max_times(3)
                .with_jitter(),
        )
        .when(|e: &MediaApiError| e.should_retry())
        .notify(|e, dur| {
            warn!(
                "media upload failed, retrying after {:.2}s: {}",
                dur.as_secs_f64(),
                e
            )
        })
        .await
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        res: reqwest::Response,
    ) -> Result<T, MediaApiError> {
        match res.status() {
            s if s.is_success() => res
                .json::<T>()
                .await
                .map_err(|e| MediaApiError::Serde(e.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(MediaApiError::InvalidApiKey),
            StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE
            | StatusCode::UNSUPPORTED_MEDIA_TYPE => {
                let body = res.text().await.unwrap_or_default();
                Err(MediaApiError::Rejected(body))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(MediaApiError::RateLimited),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(MediaApiError::Http { status, body })
            }
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> MediaApiError {
    if e.is_timeout() {
        MediaApiError::Timeout
    } else {
        MediaApiError::Transport(e.to_string())
    }
}

/// Keeps only characters the hosting service accepts in display names.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        assert!(
            MediaApiError::Http {
                status: 502,
                body: String::new()
            }
            .should_retry()
        );
        assert!(MediaApiError::RateLimited.should_retry());
        assert!(!MediaApiError::InvalidApiKey.should_retry());
        assert!(!MediaApiError::Rejected(String::new()).should_retry());
    }

    #[test]
    fn names_are_sanitized_for_the_host() {
        assert_eq!(sanitize_name("my car.jpg"), "my_car.jpg");
        assert_eq!(sanitize_name("söld?.png"), "s_ld_.png");
        assert_eq!(sanitize_name("front-left_2.jpeg"), "front-left_2.jpeg");
    }

    #[test]
    fn empty_names_fall_back_to_a_placeholder() {
        assert_eq!(sanitize_name(""), "upload");
    }
}
