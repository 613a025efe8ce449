//! Hosted messaging service client and conversation provisioning.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use ts_rs::TS;
use url::Url;

use super::config::ChatConfig;

#[derive(Debug, Clone, Error)]
pub enum ChatApiError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("invalid api token")]
    InvalidApiToken,
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("json error: {0}")]
    Serde(String),
}

impl ChatApiError {
    /// Returns true if the error is transient and should be retried.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

/// A user registered on the messaging service
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ChatUser {
    pub user_id: String,
    pub nickname: Option<String>,
}

/// A buyer/seller conversation channel
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ChatChannel {
    pub channel_url: String,
    pub name: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct CreateChannel {
    channel_url: String,
    name: Option<String>,
    member_ids: Vec<String>,
}

/// Session token minted by the messaging service for one user
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ChatToken {
    pub user_id: String,
    pub token: String,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    expires_at: Option<i64>,
}

/// Messaging service client
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    base_url: Url,
    app_id: String,
    api_token: SecretString,
}

impl ChatClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(config: ChatConfig) -> Result<Self, ChatApiError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("carmarket/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ChatApiError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url,
            app_id: config.app_id,
            api_token: config.api_token,
        })
    }

    pub async fn get_channel(&self, channel_url: &str) -> Result<ChatChannel, ChatApiError> {
        let url = self.endpoint(&format!("/v3/group_channels/{channel_url}"))?;
        self.with_retry(|| async {
            let res = self
                .request(self.http.get(url.clone()))
                .send()
                .await
                .map_err(map_reqwest_error)?;
            Self::read_json(res).await
        })
        .await
    }

    pub async fn create_channel(
        &self,
        channel_url: &str,
        name: Option<&str>,
        member_ids: &[String],
    ) -> Result<ChatChannel, ChatApiError> {
        let url = self.endpoint("/v3/group_channels")?;
        let body = CreateChannel {
            channel_url: channel_url.to_string(),
            name: name.map(str::to_string),
            member_ids: member_ids.to_vec(),
        };
        self.with_retry(|| async {
            let res = self
                .request(self.http.post(url.clone()))
                .json(&body)
                .send()
                .await
                .map_err(map_reqwest_error)?;
            Self::read_json(res).await
        })
        .await
    }

    pub async fn create_user(&self, user: &ChatUser) -> Result<ChatUser, ChatApiError> {
        let url = self.endpoint("/v3/users")?;
        self.with_retry(|| async {
            let res = self
                .request(self.http.post(url.clone()))
                .json(user)
                .send()
                .await
                .map_err(map_reqwest_error)?;
            Self::read_json(res).await
        })
        .await
    }

    /// Mints a session token for one user. The server proxies this for
    /// the browser, which never sees the service credentials.
    pub async fn issue_token(&self, user_id: &str) -> Result<ChatToken, ChatApiError> {
        let url = self.endpoint(&format!("/v3/users/{user_id}/token"))?;
        let response: TokenResponse = self
            .with_retry(|| async {
                let res = self
                    .request(self.http.post(url.clone()))
                    .send()
                    .await
                    .map_err(map_reqwest_error)?;
                Self::read_json(res).await
            })
            .await?;

        Ok(ChatToken {
            user_id: user_id.to_string(),
            token: response.token,
            expires_at: response.expires_at,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ChatApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ChatApiError::Serde(e.to_string()))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Api-Token", self.api_token.expose_secret())
            .header("App-Id", &self.app_id)
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, ChatApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChatApiError>>,
    {
        op.retry(
            &ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(10))
                .with_max_times(3)
                .with_jitter(),
        )
        .when(|e: &ChatApiError| e.should_retry())
        .notify(|e, dur| {
            warn!(
                "chat api call failed, retrying after {:.2}s: {}",
                dur.as_secs_f64(),
                e
            )
        })
        .await
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        res: reqwest::Response,
    ) -> Result<T, ChatApiError> {
        match res.status() {
            s if s.is_success() => res
                .json::<T>()
                .await
                .map_err(|e| ChatApiError::Serde(e.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ChatApiError::InvalidApiToken),
            StatusCode::NOT_FOUND => Err(ChatApiError::NotFound),
            StatusCode::CONFLICT => Err(ChatApiError::AlreadyExists),
            StatusCode::TOO_MANY_REQUESTS => Err(ChatApiError::RateLimited),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(ChatApiError::Http { status, body })
            }
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ChatApiError {
    if e.is_timeout() {
        ChatApiError::Timeout
    } else {
        ChatApiError::Transport(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ChatProvisionError {
    #[error("chat api error: {0}")]
    Api(#[from] ChatApiError),
    #[error("channel {0} disappeared during provisioning")]
    ChannelLost(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ProvisionRequest {
    pub listing_id: i64,
    pub buyer_id: String,
    pub seller_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ProvisionedChannel {
    pub channel_url: String,
    pub created: bool,
}

/// Provisioning walks a fixed path: reuse the channel when it already
/// exists, otherwise register the members and create it, and recover by
/// re-fetching when creation loses a race to a concurrent caller.
#[derive(Debug)]
enum ProvisionStep {
    AttemptFastPath,
    FallbackCreate,
    FallbackRecover,
    Done(ProvisionedChannel),
    Failed(ChatProvisionError),
}

fn after_fast_path(result: Result<ChatChannel, ChatApiError>) -> ProvisionStep {
    match result {
        Ok(channel) => ProvisionStep::Done(ProvisionedChannel {
            channel_url: channel.channel_url,
            created: false,
        }),
        Err(ChatApiError::NotFound) => ProvisionStep::FallbackCreate,
        Err(e) => ProvisionStep::Failed(e.into()),
    }
}

fn after_create(result: Result<ChatChannel, ChatApiError>) -> ProvisionStep {
    match result {
        Ok(channel) => ProvisionStep::Done(ProvisionedChannel {
            channel_url: channel.channel_url,
            created: true,
        }),
        Err(ChatApiError::AlreadyExists) => ProvisionStep::FallbackRecover,
        Err(e) => ProvisionStep::Failed(e.into()),
    }
}

fn after_recover(channel_url: &str, result: Result<ChatChannel, ChatApiError>) -> ProvisionStep {
    match result {
        Ok(channel) => ProvisionStep::Done(ProvisionedChannel {
            channel_url: channel.channel_url,
            created: false,
        }),
        Err(ChatApiError::NotFound) => {
            ProvisionStep::Failed(ChatProvisionError::ChannelLost(channel_url.to_string()))
        }
        Err(e) => ProvisionStep::Failed(e.into()),
    }
}

/// Sets up the buyer/seller conversation for a listing.
#[derive(Debug, Clone)]
pub struct ChatProvisioner {
    client: ChatClient,
}

impl ChatProvisioner {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    /// Deterministic channel identity for one buyer/seller pair on one
    /// listing, so repeated provisioning converges on the same channel.
    fn channel_url_for(request: &ProvisionRequest) -> String {
        format!(
            "listing-{}-{}-{}",
            request.listing_id, request.buyer_id, request.seller_id
        )
    }

    pub async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionedChannel, ChatProvisionError> {
        let channel_url = Self::channel_url_for(request);
        let mut step = ProvisionStep::AttemptFastPath;

        loop {
            step = match step {
                ProvisionStep::AttemptFastPath => {
                    after_fast_path(self.client.get_channel(&channel_url).await)
                }
                ProvisionStep::FallbackCreate => {
                    self.ensure_member(&request.buyer_id).await;
                    self.ensure_member(&request.seller_id).await;

                    let member_ids =
                        vec![request.buyer_id.clone(), request.seller_id.clone()];
                    let name = format!("Listing {}", request.listing_id);
                    after_create(
                        self.client
                            .create_channel(&channel_url, Some(&name), &member_ids)
                            .await,
                    )
                }
                ProvisionStep::FallbackRecover => {
                    after_recover(&channel_url, self.client.get_channel(&channel_url).await)
                }
                ProvisionStep::Done(channel) => {
                    info!(
                        channel_url = %channel.channel_url,
                        created = channel.created,
                        "chat channel provisioned"
                    );
                    return Ok(channel);
                }
                ProvisionStep::Failed(error) => return Err(error),
            };
        }
    }

    /// Registers a user on the messaging service. Already-registered is
    /// the common case; any other failure is logged and provisioning
    /// continues, since the channel creation step will surface a real
    /// problem on its own.
    async fn ensure_member(&self, user_id: &str) {
        let user = ChatUser {
            user_id: user_id.to_string(),
            nickname: None,
        };
        match self.client.create_user(&user).await {
            Ok(_) | Err(ChatApiError::AlreadyExists) => {}
            Err(e) => {
                warn!(user_id, error = %e, "chat member registration failed, continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(url: &str) -> ChatChannel {
        ChatChannel {
            channel_url: url.to_string(),
            name: None,
            member_ids: vec![],
        }
    }

    #[test]
    fn fast_path_hit_reuses_channel() {
        let step = after_fast_path(Ok(channel("c1")));
        assert!(matches!(
            step,
            ProvisionStep::Done(ProvisionedChannel { created: false, .. })
        ));
    }

    #[test]
    fn fast_path_miss_falls_back_to_create() {
        let step = after_fast_path(Err(ChatApiError::NotFound));
        assert!(matches!(step, ProvisionStep::FallbackCreate));
    }

    #[test]
    fn fast_path_hard_failure_is_terminal() {
        let step = after_fast_path(Err(ChatApiError::InvalidApiToken));
        assert!(matches!(
            step,
            ProvisionStep::Failed(ChatProvisionError::Api(ChatApiError::InvalidApiToken))
        ));
    }

    #[test]
    fn create_conflict_recovers_existing_channel() {
        let step = after_create(Err(ChatApiError::AlreadyExists));
        assert!(matches!(step, ProvisionStep::FallbackRecover));
    }

    #[test]
    fn create_success_reports_new_channel() {
        let step = after_create(Ok(channel("c1")));
        assert!(matches!(
            step,
            ProvisionStep::Done(ProvisionedChannel { created: true, .. })
        ));
    }

    #[test]
    fn recover_miss_is_terminal() {
        let step = after_recover("c1", Err(ChatApiError::NotFound));
        assert!(matches!(
            step,
            ProvisionStep::Failed(ChatProvisionError::ChannelLost(_))
        ));
    }

    #[test]
    fn channel_identity_is_deterministic() {
        let request = ProvisionRequest {
            listing_id: 7,
            buyer_id: "buyer".to_string(),
            seller_id: "seller".to_string(),
        };
        assert_eq!(
            ChatProvisioner::channel_url_for(&request),
            "listing-7-buyer-seller"
        );
        assert_eq!(
            ChatProvisioner::channel_url_for(&request),
            ChatProvisioner::channel_url_for(&request.clone())
        );
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(
            ChatApiError::Http {
                status: 503,
                body: String::new()
            }
            .should_retry()
        );
        assert!(ChatApiError::RateLimited.should_retry());
        assert!(!ChatApiError::NotFound.should_retry());
        assert!(
            !ChatApiError::Http {
                status: 400,
                body: String::new()
            }
            .should_retry()
        );
    }
}
