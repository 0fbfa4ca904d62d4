//! REST client for the dashboard endpoints the sync engine consumes.
//!
//! [`DashboardApi`] is the seam the engine and the Pusher transport talk to;
//! [`JobdeskClient`] is the `reqwest` implementation.

use async_trait::async_trait;
use std::time::Duration;

use crate::{
    auth::Credential,
    error::{LinkError, Result},
    models::{
        ChannelAuthResponse, NotificationSettings, NotificationSettingsResponse,
        UnreadCountResponse,
    },
    timeouts::LinkTimeouts,
};

pub const UNREAD_COUNT_PATH: &str = "/conversations/unread-count";
pub const NOTIFICATION_SETTINGS_PATH: &str = "/notification-settings";
pub const CHANNEL_AUTH_PATH: &str = "/broadcasting/auth";

/// Authoritative REST endpoints used by the engine.
#[async_trait]
pub trait DashboardApi: Send + Sync {
    /// Total unread direct messages for the credential's user.
    async fn fetch_unread_count(&self, credential: &Credential) -> Result<u64>;

    /// In-app notification preferences.
    async fn fetch_notification_settings(
        &self,
        credential: &Credential,
    ) -> Result<NotificationSettings>;

    /// Sign a private channel subscription for `socket_id`.
    ///
    /// `wire_channel` is the full Pusher name (`private-user.<id>`).
    async fn authorize_channel(
        &self,
        credential: &Credential,
        socket_id: &str,
        wire_channel: &str,
    ) -> Result<ChannelAuthResponse>;
}

/// `reqwest`-backed [`DashboardApi`].
///
/// # Examples
///
/// ```rust,no_run
/// use jobdesk_link::{JobdeskClient, LinkTimeouts};
///
/// # fn example() -> jobdesk_link::Result<()> {
/// let client = JobdeskClient::builder()
///     .base_url("https://api.jobdesk.example/api")
///     .timeouts(LinkTimeouts::fast())
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct JobdeskClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl JobdeskClient {
    pub fn builder() -> JobdeskClientBuilder {
        JobdeskClientBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        credential: &Credential,
    ) -> Result<T> {
        let url = self.url(path);
        log::debug!("[jobdesk-link] GET {}", url);
        let start = std::time::Instant::now();
        let response = credential
            .apply_to_request(self.http_client.get(&url))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        log::debug!(
            "[jobdesk-link] GET {} -> {} in {:?}",
            path,
            response.status(),
            start.elapsed()
        );
        read_json(path, response).await
    }
}

/// Decode a JSON body, mapping auth and HTTP failures.
async fn read_json<T: serde::de::DeserializeOwned>(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(LinkError::AuthenticationError(format!(
            "{} rejected the credential ({})",
            endpoint, status
        )));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            format!("HTTP {}: {}", status.as_u16(), body)
        };
        return Err(LinkError::fetch(endpoint, message));
    }

    let text = response.text().await?;
    serde_json::from_str(&text)
        .map_err(|e| LinkError::fetch(endpoint, format!("invalid response body: {}", e)))
}

#[async_trait]
impl DashboardApi for JobdeskClient {
    async fn fetch_unread_count(&self, credential: &Credential) -> Result<u64> {
        let response: UnreadCountResponse = self.get_json(UNREAD_COUNT_PATH, credential).await?;
        response.unread().ok_or_else(|| {
            LinkError::fetch(
                UNREAD_COUNT_PATH,
                response
                    .message
                    .clone()
                    .unwrap_or_else(|| "success=false".to_string()),
            )
        })
    }

    async fn fetch_notification_settings(
        &self,
        credential: &Credential,
    ) -> Result<NotificationSettings> {
        let response: NotificationSettingsResponse =
            self.get_json(NOTIFICATION_SETTINGS_PATH, credential).await?;
        response.settings().ok_or_else(|| {
            LinkError::fetch(
                NOTIFICATION_SETTINGS_PATH,
                response
                    .message
                    .clone()
                    .unwrap_or_else(|| "success=false".to_string()),
            )
        })
    }

    async fn authorize_channel(
        &self,
        credential: &Credential,
        socket_id: &str,
        wire_channel: &str,
    ) -> Result<ChannelAuthResponse> {
        let url = self.url(CHANNEL_AUTH_PATH);
        log::debug!(
            "[jobdesk-link] Authorizing channel '{}' for socket {}",
            wire_channel,
            socket_id
        );
        let response = credential
            .apply_to_request(self.http_client.post(&url))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[("socket_id", socket_id), ("channel_name", wire_channel)])
            .send()
            .await?;
        read_json(CHANNEL_AUTH_PATH, response).await
    }
}

/// Builder for configuring [`JobdeskClient`] instances.
pub struct JobdeskClientBuilder {
    base_url: Option<String>,
    timeouts: LinkTimeouts,
}

impl JobdeskClientBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            timeouts: LinkTimeouts::default(),
        }
    }

    /// Set the API base URL (e.g. `https://api.jobdesk.example/api`).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the timeout configuration; `request_timeout` bounds every call.
    pub fn timeouts(mut self, timeouts: LinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn build(self) -> Result<JobdeskClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| LinkError::ConfigurationError("base_url is required".into()))?;
        let parsed = url::Url::parse(base_url.trim()).map_err(|e| {
            LinkError::ConfigurationError(format!("Invalid base_url '{}': {}", base_url, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(LinkError::ConfigurationError(format!(
                "Unsupported base_url scheme '{}'; expected http(s)",
                parsed.scheme()
            )));
        }

        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.timeouts.connection_timeout)
            .pool_idle_timeout(Duration::from_secs(90));
        if !LinkTimeouts::is_no_timeout(self.timeouts.request_timeout) {
            builder = builder.timeout(self.timeouts.request_timeout);
        }
        let http_client = builder
            .build()
            .map_err(|e| LinkError::ConfigurationError(e.to_string()))?;

        Ok(JobdeskClient {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            http_client,
        })
    }
}
