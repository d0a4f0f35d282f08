//! Channel message source.
//!
//! Fetches pages of messages from the Discord REST API:
//!
//! ```text
//! GET {api_base}/channels/{channel_id}/messages?limit=100[&after={id}]
//! Authorization: {credential}
//! ```
//!
//! One call per page, no retries. The credential is looked up on every call
//! so a token rotated in the store is picked up without a restart; when no
//! credential is stored the request is never sent.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DiscordConfig;
use crate::error::{IngestError, Result};
use crate::models::RawMessage;
use crate::store::CredentialProvider;

/// Largest page the source will return.
pub const MAX_PAGE_SIZE: usize = 100;

const USER_AGENT: &str = concat!("chanlog/", env!("CARGO_PKG_VERSION"));

/// A paginated source of channel messages.
///
/// Implement this to ingest from something other than the Discord API; the
/// orchestrator only relies on the paging contract below.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Fetch up to `limit` messages, optionally only those after the message
    /// `after`. Pages are returned exactly as the source orders them.
    async fn fetch_page(&self, limit: usize, after: Option<&str>) -> Result<Vec<RawMessage>>;
}

pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    channel_id: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl DiscordClient {
    pub fn new(config: &DiscordConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            channel_id: config.channel_id.clone(),
            credentials,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/channels/{}/messages", self.api_base, self.channel_id)
    }
}

#[async_trait]
impl MessageSource for DiscordClient {
    async fn fetch_page(&self, limit: usize, after: Option<&str>) -> Result<Vec<RawMessage>> {
        let token = self
            .credentials
            .credential()
            .await?
            .ok_or_else(|| IngestError::Auth("no credential stored".to_string()))?;

        let limit = limit.clamp(1, MAX_PAGE_SIZE).to_string();
        let mut query = vec![("limit", limit.as_str())];
        if let Some(after) = after {
            tracing::debug!(after, "fetching messages after cursor");
            query.push(("after", after));
        }

        let resp = self
            .http
            .get(self.messages_url())
            .header(reqwest::header::AUTHORIZATION, token)
            .query(&query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    IngestError::Auth(format!("HTTP {}: {}", status.as_u16(), body))
                }
                _ => IngestError::Api {
                    status: status.as_u16(),
                    body,
                },
            });
        }

        Ok(resp.json::<Vec<RawMessage>>().await?)
    }
}
