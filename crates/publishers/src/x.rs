//! X (Twitter) publisher, API v2 tweet creation.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use syndica_core::{Platform, PlatformContent};

use crate::{PublishError, PublishSuccess, Publisher};

const TWEETS_URL: &str = "https://api.x.com/2/tweets";

/// X publisher configuration.
#[derive(Debug, Clone)]
pub struct XConfig {
    /// Post length ceiling; 280 for standard accounts.
    pub character_limit: usize,
    /// OAuth2 user-context bearer token with `tweet.write` scope.
    pub bearer_token: Option<String>,
    pub request_timeout: Duration,
}

impl Default for XConfig {
    fn default() -> Self {
        Self {
            character_limit: 280,
            bearer_token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Posts text tweets through the v2 API.
///
/// Media upload needs the legacy v1.1 endpoint with OAuth 1.0a signing,
/// which this client does not carry; attached images are dropped with a
/// warning and the text is posted on its own.
pub struct XPublisher {
    config: XConfig,
    client: reqwest::Client,
}

impl XPublisher {
    pub fn new(config: XConfig) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PublishError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Publisher for XPublisher {
    fn platform(&self) -> Platform {
        Platform::X
    }

    fn validate(&self, content: &PlatformContent) -> Result<(), String> {
        if content.text.trim().is_empty() {
            return Err("text must not be empty".to_string());
        }

        let count = content.text.chars().count();
        if count > self.config.character_limit {
            return Err(format!(
                "text is {count} characters, limit is {}",
                self.config.character_limit
            ));
        }

        Ok(())
    }

    async fn publish(&self, content: &PlatformContent) -> Result<PublishSuccess, PublishError> {
        let token = self.config.bearer_token.as_ref().ok_or_else(|| {
            PublishError::Credentials("x bearer token not configured".to_string())
        })?;

        if !content.images.is_empty() {
            warn!(
                images = content.images.len(),
                "media upload is not supported; posting text only"
            );
        }

        debug!("creating tweet");

        let response = self
            .client
            .post(TWEETS_URL)
            .bearer_auth(token)
            .json(&json!({ "text": content.text }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PublishError::Remote(format!(
                "tweet creation failed with status {}",
                response.status()
            )));
        }

        let body: JsonValue = response.json().await?;
        let id = body
            .pointer("/data/id")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| PublishError::Response("tweet response missing data.id".into()))?;

        Ok(PublishSuccess::posted(
            id,
            format!("https://x.com/i/status/{id}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher() -> XPublisher {
        XPublisher::new(XConfig::default()).unwrap()
    }

    #[test]
    fn accepts_text_at_the_limit() {
        let content = PlatformContent::new("x".repeat(280));
        assert!(publisher().validate(&content).is_ok());
    }

    #[test]
    fn rejects_text_over_the_limit() {
        let content = PlatformContent::new("x".repeat(281));
        let err = publisher().validate(&content).unwrap_err();
        assert!(err.contains("281"));
    }

    #[test]
    fn limit_is_configurable() {
        let publisher = XPublisher::new(XConfig {
            character_limit: 25_000,
            ..Default::default()
        })
        .unwrap();
        let content = PlatformContent::new("x".repeat(500));
        assert!(publisher.validate(&content).is_ok());
    }

    #[test]
    fn limit_counts_characters_not_bytes() {
        // 140 CJK characters are 420 bytes but fit the 280-char limit.
        let content = PlatformContent::new("你".repeat(140));
        assert!(publisher().validate(&content).is_ok());
    }

    #[tokio::test]
    async fn publish_without_token_fails_cleanly() {
        let err = publisher()
            .publish(&PlatformContent::new("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Credentials(_)));
    }
}
