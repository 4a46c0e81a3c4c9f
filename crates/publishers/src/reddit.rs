//! Reddit publisher (script-app OAuth, submit endpoint).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use syndica_core::{Platform, PlatformContent};

use crate::{PublishError, PublishSuccess, Publisher};

/// Reddit title limit, in characters.
const TITLE_LIMIT: usize = 300;
/// Reddit self-post body limit, in characters.
const TEXT_LIMIT: usize = 40_000;

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const SUBMIT_URL: &str = "https://oauth.reddit.com/api/submit";

/// What kind of submission to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedditPostKind {
    /// Text self-post.
    #[default]
    SelfPost,
    /// Link post; the URL is taken from the content metadata.
    Link,
}

impl RedditPostKind {
    fn as_api_str(&self) -> &'static str {
        match self {
            RedditPostKind::SelfPost => "self",
            RedditPostKind::Link => "link",
        }
    }
}

/// Script-app credentials (password grant).
#[derive(Debug, Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
}

/// Reddit publisher configuration.
#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub subreddit: String,
    pub post_kind: RedditPostKind,
    pub credentials: Option<RedditCredentials>,
    pub request_timeout: Duration,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            subreddit: "test".to_string(),
            post_kind: RedditPostKind::SelfPost,
            credentials: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Publishes self or link posts to a configured subreddit.
pub struct RedditPublisher {
    config: RedditConfig,
    client: reqwest::Client,
}

impl RedditPublisher {
    pub fn new(config: RedditConfig) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PublishError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Derive a submission title from the body when none was provided: the
    /// first line, truncated to the title limit with an ellipsis.
    pub fn derive_title(text: &str) -> String {
        let first_line = text.lines().next().unwrap_or("").trim();
        if first_line.chars().count() <= TITLE_LIMIT {
            return first_line.to_string();
        }
        let truncated: String = first_line.chars().take(TITLE_LIMIT - 3).collect();
        format!("{truncated}...")
    }

    fn title_for(content: &PlatformContent) -> String {
        content
            .title
            .clone()
            .unwrap_or_else(|| Self::derive_title(&content.text))
    }

    async fn access_token(&self, creds: &RedditCredentials) -> Result<String, PublishError> {
        let response = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&creds.client_id, Some(&creds.client_secret))
            .header(reqwest::header::USER_AGENT, &creds.user_agent)
            .form(&[
                ("grant_type", "password"),
                ("username", creds.username.as_str()),
                ("password", creds.password.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PublishError::Remote(format!(
                "token request failed with status {}",
                response.status()
            )));
        }

        let body: JsonValue = response.json().await?;
        body.get("access_token")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| PublishError::Response("token response missing access_token".into()))
    }
}

#[async_trait]
impl Publisher for RedditPublisher {
    fn platform(&self) -> Platform {
        Platform::Reddit
    }

    fn validate(&self, content: &PlatformContent) -> Result<(), String> {
        if content.text.trim().is_empty() {
            return Err("text must not be empty".to_string());
        }

        let title = Self::title_for(content);
        if title.chars().count() > TITLE_LIMIT {
            return Err(format!("title exceeds {TITLE_LIMIT} characters"));
        }

        if content.text.chars().count() > TEXT_LIMIT {
            return Err(format!("text exceeds {TEXT_LIMIT} characters"));
        }

        if self.config.post_kind == RedditPostKind::Link
            && content.metadata.get("url").and_then(JsonValue::as_str).is_none()
        {
            return Err("link posts require a `url` entry in metadata".to_string());
        }

        Ok(())
    }

    async fn publish(&self, content: &PlatformContent) -> Result<PublishSuccess, PublishError> {
        let creds = self.config.credentials.as_ref().ok_or_else(|| {
            PublishError::Credentials("reddit credentials not configured".to_string())
        })?;

        let token = self.access_token(creds).await?;
        let title = Self::title_for(content);

        let mut form: Vec<(&str, String)> = vec![
            ("sr", self.config.subreddit.clone()),
            ("kind", self.config.post_kind.as_api_str().to_string()),
            ("title", title),
            ("api_type", "json".to_string()),
        ];
        match self.config.post_kind {
            RedditPostKind::SelfPost => form.push(("text", content.text.clone())),
            RedditPostKind::Link => {
                // Presence was checked in validate.
                let url = content
                    .metadata
                    .get("url")
                    .and_then(JsonValue::as_str)
                    .unwrap_or_default()
                    .to_string();
                form.push(("url", url));
            }
        }

        debug!(subreddit = %self.config.subreddit, "submitting reddit post");

        let response = self
            .client
            .post(SUBMIT_URL)
            .bearer_auth(&token)
            .header(reqwest::header::USER_AGENT, &creds.user_agent)
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PublishError::Remote(format!(
                "submit failed with status {}",
                response.status()
            )));
        }

        let body: JsonValue = response.json().await?;
        if let Some(errors) = body.pointer("/json/errors").and_then(JsonValue::as_array) {
            if !errors.is_empty() {
                return Err(PublishError::Remote(format!("submit rejected: {errors:?}")));
            }
        }

        let post_id = body
            .pointer("/json/data/name")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        let post_url = body
            .pointer("/json/data/url")
            .and_then(JsonValue::as_str)
            .map(str::to_string);

        if post_id.is_none() {
            warn!("reddit submit succeeded but returned no post name");
        }

        Ok(PublishSuccess {
            post_id,
            post_url,
            manual: false,
        })
    }
}
