//! `syndica-publishers` — per-platform publisher capabilities.
//!
//! Each publisher validates and transmits a single content payload. The
//! capability itself is **not** required to be idempotent; exactly-once
//! effect is the executor's job (it consults receipts before invoking a
//! publisher).
//!
//! Two families exist:
//!
//! - network publishers (Reddit, X) that call the platform API, and
//! - manual publishers (TikTok, Bilibili, Xiaohongshu, Douyin) that format
//!   the payload for human action and succeed with a manual marker; these
//!   platforms have no usable self-serve publishing API.

pub mod manual;
pub mod reddit;
pub mod x;

use async_trait::async_trait;
use thiserror::Error;

use syndica_core::{Platform, PlatformContent};

pub use manual::ManualPublisher;
pub use reddit::{RedditConfig, RedditCredentials, RedditPostKind, RedditPublisher};
pub use x::{XConfig, XPublisher};

/// Outcome of a successful publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSuccess {
    pub post_id: Option<String>,
    pub post_url: Option<String>,
    /// Success means "formatted for human action", not an API call.
    pub manual: bool,
}

impl PublishSuccess {
    pub fn posted(post_id: impl Into<String>, post_url: impl Into<String>) -> Self {
        Self {
            post_id: Some(post_id.into()),
            post_url: Some(post_url.into()),
            manual: false,
        }
    }

    pub fn manual() -> Self {
        Self {
            post_id: None,
            post_url: None,
            manual: true,
        }
    }
}

/// Publish-side failure for a single platform.
///
/// All variants are per-platform outcomes, never task-level fatals; a
/// timeout surfaces as [`PublishError::Network`].
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("missing credentials: {0}")]
    Credentials(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("remote rejected the post: {0}")]
    Remote(String),

    #[error("malformed response: {0}")]
    Response(String),
}

impl From<reqwest::Error> for PublishError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PublishError::Network(format!("request timed out: {e}"))
        } else {
            PublishError::Network(e.to_string())
        }
    }
}

/// A publishing capability for one platform.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn platform(&self) -> Platform;

    /// Platform-specific content checks. Must not perform network I/O; a
    /// rejection here means the publish is never attempted.
    fn validate(&self, content: &PlatformContent) -> Result<(), String>;

    /// Perform the external side effect.
    async fn publish(&self, content: &PlatformContent) -> Result<PublishSuccess, PublishError>;
}

/// Per-platform publisher configuration, passed in explicitly at startup.
#[derive(Debug, Clone, Default)]
pub struct PublisherSettings {
    pub reddit: RedditConfig,
    pub x: XConfig,
}

/// Construct the publisher for a platform.
///
/// The platform set is a closed enum, so an unknown target cannot reach this
/// point; task creation already rejected it.
pub fn publisher_for(
    platform: Platform,
    settings: &PublisherSettings,
) -> Result<Box<dyn Publisher>, PublishError> {
    match platform {
        Platform::Reddit => Ok(Box::new(RedditPublisher::new(settings.reddit.clone())?)),
        Platform::X => Ok(Box::new(XPublisher::new(settings.x.clone())?)),
        Platform::TikTok => Ok(Box::new(ManualPublisher::tiktok())),
        Platform::Bilibili => Ok(Box::new(ManualPublisher::bilibili())),
        Platform::Xiaohongshu => Ok(Box::new(ManualPublisher::xiaohongshu())),
        Platform::Douyin => Ok(Box::new(ManualPublisher::douyin())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_platform_has_a_publisher() {
        let settings = PublisherSettings::default();
        for platform in Platform::ALL {
            let publisher = publisher_for(platform, &settings).unwrap();
            assert_eq!(publisher.platform(), platform);
        }
    }
}
