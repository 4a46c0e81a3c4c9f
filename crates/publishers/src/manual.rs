//! Manual-publish variants.
//!
//! TikTok, Bilibili, Xiaohongshu and Douyin expose no usable self-serve
//! publishing API. For these targets the publisher renders the payload into
//! a copy-paste handoff block and reports success with the manual marker:
//! a normal terminal outcome, not a failure.

use async_trait::async_trait;
use tracing::info;

use syndica_core::{Platform, PlatformContent};

use crate::{PublishError, PublishSuccess, Publisher};

/// Formats content for human posting on platforms without an API.
pub struct ManualPublisher {
    platform: Platform,
    /// Video-first platforms refuse payloads without a video attachment.
    require_video: bool,
}

impl ManualPublisher {
    pub fn tiktok() -> Self {
        Self {
            platform: Platform::TikTok,
            require_video: true,
        }
    }

    pub fn bilibili() -> Self {
        Self {
            platform: Platform::Bilibili,
            require_video: true,
        }
    }

    pub fn xiaohongshu() -> Self {
        Self {
            platform: Platform::Xiaohongshu,
            require_video: false,
        }
    }

    pub fn douyin() -> Self {
        Self {
            platform: Platform::Douyin,
            require_video: false,
        }
    }

    /// Render the copy-paste block handed to the operator.
    pub fn render_handoff(&self, content: &PlatformContent) -> String {
        let mut block = String::new();
        block.push_str(&format!("=== {} (manual publish) ===\n", self.platform));
        if let Some(title) = &content.title {
            block.push_str(&format!("title: {title}\n"));
        }
        block.push_str(&format!("text:\n{}\n", content.text));
        if let Some(video) = &content.video {
            block.push_str(&format!("video: {video}\n"));
        }
        for image in &content.images {
            block.push_str(&format!("image: {image}\n"));
        }
        if !content.tags.is_empty() {
            let tags: Vec<String> = content.tags.iter().map(|t| format!("#{t}")).collect();
            block.push_str(&format!("tags: {}\n", tags.join(" ")));
        }
        block
    }
}

#[async_trait]
impl Publisher for ManualPublisher {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn validate(&self, content: &PlatformContent) -> Result<(), String> {
        if content.text.trim().is_empty() {
            return Err("text must not be empty".to_string());
        }
        if self.require_video && content.video.is_none() {
            return Err(format!("{} requires a video attachment", self.platform));
        }
        Ok(())
    }

    async fn publish(&self, content: &PlatformContent) -> Result<PublishSuccess, PublishError> {
        let handoff = self.render_handoff(content);
        info!(
            platform = %self.platform,
            "content formatted for manual publishing\n{handoff}"
        );
        Ok(PublishSuccess::manual())
    }
}
