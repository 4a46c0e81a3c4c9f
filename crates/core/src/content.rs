//! Immutable per-platform content payloads.
//!
//! A [`ContentBundle`] is produced once by the upstream content pipeline and
//! stored write-once; nothing in this system ever mutates a bundle after it
//! has been persisted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::DomainError;
use crate::platform::Platform;

/// The payload prepared for a single platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformContent {
    /// Optional explicit title; platforms that need one may derive it from
    /// the text when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Body text.
    pub text: String,

    /// Paths or URLs of attached images.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,

    /// Path or URL of an attached video, for video-first platforms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,

    /// Hashtags / topic tags, without the leading `#`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Free-form extra metadata carried through from the producer.
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub metadata: JsonValue,
}

impl PlatformContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            title: None,
            text: text.into(),
            images: Vec::new(),
            video: None,
            tags: Vec::new(),
            metadata: JsonValue::Null,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn with_video(mut self, video: impl Into<String>) -> Self {
        self.video = Some(video.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Mapping from platform to its prepared payload.
///
/// Immutable once stored: the store offers no update operation, only
/// write-once insert and retention-driven delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentBundle {
    entries: BTreeMap<Platform, PlatformContent>,
}

impl ContentBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a payload for a platform, replacing any previous entry.
    ///
    /// Replacement is only meaningful while the bundle is being assembled;
    /// stored bundles are never touched again.
    pub fn insert(mut self, platform: Platform, content: PlatformContent) -> Self {
        self.entries.insert(platform, content);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<&PlatformContent> {
        self.entries.get(&platform)
    }

    pub fn platforms(&self) -> impl Iterator<Item = Platform> + '_ {
        self.entries.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Reject bundles that cannot possibly be published.
    pub fn ensure_non_empty(&self) -> Result<(), DomainError> {
        if self.is_empty() {
            return Err(DomainError::validation("content bundle has no platforms"));
        }
        Ok(())
    }
}
