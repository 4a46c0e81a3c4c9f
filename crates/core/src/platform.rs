//! Target publishing platforms.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A supported publishing target.
///
/// The set is closed on purpose: unknown platform names are rejected when a
/// task is created, not when it executes. Adding a platform means adding a
/// variant here and a publisher implementation for it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Reddit,
    X,
    TikTok,
    Bilibili,
    Xiaohongshu,
    Douyin,
}

impl Platform {
    /// All supported platforms, in canonical order.
    pub const ALL: [Platform; 6] = [
        Platform::Reddit,
        Platform::X,
        Platform::TikTok,
        Platform::Bilibili,
        Platform::Xiaohongshu,
        Platform::Douyin,
    ];

    /// Canonical storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Reddit => "reddit",
            Platform::X => "x",
            Platform::TikTok => "tiktok",
            Platform::Bilibili => "bilibili",
            Platform::Xiaohongshu => "xiaohongshu",
            Platform::Douyin => "douyin",
        }
    }

    /// Parse a comma-separated platform list (e.g. `"reddit,x"`).
    ///
    /// Empty segments are ignored; any unknown name fails the whole list.
    pub fn parse_list(s: &str) -> Result<Vec<Platform>, DomainError> {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl core::fmt::Display for Platform {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reddit" => Ok(Platform::Reddit),
            // "twitter" kept as an alias for operators with older scripts.
            "x" | "twitter" => Ok(Platform::X),
            "tiktok" => Ok(Platform::TikTok),
            "bilibili" => Ok(Platform::Bilibili),
            "xiaohongshu" => Ok(Platform::Xiaohongshu),
            "douyin" => Ok(Platform::Douyin),
            other => Err(DomainError::validation(format!(
                "unsupported platform: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_names() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
    }

    #[test]
    fn twitter_is_an_alias_for_x() {
        assert_eq!("twitter".parse::<Platform>().unwrap(), Platform::X);
        assert_eq!("X".parse::<Platform>().unwrap(), Platform::X);
    }

    #[test]
    fn parsing_is_case_insensitive() {
        assert_eq!("Reddit".parse::<Platform>().unwrap(), Platform::Reddit);
        assert_eq!(" TIKTOK ".parse::<Platform>().unwrap(), Platform::TikTok);
    }

    #[test]
    fn unknown_platform_is_rejected() {
        let err = "myspace".parse::<Platform>().unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("myspace") => {}
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn parse_list_handles_spaces_and_aliases() {
        let platforms = Platform::parse_list("reddit, twitter,tiktok").unwrap();
        assert_eq!(
            platforms,
            vec![Platform::Reddit, Platform::X, Platform::TikTok]
        );
    }

    #[test]
    fn parse_list_rejects_unknown_names() {
        assert!(Platform::parse_list("reddit,nope").is_err());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Platform::Xiaohongshu).unwrap();
        assert_eq!(json, "\"xiaohongshu\"");
        let back: Platform = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Platform::Xiaohongshu);
    }
}
