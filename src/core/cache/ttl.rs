// src/core/cache/ttl.rs

//! TTL policy for to-be-cached artifacts.
//!
//! Rules are evaluated in a fixed order and the first one that matches fixes the
//! TTL. An origin hint can only shorten the result, and the final value is always
//! clamped to the configured bounds. The policy is pure and never touches the store.

use crate::config::TtlConfig;

/// Pixel area above which an image is treated as hero imagery.
const LARGE_IMAGE_AREA: u64 = 4_000_000;
/// Pixel area below which an image is treated as an icon or avatar.
const SMALL_IMAGE_AREA: u64 = 10_000;
const HIGH_QUALITY: i64 = 90;
const LOW_QUALITY: i64 = 60;

/// Everything the policy looks at.
#[derive(Debug, Clone, Default)]
pub struct TtlInput<'a> {
    pub status: u16,
    pub content_type: &'a str,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub quality: Option<i64>,
    pub path: &'a str,
    pub derivative: Option<&'a str>,
    pub origin_ttl_hint: Option<u64>,
}

/// Which rule fixed the TTL. Useful for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TtlRule {
    ClientError,
    ServerError,
    VectorFormat,
    ModernFormat,
    AnimatedFormat,
    Derivative,
    PathPattern,
    LargeImage,
    SmallImage,
    HighQuality,
    LowQuality,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlDecision {
    pub seconds: u64,
    pub rule: TtlRule,
    /// True if the origin hint shortened the rule's value.
    pub capped_by_origin: bool,
}

/// Computes TTLs from a `TtlConfig`.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    config: TtlConfig,
}

impl TtlPolicy {
    pub fn new(config: TtlConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TtlConfig {
        &self.config
    }

    /// Returns the TTL in seconds, always within `[min_seconds, max_seconds]`.
    pub fn compute_ttl(&self, input: &TtlInput<'_>) -> u64 {
        self.decide(input).seconds
    }

    pub fn decide(&self, input: &TtlInput<'_>) -> TtlDecision {
        let (mut seconds, rule) = self.rule_ttl(input);

        let mut capped_by_origin = false;
        if let Some(hint) = input.origin_ttl_hint
            && hint < seconds
        {
            seconds = hint;
            capped_by_origin = true;
        }

        TtlDecision {
            seconds: self.clamp(seconds),
            rule,
            capped_by_origin,
        }
    }

    fn clamp(&self, seconds: u64) -> u64 {
        let min = self.config.min_seconds;
        let max = self.config.max_seconds.max(min);
        seconds.clamp(min, max)
    }

    fn rule_ttl(&self, input: &TtlInput<'_>) -> (u64, TtlRule) {
        let c = &self.config;

        if !(200..300).contains(&input.status) {
            if (400..500).contains(&input.status) {
                return (c.client_error_seconds, TtlRule::ClientError);
            }
            return (c.server_error_seconds, TtlRule::ServerError);
        }

        let media = media_subtype(input.content_type);
        if media.starts_with("svg") {
            return (c.vector_seconds, TtlRule::VectorFormat);
        }
        if matches!(media.as_str(), "avif" | "webp" | "jxl" | "heic" | "heif") {
            return (c.modern_format_seconds, TtlRule::ModernFormat);
        }
        if matches!(media.as_str(), "gif" | "apng") {
            return (c.animated_seconds, TtlRule::AnimatedFormat);
        }

        if let Some(seconds) = input
            .derivative
            .and_then(|name| c.derivatives.get(&name.to_ascii_lowercase()))
        {
            return (*seconds, TtlRule::Derivative);
        }

        let path = input.path.to_ascii_lowercase();
        if let Some(rule) = c
            .path_rules
            .iter()
            .find(|rule| !rule.contains.is_empty() && path.contains(&rule.contains.to_ascii_lowercase()))
        {
            return (rule.seconds, TtlRule::PathPattern);
        }

        if let (Some(w), Some(h)) = (input.width, input.height) {
            let area = w.saturating_mul(h);
            if area > LARGE_IMAGE_AREA {
                return (c.large_image_seconds, TtlRule::LargeImage);
            }
            if area > 0 && area < SMALL_IMAGE_AREA {
                return (c.small_image_seconds, TtlRule::SmallImage);
            }
        }

        if let Some(quality) = input.quality {
            if quality >= HIGH_QUALITY {
                return (c.high_quality_seconds, TtlRule::HighQuality);
            }
            if quality < LOW_QUALITY {
                return (c.low_quality_seconds, TtlRule::LowQuality);
            }
        }

        (c.default_seconds, TtlRule::Default)
    }
}

/// `image/svg+xml; charset=utf-8` → `svg+xml`.
fn media_subtype(content_type: &str) -> String {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence
        .split_once('/')
        .map(|(_, sub)| sub)
        .unwrap_or(essence)
        .to_ascii_lowercase()
}
