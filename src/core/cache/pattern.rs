// src/core/cache/pattern.rs

//! Path patterns for purges. A pattern is a literal path in which `*` matches
//! any run of characters; everything else is matched literally.

use crate::core::cache::metadata::ArtifactMetadata;
use crate::core::errors::PixelCacheError;
use regex::Regex;

/// A compiled purge pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    regex: Regex,
    /// Patterns containing `?` target one exact transformation and match path+query.
    match_query: bool,
}

impl PathPattern {
    pub fn compile(raw: &str) -> Result<Self, PixelCacheError> {
        if raw.is_empty() {
            return Err(PixelCacheError::InvalidRequest(
                "path pattern cannot be empty".to_string(),
            ));
        }
        let escaped = regex::escape(raw).replace(r"\*", ".*");
        let regex = Regex::new(&format!("^{escaped}$"))?;
        Ok(Self {
            raw: raw.to_string(),
            regex,
            match_query: raw.contains('?'),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True if the pattern has no wildcard and can be looked up directly.
    pub fn is_literal(&self) -> bool {
        !self.raw.contains('*')
    }

    pub fn matches_query(&self) -> bool {
        self.match_query
    }

    /// Matches a bare path (or path+query for query patterns).
    pub fn is_match(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    /// Matches against a stored artifact's URL.
    pub fn matches_metadata(&self, metadata: &ArtifactMetadata) -> bool {
        if self.match_query {
            self.is_match(metadata.path_and_query())
        } else {
            self.is_match(metadata.path())
        }
    }
}
