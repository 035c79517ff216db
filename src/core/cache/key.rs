// src/core/cache/key.rs

//! Deterministic cache key derivation.
//!
//! A key has the shape `prefix:basename:paramSummary:format:hash8`. The first four
//! segments exist for humans reading store listings; only `hash8` carries identity.
//! It is an FNV-1a hash over the source path plus the canonically serialized
//! parameter set, so reordering parameters never changes the key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Substituted for an empty source path or basename.
const EMPTY_PATH_PLACEHOLDER: &str = "image";

/// Second segments the index structures use under the shared prefix. A source
/// with one of these basenames gets a `_` in front so artifact keys never start
/// like an index key.
pub const RESERVED_SEGMENTS: [&str; 5] = ["tag", "path", "marker", "all-tags", "all-paths"];

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over raw bytes. Callers hash UTF-8 encoded strings, so
/// multi-byte characters are covered byte by byte.
pub fn fnv1a32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// The normalized transform parameter set for a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformParams(Map<String, Value>);

impl TransformParams {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Parses a URL query string. Numeric and boolean values are typed so that
    /// `width=100` and a programmatic `width: 100` produce the same key.
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::new();
        for (name, raw) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            if name.is_empty() {
                continue;
            }
            params.insert(&name, typed_value(&raw));
        }
        params
    }

    pub fn width(&self) -> Option<u64> {
        self.number("width")
    }

    pub fn height(&self) -> Option<u64> {
        self.number("height")
    }

    /// Quality is signed so that out-of-range input survives parsing and gets clamped later.
    pub fn quality(&self) -> Option<i64> {
        match self.0.get("quality")? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn format(&self) -> Option<&str> {
        self.string("format")
    }

    pub fn aspect(&self) -> Option<&str> {
        self.string("aspect")
    }

    pub fn derivative(&self) -> Option<&str> {
        self.string("derivative")
    }

    fn string(&self, name: &str) -> Option<&str> {
        self.0.get(name)?.as_str().filter(|s| !s.is_empty())
    }

    fn number(&self, name: &str) -> Option<u64> {
        match self.0.get(name)? {
            Value::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f as u64)
            }),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Serializes the parameters with keys sorted recursively, dropping `ignored` names
    /// at the top level.
    pub fn canonical_string(&self, ignored: &[String]) -> String {
        let mut names: Vec<&String> = self
            .0
            .keys()
            .filter(|name| !ignored.iter().any(|i| i == *name))
            .collect();
        names.sort();
        let mut out = String::from("{");
        for (i, name) in names.into_iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&Value::String(name.clone()).to_string());
            out.push(':');
            out.push_str(&canonical_json(&self.0[name.as_str()]));
        }
        out.push('}');
        out
    }

    /// Renders the parameters as a query string with sorted names.
    pub fn to_query_string(&self, ignored: &[String]) -> String {
        let mut pairs: Vec<(&String, String)> = self
            .0
            .iter()
            .filter(|(name, _)| !ignored.iter().any(|i| i == *name))
            .map(|(name, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => canonical_json(other),
                };
                (name, rendered)
            })
            .collect();
        pairs.sort();
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in pairs {
            serializer.append_pair(name, &value);
        }
        serializer.finish()
    }
}

fn typed_value(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<u64>() {
        return Value::from(n);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

/// Stable JSON rendering: object keys sorted at every depth, arrays kept in order.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), canonical_json(v)))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

/// An immutable, fully-derived cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wraps a key read back from the store.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The trailing 8-hex-character identity hash.
    pub fn hash8(&self) -> &str {
        self.0.rsplit(':').next().unwrap_or_default()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives cache keys for a fixed prefix and set of cache-irrelevant parameters.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    prefix: String,
    ignored_params: Vec<String>,
}

impl KeyCodec {
    pub fn new(prefix: impl Into<String>, ignored_params: Vec<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ignored_params,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The list prefix under which every artifact key lives.
    pub fn scan_prefix(&self) -> String {
        format!("{}:", self.prefix)
    }

    pub fn ignored_params(&self) -> &[String] {
        &self.ignored_params
    }

    /// Computes the key for `(source_path, params)` plus the request's raw query, if any.
    pub fn compute_key(
        &self,
        source_path: &str,
        params: &TransformParams,
        query: Option<&str>,
    ) -> CacheKey {
        let path = if source_path.is_empty() {
            EMPTY_PATH_PLACEHOLDER
        } else {
            source_path
        };

        let mut material = String::with_capacity(path.len() + 64);
        material.push_str(path);
        material.push_str(&params.canonical_string(&self.ignored_params));
        if let Some(query) = query {
            let canonical_query =
                TransformParams::from_query(query).to_query_string(&self.ignored_params);
            if !canonical_query.is_empty() {
                material.push('?');
                material.push_str(&canonical_query);
            }
        }
        let hash = fnv1a32(material.as_bytes());

        CacheKey(format!(
            "{}:{}:{}:{}:{:08x}",
            self.prefix,
            basename(path),
            param_summary(params),
            sanitize_segment(params.format().unwrap_or("auto")),
            hash
        ))
    }
}

fn basename(path: &str) -> String {
    let without_query = path.split(['?', '#']).next().unwrap_or_default();
    let name = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    if name.is_empty() {
        EMPTY_PATH_PLACEHOLDER.to_string()
    } else if RESERVED_SEGMENTS.contains(&name) {
        format!("_{}", sanitize_segment(name))
    } else {
        sanitize_segment(name)
    }
}

fn param_summary(params: &TransformParams) -> String {
    let mut parts = Vec::new();
    if let Some(w) = params.width() {
        parts.push(format!("w{w}"));
    }
    if let Some(h) = params.height() {
        parts.push(format!("h{h}"));
    }
    if let Some(aspect) = params.aspect() {
        parts.push(format!("a{}", aspect.replace([':', '/'], "x")));
    }
    if parts.is_empty() {
        "orig".to_string()
    } else {
        sanitize_segment(&parts.join("-"))
    }
}

/// Keeps key segments free of the `:` separator and whitespace.
fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| if c == ':' || c.is_whitespace() { '_' } else { c })
        .collect()
}
