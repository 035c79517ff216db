// src/config.rs

//! Manages service configuration: loading, defaults and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Selects how secondary tag/path indices are maintained.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IndexStrategyKind {
    /// Read-modify-write index sets for every tag and path. Exact, fast purges.
    #[default]
    Full,
    /// Metadata is the only authoritative index; sampled marker keys accelerate lookups.
    Distributed,
}

/// Configuration for the artifact cache itself.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheConfig {
    /// Every stored key starts with this prefix. Changing it is a cold-cache event.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub index_strategy: IndexStrategyKind,
    /// Artifacts smaller than this are never indexed under the distributed strategy.
    #[serde(default = "default_small_file_threshold")]
    pub small_file_threshold_bytes: u64,
    /// Under the distributed strategy, one key in this many gets index markers.
    #[serde(default = "default_index_update_frequency")]
    pub index_update_frequency: u32,
    /// How long an expired entry may still be served while it is revalidated. `0` disables it.
    #[serde(default)]
    pub stale_while_revalidate_seconds: u64,
    /// Page size for store list operations.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
    /// Upper bound on the number of entries inspected when computing stats.
    #[serde(default = "default_stats_scan_limit")]
    pub stats_scan_limit: usize,
    /// Transform parameters that never influence the cache key.
    #[serde(default = "default_ignored_params")]
    pub ignored_params: Vec<String>,
    /// Capacity of the background revalidation queue.
    #[serde(default = "default_revalidation_queue")]
    pub revalidation_queue_size: usize,
}

fn default_prefix() -> String {
    "transform".to_string()
}
fn default_small_file_threshold() -> u64 {
    10 * 1024 // 10 KiB
}
fn default_index_update_frequency() -> u32 {
    10
}
fn default_list_page_size() -> usize {
    100
}
fn default_stats_scan_limit() -> usize {
    10_000
}
fn default_ignored_params() -> Vec<String> {
    vec!["debug".to_string()]
}
fn default_revalidation_queue() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            index_strategy: IndexStrategyKind::default(),
            small_file_threshold_bytes: default_small_file_threshold(),
            index_update_frequency: default_index_update_frequency(),
            stale_while_revalidate_seconds: 0,
            list_page_size: default_list_page_size(),
            stats_scan_limit: default_stats_scan_limit(),
            ignored_params: default_ignored_params(),
            revalidation_queue_size: default_revalidation_queue(),
        }
    }
}

/// A path-substring TTL override.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PathTtlRule {
    pub contains: String,
    pub seconds: u64,
}

const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;

/// Configuration for the TTL policy.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TtlConfig {
    #[serde(default = "default_ttl")]
    pub default_seconds: u64,
    #[serde(default = "default_min_ttl")]
    pub min_seconds: u64,
    #[serde(default = "default_max_ttl")]
    pub max_seconds: u64,
    #[serde(default = "default_client_error_ttl")]
    pub client_error_seconds: u64,
    #[serde(default = "default_server_error_ttl")]
    pub server_error_seconds: u64,
    #[serde(default = "default_vector_ttl")]
    pub vector_seconds: u64,
    #[serde(default = "default_modern_format_ttl")]
    pub modern_format_seconds: u64,
    #[serde(default = "default_animated_ttl")]
    pub animated_seconds: u64,
    #[serde(default = "default_large_image_ttl")]
    pub large_image_seconds: u64,
    #[serde(default = "default_small_image_ttl")]
    pub small_image_seconds: u64,
    #[serde(default = "default_high_quality_ttl")]
    pub high_quality_seconds: u64,
    #[serde(default = "default_low_quality_ttl")]
    pub low_quality_seconds: u64,
    #[serde(default = "default_derivative_ttls")]
    pub derivatives: HashMap<String, u64>,
    #[serde(default = "default_path_rules")]
    pub path_rules: Vec<PathTtlRule>,
}

fn default_ttl() -> u64 {
    DAY
}
fn default_min_ttl() -> u64 {
    5
}
fn default_max_ttl() -> u64 {
    30 * DAY
}
fn default_client_error_ttl() -> u64 {
    5 * 60
}
fn default_server_error_ttl() -> u64 {
    5
}
fn default_vector_ttl() -> u64 {
    14 * DAY
}
fn default_modern_format_ttl() -> u64 {
    7 * DAY
}
fn default_animated_ttl() -> u64 {
    3 * DAY
}
fn default_large_image_ttl() -> u64 {
    6 * HOUR
}
fn default_small_image_ttl() -> u64 {
    7 * DAY
}
fn default_high_quality_ttl() -> u64 {
    12 * HOUR
}
fn default_low_quality_ttl() -> u64 {
    3 * DAY
}
fn default_derivative_ttls() -> HashMap<String, u64> {
    HashMap::from([
        ("thumbnail".to_string(), 14 * DAY),
        ("avatar".to_string(), 7 * DAY),
        ("banner".to_string(), 12 * HOUR),
        ("icon".to_string(), 30 * DAY),
        ("temporary".to_string(), HOUR),
    ])
}
fn default_path_rules() -> Vec<PathTtlRule> {
    vec![
        PathTtlRule {
            contains: "news".to_string(),
            seconds: 2 * HOUR,
        },
        PathTtlRule {
            contains: "blog".to_string(),
            seconds: 6 * HOUR,
        },
        PathTtlRule {
            contains: "static".to_string(),
            seconds: 30 * DAY,
        },
        PathTtlRule {
            contains: "assets".to_string(),
            seconds: 30 * DAY,
        },
    ]
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            default_seconds: default_ttl(),
            min_seconds: default_min_ttl(),
            max_seconds: default_max_ttl(),
            client_error_seconds: default_client_error_ttl(),
            server_error_seconds: default_server_error_ttl(),
            vector_seconds: default_vector_ttl(),
            modern_format_seconds: default_modern_format_ttl(),
            animated_seconds: default_animated_ttl(),
            large_image_seconds: default_large_image_ttl(),
            small_image_seconds: default_small_image_ttl(),
            high_quality_seconds: default_high_quality_ttl(),
            low_quality_seconds: default_low_quality_ttl(),
            derivatives: default_derivative_ttls(),
            path_rules: default_path_rules(),
        }
    }
}

/// Configuration for tag and path purges.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PurgeConfig {
    /// Below this estimated candidate count, purges delete keys straight from the index.
    #[serde(default = "default_small_purge_threshold")]
    pub small_purge_threshold: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between deletion batches, to respect store rate limits.
    #[serde(default)]
    pub batch_delay_ms: u64,
}

fn default_small_purge_threshold() -> usize {
    20
}
fn default_batch_size() -> usize {
    10
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            small_purge_threshold: default_small_purge_threshold(),
            batch_size: default_batch_size(),
            batch_delay_ms: 0,
        }
    }
}

/// Configuration for the periodic maintenance sweep.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MaintenanceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_maintenance_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_maintenance_max_entries")]
    pub max_entries: usize,
}

fn default_true() -> bool {
    true
}
fn default_maintenance_interval() -> Duration {
    Duration::from_secs(15 * 60)
}
fn default_maintenance_max_entries() -> usize {
    1000
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_maintenance_interval(),
            max_entries: default_maintenance_max_entries(),
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout_ms() -> u64 {
    30_000
}
fn default_success_threshold() -> u32 {
    2
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Retry-with-backoff settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter added to every backoff delay.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    1000
}
fn default_jitter_ms() -> u64 {
    25
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

/// Configuration for the resilience layer wrapping store and origin calls.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ResilienceConfig {
    /// Deadline for a single guarded attempt.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_timeout_ms() -> u64 {
    2000
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Configuration for the upstream transform provider.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OriginConfig {
    #[serde(default = "default_origin_url")]
    pub base_url: String,
    #[serde(default = "default_origin_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_origin_url() -> String {
    "http://127.0.0.1:9000".to_string()
}
fn default_origin_timeout_ms() -> u64 {
    10_000
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            base_url: default_origin_url(),
            timeout_ms: default_origin_timeout_ms(),
        }
    }
}

/// Configuration for the Prometheus metrics endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, `/metrics` is served on the main listener.
    #[serde(default)]
    pub enabled: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8787
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Represents the final, validated service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub ttl: TtlConfig,
    #[serde(default)]
    pub purge: PurgeConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub origin: OriginConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            cache: CacheConfig::default(),
            ttl: TtlConfig::default(),
            purge: PurgeConfig::default(),
            maintenance: MaintenanceConfig::default(),
            resilience: ResilienceConfig::default(),
            origin: OriginConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config in '{path}'"))
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.cache.prefix.is_empty() {
            return Err(anyhow!("cache.prefix cannot be empty"));
        }
        if self.cache.prefix.contains(':') {
            return Err(anyhow!("cache.prefix cannot contain ':'"));
        }
        if self.cache.index_update_frequency == 0 {
            return Err(anyhow!("cache.index_update_frequency must be at least 1"));
        }
        if self.cache.list_page_size == 0 {
            return Err(anyhow!("cache.list_page_size cannot be 0"));
        }
        if self.ttl.min_seconds > self.ttl.max_seconds {
            return Err(anyhow!(
                "ttl.min_seconds ({}) cannot exceed ttl.max_seconds ({})",
                self.ttl.min_seconds,
                self.ttl.max_seconds
            ));
        }
        if self.purge.batch_size == 0 {
            return Err(anyhow!("purge.batch_size cannot be 0"));
        }
        if self.resilience.breaker.failure_threshold == 0 {
            return Err(anyhow!("resilience.breaker.failure_threshold cannot be 0"));
        }
        if self.resilience.breaker.success_threshold == 0 {
            return Err(anyhow!("resilience.breaker.success_threshold cannot be 0"));
        }
        if self.resilience.retry.max_attempts == 0 {
            return Err(anyhow!("resilience.retry.max_attempts cannot be 0"));
        }
        if self.resilience.retry.initial_delay_ms > self.resilience.retry.max_delay_ms {
            return Err(anyhow!(
                "resilience.retry.initial_delay_ms cannot exceed max_delay_ms"
            ));
        }
        if self.maintenance.enabled && self.maintenance.max_entries == 0 {
            return Err(anyhow!("maintenance.max_entries cannot be 0 when enabled"));
        }
        if self.cache.stale_while_revalidate_seconds > self.ttl.max_seconds {
            warn!(
                "stale_while_revalidate_seconds ({}) exceeds ttl.max_seconds ({}); stale entries may outlive fresh ones.",
                self.cache.stale_while_revalidate_seconds, self.ttl.max_seconds
            );
        }
        Ok(())
    }
}
