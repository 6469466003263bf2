//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::compression::DEFAULT_TARGET_MIMES;
use crate::session::Serialization;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream the proxy handler forwards to.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Response compression.
    pub compression: CompressionConfig,

    /// Session middleware and store.
    pub session: SessionConfig,

    /// Rotating log file. Logs go to stdout when absent.
    pub log_file: Option<LogFileConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream target.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL requests are forwarded to (e.g., "http://127.0.0.1:3000").
    pub url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:3000".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Response compression.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,

    /// gzip level, 1..=9.
    pub gzip_level: u32,

    /// brotli quality, 0..=11.
    pub brotli_level: u32,

    /// Responses with a smaller `Content-Length` are sent as-is.
    pub minimum_size_bytes: u64,

    /// Media types eligible for compression.
    pub target_mimes: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gzip_level: 6,
            brotli_level: 4,
            minimum_size_bytes: 1024,
            target_mimes: DEFAULT_TARGET_MIMES.iter().map(|m| m.to_string()).collect(),
        }
    }
}

/// Where session payloads live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStoreKind {
    /// The whole session travels in cookies.
    #[default]
    Cookie,
    /// Cookie carries an ID; the payload is kept in a key/value store.
    Kv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum SameSite {
    #[default]
    Lax,
    Strict,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Lax => "Lax",
            SameSite::Strict => "Strict",
            SameSite::None => "None",
        }
    }
}

/// Attributes applied to every session cookie.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieAttributes {
    pub path: String,
    pub domain: Option<String>,
    /// Session cookies (no Max-Age) when absent.
    pub max_age_secs: Option<u64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    /// Maximum value bytes per cookie before the payload is split.
    pub max_size: usize,
}

impl Default for CookieAttributes {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            domain: None,
            max_age_secs: None,
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
            max_size: 4000,
        }
    }
}

/// Keys for the secure encoder, base64 (standard alphabet).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SecureEncoderConfig {
    /// HMAC-SHA256 key, at least 32 bytes.
    pub hash_key: String,

    /// AES-256-GCM key, exactly 32 bytes. MAC-only when absent.
    pub block_key: Option<String>,
}

/// Session middleware configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub enabled: bool,

    pub cookie_name: String,

    pub cookie: CookieAttributes,

    pub secure_encoder: SecureEncoderConfig,

    pub store: SessionStoreKind,

    /// KV key prefix.
    pub prefix: String,

    pub serialization: Serialization,

    /// Emit a span around KV reads.
    pub trace_kv: bool,

    /// Largest request body kept in a request snapshot.
    pub snapshot_limit_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cookie_name: "__gw_session".to_string(),
            cookie: CookieAttributes::default(),
            secure_encoder: SecureEncoderConfig::default(),
            store: SessionStoreKind::Cookie,
            prefix: "session:".to_string(),
            serialization: Serialization::Binary,
            trace_kv: false,
            snapshot_limit_bytes: 64 * 1024,
        }
    }
}

/// Rotating log file configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogFileConfig {
    pub file_name: String,

    pub src_dir: String,

    /// Archive directory. Defaults to `src_dir`.
    pub dst_dir: Option<String>,

    pub rotate_size_mib: u64,

    /// Gzip level for archives; 0 keeps them uncompressed.
    pub compress_level: u32,

    /// Archives kept (0 = unlimited).
    pub max_backup: usize,

    /// Oldest archive age kept, seconds (0 = unlimited).
    pub max_age_seconds: u64,

    /// Total archive size kept, MiB (0 = unlimited).
    pub max_total_size_mib: u64,

    /// Go-style or strftime timestamp layout for archive names.
    pub time_layout: Option<String>,

    /// IANA zone for `time_layout`. Local time when absent.
    pub time_zone: Option<String>,

    /// Cron expression that forces a rotation.
    pub cron: Option<String>,
}

impl Default for LogFileConfig {
    fn default() -> Self {
        Self {
            file_name: "gateway.log".to_string(),
            src_dir: "./logs".to_string(),
            dst_dir: None,
            rotate_size_mib: 100,
            compress_level: 6,
            max_backup: 10,
            max_age_seconds: 0,
            max_total_size_mib: 0,
            time_layout: Some("2006-01-02_15-04-05".to_string()),
            time_zone: None,
            cron: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
