//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (compression levels, rotation size)
//! - Check that keys decode and cron expressions compile
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use url::Url;

use crate::compression::pool::{BROTLI_MAX_LEVEL, BROTLI_MIN_LEVEL, GZIP_MAX_LEVEL, GZIP_MIN_LEVEL};
use crate::config::schema::GatewayConfig;
use crate::cron::{CronSchedule, Zone};
use crate::security::encoder::{BLOCK_KEY_LEN, MIN_HASH_KEY_LEN};

/// A single semantic problem, tagged with the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }
    match Url::parse(&config.upstream.url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(_) => errors.push(ValidationError::new("upstream.url", "scheme must be http or https")),
        Err(e) => errors.push(ValidationError::new("upstream.url", e.to_string())),
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    let compression = &config.compression;
    if !(GZIP_MIN_LEVEL..=GZIP_MAX_LEVEL).contains(&compression.gzip_level) {
        errors.push(ValidationError::new(
            "compression.gzip_level",
            format!("must be within {}..={}", GZIP_MIN_LEVEL, GZIP_MAX_LEVEL),
        ));
    }
    if !(BROTLI_MIN_LEVEL..=BROTLI_MAX_LEVEL).contains(&compression.brotli_level) {
        errors.push(ValidationError::new(
            "compression.brotli_level",
            format!("must be within {}..={}", BROTLI_MIN_LEVEL, BROTLI_MAX_LEVEL),
        ));
    }

    let session = &config.session;
    if session.enabled {
        if session.cookie_name.trim().is_empty() {
            errors.push(ValidationError::new("session.cookie_name", "must not be empty"));
        }
        match STANDARD.decode(&session.secure_encoder.hash_key) {
            Ok(key) if key.len() >= MIN_HASH_KEY_LEN => {}
            Ok(key) => errors.push(ValidationError::new(
                "session.secure_encoder.hash_key",
                format!("must be at least {} bytes, got {}", MIN_HASH_KEY_LEN, key.len()),
            )),
            Err(e) => errors.push(ValidationError::new("session.secure_encoder.hash_key", e.to_string())),
        }
        if let Some(block_key) = &session.secure_encoder.block_key {
            match STANDARD.decode(block_key) {
                Ok(key) if key.len() == BLOCK_KEY_LEN => {}
                Ok(key) => errors.push(ValidationError::new(
                    "session.secure_encoder.block_key",
                    format!("must be exactly {} bytes, got {}", BLOCK_KEY_LEN, key.len()),
                )),
                Err(e) => errors.push(ValidationError::new("session.secure_encoder.block_key", e.to_string())),
            }
        }
    }

    if let Some(log_file) = &config.log_file {
        if log_file.file_name.trim().is_empty() {
            errors.push(ValidationError::new("log_file.file_name", "must not be empty"));
        }
        if log_file.rotate_size_mib == 0 {
            errors.push(ValidationError::new("log_file.rotate_size_mib", "must be greater than 0"));
        }
        if let Some(zone) = &log_file.time_zone {
            if let Err(e) = Zone::parse(zone) {
                errors.push(ValidationError::new("log_file.time_zone", e));
            }
        }
        if let Some(cron) = log_file.cron.as_deref().filter(|c| !c.trim().is_empty()) {
            if let Err(e) = CronSchedule::parse(cron) {
                errors.push(ValidationError::new("log_file.cron", e.to_string()));
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
