//! Response compression.
//!
//! # Data Flow
//! ```text
//! request  → negotiate Accept-Encoding (br > gzip)
//! response → decide from the head (length, type, existing encoding)
//!          → borrow encoder from pool → CompressionBody → client
//!          → encoder reset and returned when the body ends or is dropped
//! ```

pub mod body;
pub mod encoder;
pub mod middleware;
pub mod pool;

pub use body::CompressionBody;
pub use encoder::{Encoder, Encoding};
pub use middleware::{compression_middleware, CompressionState};
pub use pool::{EncoderPool, EncoderPools, PooledEncoder};

/// Media types compressed when no whitelist is configured.
pub const DEFAULT_TARGET_MIMES: &[&str] = &[
    "text/plain",
    "text/html",
    "text/css",
    "text/xml",
    "text/javascript",
    "application/json",
    "application/ld+json",
    "application/problem+json",
    "application/xml",
    "application/xhtml+xml",
    "application/javascript",
    "application/x-javascript",
    "image/svg+xml",
];
