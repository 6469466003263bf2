//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Session save:
//!     → serialize session
//!     → encoder.rs (encrypt, then MAC)
//!     → base64 → cookie / KV
//!
//! Session load:
//!     → base64 decode
//!     → encoder.rs (verify MAC, then decrypt)
//!     → deserialize session
//! ```
//!
//! # Design Decisions
//! - Fail closed: a value that fails verification is never decrypted
//! - No trust in client input: tampered cookies yield a fresh session

pub mod encoder;

pub use encoder::{EncoderError, HmacAesEncoder, SecureEncoder};
