//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware chain)
//!     → request.rs (request ID, request span)
//!     → session → compression
//!     → proxy_handler (pre-proxy hook, forward upstream)
//!     → Send to client
//! ```

pub mod request;
pub mod server;

pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::{apply_upstream, AppState, HttpServer, ServerError};
