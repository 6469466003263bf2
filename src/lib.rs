//! AILERON Gateway core library

pub mod compression;
pub mod config;
pub mod cron;
pub mod errors;
pub mod http;
pub mod lifecycle;
pub mod logfile;
pub mod observability;
pub mod security;
pub mod session;

pub use config::schema::GatewayConfig;
pub use errors::{ErrorHandler, GatewayError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
