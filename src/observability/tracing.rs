//! Tracing capability for outbound operations.
//!
//! # Responsibilities
//! - Create spans around store round-trips (e.g. the KV session `GET`)
//!
//! # Design Decisions
//! - Consumers depend on the `Tracer` trait only; exporters are wired by the
//!   subscriber, not here

use tracing::Span;

pub trait Tracer: Send + Sync {
    /// Span covering one `operation` against `target`.
    fn span(&self, operation: &'static str, target: &str) -> Span;
}

/// Emits `tracing` spans named after the component.
#[derive(Debug, Clone)]
pub struct SpanTracer {
    component: &'static str,
}

impl SpanTracer {
    pub fn new(component: &'static str) -> Self {
        Self { component }
    }
}

impl Tracer for SpanTracer {
    fn span(&self, operation: &'static str, target: &str) -> Span {
        tracing::info_span!("store_op", component = self.component, operation, target)
    }
}
