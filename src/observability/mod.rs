//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (connection counters and gauges)
//! ```
//!
//! # Design Decisions
//! - Structured logging; JSON output for production, pretty for development
//! - Metric updates are cheap (atomic increments behind the metrics facade);
//!   the exporter is the embedder's concern

pub mod logging;
pub mod metrics;
