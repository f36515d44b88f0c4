//! Server statistics

pub mod metrics;

pub use metrics::{BroadcastReport, RejectReason, ServerMetrics, ServerStats};
