//! Statistics

pub mod metrics;

pub use metrics::{HubStats, ServerStats, SessionStats, WriterStats};
