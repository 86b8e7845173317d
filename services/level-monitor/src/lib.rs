//! Structural level monitor
//!
//! Consumes the normalized tick stream from the feed connector, tracks each
//! level's interaction state machine, and turns qualifying interactions into
//! rate-limited notifications.

pub mod alerts;
pub mod config;
pub mod detector;
pub mod monitor;
pub mod store;

pub use alerts::{
    AlertDecision, AlertEngine, AlertStats, AlertStatsSnapshot, LogSink, NotificationSink,
    SinkError, SuppressReason,
};
pub use config::{AlertConfig, DetectorConfig};
pub use detector::Detector;
pub use monitor::{LevelMonitor, MonitorStats, MonitorStatsSnapshot};
pub use store::LevelStore;
