//! Monitor configuration
//!
//! Plain serde structs; the binary fills them from environment variables and
//! every threshold has a production default.

use chrono::NaiveTime;
use common::LevelPriority;
use serde::{Deserialize, Serialize};

/// Interaction detector thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Approach-band multiplier for critical levels (< 1 tightens)
    #[serde(default = "default_critical_multiplier")]
    pub critical_multiplier: f64,
    /// Approach-band multiplier for high-priority levels
    #[serde(default = "default_high_multiplier")]
    pub high_multiplier: f64,
    /// Approach-band multiplier for medium-priority levels
    #[serde(default = "default_unit_multiplier")]
    pub medium_multiplier: f64,
    /// Approach-band multiplier for low-priority levels
    #[serde(default = "default_unit_multiplier")]
    pub low_multiplier: f64,
}

impl DetectorConfig {
    /// Multiplier applied to a level's approach distance. The touch band is
    /// never scaled.
    pub fn priority_multiplier(&self, priority: LevelPriority) -> f64 {
        match priority {
            LevelPriority::Critical => self.critical_multiplier,
            LevelPriority::High => self.high_multiplier,
            LevelPriority::Medium => self.medium_multiplier,
            LevelPriority::Low => self.low_multiplier,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            critical_multiplier: default_critical_multiplier(),
            high_multiplier: default_high_multiplier(),
            medium_multiplier: default_unit_multiplier(),
            low_multiplier: default_unit_multiplier(),
        }
    }
}

/// Alert engine policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Recipient handed to the notification sink
    pub recipient: String,
    /// Per-symbol cap on notifications per budget day
    #[serde(default = "default_max_daily_alerts")]
    pub max_daily_alerts: u32,
    /// Suppress notifications outside market hours
    #[serde(default = "default_true")]
    pub market_hours_enabled: bool,
    /// Session open, market-local time
    #[serde(default = "default_market_open")]
    pub market_open: NaiveTime,
    /// Session close, market-local time
    #[serde(default = "default_market_close")]
    pub market_close: NaiveTime,
    /// Market timezone as a fixed offset from UTC, in minutes
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    /// Local time at which the daily budget resets
    #[serde(default = "default_day_boundary")]
    pub day_boundary: NaiveTime,
}

impl AlertConfig {
    /// Policy with production defaults for everything but the recipient
    pub fn new(recipient: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            max_daily_alerts: default_max_daily_alerts(),
            market_hours_enabled: default_true(),
            market_open: default_market_open(),
            market_close: default_market_close(),
            utc_offset_minutes: default_utc_offset_minutes(),
            day_boundary: default_day_boundary(),
        }
    }

    /// Minimum interaction severity that may alert for a level priority.
    /// Critical and high levels alert from approach; medium and low only
    /// from touch.
    pub fn min_severity(&self, priority: LevelPriority) -> u8 {
        match priority {
            LevelPriority::Critical | LevelPriority::High => 0,
            LevelPriority::Medium | LevelPriority::Low => 1,
        }
    }
}

fn default_critical_multiplier() -> f64 {
    0.75
}

fn default_high_multiplier() -> f64 {
    0.9
}

fn default_unit_multiplier() -> f64 {
    1.0
}

fn default_max_daily_alerts() -> u32 {
    20
}

fn default_true() -> bool {
    true
}

fn default_market_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN)
}

fn default_market_close() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn default_utc_offset_minutes() -> i32 {
    // US/Eastern standard time
    -300
}

fn default_day_boundary() -> NaiveTime {
    NaiveTime::MIN
}
