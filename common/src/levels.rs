//! Structural level definitions
//!
//! A structural level is a price the operator considers significant: a prior
//! session extreme, a pivot, a value-area boundary. Levels are supplied by an
//! external collaborator (CSV importer, manual entry, persistence store) and
//! consumed here as immutable snapshot data.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of level kinds the monitor understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    /// Daily pivot
    Pivot,
    /// Pivot range high
    PivotHigh,
    /// Pivot range low
    PivotLow,
    /// Weekly pivot
    WeeklyPivot,
    /// Balance area high
    BalanceAreaHigh,
    /// Balance area low
    BalanceAreaLow,
    /// Overnight session high
    OvernightHigh,
    /// Overnight session low
    OvernightLow,
    /// Value area high
    ValueAreaHigh,
    /// Value area low
    ValueAreaLow,
    /// Previous day high
    PrevDayHigh,
    /// Previous day low
    PrevDayLow,
    /// Week open print
    WeekOpen,
    /// Initial balance high
    InitialBalanceHigh,
    /// Initial balance low
    InitialBalanceLow,
}

impl LevelKind {
    /// Stable lowercase name, matching the snapshot file format
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pivot => "pivot",
            Self::PivotHigh => "pivot_high",
            Self::PivotLow => "pivot_low",
            Self::WeeklyPivot => "weekly_pivot",
            Self::BalanceAreaHigh => "balance_area_high",
            Self::BalanceAreaLow => "balance_area_low",
            Self::OvernightHigh => "overnight_high",
            Self::OvernightLow => "overnight_low",
            Self::ValueAreaHigh => "value_area_high",
            Self::ValueAreaLow => "value_area_low",
            Self::PrevDayHigh => "prev_day_high",
            Self::PrevDayLow => "prev_day_low",
            Self::WeekOpen => "week_open",
            Self::InitialBalanceHigh => "initial_balance_high",
            Self::InitialBalanceLow => "initial_balance_low",
        }
    }
}

impl fmt::Display for LevelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level priority classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelPriority {
    /// Reference levels, lowest urgency
    Low,
    /// Standard levels
    Medium,
    /// High-conviction levels
    High,
    /// Must-watch levels
    Critical,
}

impl fmt::Display for LevelPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One operator-defined price level with its interaction thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralLevel {
    /// Trading symbol this level belongs to
    pub symbol: String,
    /// Level price
    pub price: f64,
    /// Level kind; (symbol, kind) identifies a level within a snapshot
    pub kind: LevelKind,
    /// Priority classification
    pub priority: LevelPriority,
    /// Reliability score in [0, 1]
    pub strength: f64,
    /// Timeframe label carried into alert text (e.g. "daily", "weekly")
    pub timeframe: String,
    /// Band (in points) that counts as touching the level
    pub touch_distance: f64,
    /// Band (in points) that counts as approaching the level; wider than
    /// `touch_distance`
    pub approach_distance: f64,
    /// Minimum minutes between two notifications for this level
    pub cooldown_minutes: i64,
}

impl StructuralLevel {
    /// Clamp `strength` into [0, 1]; snapshot sources are not trusted to
    /// keep the score bounded
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.strength = self.strength.clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(LevelKind::BalanceAreaHigh.as_str(), "balance_area_high");
        let json = serde_json::to_string(&LevelKind::OvernightLow).expect("serialize");
        assert_eq!(json, "\"overnight_low\"");
    }

    #[test]
    fn priority_orders_low_to_critical() {
        assert!(LevelPriority::Low < LevelPriority::Medium);
        assert!(LevelPriority::High < LevelPriority::Critical);
    }

    #[test]
    fn strength_is_clamped() {
        let level = StructuralLevel {
            symbol: "ES".to_string(),
            price: 4450.0,
            kind: LevelKind::Pivot,
            priority: LevelPriority::High,
            strength: 1.7,
            timeframe: "daily".to_string(),
            touch_distance: 0.25,
            approach_distance: 2.0,
            cooldown_minutes: 15,
        }
        .clamped();
        assert_eq!(level.strength, 1.0);
    }
}
