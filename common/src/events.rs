//! Level interaction events emitted by the detector

use crate::levels::{LevelKind, LevelPriority};
use crate::market::TradeSide;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How price interacted with a level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// Price entered the approach band
    Approach,
    /// Price entered the touch band
    Touch,
    /// Price crossed through the level after touching it
    Breach,
    /// Price retreated from the level after touching it, without crossing
    Bounce,
}

impl InteractionKind {
    /// Severity rank used by the alert engine's priority gate
    pub fn severity(&self) -> u8 {
        match self {
            Self::Approach => 0,
            Self::Touch => 1,
            Self::Bounce => 2,
            Self::Breach => 3,
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approach => write!(f, "approach"),
            Self::Touch => write!(f, "touch"),
            Self::Breach => write!(f, "breach"),
            Self::Bounce => write!(f, "bounce"),
        }
    }
}

/// One level interaction, immutable once emitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelInteraction {
    /// Trading symbol
    pub symbol: String,
    /// Kind of the level involved
    pub level_kind: LevelKind,
    /// Price of the level involved
    pub level_price: f64,
    /// Priority of the level involved
    pub priority: LevelPriority,
    /// Timeframe label of the level involved
    pub timeframe: String,
    /// What happened
    pub interaction: InteractionKind,
    /// Tick price that triggered the transition
    pub price: f64,
    /// Absolute distance between tick price and level price
    pub distance: f64,
    /// Aggressor side of the triggering tick
    pub side: TradeSide,
    /// Trade size of the triggering tick
    pub volume: u32,
    /// Event timestamp (from the tick)
    pub ts: DateTime<Utc>,
}
