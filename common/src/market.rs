//! Normalized market data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggressor side of a trade, inferred from the prevailing bid/ask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSide {
    /// Trade lifted the offer (price at or above the ask)
    Buy,
    /// Trade hit the bid (price at or below the bid)
    Sell,
    /// No usable quote, or price strictly inside the spread
    Unknown,
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One normalized price update, produced by the feed connector and consumed
/// once by the interaction detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    /// Trading symbol (e.g. "ES")
    pub symbol: String,
    /// Trade or last-known price
    pub price: f64,
    /// Best bid at the time of the update (0.0 if unknown)
    pub bid: f64,
    /// Best ask at the time of the update (0.0 if unknown)
    pub ask: f64,
    /// Trade size (0 for quote-driven ticks)
    pub volume: u32,
    /// Inferred aggressor side
    pub side: TradeSide,
    /// Event timestamp
    pub ts: DateTime<Utc>,
}

impl PriceTick {
    /// Create a tick with the given symbol and price; remaining fields
    /// default to "unknown"
    pub fn new(symbol: impl Into<String>, price: f64, ts: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            bid: 0.0,
            ask: 0.0,
            volume: 0,
            side: TradeSide::Unknown,
            ts,
        }
    }

    /// Attach quote context
    #[must_use]
    pub fn with_quote(mut self, bid: f64, ask: f64) -> Self {
        self.bid = bid;
        self.ask = ask;
        self
    }

    /// Attach trade context
    #[must_use]
    pub fn with_trade(mut self, volume: u32, side: TradeSide) -> Self {
        self.volume = volume;
        self.side = side;
        self
    }
}
