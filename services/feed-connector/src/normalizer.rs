//! Trade/quote normalization into `PriceTick`s
//!
//! Keeps the last known bid/ask per symbol so trade prints can be classified
//! by aggressor side. This stage never fails: malformed numeric fields drop
//! the update and bump a counter.

use chrono::{DateTime, TimeZone, Utc};
use common::{PriceTick, TradeSide};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Classify a trade against the prevailing quote.
///
/// With both sides known and positive: at or below the bid is a sell, at or
/// above the ask is a buy, strictly inside the spread is unknown. Without a
/// usable quote the side is unknown.
pub fn classify_side(price: f64, bid: f64, ask: f64) -> TradeSide {
    if bid > 0.0 && ask > 0.0 {
        if price <= bid {
            TradeSide::Sell
        } else if price >= ask {
            TradeSide::Buy
        } else {
            TradeSide::Unknown
        }
    } else {
        TradeSide::Unknown
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Quote {
    bid: f64,
    ask: f64,
}

/// Stateful normalizer, one per connection
#[derive(Debug, Default)]
pub struct Normalizer {
    quotes: FxHashMap<String, Quote>,
    dropped: Arc<AtomicU64>,
}

impl Normalizer {
    /// Create an empty normalizer
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter of updates dropped for malformed numeric fields
    pub fn dropped_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    /// Record a top-of-book update. Quotes only refresh the cached spread;
    /// they do not produce ticks downstream.
    pub fn on_quote(&mut self, symbol: &str, bid: f64, ask: f64) {
        if !bid.is_finite() || !ask.is_finite() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(symbol, bid, ask, "dropping quote with malformed fields");
            return;
        }
        self.quotes.insert(symbol.to_string(), Quote { bid, ask });
    }

    /// Turn a trade print into a normalized tick, or drop it if the numeric
    /// fields are unusable
    pub fn on_trade(
        &mut self,
        symbol: &str,
        price: f64,
        size: u32,
        ts_nanos: u64,
    ) -> Option<PriceTick> {
        if !price.is_finite() || price <= 0.0 || size == 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(symbol, price, size, "dropping trade with malformed fields");
            return None;
        }
        let quote = self.quotes.get(symbol).copied().unwrap_or_default();
        let side = classify_side(price, quote.bid, quote.ask);
        let ts = nanos_to_utc(ts_nanos);
        Some(
            PriceTick::new(symbol, price, ts)
                .with_quote(quote.bid, quote.ask)
                .with_trade(size, side),
        )
    }
}

fn nanos_to_utc(ts_nanos: u64) -> DateTime<Utc> {
    let secs = (ts_nanos / 1_000_000_000) as i64;
    let nanos = (ts_nanos % 1_000_000_000) as u32;
    Utc.timestamp_opt(secs, nanos).single().unwrap_or_else(Utc::now)
}
