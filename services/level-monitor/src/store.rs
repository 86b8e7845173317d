//! Snapshot-swap store for structural levels
//!
//! Levels come from an external collaborator (importer, manual entry) as a
//! full snapshot. `load` replaces the whole set atomically: readers hold an
//! `Arc` to the per-symbol vector, so a reload never interleaves with an
//! in-flight detection pass.

use common::StructuralLevel;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::warn;

/// Shared, reload-safe level set
#[derive(Debug, Default)]
pub struct LevelStore {
    by_symbol: RwLock<FxHashMap<String, Arc<Vec<StructuralLevel>>>>,
}

impl LevelStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole level set with a new snapshot.
    ///
    /// Levels with a non-positive or non-finite price are rejected and
    /// logged; strength is clamped into `[0, 1]`. `(symbol, kind)`
    /// identifies a level within a snapshot, so a duplicate kind for the
    /// same symbol keeps the first occurrence and drops the rest. Returns
    /// how many levels were accepted.
    pub fn load(&self, levels: Vec<StructuralLevel>) -> usize {
        let mut next: FxHashMap<String, Vec<StructuralLevel>> = FxHashMap::default();
        let mut accepted = 0usize;
        for level in levels {
            if !level.price.is_finite() || level.price <= 0.0 {
                warn!(
                    symbol = %level.symbol,
                    kind = %level.kind,
                    price = level.price,
                    "rejecting level with unusable price"
                );
                continue;
            }
            let entry = next.entry(level.symbol.clone()).or_default();
            if entry.iter().any(|l| l.kind == level.kind) {
                warn!(
                    symbol = %level.symbol,
                    kind = %level.kind,
                    price = level.price,
                    "rejecting duplicate level kind for symbol"
                );
                continue;
            }
            accepted += 1;
            entry.push(level.clamped());
        }
        let next: FxHashMap<String, Arc<Vec<StructuralLevel>>> = next
            .into_iter()
            .map(|(symbol, levels)| (symbol, Arc::new(levels)))
            .collect();
        *self.by_symbol.write() = next;
        accepted
    }

    /// Snapshot of the levels for one symbol; `None` when the symbol has no
    /// levels loaded
    pub fn get(&self, symbol: &str) -> Option<Arc<Vec<StructuralLevel>>> {
        self.by_symbol.read().get(symbol).cloned()
    }

    /// Symbols with at least one level loaded
    pub fn symbols(&self) -> Vec<String> {
        self.by_symbol.read().keys().cloned().collect()
    }

    /// Total number of loaded levels
    pub fn len(&self) -> usize {
        self.by_symbol.read().values().map(|v| v.len()).sum()
    }

    /// Whether the store holds no levels
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{LevelKind, LevelPriority};

    fn level(symbol: &str, price: f64, kind: LevelKind) -> StructuralLevel {
        StructuralLevel {
            symbol: symbol.to_string(),
            price,
            kind,
            priority: LevelPriority::Medium,
            strength: 0.8,
            timeframe: "daily".to_string(),
            touch_distance: 0.25,
            approach_distance: 2.0,
            cooldown_minutes: 15,
        }
    }

    #[test]
    fn load_replaces_the_whole_snapshot() {
        let store = LevelStore::new();
        store.load(vec![level("ES", 4450.0, LevelKind::Pivot)]);
        assert_eq!(store.len(), 1);

        store.load(vec![
            level("NQ", 15800.0, LevelKind::OvernightHigh),
            level("NQ", 15750.0, LevelKind::OvernightLow),
        ]);
        assert!(store.get("ES").is_none());
        assert_eq!(store.get("NQ").map(|l| l.len()), Some(2));
    }

    #[test]
    fn readers_keep_their_snapshot_across_a_reload() {
        let store = LevelStore::new();
        store.load(vec![level("ES", 4450.0, LevelKind::Pivot)]);
        let held = store.get("ES").expect("snapshot");

        store.load(vec![level("ES", 4500.0, LevelKind::Pivot)]);
        assert_eq!(held[0].price, 4450.0);
        assert_eq!(store.get("ES").expect("snapshot")[0].price, 4500.0);
    }

    #[test]
    fn unusable_prices_are_rejected_and_strength_clamped() {
        let store = LevelStore::new();
        let mut bad = level("ES", -1.0, LevelKind::Pivot);
        bad.strength = 2.0;
        let mut strong = level("ES", 4450.0, LevelKind::PrevDayHigh);
        strong.strength = 1.3;

        let accepted = store.load(vec![bad, strong, level("ES", f64::NAN, LevelKind::WeekOpen)]);
        assert_eq!(accepted, 1);
        let levels = store.get("ES").expect("snapshot");
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].strength, 1.0);
    }

    #[test]
    fn duplicate_kind_for_a_symbol_keeps_the_first_level() {
        let store = LevelStore::new();
        let accepted = store.load(vec![
            level("ES", 4450.0, LevelKind::Pivot),
            level("ES", 4460.0, LevelKind::Pivot),
            level("NQ", 15800.0, LevelKind::Pivot),
        ]);
        assert_eq!(accepted, 2);
        let levels = store.get("ES").expect("snapshot");
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].price, 4450.0);
    }
}
