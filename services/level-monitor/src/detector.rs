//! Level interaction detector
//!
//! Tracks a small state machine per (symbol, level kind) and emits exactly
//! one `LevelInteraction` per phase transition. Ticks that keep a level in
//! the same phase emit nothing, which is what keeps tick-level chatter from
//! producing duplicate events.

use crate::config::DetectorConfig;
use crate::store::LevelStore;
use chrono::{DateTime, Utc};
use common::{InteractionKind, LevelInteraction, LevelKind, PriceTick, StructuralLevel};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Neutral,
    Approaching,
    Touching,
    Breached,
    Bounced,
}

#[derive(Debug)]
struct LevelState {
    phase: Phase,
    /// Price of the level this state was built against; a reload that moves
    /// the level resets the excursion
    level_price: f64,
    last_price: f64,
    last_transition_at: DateTime<Utc>,
}

/// Consumes ticks, emits interaction events
pub struct Detector {
    config: DetectorConfig,
    store: Arc<LevelStore>,
    states: FxHashMap<String, FxHashMap<LevelKind, LevelState>>,
}

impl Detector {
    /// Detector over a shared level store
    pub fn new(config: DetectorConfig, store: Arc<LevelStore>) -> Self {
        Self {
            config,
            store,
            states: FxHashMap::default(),
        }
    }

    /// Process one tick against every level of its symbol.
    ///
    /// Returns one event per phase transition; an empty vec when nothing
    /// changed phase.
    pub fn on_tick(&mut self, tick: &PriceTick) -> Vec<LevelInteraction> {
        let Some(levels) = self.store.get(&tick.symbol) else {
            return Vec::new();
        };
        let mut events = Vec::new();
        let symbol_states = self.states.entry(tick.symbol.clone()).or_default();
        for level in levels.iter() {
            if let Some(event) = Self::advance(&self.config, symbol_states, level, tick) {
                events.push(event);
            }
        }
        events
    }

    fn advance(
        config: &DetectorConfig,
        states: &mut FxHashMap<LevelKind, LevelState>,
        level: &StructuralLevel,
        tick: &PriceTick,
    ) -> Option<LevelInteraction> {
        let distance = (tick.price - level.price).abs();
        // Priority scales the approach band only; the touch band stays exact
        let approach = level.approach_distance * config.priority_multiplier(level.priority);
        let touch = level.touch_distance;

        let state = states.entry(level.kind).or_insert_with(|| LevelState {
            phase: Phase::Neutral,
            level_price: level.price,
            last_price: tick.price,
            last_transition_at: tick.ts,
        });
        if (state.level_price - level.price).abs() > f64::EPSILON {
            // The level moved in a reload; the old excursion is meaningless
            state.phase = Phase::Neutral;
            state.level_price = level.price;
        }
        let crossed = (state.last_price - level.price) * (tick.price - level.price) < 0.0;

        let (next, emit) = match state.phase {
            Phase::Neutral if distance <= touch => (Phase::Touching, Some(InteractionKind::Touch)),
            Phase::Neutral if distance <= approach => {
                (Phase::Approaching, Some(InteractionKind::Approach))
            }
            Phase::Neutral => (Phase::Neutral, None),
            Phase::Approaching if distance <= touch => {
                (Phase::Touching, Some(InteractionKind::Touch))
            }
            Phase::Approaching if distance > approach => (Phase::Neutral, None),
            Phase::Approaching => (Phase::Approaching, None),
            Phase::Touching if crossed => (Phase::Breached, Some(InteractionKind::Breach)),
            Phase::Touching if distance > approach => {
                (Phase::Bounced, Some(InteractionKind::Bounce))
            }
            Phase::Touching => (Phase::Touching, None),
            // Hysteresis reset: a later re-approach is a fresh excursion
            Phase::Breached | Phase::Bounced if distance > approach => (Phase::Neutral, None),
            Phase::Breached => (Phase::Breached, None),
            Phase::Bounced => (Phase::Bounced, None),
        };

        if next != state.phase {
            trace!(
                symbol = %tick.symbol,
                kind = %level.kind,
                from = ?state.phase,
                to = ?next,
                price = tick.price,
                "level phase transition"
            );
            state.phase = next;
            state.last_transition_at = tick.ts;
        }
        state.last_price = tick.price;

        emit.map(|interaction| LevelInteraction {
            symbol: tick.symbol.clone(),
            level_kind: level.kind,
            level_price: level.price,
            priority: level.priority,
            timeframe: level.timeframe.clone(),
            interaction,
            price: tick.price,
            distance,
            side: tick.side,
            volume: tick.volume,
            ts: tick.ts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{LevelPriority, TradeSide};

    fn store_with(levels: Vec<StructuralLevel>) -> Arc<LevelStore> {
        let store = Arc::new(LevelStore::new());
        store.load(levels);
        store
    }

    fn pivot(priority: LevelPriority) -> StructuralLevel {
        StructuralLevel {
            symbol: "ES".to_string(),
            price: 4450.0,
            kind: LevelKind::Pivot,
            priority,
            strength: 0.9,
            timeframe: "daily".to_string(),
            touch_distance: 0.25,
            approach_distance: 2.0,
            cooldown_minutes: 15,
        }
    }

    fn tick(price: f64) -> PriceTick {
        PriceTick::new("ES", price, Utc::now()).with_trade(1, TradeSide::Unknown)
    }

    fn kinds(detector: &mut Detector, prices: &[f64]) -> Vec<InteractionKind> {
        prices
            .iter()
            .flat_map(|p| detector.on_tick(&tick(*p)))
            .map(|e| e.interaction)
            .collect()
    }

    #[test]
    fn same_phase_ticks_emit_nothing() {
        let store = store_with(vec![pivot(LevelPriority::Medium)]);
        let mut detector = Detector::new(DetectorConfig::default(), store);

        let events = kinds(&mut detector, &[4451.5, 4451.4, 4451.6, 4451.5]);
        assert_eq!(events, vec![InteractionKind::Approach]);
    }

    #[test]
    fn full_excursion_then_reapproach_counts_each_transition_once() {
        let store = store_with(vec![pivot(LevelPriority::Medium)]);
        let mut detector = Detector::new(DetectorConfig::default(), store);

        // Approach, touch, cross to the other side, leave the band, re-approach
        let events = kinds(&mut detector, &[4455.0, 4451.5, 4450.2, 4449.5, 4447.0, 4448.5]);
        assert_eq!(
            events,
            vec![
                InteractionKind::Approach,
                InteractionKind::Touch,
                InteractionKind::Breach,
                InteractionKind::Approach,
            ]
        );
    }

    #[test]
    fn retreat_without_crossing_is_a_bounce() {
        let store = store_with(vec![pivot(LevelPriority::Medium)]);
        let mut detector = Detector::new(DetectorConfig::default(), store);

        let events = kinds(&mut detector, &[4451.5, 4450.2, 4453.0, 4453.5]);
        assert_eq!(
            events,
            vec![
                InteractionKind::Approach,
                InteractionKind::Touch,
                InteractionKind::Bounce,
            ]
        );
    }

    #[test]
    fn jump_straight_into_the_touch_band() {
        let store = store_with(vec![pivot(LevelPriority::Medium)]);
        let mut detector = Detector::new(DetectorConfig::default(), store);

        let events = kinds(&mut detector, &[4460.0, 4450.1]);
        assert_eq!(events, vec![InteractionKind::Touch]);
    }

    #[test]
    fn critical_levels_use_a_tighter_approach_band() {
        let store = store_with(vec![pivot(LevelPriority::Critical)]);
        let mut detector = Detector::new(DetectorConfig::default(), store);

        // Default critical multiplier 0.75 shrinks the band to 1.5 points
        assert!(detector.on_tick(&tick(4451.8)).is_empty());
        let events = detector.on_tick(&tick(4451.4));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].interaction, InteractionKind::Approach);
    }

    #[test]
    fn touch_band_is_not_scaled_by_priority() {
        let store = store_with(vec![pivot(LevelPriority::Critical)]);
        let mut detector = Detector::new(DetectorConfig::default(), store);

        let events = kinds(&mut detector, &[4451.4, 4450.25]);
        assert_eq!(
            events,
            vec![InteractionKind::Approach, InteractionKind::Touch]
        );
    }

    #[test]
    fn reload_that_moves_the_level_resets_the_excursion() {
        let store = store_with(vec![pivot(LevelPriority::Medium)]);
        let mut detector = Detector::new(DetectorConfig::default(), Arc::clone(&store));

        assert_eq!(
            kinds(&mut detector, &[4451.5]),
            vec![InteractionKind::Approach]
        );

        let mut moved = pivot(LevelPriority::Medium);
        moved.price = 4460.0;
        store.load(vec![moved]);

        // Old excursion gone, fresh approach against the new price
        let events = kinds(&mut detector, &[4458.5]);
        assert_eq!(events, vec![InteractionKind::Approach]);
    }

    #[test]
    fn duplicate_kind_in_a_snapshot_does_not_replay_events() {
        // The store keeps one level per (symbol, kind); a snapshot carrying
        // two pivots must not leave the state ping-ponging between prices
        let mut second = pivot(LevelPriority::Medium);
        second.price = 4460.0;
        let store = store_with(vec![pivot(LevelPriority::Medium), second]);
        let mut detector = Detector::new(DetectorConfig::default(), store);

        let events = kinds(&mut detector, &[4450.2, 4450.2, 4450.2]);
        assert_eq!(events, vec![InteractionKind::Touch]);
    }

    #[test]
    fn unknown_symbol_emits_nothing() {
        let store = store_with(vec![pivot(LevelPriority::Medium)]);
        let mut detector = Detector::new(DetectorConfig::default(), store);
        let mut nq = tick(4451.0);
        nq.symbol = "NQ".to_string();
        assert!(detector.on_tick(&nq).is_empty());
    }
}
