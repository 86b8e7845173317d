//! Monitor worker: tick consumer wiring detector and alert engine
//!
//! One bounded channel from the feed loop, one consumer. A single consumer
//! on a single producer's channel keeps per-symbol tick ordering intact.
//! Stopping the feed closes the channel; the worker drains and returns,
//! leaving budgets in memory for a later restart.

use crate::alerts::{AlertDecision, AlertEngine};
use crate::detector::Detector;
use common::{InteractionKind, PriceTick};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Pollable monitor counters
#[derive(Debug, Default)]
pub struct MonitorStats {
    /// Ticks consumed from the feed channel
    pub ticks_processed: AtomicU64,
    /// Approach events emitted
    pub approaches: AtomicU64,
    /// Touch events emitted
    pub touches: AtomicU64,
    /// Breach events emitted
    pub breaches: AtomicU64,
    /// Bounce events emitted
    pub bounces: AtomicU64,
}

/// Point-in-time copy of [`MonitorStats`]
#[derive(Debug, Clone, Copy)]
pub struct MonitorStatsSnapshot {
    /// Ticks consumed from the feed channel
    pub ticks_processed: u64,
    /// Approach events emitted
    pub approaches: u64,
    /// Touch events emitted
    pub touches: u64,
    /// Breach events emitted
    pub breaches: u64,
    /// Bounce events emitted
    pub bounces: u64,
}

impl MonitorStats {
    /// Copy the counters
    pub fn snapshot(&self) -> MonitorStatsSnapshot {
        MonitorStatsSnapshot {
            ticks_processed: self.ticks_processed.load(Ordering::Relaxed),
            approaches: self.approaches.load(Ordering::Relaxed),
            touches: self.touches.load(Ordering::Relaxed),
            breaches: self.breaches.load(Ordering::Relaxed),
            bounces: self.bounces.load(Ordering::Relaxed),
        }
    }

    fn record(&self, kind: InteractionKind) {
        let counter = match kind {
            InteractionKind::Approach => &self.approaches,
            InteractionKind::Touch => &self.touches,
            InteractionKind::Breach => &self.breaches,
            InteractionKind::Bounce => &self.bounces,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Consumes the tick channel until the feed closes it
pub struct LevelMonitor {
    detector: Detector,
    alerts: Arc<AlertEngine>,
    stats: Arc<MonitorStats>,
}

impl LevelMonitor {
    /// Wire a detector to an alert engine
    pub fn new(detector: Detector, alerts: Arc<AlertEngine>) -> Self {
        Self {
            detector,
            alerts,
            stats: Arc::new(MonitorStats::default()),
        }
    }

    /// Shared handle to the monitor counters
    pub fn stats(&self) -> Arc<MonitorStats> {
        Arc::clone(&self.stats)
    }

    /// Worker loop. Sink delivery errors are counted by the alert engine
    /// and recovered here; nothing in this loop is fatal.
    pub async fn run(mut self, mut rx: mpsc::Receiver<PriceTick>) {
        while let Some(tick) = rx.recv().await {
            self.stats.ticks_processed.fetch_add(1, Ordering::Relaxed);
            for event in self.detector.on_tick(&tick) {
                self.stats.record(event.interaction);
                info!(
                    symbol = %event.symbol,
                    kind = %event.level_kind,
                    interaction = %event.interaction,
                    price = event.price,
                    level_price = event.level_price,
                    "level interaction"
                );
                match self.alerts.process(&event).await {
                    Ok(AlertDecision::Sent) => {}
                    Ok(AlertDecision::Suppressed(reason)) => {
                        debug!(symbol = %event.symbol, ?reason, "alert suppressed");
                    }
                    // Already logged and counted by the engine
                    Err(_) => {}
                }
            }
        }
        info!("tick channel closed, monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{NotificationSink, SinkError};
    use crate::config::{AlertConfig, DetectorConfig};
    use crate::store::LevelStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use common::{LevelKind, LevelPriority, StructuralLevel, TradeSide};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CapturingSink {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSink for CapturingSink {
        async fn send(&self, _recipient: &str, message: &str) -> Result<(), SinkError> {
            self.messages.lock().push(message.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn ticks_flow_end_to_end_into_a_notification() {
        let store = Arc::new(LevelStore::new());
        store.load(vec![StructuralLevel {
            symbol: "ES".to_string(),
            price: 4450.0,
            kind: LevelKind::Pivot,
            priority: LevelPriority::Critical,
            strength: 0.9,
            timeframe: "daily".to_string(),
            touch_distance: 0.25,
            approach_distance: 2.0,
            cooldown_minutes: 15,
        }]);
        let sink = Arc::new(CapturingSink::default());
        let engine = Arc::new(AlertEngine::new(
            AlertConfig::new("+15550100"),
            Arc::clone(&store),
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
        ));
        let detector = Detector::new(DetectorConfig::default(), store);
        let monitor = LevelMonitor::new(detector, Arc::clone(&engine));
        let stats = monitor.stats();

        // 14:45 UTC is 09:45 US/Eastern, inside market hours
        let ts = Utc.with_ymd_and_hms(2026, 8, 28, 14, 45, 0).single().expect("valid ts");
        let (tx, rx) = mpsc::channel(16);
        for price in [4455.0, 4451.2, 4450.2] {
            let tick = PriceTick::new("ES", price, ts).with_trade(1, TradeSide::Buy);
            tx.send(tick).await.expect("send");
        }
        drop(tx);
        monitor.run(rx).await;

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.ticks_processed, 3);
        assert_eq!(snapshot.approaches, 1);
        assert_eq!(snapshot.touches, 1);

        let messages = sink.messages.lock();
        // Approach and touch both pass the critical priority gate; the touch
        // is inside the approach's cooldown window for the same level
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("[CRITICAL] ES approach at 4451.20"));
    }
}
