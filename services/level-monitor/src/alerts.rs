//! Alert engine: policy filters and notification budgeting
//!
//! Consumes interaction events and decides, in order: market hours, priority
//! gate, per-level cooldown, per-symbol daily cap. A suppression is a policy
//! decision, not an error; each reason has its own counter. The budget
//! counts attempts, so a sink failure never resets it.

use crate::config::AlertConfig;
use crate::store::LevelStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use common::{LevelInteraction, LevelKind, LevelPriority};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{info, warn};

/// Cooldown applied when a level disappeared from the store between
/// detection and alerting
const FALLBACK_COOLDOWN_MINUTES: i64 = 15;

/// Notification sink failures; reported upward, budgets stay incremented
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink refused the message
    #[error("delivery rejected: {0}")]
    Rejected(String),
    /// The sink could not be reached
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Narrow contract to the external notification transport
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one message to one recipient
    async fn send(&self, recipient: &str, message: &str) -> Result<(), SinkError>;
}

/// Sink that writes notifications to the log; stands in until a real
/// transport is wired up
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, recipient: &str, message: &str) -> Result<(), SinkError> {
        info!(recipient, message, "notification");
        Ok(())
    }
}

/// Why an event produced no notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Outside the configured market-hours window
    MarketClosed,
    /// Interaction severity below the level priority's minimum
    BelowSeverity,
    /// Within the level's cooldown window
    Cooldown,
    /// Symbol hit its daily notification cap
    DailyCap,
}

/// Outcome of one event through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    /// A notification attempt was made
    Sent,
    /// Suppressed by policy
    Suppressed(SuppressReason),
}

/// Pollable alert counters
#[derive(Debug, Default)]
pub struct AlertStats {
    /// Notification attempts (sink failures included)
    pub sent: AtomicU64,
    /// Suppressed: outside market hours
    pub suppressed_market_closed: AtomicU64,
    /// Suppressed: below the priority gate
    pub suppressed_severity: AtomicU64,
    /// Suppressed: level cooldown
    pub suppressed_cooldown: AtomicU64,
    /// Suppressed: daily cap
    pub suppressed_daily_cap: AtomicU64,
    /// Sink send failures
    pub sink_failures: AtomicU64,
}

/// Point-in-time copy of [`AlertStats`]
#[derive(Debug, Clone, Copy)]
pub struct AlertStatsSnapshot {
    /// Notification attempts
    pub sent: u64,
    /// Suppressed: outside market hours
    pub suppressed_market_closed: u64,
    /// Suppressed: below the priority gate
    pub suppressed_severity: u64,
    /// Suppressed: level cooldown
    pub suppressed_cooldown: u64,
    /// Suppressed: daily cap
    pub suppressed_daily_cap: u64,
    /// Sink send failures
    pub sink_failures: u64,
}

impl AlertStats {
    /// Copy the counters
    pub fn snapshot(&self) -> AlertStatsSnapshot {
        AlertStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            suppressed_market_closed: self.suppressed_market_closed.load(Ordering::Relaxed),
            suppressed_severity: self.suppressed_severity.load(Ordering::Relaxed),
            suppressed_cooldown: self.suppressed_cooldown.load(Ordering::Relaxed),
            suppressed_daily_cap: self.suppressed_daily_cap.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct DailyBudget {
    day: NaiveDate,
    sent_today: u32,
}

/// Decides which interactions become notifications
pub struct AlertEngine {
    config: AlertConfig,
    store: Arc<LevelStore>,
    sink: Arc<dyn NotificationSink>,
    level_budgets: Mutex<FxHashMap<(String, LevelKind), DateTime<Utc>>>,
    daily_budgets: Mutex<FxHashMap<String, DailyBudget>>,
    stats: Arc<AlertStats>,
}

impl AlertEngine {
    /// Engine over the shared level store (for per-level cooldowns) and an
    /// external sink
    pub fn new(config: AlertConfig, store: Arc<LevelStore>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            config,
            store,
            sink,
            level_budgets: Mutex::new(FxHashMap::default()),
            daily_budgets: Mutex::new(FxHashMap::default()),
            stats: Arc::new(AlertStats::default()),
        }
    }

    /// Shared handle to the alert counters
    pub fn stats(&self) -> Arc<AlertStats> {
        Arc::clone(&self.stats)
    }

    /// Run one event through the pipeline. `Err` means the sink refused the
    /// notification; the budget increment stands regardless.
    pub async fn process(&self, event: &LevelInteraction) -> Result<AlertDecision, SinkError> {
        let now = event.ts;

        if self.config.market_hours_enabled && !self.within_market_hours(now) {
            self.stats.suppressed_market_closed.fetch_add(1, Ordering::Relaxed);
            return Ok(AlertDecision::Suppressed(SuppressReason::MarketClosed));
        }

        if event.interaction.severity() < self.config.min_severity(event.priority) {
            self.stats.suppressed_severity.fetch_add(1, Ordering::Relaxed);
            return Ok(AlertDecision::Suppressed(SuppressReason::BelowSeverity));
        }

        {
            let cooldown = Duration::minutes(self.cooldown_minutes(event));
            let key = (event.symbol.clone(), event.level_kind);
            let mut budgets = self.level_budgets.lock();
            if let Some(last) = budgets.get(&key) {
                if now - *last < cooldown {
                    self.stats.suppressed_cooldown.fetch_add(1, Ordering::Relaxed);
                    return Ok(AlertDecision::Suppressed(SuppressReason::Cooldown));
                }
            }

            let day = self.budget_day(now);
            let mut daily = self.daily_budgets.lock();
            let budget = daily.entry(event.symbol.clone()).or_insert(DailyBudget {
                day,
                sent_today: 0,
            });
            if budget.day != day {
                budget.day = day;
                budget.sent_today = 0;
            }
            if budget.sent_today >= self.config.max_daily_alerts {
                self.stats.suppressed_daily_cap.fetch_add(1, Ordering::Relaxed);
                return Ok(AlertDecision::Suppressed(SuppressReason::DailyCap));
            }

            // Attempt committed: the budget models attempts, not confirmed
            // deliveries
            budgets.insert(key, now);
            budget.sent_today += 1;
        }
        self.stats.sent.fetch_add(1, Ordering::Relaxed);

        let message = format_message(event);
        if let Err(e) = self.sink.send(&self.config.recipient, &message).await {
            self.stats.sink_failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, symbol = %event.symbol, "notification delivery failed");
            return Err(e);
        }
        Ok(AlertDecision::Sent)
    }

    fn cooldown_minutes(&self, event: &LevelInteraction) -> i64 {
        self.store
            .get(&event.symbol)
            .and_then(|levels| {
                levels
                    .iter()
                    .find(|l| l.kind == event.level_kind)
                    .map(|l| l.cooldown_minutes)
            })
            .unwrap_or(FALLBACK_COOLDOWN_MINUTES)
    }

    fn within_market_hours(&self, now: DateTime<Utc>) -> bool {
        let t = self.local(now).time();
        let (open, close) = (self.config.market_open, self.config.market_close);
        if open <= close {
            t >= open && t < close
        } else {
            // Overnight session
            t >= open || t < close
        }
    }

    /// Which budget day `now` falls in: days roll over at the configured
    /// local boundary, not at UTC midnight
    fn budget_day(&self, now: DateTime<Utc>) -> NaiveDate {
        let local = self.local(now);
        let date = local.date_naive();
        if local.time() >= self.config.day_boundary {
            date
        } else {
            date.pred_opt().unwrap_or(date)
        }
    }

    fn local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        let offset =
            FixedOffset::east_opt(self.config.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
        now.with_timezone(&offset)
    }
}

fn format_message(event: &LevelInteraction) -> String {
    let prefix = match event.priority {
        LevelPriority::Critical => "[CRITICAL] ",
        LevelPriority::High => "[HIGH] ",
        _ => "",
    };
    format!(
        "{prefix}{symbol} {interaction} at {price:.2} | {kind} {level_price:.2} ({timeframe}) | dist {distance:.2} | side {side}",
        symbol = event.symbol,
        interaction = event.interaction,
        price = event.price,
        kind = event.level_kind,
        level_price = event.level_price,
        timeframe = event.timeframe,
        distance = event.distance,
        side = event.side,
    )
}
