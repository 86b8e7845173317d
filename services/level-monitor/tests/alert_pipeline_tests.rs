//! Alert engine policy tests: market hours, priority gate, cooldown, daily
//! cap, and budget behavior under sink failure. Timing is driven entirely by
//! event timestamps, so no clocks or sleeps are involved.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{
    InteractionKind, LevelInteraction, LevelKind, LevelPriority, StructuralLevel, TradeSide,
};
use level_monitor::{
    AlertConfig, AlertDecision, AlertEngine, LevelStore, NotificationSink, SinkError,
    SuppressReason,
};
use parking_lot::Mutex;
use rstest::{fixture, rstest};
use std::sync::Arc;

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

struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn send(&self, _recipient: &str, _message: &str) -> Result<(), SinkError> {
        Err(SinkError::Rejected("carrier refused".to_string()))
    }
}

fn level(kind: LevelKind, priority: LevelPriority, cooldown_minutes: i64) -> StructuralLevel {
    StructuralLevel {
        symbol: "ES".to_string(),
        price: 4450.0,
        kind,
        priority,
        strength: 0.9,
        timeframe: "daily".to_string(),
        touch_distance: 0.25,
        approach_distance: 2.0,
        cooldown_minutes,
    }
}

fn event(kind: LevelKind, priority: LevelPriority, interaction: InteractionKind, ts: DateTime<Utc>) -> LevelInteraction {
    LevelInteraction {
        symbol: "ES".to_string(),
        level_kind: kind,
        level_price: 4450.0,
        priority,
        timeframe: "daily".to_string(),
        interaction,
        price: 4450.2,
        distance: 0.2,
        side: TradeSide::Buy,
        volume: 2,
        ts,
    }
}

/// 14:45 UTC on a Friday is 09:45 US/Eastern, inside regular hours
#[fixture]
fn open_ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 28, 14, 45, 0)
        .single()
        .expect("valid ts")
}

fn engine_with(
    levels: Vec<StructuralLevel>,
    config: AlertConfig,
    sink: Arc<dyn NotificationSink>,
) -> AlertEngine {
    let store = Arc::new(LevelStore::new());
    store.load(levels);
    AlertEngine::new(config, store, sink)
}

#[rstest]
#[tokio::test]
async fn cooldown_collapses_bursts_to_one_notification(open_ts: DateTime<Utc>) {
    let sink = Arc::new(CapturingSink::default());
    let engine = engine_with(
        vec![level(LevelKind::Pivot, LevelPriority::Medium, 15)],
        AlertConfig::new("+15550100"),
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
    );

    let first = event(LevelKind::Pivot, LevelPriority::Medium, InteractionKind::Touch, open_ts);
    let second = event(
        LevelKind::Pivot,
        LevelPriority::Medium,
        InteractionKind::Touch,
        open_ts + Duration::minutes(5),
    );

    assert_eq!(engine.process(&first).await.unwrap(), AlertDecision::Sent);
    assert_eq!(
        engine.process(&second).await.unwrap(),
        AlertDecision::Suppressed(SuppressReason::Cooldown)
    );
    assert_eq!(sink.messages.lock().len(), 1);
    assert_eq!(engine.stats().snapshot().suppressed_cooldown, 1);
}

#[rstest]
#[tokio::test]
async fn cooldown_expires(open_ts: DateTime<Utc>) {
    let sink = Arc::new(CapturingSink::default());
    let engine = engine_with(
        vec![level(LevelKind::Pivot, LevelPriority::Medium, 15)],
        AlertConfig::new("+15550100"),
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
    );

    let first = event(LevelKind::Pivot, LevelPriority::Medium, InteractionKind::Touch, open_ts);
    let later = event(
        LevelKind::Pivot,
        LevelPriority::Medium,
        InteractionKind::Touch,
        open_ts + Duration::minutes(16),
    );

    assert_eq!(engine.process(&first).await.unwrap(), AlertDecision::Sent);
    assert_eq!(engine.process(&later).await.unwrap(), AlertDecision::Sent);
    assert_eq!(sink.messages.lock().len(), 2);
}

#[rstest]
#[tokio::test]
async fn daily_cap_suppresses_the_third_alert_and_resets_next_day(open_ts: DateTime<Utc>) {
    let sink = Arc::new(CapturingSink::default());
    let mut config = AlertConfig::new("+15550100");
    config.max_daily_alerts = 2;
    let engine = engine_with(
        vec![
            level(LevelKind::Pivot, LevelPriority::Medium, 0),
            level(LevelKind::PrevDayHigh, LevelPriority::Medium, 0),
            level(LevelKind::OvernightLow, LevelPriority::Medium, 0),
        ],
        config,
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
    );

    for kind in [LevelKind::Pivot, LevelKind::PrevDayHigh] {
        let decision = engine
            .process(&event(kind, LevelPriority::Medium, InteractionKind::Touch, open_ts))
            .await
            .unwrap();
        assert_eq!(decision, AlertDecision::Sent);
    }
    // Third qualifying interaction the same day: suppressed, not an error
    let third = engine
        .process(&event(
            LevelKind::OvernightLow,
            LevelPriority::Medium,
            InteractionKind::Touch,
            open_ts,
        ))
        .await
        .unwrap();
    assert_eq!(third, AlertDecision::Suppressed(SuppressReason::DailyCap));
    assert_eq!(engine.stats().snapshot().suppressed_daily_cap, 1);

    // Crossing the day boundary resets the budget
    let next_day = engine
        .process(&event(
            LevelKind::OvernightLow,
            LevelPriority::Medium,
            InteractionKind::Touch,
            open_ts + Duration::days(3),
        ))
        .await
        .unwrap();
    assert_eq!(next_day, AlertDecision::Sent);
}

#[rstest]
#[tokio::test]
async fn market_hours_filter_suppresses_after_the_close(open_ts: DateTime<Utc>) {
    let sink = Arc::new(CapturingSink::default());
    let engine = engine_with(
        vec![level(LevelKind::Pivot, LevelPriority::Medium, 15)],
        AlertConfig::new("+15550100"),
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
    );

    // 01:00 UTC is 20:00 US/Eastern the prior evening
    let after_hours = open_ts + Duration::hours(10);
    let decision = engine
        .process(&event(
            LevelKind::Pivot,
            LevelPriority::Medium,
            InteractionKind::Touch,
            after_hours,
        ))
        .await
        .unwrap();
    assert_eq!(
        decision,
        AlertDecision::Suppressed(SuppressReason::MarketClosed)
    );
    assert!(sink.messages.lock().is_empty());
}

#[rstest]
#[tokio::test]
async fn market_hours_filter_can_be_disabled(open_ts: DateTime<Utc>) {
    let sink = Arc::new(CapturingSink::default());
    let mut config = AlertConfig::new("+15550100");
    config.market_hours_enabled = false;
    let engine = engine_with(
        vec![level(LevelKind::Pivot, LevelPriority::Medium, 15)],
        config,
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
    );

    let after_hours = open_ts + Duration::hours(10);
    let decision = engine
        .process(&event(
            LevelKind::Pivot,
            LevelPriority::Medium,
            InteractionKind::Touch,
            after_hours,
        ))
        .await
        .unwrap();
    assert_eq!(decision, AlertDecision::Sent);
}

#[rstest]
#[case::low_approach_blocked(LevelPriority::Low, InteractionKind::Approach, false)]
#[case::low_touch_allowed(LevelPriority::Low, InteractionKind::Touch, true)]
#[case::critical_approach_allowed(LevelPriority::Critical, InteractionKind::Approach, true)]
#[tokio::test]
async fn priority_gate_filters_by_severity(
    open_ts: DateTime<Utc>,
    #[case] priority: LevelPriority,
    #[case] interaction: InteractionKind,
    #[case] expect_sent: bool,
) {
    let sink = Arc::new(CapturingSink::default());
    let engine = engine_with(
        vec![level(LevelKind::Pivot, priority, 15)],
        AlertConfig::new("+15550100"),
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
    );

    let decision = engine
        .process(&event(LevelKind::Pivot, priority, interaction, open_ts))
        .await
        .unwrap();
    if expect_sent {
        assert_eq!(decision, AlertDecision::Sent);
    } else {
        assert_eq!(
            decision,
            AlertDecision::Suppressed(SuppressReason::BelowSeverity)
        );
        assert_eq!(engine.stats().snapshot().suppressed_severity, 1);
    }
}

#[rstest]
#[tokio::test]
async fn sink_failure_reports_upward_but_keeps_the_budget(open_ts: DateTime<Utc>) {
    let engine = engine_with(
        vec![level(LevelKind::Pivot, LevelPriority::Medium, 15)],
        AlertConfig::new("+15550100"),
        Arc::new(FailingSink),
    );

    let first = event(LevelKind::Pivot, LevelPriority::Medium, InteractionKind::Touch, open_ts);
    assert!(engine.process(&first).await.is_err());

    // The failed attempt still consumed the budget
    let retry = event(
        LevelKind::Pivot,
        LevelPriority::Medium,
        InteractionKind::Touch,
        open_ts + Duration::minutes(5),
    );
    assert_eq!(
        engine.process(&retry).await.unwrap(),
        AlertDecision::Suppressed(SuppressReason::Cooldown)
    );

    let stats = engine.stats().snapshot();
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.sink_failures, 1);
}

#[rstest]
#[tokio::test]
async fn critical_alerts_carry_a_priority_prefix(open_ts: DateTime<Utc>) {
    let sink = Arc::new(CapturingSink::default());
    let engine = engine_with(
        vec![level(LevelKind::BalanceAreaHigh, LevelPriority::Critical, 15)],
        AlertConfig::new("+15550100"),
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
    );

    let breach = event(
        LevelKind::BalanceAreaHigh,
        LevelPriority::Critical,
        InteractionKind::Breach,
        open_ts,
    );
    engine.process(&breach).await.unwrap();

    let messages = sink.messages.lock();
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0],
        "[CRITICAL] ES breach at 4450.20 | balance_area_high 4450.00 (daily) | dist 0.20 | side buy"
    );
}
