//! Venue connection manager
//!
//! Owns the transport, the login handshake, heartbeats and reconnection.
//! One manager instance drives one connection; its state is only changed
//! through [`ConnectionManager::set_state`], which notifies registered
//! listeners synchronously and in registration order.

use crate::codec::{CodecError, FrameCodec, WireMessage, encode};
use crate::config::ConnectionConfig;
use crate::normalizer::Normalizer;
use crate::transport::{FeedTransport, TransportError, TransportFactory};
use common::PriceTick;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// No transport open
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Transport open, not yet logged in
    Connected,
    /// Login frame sent, waiting for the response
    Authenticating,
    /// Logged in and receiving
    Authenticated,
    /// Transport lost, retrying with backoff
    Reconnecting,
    /// Terminal: rejected credentials or reconnect attempts exhausted
    Failed,
}

/// Authentication failures; terminal, never retried automatically
#[derive(Debug, Error)]
pub enum AuthError {
    /// The venue rejected the credentials
    #[error("login rejected (code {code}): {text}")]
    Rejected {
        /// Venue rejection code
        code: u32,
        /// Venue-supplied detail
        text: String,
    },
    /// No login response within the configured window
    #[error("login timed out after {0} ms")]
    Timeout(u64),
    /// Transport failed mid-handshake
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors surfaced by the connection manager's public operations
#[derive(Debug, Error)]
pub enum FeedError {
    /// Transport-level failure
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Authentication failure (terminal)
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// Operation requires an open connection
    #[error("connection is {state:?}")]
    NotConnected {
        /// State the manager was in
        state: ConnectionState,
    },
    /// Reconnect attempts exhausted; the connection is terminally failed
    #[error("gave up after {attempts} reconnect attempts")]
    ReconnectExhausted {
        /// Attempts made before giving up
        attempts: u32,
    },
}

/// Pollable connection counters
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Trade prints received
    pub trades_received: AtomicU64,
    /// Quote updates received
    pub quotes_received: AtomicU64,
    /// Frames dropped as malformed
    pub malformed_frames: AtomicU64,
    /// Well-formed frames with no route
    pub unroutable_frames: AtomicU64,
    /// Transport connect attempts
    pub connection_attempts: AtomicU64,
    /// Heartbeats sent on receive timeout
    pub heartbeats_sent: AtomicU64,
}

/// Point-in-time copy of [`ConnectionStats`]
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatsSnapshot {
    /// Trade prints received
    pub trades_received: u64,
    /// Quote updates received
    pub quotes_received: u64,
    /// Frames dropped as malformed
    pub malformed_frames: u64,
    /// Well-formed frames with no route
    pub unroutable_frames: u64,
    /// Transport connect attempts
    pub connection_attempts: u64,
    /// Heartbeats sent on receive timeout
    pub heartbeats_sent: u64,
}

impl ConnectionStats {
    /// Copy the counters
    pub fn snapshot(&self) -> ConnectionStatsSnapshot {
        ConnectionStatsSnapshot {
            trades_received: self.trades_received.load(Ordering::Relaxed),
            quotes_received: self.quotes_received.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            unroutable_frames: self.unroutable_frames.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
        }
    }
}

/// Listener invoked synchronously on every state transition. Keep it cheap:
/// it runs on the connection's control path.
pub type StateListener = Box<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Subscription {
    symbol: String,
    exchange: String,
}

enum SessionEnd {
    /// Downstream consumer went away; stop cleanly
    DownstreamClosed,
}

/// Manages one streaming connection to the market-data venue
pub struct ConnectionManager {
    config: ConnectionConfig,
    factory: Arc<dyn TransportFactory>,
    transport: Option<Box<dyn FeedTransport>>,
    codec: FrameCodec,
    normalizer: Normalizer,
    state: ConnectionState,
    state_listeners: Vec<StateListener>,
    // Wanted subscription set, kept separate from liveness state so the
    // reconnect replay is testable on its own
    subscriptions: Vec<Subscription>,
    reconnect_attempt: u32,
    stats: Arc<ConnectionStats>,
}

impl ConnectionManager {
    /// Create a manager in the `Disconnected` state
    pub fn new(config: ConnectionConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            config,
            factory,
            transport: None,
            codec: FrameCodec::new(),
            normalizer: Normalizer::new(),
            state: ConnectionState::Disconnected,
            state_listeners: Vec::new(),
            subscriptions: Vec::new(),
            reconnect_attempt: 0,
            stats: Arc::new(ConnectionStats::default()),
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Shared handle to the connection counters
    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Register a state-change listener. Listeners are invoked in
    /// registration order, synchronously with the transition.
    pub fn on_state_change(&mut self, listener: impl Fn(ConnectionState) + Send + Sync + 'static) {
        self.state_listeners.push(Box::new(listener));
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!(from = ?self.state, to = ?state, "connection state transition");
        self.state = state;
        for listener in &self.state_listeners {
            listener(state);
        }
    }

    /// Open the transport: Disconnected -> Connecting -> Connected
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        self.set_state(ConnectionState::Connecting);
        self.stats.connection_attempts.fetch_add(1, Ordering::Relaxed);
        match self.factory.connect(&self.config.endpoint).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.codec.reset();
                self.set_state(ConnectionState::Connected);
                info!(endpoint = %self.config.endpoint, "connected to venue");
                Ok(())
            }
            Err(e) => {
                let fallback = if self.reconnect_attempt > 0 {
                    ConnectionState::Reconnecting
                } else {
                    ConnectionState::Disconnected
                };
                self.set_state(fallback);
                Err(e)
            }
        }
    }

    /// Log in and flush any queued subscriptions.
    ///
    /// Success transitions to `Authenticated`; rejection or timeout
    /// transitions to the terminal `Failed` state and is never retried.
    pub async fn authenticate(&mut self) -> Result<(), AuthError> {
        self.set_state(ConnectionState::Authenticating);
        let login = WireMessage::LoginRequest {
            protocol_version: self.config.protocol_version.clone(),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
            app_name: self.config.app_name.clone(),
            app_version: self.config.app_version.clone(),
        };
        if let Err(e) = self.send(&login).await {
            self.set_state(ConnectionState::Disconnected);
            return Err(e.into());
        }

        let wait = Duration::from_millis(self.config.login_timeout_ms);
        match timeout(wait, self.await_login_response()).await {
            Ok(Ok((0, _))) => {
                self.reconnect_attempt = 0;
                self.set_state(ConnectionState::Authenticated);
                info!(username = %self.config.username, "authenticated");
                if let Err(e) = self.replay_subscriptions().await {
                    self.set_state(ConnectionState::Disconnected);
                    return Err(e.into());
                }
                Ok(())
            }
            Ok(Ok((code, text))) => {
                error!(code, %text, "login rejected");
                self.set_state(ConnectionState::Failed);
                Err(AuthError::Rejected { code, text })
            }
            Ok(Err(e)) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e.into())
            }
            Err(_) => {
                error!(timeout_ms = self.config.login_timeout_ms, "login timed out");
                self.set_state(ConnectionState::Failed);
                Err(AuthError::Timeout(self.config.login_timeout_ms))
            }
        }
    }

    async fn await_login_response(&mut self) -> Result<(u32, String), TransportError> {
        loop {
            match self.next_wire_message().await? {
                WireMessage::LoginResponse { code, text } => return Ok((code, text)),
                other => {
                    debug!(msg_type = other.msg_type(), "ignoring frame during login");
                }
            }
        }
    }

    /// Block until one complete, well-formed frame is available. Malformed
    /// frames are counted and skipped.
    async fn next_wire_message(&mut self) -> Result<WireMessage, TransportError> {
        loop {
            match self.codec.next_frame() {
                Ok(Some(msg)) => return Ok(msg),
                Ok(None) => {}
                Err(e) => {
                    self.stats.malformed_frames.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "dropping malformed frame");
                    continue;
                }
            }
            let transport = self.transport.as_mut().ok_or(TransportError::Closed)?;
            match transport.recv().await? {
                Some(bytes) => self.codec.feed(&bytes),
                None => return Err(TransportError::Closed),
            }
        }
    }

    /// Subscribe to market data for a symbol.
    ///
    /// Fails fast when `Disconnected` or `Failed`. While connecting or
    /// authenticating the subscription is queued and flushed once
    /// authenticated; when already authenticated it is sent immediately.
    /// Either way it joins the wanted set replayed after a reconnect.
    pub async fn subscribe(&mut self, symbol: &str, exchange: &str) -> Result<(), FeedError> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Failed => {
                return Err(FeedError::NotConnected { state: self.state });
            }
            _ => {}
        }
        let sub = Subscription {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
        };
        let already_wanted = self.subscriptions.contains(&sub);
        if !already_wanted {
            self.subscriptions.push(sub.clone());
        }
        if self.state == ConnectionState::Authenticated && !already_wanted {
            self.send(&WireMessage::Subscribe {
                symbol: sub.symbol,
                exchange: sub.exchange,
            })
            .await?;
            info!(symbol, exchange, "subscribed");
        } else if !already_wanted {
            debug!(symbol, exchange, "subscription queued until authenticated");
        }
        Ok(())
    }

    async fn replay_subscriptions(&mut self) -> Result<(), TransportError> {
        let wanted = self.subscriptions.clone();
        for sub in wanted {
            self.send(&WireMessage::Subscribe {
                symbol: sub.symbol.clone(),
                exchange: sub.exchange.clone(),
            })
            .await?;
            debug!(symbol = %sub.symbol, exchange = %sub.exchange, "subscription sent");
        }
        Ok(())
    }

    /// Close the transport and stop. Budgets and subscriptions stay in
    /// memory so a later `connect` + `authenticate` resumes the same set.
    pub async fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.set_state(ConnectionState::Disconnected);
        info!("disconnected");
    }

    /// Receive loop: decode, route, heartbeat, reconnect.
    ///
    /// Runs until the downstream consumer hangs up (`Ok(())`) or the
    /// connection fails terminally (`Err`). Must be called in the
    /// `Authenticated` state.
    pub async fn run(&mut self, tx: mpsc::Sender<PriceTick>) -> Result<(), FeedError> {
        if self.state != ConnectionState::Authenticated {
            return Err(FeedError::NotConnected { state: self.state });
        }
        loop {
            match self.run_session(&tx).await {
                Ok(SessionEnd::DownstreamClosed) => {
                    info!("downstream closed, stopping receive loop");
                    self.disconnect().await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "transport failure, entering reconnect");
                    self.reconnect().await?;
                }
            }
        }
    }

    async fn run_session(&mut self, tx: &mpsc::Sender<PriceTick>) -> Result<SessionEnd, TransportError> {
        let recv_timeout = Duration::from_millis(self.config.recv_timeout_ms);
        let mut misses: u32 = 0;
        loop {
            let received = {
                let transport = self.transport.as_mut().ok_or(TransportError::Closed)?;
                timeout(recv_timeout, transport.recv()).await
            };
            match received {
                // Quiet wire: probe with a heartbeat instead of erroring
                Err(_elapsed) => {
                    misses += 1;
                    if misses > self.config.max_heartbeat_misses {
                        return Err(TransportError::HeartbeatTimeout { misses });
                    }
                    self.send(&WireMessage::Heartbeat).await?;
                    self.stats.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                    debug!(misses, "sent heartbeat after receive timeout");
                }
                Ok(Ok(Some(bytes))) => {
                    misses = 0;
                    self.codec.feed(&bytes);
                    loop {
                        match self.codec.next_frame() {
                            Ok(Some(msg)) => {
                                if self.route(msg, tx).await.is_err() {
                                    return Ok(SessionEnd::DownstreamClosed);
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                self.stats.malformed_frames.fetch_add(1, Ordering::Relaxed);
                                warn!(error = %e, "dropping malformed frame");
                                if matches!(e, CodecError::OversizeFrame(_)) {
                                    // Codec resynced by clearing its buffer
                                    break;
                                }
                            }
                        }
                    }
                }
                Ok(Ok(None)) => return Err(TransportError::Closed),
                Ok(Err(e)) => return Err(e),
            }
        }
    }

    /// Route one decoded frame. `Err(())` means the downstream channel is
    /// closed and the loop should stop.
    async fn route(&mut self, msg: WireMessage, tx: &mpsc::Sender<PriceTick>) -> Result<(), ()> {
        match msg {
            WireMessage::HeartbeatAck => {
                debug!("heartbeat acknowledged");
            }
            WireMessage::LoginResponse { code, text } => {
                debug!(code, %text, "login response outside handshake, ignoring");
            }
            WireMessage::SubscribeResponse { symbol, code } => {
                if code == 0 {
                    debug!(%symbol, "subscription confirmed");
                } else {
                    warn!(%symbol, code, "subscription rejected by venue");
                }
            }
            WireMessage::LastTrade {
                symbol,
                price,
                size,
                ts_nanos,
            } => {
                self.stats.trades_received.fetch_add(1, Ordering::Relaxed);
                if let Some(tick) = self.normalizer.on_trade(&symbol, price, size, ts_nanos) {
                    tx.send(tick).await.map_err(|_| ())?;
                }
            }
            WireMessage::BestBidOffer {
                symbol, bid, ask, ..
            } => {
                self.stats.quotes_received.fetch_add(1, Ordering::Relaxed);
                self.normalizer.on_quote(&symbol, bid, ask);
            }
            WireMessage::Heartbeat | WireMessage::LoginRequest { .. } | WireMessage::Subscribe { .. } => {
                // Client-to-venue types arriving inbound: well-formed, no route
                self.stats.unroutable_frames.fetch_add(1, Ordering::Relaxed);
                debug!(msg_type = msg.msg_type(), "ignoring unroutable frame");
            }
            WireMessage::Unknown { msg_type } => {
                self.stats.unroutable_frames.fetch_add(1, Ordering::Relaxed);
                debug!(msg_type, "ignoring frame with unknown type");
            }
        }
        Ok(())
    }

    /// Exponential-backoff reconnect: connect, authenticate, resubscribe.
    /// Auth rejection stays terminal; transport errors consume attempts
    /// until the configured maximum, then the state goes to `Failed`.
    async fn reconnect(&mut self) -> Result<(), FeedError> {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.set_state(ConnectionState::Reconnecting);

        loop {
            if self.reconnect_attempt >= self.config.max_reconnect_attempts {
                let attempts = self.reconnect_attempt;
                error!(attempts, "reconnect attempts exhausted");
                self.set_state(ConnectionState::Failed);
                return Err(FeedError::ReconnectExhausted { attempts });
            }
            self.reconnect_attempt += 1;
            let delay = backoff_delay(self.config.reconnect_delay_ms, self.reconnect_attempt);
            info!(
                attempt = self.reconnect_attempt,
                max = self.config.max_reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );
            tokio::time::sleep(delay).await;

            match self.connect().await {
                Err(e) => {
                    warn!(error = %e, "reconnect attempt failed");
                    self.set_state(ConnectionState::Reconnecting);
                }
                Ok(()) => match self.authenticate().await {
                    // authenticate() already replayed the subscriptions
                    Ok(()) => return Ok(()),
                    Err(AuthError::Transport(e)) => {
                        warn!(error = %e, "transport failed mid-handshake, retrying");
                        self.transport = None;
                        self.set_state(ConnectionState::Reconnecting);
                    }
                    Err(e) => {
                        error!(error = %e, "authentication failed during reconnect");
                        return Err(e.into());
                    }
                },
            }
        }
    }

    async fn send(&mut self, msg: &WireMessage) -> Result<(), TransportError> {
        let frame = encode(msg).map_err(|e| TransportError::Send(e.to_string()))?;
        let transport = self.transport.as_mut().ok_or(TransportError::Closed)?;
        transport.send(frame).await
    }
}

fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << (attempt.saturating_sub(1)).min(16);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_non_decreasing() {
        let delays: Vec<_> = (1..=5).map(|a| backoff_delay(5_000, a)).collect();
        assert_eq!(delays[0], Duration::from_millis(5_000));
        assert_eq!(delays[1], Duration::from_millis(10_000));
        assert_eq!(delays[2], Duration::from_millis(20_000));
        for pair in delays.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let d = backoff_delay(u64::MAX / 2, 40);
        assert_eq!(d, Duration::from_millis(u64::MAX));
    }
}
