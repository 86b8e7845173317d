//! Market-data feed connector
//!
//! Maintains the streaming connection to the venue: login handshake,
//! heartbeats, reconnection with exponential backoff, and decoding of the
//! length-prefixed binary protocol into normalized [`common::PriceTick`]s.

pub mod codec;
pub mod config;
pub mod connection;
pub mod normalizer;
pub mod transport;

pub use codec::{CodecError, FrameCodec, WireMessage};
pub use config::ConnectionConfig;
pub use connection::{
    AuthError, ConnectionManager, ConnectionState, ConnectionStats, ConnectionStatsSnapshot,
    FeedError,
};
pub use normalizer::{Normalizer, classify_side};
pub use transport::{FeedTransport, TransportError, TransportFactory, WsTransportFactory};
