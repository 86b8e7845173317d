//! Length-prefixed binary frame codec
//!
//! Every frame on the wire is a `u32` big-endian payload length followed by
//! the payload itself: a `u16` big-endian message-type id and the typed
//! fields for that id. Strings are `u16`-length-prefixed UTF-8, numbers are
//! fixed-width big-endian.
//!
//! Decoding distinguishes "need more bytes" (`Ok(None)`) from a malformed
//! frame (`Err`). A malformed frame is consumed and dropped; the connection
//! stays up.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

/// Login request, client -> venue
pub const MSG_LOGIN_REQUEST: u16 = 10;
/// Login response, venue -> client
pub const MSG_LOGIN_RESPONSE: u16 = 11;
/// Heartbeat, client -> venue (no payload beyond the type id)
pub const MSG_HEARTBEAT: u16 = 18;
/// Heartbeat acknowledgement, venue -> client
pub const MSG_HEARTBEAT_ACK: u16 = 19;
/// Market data subscription request, client -> venue
pub const MSG_SUBSCRIBE: u16 = 100;
/// Subscription response, venue -> client
pub const MSG_SUBSCRIBE_RESPONSE: u16 = 101;
/// Last trade update, venue -> client
pub const MSG_LAST_TRADE: u16 = 150;
/// Best bid/offer update, venue -> client
pub const MSG_BEST_BID_OFFER: u16 = 151;

/// Frames larger than this are rejected as malformed
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Frame decoding errors. Truncated input is not an error; see
/// [`FrameCodec::next_frame`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// Declared payload length is implausible; the buffer is resynced
    #[error("frame declares {0} byte payload, maximum is {MAX_FRAME_LEN}")]
    OversizeFrame(usize),
    /// Payload did not parse for its declared message type
    #[error("malformed frame (type {msg_type}): {reason}")]
    MalformedPayload {
        /// Message-type id of the offending frame
        msg_type: u16,
        /// What failed while parsing the payload
        reason: String,
    },
    /// A string field does not fit its `u16` length prefix
    #[error("string field is {0} bytes, maximum is {}", u16::MAX)]
    OversizeString(usize),
}

/// Typed wire messages
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// Credentials and client identity, sent once after connecting
    LoginRequest {
        /// Protocol version string understood by the client
        protocol_version: String,
        /// Account username
        username: String,
        /// Account password
        password: String,
        /// Application identity
        app_name: String,
        /// Application version
        app_version: String,
    },
    /// Venue's answer to a login request; code 0 means accepted
    LoginResponse {
        /// 0 on success, venue-specific rejection code otherwise
        code: u32,
        /// Human-readable detail, may be empty
        text: String,
    },
    /// Liveness probe
    Heartbeat,
    /// Liveness acknowledgement
    HeartbeatAck,
    /// Request market data for one symbol on one exchange
    Subscribe {
        /// Trading symbol
        symbol: String,
        /// Exchange code
        exchange: String,
    },
    /// Venue's answer to a subscription request; code 0 means accepted
    SubscribeResponse {
        /// Symbol the response refers to
        symbol: String,
        /// 0 on success
        code: u32,
    },
    /// A trade print
    LastTrade {
        /// Trading symbol
        symbol: String,
        /// Trade price
        price: f64,
        /// Trade size
        size: u32,
        /// Venue timestamp, nanoseconds since the UNIX epoch
        ts_nanos: u64,
    },
    /// A top-of-book quote update
    BestBidOffer {
        /// Trading symbol
        symbol: String,
        /// Best bid price
        bid: f64,
        /// Best ask price
        ask: f64,
        /// Venue timestamp, nanoseconds since the UNIX epoch
        ts_nanos: u64,
    },
    /// Well-formed frame with a type id this client does not route
    Unknown {
        /// The unrecognised message-type id
        msg_type: u16,
    },
}

impl WireMessage {
    /// Numeric message-type id for this message
    pub fn msg_type(&self) -> u16 {
        match self {
            Self::LoginRequest { .. } => MSG_LOGIN_REQUEST,
            Self::LoginResponse { .. } => MSG_LOGIN_RESPONSE,
            Self::Heartbeat => MSG_HEARTBEAT,
            Self::HeartbeatAck => MSG_HEARTBEAT_ACK,
            Self::Subscribe { .. } => MSG_SUBSCRIBE,
            Self::SubscribeResponse { .. } => MSG_SUBSCRIBE_RESPONSE,
            Self::LastTrade { .. } => MSG_LAST_TRADE,
            Self::BestBidOffer { .. } => MSG_BEST_BID_OFFER,
            Self::Unknown { msg_type } => *msg_type,
        }
    }
}

/// Encode a message into a complete frame (length prefix included).
///
/// Fails with [`CodecError::OversizeString`] when a string field cannot be
/// represented by its `u16` length prefix.
pub fn encode(msg: &WireMessage) -> Result<Vec<u8>, CodecError> {
    let mut payload = Vec::with_capacity(64);
    // Writing to a Vec cannot fail
    payload.write_u16::<BigEndian>(msg.msg_type()).expect("vec write");
    match msg {
        WireMessage::LoginRequest {
            protocol_version,
            username,
            password,
            app_name,
            app_version,
        } => {
            write_string(&mut payload, protocol_version)?;
            write_string(&mut payload, username)?;
            write_string(&mut payload, password)?;
            write_string(&mut payload, app_name)?;
            write_string(&mut payload, app_version)?;
        }
        WireMessage::LoginResponse { code, text } => {
            payload.write_u32::<BigEndian>(*code).expect("vec write");
            write_string(&mut payload, text)?;
        }
        WireMessage::Heartbeat | WireMessage::HeartbeatAck | WireMessage::Unknown { .. } => {}
        WireMessage::Subscribe { symbol, exchange } => {
            write_string(&mut payload, symbol)?;
            write_string(&mut payload, exchange)?;
        }
        WireMessage::SubscribeResponse { symbol, code } => {
            write_string(&mut payload, symbol)?;
            payload.write_u32::<BigEndian>(*code).expect("vec write");
        }
        WireMessage::LastTrade {
            symbol,
            price,
            size,
            ts_nanos,
        } => {
            write_string(&mut payload, symbol)?;
            payload.write_f64::<BigEndian>(*price).expect("vec write");
            payload.write_u32::<BigEndian>(*size).expect("vec write");
            payload.write_u64::<BigEndian>(*ts_nanos).expect("vec write");
        }
        WireMessage::BestBidOffer {
            symbol,
            bid,
            ask,
            ts_nanos,
        } => {
            write_string(&mut payload, symbol)?;
            payload.write_f64::<BigEndian>(*bid).expect("vec write");
            payload.write_f64::<BigEndian>(*ask).expect("vec write");
            payload.write_u64::<BigEndian>(*ts_nanos).expect("vec write");
        }
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame
        .write_u32::<BigEndian>(payload.len() as u32)
        .expect("vec write");
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn write_string(buf: &mut Vec<u8>, s: &str) -> Result<(), CodecError> {
    let len = u16::try_from(s.len()).map_err(|_| CodecError::OversizeString(s.len()))?;
    buf.write_u16::<BigEndian>(len).expect("vec write");
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Streaming frame decoder over an internal reassembly buffer
#[derive(Debug, Default)]
pub struct FrameCodec {
    buf: Vec<u8>,
}

impl FrameCodec {
    /// Create an empty codec
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes to the reassembly buffer
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Discard buffered bytes; used when a transport is replaced
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Try to decode the next complete frame.
    ///
    /// `Ok(None)` means the buffer holds a partial frame and more bytes are
    /// needed. `Err` means the frame was malformed; it has been consumed and
    /// the caller should drop it and keep reading.
    pub fn next_frame(&mut self) -> Result<Option<WireMessage>, CodecError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let declared =
            u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if declared < 2 || declared > MAX_FRAME_LEN {
            // No trustworthy frame boundary; drop the buffer to resync
            self.buf.clear();
            return Err(CodecError::OversizeFrame(declared));
        }
        if self.buf.len() < 4 + declared {
            return Ok(None);
        }
        let payload: Vec<u8> = self.buf.drain(..4 + declared).skip(4).collect();
        decode_payload(&payload)
    }
}

fn decode_payload(payload: &[u8]) -> Result<Option<WireMessage>, CodecError> {
    let mut cur = Cursor::new(payload);
    let msg_type = cur
        .read_u16::<BigEndian>()
        .map_err(|e| malformed(0, &e.to_string()))?;
    let msg = match msg_type {
        MSG_LOGIN_REQUEST => WireMessage::LoginRequest {
            protocol_version: read_string(&mut cur, msg_type)?,
            username: read_string(&mut cur, msg_type)?,
            password: read_string(&mut cur, msg_type)?,
            app_name: read_string(&mut cur, msg_type)?,
            app_version: read_string(&mut cur, msg_type)?,
        },
        MSG_LOGIN_RESPONSE => WireMessage::LoginResponse {
            code: cur
                .read_u32::<BigEndian>()
                .map_err(|e| malformed(msg_type, &e.to_string()))?,
            text: read_string(&mut cur, msg_type)?,
        },
        MSG_HEARTBEAT => WireMessage::Heartbeat,
        MSG_HEARTBEAT_ACK => WireMessage::HeartbeatAck,
        MSG_SUBSCRIBE => WireMessage::Subscribe {
            symbol: read_string(&mut cur, msg_type)?,
            exchange: read_string(&mut cur, msg_type)?,
        },
        MSG_SUBSCRIBE_RESPONSE => WireMessage::SubscribeResponse {
            symbol: read_string(&mut cur, msg_type)?,
            code: cur
                .read_u32::<BigEndian>()
                .map_err(|e| malformed(msg_type, &e.to_string()))?,
        },
        MSG_LAST_TRADE => WireMessage::LastTrade {
            symbol: read_string(&mut cur, msg_type)?,
            price: cur
                .read_f64::<BigEndian>()
                .map_err(|e| malformed(msg_type, &e.to_string()))?,
            size: cur
                .read_u32::<BigEndian>()
                .map_err(|e| malformed(msg_type, &e.to_string()))?,
            ts_nanos: cur
                .read_u64::<BigEndian>()
                .map_err(|e| malformed(msg_type, &e.to_string()))?,
        },
        MSG_BEST_BID_OFFER => WireMessage::BestBidOffer {
            symbol: read_string(&mut cur, msg_type)?,
            bid: cur
                .read_f64::<BigEndian>()
                .map_err(|e| malformed(msg_type, &e.to_string()))?,
            ask: cur
                .read_f64::<BigEndian>()
                .map_err(|e| malformed(msg_type, &e.to_string()))?,
            ts_nanos: cur
                .read_u64::<BigEndian>()
                .map_err(|e| malformed(msg_type, &e.to_string()))?,
        },
        other => WireMessage::Unknown { msg_type: other },
    };
    Ok(Some(msg))
}

fn read_string(cur: &mut Cursor<&[u8]>, msg_type: u16) -> Result<String, CodecError> {
    let len = cur
        .read_u16::<BigEndian>()
        .map_err(|e| malformed(msg_type, &e.to_string()))? as usize;
    let start = cur.position() as usize;
    let slice = cur
        .get_ref()
        .get(start..start + len)
        .ok_or_else(|| malformed(msg_type, "string length past end of payload"))?;
    let s = std::str::from_utf8(slice)
        .map_err(|_| malformed(msg_type, "string is not valid UTF-8"))?
        .to_string();
    cur.set_position((start + len) as u64);
    Ok(s)
}

fn malformed(msg_type: u16, reason: &str) -> CodecError {
    CodecError::MalformedPayload {
        msg_type,
        reason: reason.to_string(),
    }
}
