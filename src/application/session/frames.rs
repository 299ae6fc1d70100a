//! Wire Frames
//!
//! Request/response shapes for both feeds, the inbound envelope decoder and
//! the close-code classification that decides whether a dead connection is
//! worth retrying.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::SessionError;

/// Error code embedded in an otherwise well-formed auth reply when the
/// connection token has expired. Expiry is routine: reconnect with a fresh
/// token instead of treating it as a credential problem.
pub const ERR_TOKEN_EXPIRED: u32 = 109;

/// RFC 6455 policy violation; the server refuses this client outright.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Server close for malformed connect/subscribe requests.
pub const CLOSE_BAD_REQUEST: u16 = 3501;
/// Server close for an expired session context.
pub const CLOSE_STALE: u16 = 3005;

/// Public feed method codes.
pub const METHOD_SUBSCRIBE: u32 = 1;
pub const METHOD_UNSUBSCRIBE: u32 = 2;
pub const METHOD_PING: u32 = 7;

/// Private feed authenticate frame: `{"connect":{"token":...},"id":n}`.
#[derive(Debug, Serialize)]
pub struct ConnectRequest {
    pub connect: ConnectParams,
    pub id: u64,
}

#[derive(Debug, Serialize)]
pub struct ConnectParams {
    pub token: String,
}

impl ConnectRequest {
    pub fn new(token: impl Into<String>, id: u64) -> Self {
        ConnectRequest {
            connect: ConnectParams {
                token: token.into(),
            },
            id,
        }
    }
}

/// Private feed subscribe frame: `{"subscribe":{"channel":...},"id":n}`.
#[derive(Debug, Serialize)]
pub struct SubscribeRequest {
    pub subscribe: SubscribeParams,
    pub id: u64,
}

#[derive(Debug, Serialize)]
pub struct SubscribeParams {
    pub channel: String,
}

impl SubscribeRequest {
    pub fn new(channel: impl Into<String>, id: u64) -> Self {
        SubscribeRequest {
            subscribe: SubscribeParams {
                channel: channel.into(),
            },
            id,
        }
    }
}

/// Public feed frame: `{"method":m,"params":{...},"id":n}`.
#[derive(Debug, Serialize)]
pub struct MethodRequest {
    pub method: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: u64,
}

impl MethodRequest {
    pub fn subscribe(channel: &str, id: u64) -> Self {
        MethodRequest {
            method: METHOD_SUBSCRIBE,
            params: Some(serde_json::json!({ "channel": channel })),
            id,
        }
    }

    pub fn unsubscribe(channel: &str, id: u64) -> Self {
        MethodRequest {
            method: METHOD_UNSUBSCRIBE,
            params: Some(serde_json::json!({ "channel": channel })),
            id,
        }
    }

    pub fn ping(id: u64) -> Self {
        MethodRequest {
            method: METHOD_PING,
            params: None,
            id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub code: u32,
    pub message: String,
}

/// Supervisor-facing classification of a finished connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectClass {
    /// Credentials are wrong; retrying would loop against the same
    /// rejection. No reconnect until the operator intervenes.
    AuthFailure,
    /// The session context expired. Expected, reconnect with a fresh token.
    Stale,
    /// Anything else: read error, unexpected close. Retry.
    Retryable,
}

pub fn classify_close(code: u16) -> DisconnectClass {
    match code {
        CLOSE_POLICY_VIOLATION | CLOSE_BAD_REQUEST => DisconnectClass::AuthFailure,
        CLOSE_STALE => DisconnectClass::Stale,
        _ => DisconnectClass::Retryable,
    }
}

/// Decoded inbound frame.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// Correlated reply to a client request.
    Reply {
        id: u64,
        error: Option<ErrorBody>,
        connect: Option<Value>,
        result: Option<Value>,
    },
    /// Server-initiated channel data.
    Push { channel: String, data: Value },
    /// Structurally valid JSON matching no known envelope.
    Unknown,
}

#[derive(Deserialize)]
struct RawFrame {
    id: Option<u64>,
    error: Option<ErrorBody>,
    connect: Option<Value>,
    result: Option<Value>,
    channel: Option<String>,
    data: Option<Value>,
}

/// Decode one inbound frame by trying the known envelope variants in
/// priority order: correlated reply, top-level push, push nested under a
/// `result` envelope. Frames matching none decode to [`Inbound::Unknown`]
/// so callers can log and drop them.
pub fn decode(text: &str) -> Result<Inbound, SessionError> {
    let raw: RawFrame =
        serde_json::from_str(text).map_err(|e| SessionError::Protocol(e.to_string()))?;

    if let Some(id) = raw.id {
        return Ok(Inbound::Reply {
            id,
            error: raw.error,
            connect: raw.connect,
            result: raw.result,
        });
    }
    if let (Some(channel), Some(data)) = (raw.channel, raw.data) {
        return Ok(Inbound::Push { channel, data });
    }
    if let Some(result) = raw.result {
        if let (Some(channel), Some(data)) = (
            result.get("channel").and_then(Value::as_str),
            result.get("data"),
        ) {
            return Ok(Inbound::Push {
                channel: channel.to_string(),
                data: data.clone(),
            });
        }
    }
    Ok(Inbound::Unknown)
}

/// Order update pushed on the private channel. The exchange serializes
/// amounts as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderEvent {
    pub order_id: String,
    pub pair: String,
    pub status: String,
    #[serde(default)]
    pub filled: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
}

impl OrderEvent {
    pub fn filled_amount(&self) -> Option<f64> {
        self.filled.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn fill_price(&self) -> Option<f64> {
        self.price.as_deref().and_then(|s| s.parse().ok())
    }
}
