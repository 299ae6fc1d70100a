use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by protocol sessions.
///
/// `Transport` and `Stale` never reach strategy code; the reconnection
/// supervisor absorbs them. `Authentication` propagates to the operator
/// facing layer because it requires a credential change.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication rejected (code {code}): {message}")]
    Authentication { code: u32, message: String },

    #[error("session token stale")]
    Stale,

    #[error("already connected")]
    AlreadyConnected,

    #[error("handshake not confirmed within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("could not obtain connection token: {0}")]
    TokenUnavailable(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid pair: {0}")]
    InvalidPair(String),

    #[error("invalid username: {0}")]
    InvalidUsername(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::Authentication {
            code: 101,
            message: "invalid token".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "authentication rejected (code 101): invalid token"
        );
        assert_eq!(SessionError::Stale.to_string(), "session token stale");
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::InvalidAmount("must be positive".to_string());
        assert_eq!(err.to_string(), "invalid amount: must be positive");
    }
}
