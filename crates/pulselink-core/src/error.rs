use std::fmt;

/// Direction an event travels on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        })
    }
}

/// Error kinds of the relay, grouped by observable surface.
///
/// Per-message failures (`DecodeFailed`, `UnknownClient`, dispatch-level
/// errors) never terminate a session; transport failures do. `WrongDirection`
/// marks API misuse: decoding an outbound-only variant or encoding an
/// inbound-only one.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    #[error("unknown client: {0}")]
    UnknownClient(String),

    #[error("session {0} is gone")]
    SessionGone(String),

    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    #[error("bind violation: {0}")]
    BindViolation(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("{event} does not travel {direction}")]
    WrongDirection {
        event: &'static str,
        direction: Direction,
    },

    #[error("registration denied: {0}")]
    RegistrationDenied(String),
}

impl RelayError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::DecodeFailed(msg.into())
    }

    pub fn inbound_only(event: &'static str) -> Self {
        Self::WrongDirection {
            event,
            direction: Direction::Outbound,
        }
    }

    pub fn outbound_only(event: &'static str) -> Self {
        Self::WrongDirection {
            event,
            direction: Direction::Inbound,
        }
    }

    /// Stable classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DecodeFailed(_) => "decode_failed",
            Self::UnknownClient(_) => "unknown_client",
            Self::SessionGone(_) => "session_gone",
            Self::SerializationFailed(_) => "serialization_failed",
            Self::BindViolation(_) => "bind_violation",
            Self::TransportError(_) => "transport_error",
            Self::WrongDirection { .. } => "wrong_direction",
            Self::RegistrationDenied(_) => "registration_denied",
        }
    }

    /// True for the programmer-error kind: these indicate a bug in the
    /// caller, not a misbehaving peer.
    pub fn is_programmer_error(&self) -> bool {
        matches!(self, Self::WrongDirection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(RelayError::decode("x").kind(), "decode_failed");
        assert_eq!(RelayError::UnknownClient("a".into()).kind(), "unknown_client");
        assert_eq!(RelayError::SessionGone("a".into()).kind(), "session_gone");
        assert_eq!(RelayError::BindViolation("b".into()).kind(), "bind_violation");
        assert_eq!(RelayError::outbound_only("BindToServer").kind(), "wrong_direction");
    }

    #[test]
    fn wrong_direction_is_programmer_error() {
        assert!(RelayError::outbound_only("BindResult").is_programmer_error());
        assert!(RelayError::inbound_only("BindAppToThirdParty").is_programmer_error());
        assert!(!RelayError::decode("bad").is_programmer_error());
    }

    #[test]
    fn display_names_the_direction() {
        let err = RelayError::outbound_only("BindResult");
        assert_eq!(err.to_string(), "BindResult does not travel inbound");
    }
}
