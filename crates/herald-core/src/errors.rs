//! Error taxonomy for push delivery.
//!
//! - [`RegistrationError`]: identity missing or invalid at connect time
//! - [`DeliveryError`]: one handle could not take a frame (isolated, never fatal)
//! - [`BusError`]: the shared broadcast bus failed
//! - [`PushError`]: umbrella for callers that surface any of the above

use thiserror::Error;

use crate::ids::HandleId;

/// A connection could not be associated with an identity and must not be registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// No token was presented.
    #[error("missing credentials")]
    MissingCredentials,
    /// The token was well-formed but has expired.
    #[error("credentials expired")]
    Expired,
    /// The token could not be validated.
    #[error("invalid credentials: {0}")]
    InvalidToken(String),
}

/// A single handle did not accept a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The handle was already closed (including a close racing the delivery).
    #[error("handle {handle} is closed")]
    Closed {
        /// Affected handle.
        handle: HandleId,
    },
    /// The handle's outbound queue is full.
    #[error("handle {handle} outbound queue is full")]
    QueueFull {
        /// Affected handle.
        handle: HandleId,
    },
    /// The handle's writer has gone away.
    #[error("handle {handle} writer disconnected")]
    Disconnected {
        /// Affected handle.
        handle: HandleId,
    },
}

impl DeliveryError {
    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Closed { .. } => "closed",
            Self::QueueFull { .. } => "queue_full",
            Self::Disconnected { .. } => "disconnected",
        }
    }
}

/// The shared broadcast bus failed.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus is not reachable right now.
    #[error("bus unavailable: {0}")]
    Unavailable(String),
    /// Transport I/O failed.
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A frame could not be encoded or decoded.
    #[error("bus codec error: {0}")]
    Codec(String),
    /// An envelope could not be serialized.
    #[error("failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Umbrella error for push operations.
#[derive(Debug, Error)]
pub enum PushError {
    /// Connect-time identity failure.
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    /// Per-handle delivery failure.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    /// Broadcast bus failure.
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Result type for push operations.
pub type Result<T> = std::result::Result<T, PushError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_error_display() {
        assert_eq!(RegistrationError::MissingCredentials.to_string(), "missing credentials");
        assert_eq!(
            RegistrationError::InvalidToken("bad signature".into()).to_string(),
            "invalid credentials: bad signature"
        );
    }

    #[test]
    fn delivery_error_names_handle() {
        let err = DeliveryError::Closed {
            handle: HandleId::from("conn_1"),
        };
        assert_eq!(err.to_string(), "handle conn_1 is closed");
        assert_eq!(err.reason(), "closed");
    }

    #[test]
    fn delivery_reasons_are_snake_case() {
        let handle = HandleId::from("h");
        for err in [
            DeliveryError::Closed { handle: handle.clone() },
            DeliveryError::QueueFull { handle: handle.clone() },
            DeliveryError::Disconnected { handle },
        ] {
            assert!(err.reason().chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }

    #[test]
    fn bus_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: BusError = io.into();
        assert!(matches!(err, BusError::Io(_)));
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn push_error_is_transparent() {
        let err: PushError = BusError::Unavailable("hub down".into()).into();
        assert_eq!(err.to_string(), "bus unavailable: hub down");
        assert!(matches!(err, PushError::Bus(_)));
    }
}
