//! Error types for the link manager
//!
//! `ChatError` is what callers of the public API can see. `LinkFailure` is
//! never returned; it is reported to the observer as a `Failure` notification.

use thiserror::Error;

/// Synchronous rejections returned by the connection manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Link manager has not been started")]
    NotStarted,

    #[error("Link manager has been stopped")]
    ShutDown,

    #[error("Not connected to a peer")]
    NotConnected,

    #[error("Radio unavailable: {0}")]
    RadioUnavailable(String),

    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),
}

/// Transport failures absorbed by the supervisor
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFailure {
    /// The dialer could not open an outbound port
    #[error("unable to connect")]
    ConnectFailed,

    /// The link pump hit a read or write error
    #[error("connection lost")]
    ConnectionLost,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(ChatError::NotConnected.to_string(), "Not connected to a peer");
        assert_eq!(
            ChatError::RadioUnavailable("no adapter".into()).to_string(),
            "Radio unavailable: no adapter"
        );
    }
}
