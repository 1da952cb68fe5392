//! BlueChat Shared Types
//!
//! This crate provides the link state, peer identity and notification types
//! exchanged between the connection manager and whatever front-end embeds it.

pub mod error;
pub mod state_machine;

use bytes::Bytes;
use std::fmt;

pub use error::{ChatError, LinkFailure};
pub use state_machine::{is_valid_transition, LinkEvent, LinkStateMachine, TransitionResult};

/// Current state of the point-to-point link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not started yet, or permanently stopped
    #[default]
    None,
    /// Waiting for an inbound connection
    Listening,
    /// Dialing a peer, or promoting an accepted port
    Connecting,
    /// A link pump owns an established port
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::None => write!(f, "none"),
            ConnectionState::Listening => write!(f, "listening"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Identity of the remote device, captured when its port is promoted
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    /// Stable device address (a Bluetooth MAC or a socket address)
    pub address: String,
    /// Human-readable name, falls back to the address
    pub name: String,
}

impl PeerIdentity {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }

    /// Identity for a peer whose name could not be resolved
    pub fn unnamed(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            name: address.clone(),
            address,
        }
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name == self.address {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} ({})", self.name, self.address)
        }
    }
}

/// Events delivered to the observer of a connection manager
///
/// Notifications produced by one role arrive in the order they happened.
/// `StateChanged(Connected)` always precedes the data of that connection, and
/// the `Failure` reported when it is lost always follows its last data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    StateChanged(ConnectionState),
    PeerKnown { name: String },
    /// Bytes read from the peer; the chunk length is `data.len()`
    DataReceived { data: Bytes, peer: PeerIdentity },
    /// Bytes written to the peer
    DataSent { data: Bytes },
    Failure { message: String },
}

impl Notification {
    pub fn failure(failure: LinkFailure) -> Self {
        Notification::Failure {
            message: failure.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_none() {
        assert_eq!(ConnectionState::default(), ConnectionState::None);
    }

    #[test]
    fn test_unnamed_peer_uses_address() {
        let peer = PeerIdentity::unnamed("00:11:22:33:44:55");
        assert_eq!(peer.name, "00:11:22:33:44:55");
        assert_eq!(peer.to_string(), "00:11:22:33:44:55");

        let named = PeerIdentity::new("00:11:22:33:44:55", "phone");
        assert_eq!(named.to_string(), "phone (00:11:22:33:44:55)");
    }

    #[test]
    fn test_failure_notification_messages() {
        assert_eq!(
            Notification::failure(LinkFailure::ConnectFailed),
            Notification::Failure {
                message: "unable to connect".into()
            }
        );
        assert_eq!(
            Notification::failure(LinkFailure::ConnectionLost),
            Notification::Failure {
                message: "connection lost".into()
            }
        );
    }
}
