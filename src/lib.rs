//! BlueChat
//!
//! Manages one point-to-point chat session over a short-range radio link:
//! listening and dialing concurrently, promoting whichever port wins to a
//! duplex byte pump, and reporting every state change and received chunk to
//! an observer.

pub mod connection;
pub mod transport;

pub use bluechat_shared::{ChatError, ConnectionState, LinkFailure, Notification, PeerIdentity};
pub use connection::{ConnectionConfig, ConnectionManager, Observer, TransportConfig, TransportMode};
