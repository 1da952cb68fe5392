//! Connection management for a single point-to-point chat link
//!
//! This module handles:
//! - The link state machine (None, Listening, Connecting, Connected)
//! - Listener and dialer roles racing to produce one port
//! - Promotion of the winning port to a link pump
//! - Fallback to listening when a dial fails or a link drops

mod config;
mod dialer;
mod listener;
mod manager;
mod observer;
mod pump;
mod roles;

pub use config::{ConnectionConfig, TransportConfig, TransportMode};
pub use manager::ConnectionManager;
pub use observer::Observer;
