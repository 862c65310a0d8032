//! The `transport` module puts the hub on the network.
//!
//! It accepts WebSocket upgrades, turns each connection into a registered
//! [`Client`](crate::client::Client), and defines the small JSON relay
//! protocol connected clients use to join groups and address each other.

pub mod message;
pub mod websocket;
