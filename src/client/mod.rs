//! The `client` module defines one live connection managed by the hub.
//!
//! It provides the `Client` struct, which owns the bounded outbound queue and
//! the lifecycle state of a single connection, and the read/write loops that
//! move frames between that queue and the underlying websocket.

pub mod hub_client;
pub mod pumps;

pub use hub_client::{
    Client, ClientBuilder, ClientId, ClientState, DisconnectHandler, MessageHandler,
};
pub use pumps::PumpHandles;
