//! # Hubcast
//!
//! `hubcast` is an in-memory realtime connection hub. It keeps track of every
//! live WebSocket connection per user, lets connections join named groups, and
//! fans messages out to a user, a group, a tenant or everyone without ever
//! blocking on a slow peer.
//!
//! ## Core Modules
//!
//! - `client`: One connection with its bounded outbound queue and read/write loops.
//! - `hub`: The registry of users, clients and groups plus the dispatch operations.
//! - `config`: Hub tuning and server settings loaded from file and environment.
//! - `transport`: The WebSocket server and the JSON relay protocol.
//! - `utils`: Error type and logging setup.

pub mod client;
pub mod config;
pub mod hub;
pub mod transport;
pub mod utils;

pub use client::{Client, ClientBuilder, ClientState};
pub use config::HubConfig;
pub use hub::Hub;
pub use utils::error::{HubError, Result};
