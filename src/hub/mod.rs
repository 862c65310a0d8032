//! The `hub` module is the process-wide registry of live clients.
//!
//! - `engine`: the `Hub` itself, its event loop, group membership and queries.
//! - `registry`: the user and group indexes guarded by the hub lock.
//! - `dispatch`: per-user, per-group, per-tenant and global fan-out.

pub mod dispatch;
pub mod engine;
pub mod registry;

pub use engine::{Hub, HubEvent};
pub use registry::{GroupId, UserId};

#[cfg(test)]
mod tests;
