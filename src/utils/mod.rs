//! The `utils` module provides shared building blocks used across `hubcast`:
//! the crate-wide error type and logging initialisation.

pub mod error;
pub mod logging;
