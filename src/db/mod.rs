//! Database module for ipwatch.
//!
//! SQLite storage for monitored targets (the registry) and their
//! append-only check history.

mod history;
mod models;
mod store;
mod targets;

pub use models::*;
pub use store::*;
