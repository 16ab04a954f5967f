//! Gatehouse - subscription and view-entitlement backend
//!
//! The core of a rental-marketplace subscription system: a plan catalog,
//! per-user subscription records carrying a metered "view owner contact"
//! quota, an atomic view-metering protocol, and transactional lifecycle
//! operations that keep each user's current-subscription pointer
//! consistent with record state.
//!
//! ## Components
//!
//! - **catalog**: read-only plan lookups
//! - **entitlements**: record store, lifecycle engine, view meter, and
//!   the user pointer synchronizer
//! - **routes** / **server**: hyper HTTP surface under `/api/v1`

pub mod catalog;
pub mod config;
pub mod db;
pub mod entitlements;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{GatehouseError, Result};
