//! Database schemas for Gatehouse
//!
//! Defines MongoDB document structures for plans, users, and the per-user
//! subscription (entitlement) records.

mod entitlement;
mod metadata;
mod plan;
mod user;

pub use entitlement::{
    compute_active, AccessLevel, EntitlementDoc, ViewedProperty, ENTITLEMENT_COLLECTION,
};
pub use metadata::Metadata;
pub use plan::{PlanDoc, PLAN_COLLECTION};
pub use user::{UserDoc, USER_COLLECTION};
